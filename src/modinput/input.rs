//! Host input XML
//!
//! Two documents share one shape. Streaming runs receive
//!
//! ```text
//! <input>
//!   <server_host/> <server_uri/> <session_key/> <checkpoint_dir/>
//!   <configuration>
//!     <stanza name="fitness://daily"><param name="FitnessService">FitBit</param></stanza>
//!   </configuration>
//! </input>
//! ```
//!
//! and argument validation receives `<items>` whose `<item name>` children
//! may also carry `<param_list name><value>..</value></param_list>`.

use super::ConfigurationError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;

/// One `name = value` pair of a stanza
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub value: String,
}

/// A configured input instance, in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stanza {
    pub name: String,
    pub params: Vec<Param>,
}

impl Stanza {
    /// Every value given for `name`
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.params
            .iter()
            .filter(move |p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// Configuration delivered by the host on stdin
#[derive(Clone, Default, PartialEq, Eq)]
pub struct InputConfig {
    pub server_host: String,
    pub server_uri: String,
    pub session_key: String,
    pub checkpoint_dir: PathBuf,
    pub stanzas: Vec<Stanza>,
}

impl fmt::Debug for InputConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputConfig")
            .field("server_host", &self.server_host)
            .field("server_uri", &self.server_uri)
            .field("session_key", &"<redacted>")
            .field("checkpoint_dir", &self.checkpoint_dir)
            .field("stanzas", &self.stanzas)
            .finish()
    }
}

fn attr_name(e: &BytesStart<'_>) -> Result<String, ConfigurationError> {
    let attr = e
        .try_get_attribute("name")
        .map_err(|err| ConfigurationError::Xml(err.to_string()))?;
    match attr {
        Some(attr) => attr
            .unescape_value()
            .map(|v| v.into_owned())
            .map_err(|err| ConfigurationError::Xml(err.to_string())),
        None => Ok(String::new()),
    }
}

impl InputConfig {
    /// Read and parse the whole document from `reader`
    pub fn read_from(mut reader: impl Read) -> Result<Self, ConfigurationError> {
        let mut xml = String::new();
        reader.read_to_string(&mut xml)?;
        Self::parse(&xml)
    }

    /// Parse an `<input>` or `<items>` document
    pub fn parse(xml: &str) -> Result<Self, ConfigurationError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut config = InputConfig::default();
        let mut root: Option<String> = None;
        let mut text = String::new();
        let mut stanza: Option<Stanza> = None;
        let mut param: Option<String> = None;
        let mut list: Option<String> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| ConfigurationError::Xml(e.to_string()))?;

            match event {
                Event::Start(e) => {
                    text.clear();
                    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if root.is_none() {
                        root = Some(tag.clone());
                    }
                    match tag.as_str() {
                        "stanza" | "item" => {
                            stanza = Some(Stanza {
                                name: attr_name(&e)?,
                                params: Vec::new(),
                            })
                        }
                        "param" => param = Some(attr_name(&e)?),
                        "param_list" => list = Some(attr_name(&e)?),
                        _ => {}
                    }
                }
                Event::Empty(e) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if root.is_none() {
                        root = Some(tag.clone());
                    }
                    match tag.as_str() {
                        "stanza" | "item" => config.stanzas.push(Stanza {
                            name: attr_name(&e)?,
                            params: Vec::new(),
                        }),
                        "param" => {
                            if let Some(s) = stanza.as_mut() {
                                s.params.push(Param {
                                    name: attr_name(&e)?,
                                    value: String::new(),
                                });
                            }
                        }
                        _ => {}
                    }
                }
                Event::Text(t) => {
                    let value = t
                        .unescape()
                        .map_err(|e| ConfigurationError::Xml(e.to_string()))?;
                    text.push_str(&value);
                }
                Event::CData(t) => {
                    text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
                Event::End(e) => {
                    let value = std::mem::take(&mut text);
                    match e.name().as_ref() {
                        b"server_host" => config.server_host = value,
                        b"server_uri" => config.server_uri = value,
                        b"session_key" => config.session_key = value,
                        b"checkpoint_dir" => config.checkpoint_dir = PathBuf::from(value),
                        b"param" => {
                            if let (Some(s), Some(name)) = (stanza.as_mut(), param.take()) {
                                s.params.push(Param { name, value });
                            }
                        }
                        b"value" => {
                            if let (Some(s), Some(name)) = (stanza.as_mut(), list.as_ref()) {
                                s.params.push(Param {
                                    name: name.clone(),
                                    value,
                                });
                            }
                        }
                        b"param_list" => list = None,
                        b"stanza" | b"item" => {
                            if let Some(s) = stanza.take() {
                                config.stanzas.push(s);
                            }
                        }
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        match root.as_deref() {
            Some("input") | Some("items") => Ok(config),
            Some(other) => Err(ConfigurationError::Xml(format!(
                "unexpected root element <{}>",
                other
            ))),
            None => Err(ConfigurationError::MissingElement("input")),
        }
    }
}
