//! Modular Input Adapter
//!
//! Speaks the host's modular input protocol:
//! - parses the `<input>` / `<items>` configuration delivered on stdin
//! - validates every stanza into a [`PollingInstance`]
//! - renders the scheme and validation error documents

mod input;
mod scheme;

pub use input::{InputConfig, Param, Stanza};
pub use scheme::{validation_error_xml, Argument, Scheme};

use crate::checkpoint::instance_part;
use crate::providers::Provider;

/// Stanza parameter naming the provider to poll
pub const PROVIDER_PARAM: &str = "FitnessService";

/// Stanza parameter enforcing TLS validation against the management port
pub const CERT_VALIDATION_PARAM: &str = "force_cert_validation";

/// A validated stanza
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingInstance {
    /// Full stanza name, e.g. `fitness://daily`
    pub name: String,
    pub provider: Provider,
    pub force_cert_validation: bool,
}

/// Errors in the host-delivered configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Unable to parse configuration: {0}")]
    Xml(String),

    #[error("Configuration is missing <{0}>")]
    MissingElement(&'static str),

    #[error("Stanza '{stanza}' has no '{param}' parameter")]
    MissingParameter { stanza: String, param: &'static str },

    #[error("Stanza '{stanza}' sets '{param}' more than once")]
    DuplicateParameter { stanza: String, param: &'static str },

    #[error("Improper service '{value}' name indicated. Options are: {}", Provider::names())]
    UnsupportedProvider { stanza: String, value: String },

    #[error("Stanza '{stanza}' has an invalid boolean for '{param}': '{value}'")]
    InvalidBoolean {
        stanza: String,
        param: &'static str,
        value: String,
    },

    #[error("Invalid stanza name '{0}'")]
    InvalidStanzaName(String),

    #[error("Unable to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse a host boolean (`1/0`, `true/false`, `t/f`, `yes/no`, `y/n`)
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => Some(true),
        "0" | "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn single_value<'a>(
    stanza: &'a Stanza,
    param: &'static str,
) -> Result<Option<&'a str>, ConfigurationError> {
    let mut values = stanza.values(param);
    let first = values.next();
    if values.next().is_some() {
        return Err(ConfigurationError::DuplicateParameter {
            stanza: stanza.name.clone(),
            param,
        });
    }
    Ok(first)
}

impl Stanza {
    /// Check this stanza and extract its polling settings
    pub fn validate(&self) -> Result<PollingInstance, ConfigurationError> {
        if instance_part(&self.name).is_empty() {
            return Err(ConfigurationError::InvalidStanzaName(self.name.clone()));
        }

        let provider = match single_value(self, PROVIDER_PARAM)? {
            Some(value) => value
                .trim()
                .parse::<Provider>()
                .map_err(|_| ConfigurationError::UnsupportedProvider {
                    stanza: self.name.clone(),
                    value: value.to_string(),
                })?,
            None => {
                return Err(ConfigurationError::MissingParameter {
                    stanza: self.name.clone(),
                    param: PROVIDER_PARAM,
                })
            }
        };

        let force_cert_validation = match single_value(self, CERT_VALIDATION_PARAM)? {
            None => false,
            Some(value) if value.trim().is_empty() => false,
            Some(value) => parse_bool(value).ok_or_else(|| ConfigurationError::InvalidBoolean {
                stanza: self.name.clone(),
                param: CERT_VALIDATION_PARAM,
                value: value.to_string(),
            })?,
        };

        Ok(PollingInstance {
            name: self.name.clone(),
            provider,
            force_cert_validation,
        })
    }
}

impl InputConfig {
    /// Validate every stanza, stopping at the first invalid one
    pub fn validate_stanzas(&self) -> Result<Vec<PollingInstance>, ConfigurationError> {
        self.stanzas.iter().map(Stanza::validate).collect()
    }

    /// Validate a streaming run's configuration
    pub fn validate(&self) -> Result<Vec<PollingInstance>, ConfigurationError> {
        if self.session_key.trim().is_empty() {
            return Err(ConfigurationError::MissingElement("session_key"));
        }
        if self.checkpoint_dir.as_os_str().is_empty() {
            return Err(ConfigurationError::MissingElement("checkpoint_dir"));
        }
        self.validate_stanzas()
    }
}
