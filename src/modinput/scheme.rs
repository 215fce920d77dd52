//! Scheme and validation responses written to stdout

use super::{CERT_VALIDATION_PARAM, PROVIDER_PARAM};
use crate::providers::Provider;
use quick_xml::escape::escape;

/// One argument advertised in the scheme
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: &'static str,
    pub title: &'static str,
    pub description: String,
    pub data_type: &'static str,
}

/// Input scheme introduced to the host by `--scheme`
#[derive(Debug, Clone)]
pub struct Scheme {
    pub title: &'static str,
    pub description: &'static str,
    pub use_external_validation: bool,
    pub streaming_mode: &'static str,
    pub args: Vec<Argument>,
}

impl Scheme {
    /// The fitness input's scheme
    pub fn fitness() -> Self {
        Self {
            title: "Google Fitness",
            description: "Retrieves fitness data from Google Fitness.",
            use_external_validation: true,
            streaming_mode: "simple",
            args: vec![
                Argument {
                    name: CERT_VALIDATION_PARAM,
                    title: "ForceCertValidation",
                    description: "If true the input requires certificate validation when making REST calls to Splunk".to_string(),
                    data_type: "boolean",
                },
                Argument {
                    name: PROVIDER_PARAM,
                    title: "FitnessService",
                    description: format!(
                        "Enter the name of the Fitness Service to be polled.  Options are: {}",
                        Provider::names()
                    ),
                    data_type: "string",
                },
            ],
        }
    }

    pub fn to_xml(&self) -> String {
        let mut args = String::new();
        for arg in &self.args {
            args.push_str(&format!(
                concat!(
                    "      <arg name=\"{}\">\n",
                    "        <title>{}</title>\n",
                    "        <description>{}</description>\n",
                    "        <data_type>{}</data_type>\n",
                    "      </arg>\n"
                ),
                escape(arg.name),
                escape(arg.title),
                escape(arg.description.as_str()),
                escape(arg.data_type),
            ));
        }

        format!(
            concat!(
                "<scheme>\n",
                "  <title>{}</title>\n",
                "  <description>{}</description>\n",
                "  <use_external_validation>{}</use_external_validation>\n",
                "  <streaming_mode>{}</streaming_mode>\n",
                "  <endpoint>\n",
                "    <args>\n",
                "{}",
                "    </args>\n",
                "  </endpoint>\n",
                "</scheme>\n"
            ),
            escape(self.title),
            escape(self.description),
            self.use_external_validation,
            escape(self.streaming_mode),
            args
        )
    }
}

/// Response printed when `--validate-arguments` rejects the configuration
pub fn validation_error_xml(message: &str) -> String {
    format!("<error><message>{}</message></error>\n", escape(message))
}
