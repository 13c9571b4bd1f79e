//! The flow definition stored under `funktion.yml` of a Flow.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::FlowRecord;

const FUNCTION_ARG_PREFIX: &str = "fn:";
const SET_BODY_ARG_PREFIX: &str = "setBody:";
const SET_HEADERS_ARG_PREFIX: &str = "setHeaders:";

/// Root of a `funktion.yml` document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FunktionConfig {
    /// Flows run by the connector, usually exactly one
    #[serde(default)]
    pub flows: Vec<Flow>,
}

/// A single pipeline of steps
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    /// Name of the flow, `default` for flows created from arguments
    #[serde(default)]
    pub name: String,
    /// Enables message tracing in the connector
    #[serde(default)]
    pub trace: bool,
    /// Logs the result of the last step
    #[serde(default)]
    pub log_result: bool,
    /// Steps applied to every event in order
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One step of a [Flow]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Step {
    /// Send the event to an endpoint URI; the first endpoint is the event source
    Endpoint {
        /// Endpoint URI, its scheme names the connector
        uri: String,
    },
    /// Invoke a function by name
    Function {
        /// Function name
        name: String,
    },
    /// Replace the message body
    SetBody {
        /// New body
        body: String,
    },
    /// Set message headers
    SetHeaders {
        /// Header names and values
        headers: BTreeMap<String, String>,
    },
}

impl FunktionConfig {
    /// Parse a `funktion.yml` document
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Human readable summary of the first flow, e.g.
    /// `timer://foo => function hello`
    pub fn summary(&self) -> String {
        match self.flows.first() {
            Some(flow) => steps_text(&flow.steps),
            None => "No funktion flows".to_owned(),
        }
    }
}

impl FlowRecord {
    /// Parsed flow definition, `None` if the flow has no `funktion.yml`
    pub fn config(&self) -> Option<Result<FunktionConfig, serde_yaml::Error>> {
        self.funktion_yml.as_deref().map(FunktionConfig::from_yaml)
    }
}

/// Render steps as `a => b => c`
pub fn steps_text(steps: &[Step]) -> String {
    if steps.is_empty() {
        return "No steps!".to_owned();
    }
    steps
        .iter()
        .map(|step| match step {
            Step::Endpoint { uri } => uri.clone(),
            Step::Function { name } => format!("function {name}"),
            Step::SetBody { .. } => "setBody".to_owned(),
            Step::SetHeaders { .. } => "setHeaders".to_owned(),
        })
        .collect::<Vec<_>>()
        .join(" => ")
}

/// Parse steps from arguments of the form `fn:name`, `setBody:content`,
/// `setHeaders:foo:bar,abc:123`; anything else is an endpoint URI.
pub fn parse_steps<S: AsRef<str>>(args: &[S]) -> Result<Vec<Step>, StepParseError> {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            if let Some(name) = arg.strip_prefix(FUNCTION_ARG_PREFIX) {
                if name.is_empty() {
                    return Err(StepParseError::MissingFunctionName);
                }
                Ok(Step::Function {
                    name: name.to_owned(),
                })
            } else if let Some(body) = arg.strip_prefix(SET_BODY_ARG_PREFIX) {
                Ok(Step::SetBody {
                    body: body.to_owned(),
                })
            } else if let Some(headers) = arg.strip_prefix(SET_HEADERS_ARG_PREFIX) {
                if headers.is_empty() {
                    return Err(StepParseError::MissingHeaders);
                }
                Ok(Step::SetHeaders {
                    headers: parse_headers(headers)?,
                })
            } else {
                Ok(Step::Endpoint {
                    uri: arg.to_owned(),
                })
            }
        })
        .collect()
}

fn parse_headers(text: &str) -> Result<BTreeMap<String, String>, StepParseError> {
    text.split(',')
        .map(|kv| {
            kv.split_once(':')
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .ok_or_else(|| StepParseError::InvalidHeader(kv.to_owned()))
        })
        .collect()
}

/// Errors parsing flow steps from arguments
#[derive(Debug, Error, PartialEq)]
pub enum StepParseError {
    /// `fn:` without a name
    #[error("Function name required after fn:")]
    MissingFunctionName,
    /// `setHeaders:` without headers
    #[error("Header name and values required after setHeaders:")]
    MissingHeaders,
    /// A header without `:` separator
    #[error("Missing ':' in header `{0}`")]
    InvalidHeader(String),
}
