//! Pure builders deriving the Deployment and Service of a Function or Flow.
//!
//! Every builder takes the primary record, its dependency and the previously
//! generated object (if any) and returns the desired object. Builders are
//! deterministic: feeding the output back in as the previous object yields an
//! equivalent object.
use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{HasMetadata, ResourceKind};

mod deployment;
mod service;

pub use deployment::{flow_deployment, function_deployment};
pub use service::function_service;

/// All errors possible to occur while building workloads
#[derive(Debug, Error)]
pub enum BuildError {
    /// A required data key is absent or empty
    #[error("No property `{property}` on the {kind} ConfigMap {name}")]
    MissingProperty {
        /// Data key
        property: &'static str,
        /// Kind of the resource lacking the property
        kind: ResourceKind,
        /// Name of the resource lacking the property
        name: String,
    },
    /// An embedded template could not be parsed
    #[error("Failed to parse YAML from property `{property}` on the {kind} ConfigMap {name}: {source}")]
    InvalidTemplate {
        /// Data key
        property: &'static str,
        /// Kind of the resource holding the template
        kind: ResourceKind,
        /// Name of the resource holding the template
        name: String,
        /// Parser error
        source: serde_yaml::Error,
    },
    /// The Deployment template defines no container to run
    #[error("Deployment template from property `{property}` on the {kind} ConfigMap {name} has no containers")]
    NoContainers {
        /// Data key
        property: &'static str,
        /// Kind of the resource holding the template
        kind: ResourceKind,
        /// Name of the resource holding the template
        name: String,
    },
}

/// A data property of a dependency record holding a template
struct TemplateSource<'a> {
    property: &'static str,
    kind: ResourceKind,
    name: String,
    text: Option<&'a str>,
}

impl<'a> TemplateSource<'a> {
    fn new<R: crate::Record>(record: &R, property: &'static str, text: Option<&'a str>) -> Self {
        Self {
            property,
            kind: R::KIND,
            name: record.object_key().name,
            text,
        }
    }

    fn missing(&self) -> BuildError {
        BuildError::MissingProperty {
            property: self.property,
            kind: self.kind,
            name: self.name.clone(),
        }
    }

    /// Parse the template. `apiVersion` and `kind` are dropped so templates
    /// written against older API groups still load.
    fn parse<T: DeserializeOwned>(&self) -> Result<T, BuildError> {
        let text = self
            .text
            .filter(|t| !t.is_empty())
            .ok_or_else(|| self.missing())?;
        serde_yaml::from_str::<serde_yaml::Value>(text)
            .and_then(|mut value| {
                if let Some(mapping) = value.as_mapping_mut() {
                    mapping.remove("apiVersion");
                    mapping.remove("kind");
                }
                serde_yaml::from_value(value)
            })
            .map_err(|source| BuildError::InvalidTemplate {
                property: self.property,
                kind: self.kind,
                name: self.name.clone(),
                source,
            })
    }

    fn no_containers(&self) -> BuildError {
        BuildError::NoContainers {
            property: self.property,
            kind: self.kind,
            name: self.name.clone(),
        }
    }
}

/// Name, namespace, labels and annotations shared by all derived objects.
///
/// Annotations of the previous generation missing on the template are carried
/// forward, so are labels of the primary resource.
fn derive_metadata(
    template: &mut ObjectMeta,
    primary: &impl HasMetadata,
    previous: Option<&ObjectMeta>,
) {
    let primary_meta = primary.metadata();
    template.name = primary_meta.name.clone();
    template.namespace = primary_meta.namespace.clone();

    let annotations = template.annotations.get_or_insert_with(BTreeMap::new);
    if let Some(previous) = previous.and_then(|p| p.annotations.as_ref()) {
        fill_missing(annotations, previous);
    }
    let labels = template.labels.get_or_insert_with(BTreeMap::new);
    if let Some(primary_labels) = primary_meta.labels.as_ref() {
        fill_missing(labels, primary_labels);
    }
}

/// Copy entries of `from` whose key is absent or empty in `into`
fn fill_missing(into: &mut BTreeMap<String, String>, from: &BTreeMap<String, String>) {
    for (key, value) in from {
        set_default(into, key, value);
    }
}

fn set_default(map: &mut BTreeMap<String, String>, key: &str, value: &str) {
    let entry = map.entry(key.to_owned()).or_default();
    if entry.is_empty() {
        value.clone_into(entry);
    }
}
