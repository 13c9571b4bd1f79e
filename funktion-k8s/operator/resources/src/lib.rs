//! Resource model of the Funktion control plane.
//!
//! Functions, Flows, Connectors and Runtimes are stored as labeled ConfigMaps.
//! This crate holds their typed records, the conversion to and from the flat
//! ConfigMap data map, the connector property schema, and the pure builders
//! deriving Deployments and Services from them.
use std::fmt::{self, Display};

use k8s_openapi::api::{apps::v1::Deployment, core::v1::ConfigMap, core::v1::Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub mod builders;
pub mod flow;
pub mod names;
pub mod records;
pub mod schema;

pub use records::{ConnectorRecord, FlowRecord, FunctionRecord, Record, RuntimeRecord};

/// Label holding the kind of a ConfigMap encoded resource
pub const KIND_LABEL: &str = "funktion.fabric8.io/kind";
/// Label on a Function referencing its Runtime
pub const RUNTIME_LABEL: &str = "runtime";
/// Label on a Flow referencing its Connector
pub const CONNECTOR_LABEL: &str = "connector";
/// Label grouping Functions created from the same folder
pub const PROJECT_LABEL: &str = "project";
/// Label carrying the version of a Runtime or Connector
pub const VERSION_LABEL: &str = "version";
/// Label set on derived Deployments, their selector and pod template
pub const NAME_LABEL: &str = "name";
/// Label marking a Service for exposure by an ingress controller
pub const EXPOSE_LABEL: &str = "expose";
/// Annotation consumed by the configmap controller to roll pods on change
pub const CONFIGMAP_CONTROLLER_ANNOTATION: &str = "configmap.fabric8.io/update-on-change";

/// The user authored kinds stored as ConfigMaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// A user function
    Function,
    /// An event pipeline bound to a Connector
    Flow,
    /// An event source integration
    Connector,
    /// A function execution environment
    Runtime,
}

impl ResourceKind {
    /// Value of the [KIND_LABEL] for this kind
    pub fn label_value(&self) -> &'static str {
        match self {
            ResourceKind::Function => "Function",
            ResourceKind::Flow => "Flow",
            ResourceKind::Connector => "Connector",
            ResourceKind::Runtime => "Runtime",
        }
    }

    /// Label selector matching all ConfigMaps of this kind
    pub fn selector(&self) -> String {
        format!("{KIND_LABEL}={}", self.label_value())
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_value())
    }
}

/// Namespace and name of an object. An empty namespace denotes a cluster
/// scoped object and is left out of the textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectKey {
    /// Namespace of the object, may be empty
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ObjectKey {
    /// Create a new key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Resolve a label reference to another object.
    ///
    /// A reference of the form `namespace/name` is taken as is, a bare name
    /// is looked up in `namespace`.
    pub fn from_reference(namespace: &str, reference: &str) -> Self {
        match reference.split_once('/') {
            Some((ns, name)) => Self::new(ns, name),
            None => Self::new(namespace, reference),
        }
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Access to the metadata of everything the operator caches
pub trait HasMetadata {
    /// Object metadata
    fn metadata(&self) -> &ObjectMeta;

    /// Cache key of this object
    fn object_key(&self) -> ObjectKey {
        let meta = self.metadata();
        ObjectKey::new(
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        )
    }

    /// Opaque version token assigned by the API server
    fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }

    /// Value of a single label
    fn label(&self, key: &str) -> Option<&str> {
        self.metadata()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }
}

impl HasMetadata for Deployment {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl HasMetadata for Service {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl HasMetadata for ConfigMap {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_without_namespace_uses_owner_namespace() {
        let key = ObjectKey::from_reference("team-a", "nodejs");
        assert_eq!(key, ObjectKey::new("team-a", "nodejs"));
        assert_eq!(key.to_string(), "team-a/nodejs");
    }

    #[test]
    fn test_reference_with_namespace_is_kept() {
        let key = ObjectKey::from_reference("team-a", "shared/nodejs");
        assert_eq!(key, ObjectKey::new("shared", "nodejs"));
    }

    #[test]
    fn test_cluster_scoped_key_display() {
        assert_eq!(ObjectKey::new("", "timer").to_string(), "timer");
    }

    #[test]
    fn test_kind_selector() {
        assert_eq!(
            ResourceKind::Connector.selector(),
            "funktion.fabric8.io/kind=Connector"
        );
    }
}
