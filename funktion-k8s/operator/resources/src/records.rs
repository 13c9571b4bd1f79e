//! Typed records of the ConfigMap encoded kinds.
//!
//! The flat ConfigMap data map is only touched here: everything past
//! [Record::from_config_map] works with named fields.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::warn;

use crate::{
    HasMetadata, ObjectKey, ResourceKind, CONNECTOR_LABEL, KIND_LABEL, RUNTIME_LABEL,
    VERSION_LABEL,
};

/// Connector data key of the Deployment template
pub const DEPLOYMENT_YML_PROPERTY: &str = "deployment.yml";
/// Connector data key of the property schema (JSON schema as YAML)
pub const SCHEMA_YML_PROPERTY: &str = "schema.yml";
/// Flow data key of the flow definition
pub const FUNKTION_YML_PROPERTY: &str = "funktion.yml";
/// Data key of the spring boot `application.properties` file
pub const APPLICATION_PROPERTIES_PROPERTY: &str = "application.properties";
/// Data key of the spring boot `application.yml` file
pub const APPLICATION_YML_PROPERTY: &str = "application.yml";
/// Function data key of the source code
pub const SOURCE_PROPERTY: &str = "source";
/// Function data key of the debug flag
pub const DEBUG_PROPERTY: &str = "debug";
/// Function data key of the newline separated `NAME=VALUE` list
pub const ENV_VARS_PROPERTY: &str = "envVars";
/// Runtime data key of the Deployment template
pub const DEPLOYMENT_PROPERTY: &str = "deployment";
/// Runtime data key of the debug Deployment template
pub const DEPLOYMENT_DEBUG_PROPERTY: &str = "deploymentDebug";
/// Runtime data key of the Service template
pub const SERVICE_PROPERTY: &str = "service";
/// Runtime data key of the debug port
pub const DEBUG_PORT_PROPERTY: &str = "debugPort";
/// Runtime data key of the path function sources are mounted at
pub const SOURCE_MOUNT_PATH_PROPERTY: &str = "sourceMountPath";
/// Runtime data key of the comma separated source file extensions
pub const FILE_EXTENSIONS_PROPERTY: &str = "fileExtensions";

/// Mount path of function sources when the Runtime does not declare one
pub const DEFAULT_SOURCE_MOUNT_PATH: &str = "/funktion";
const DEFAULT_SOURCE_EXTENSION: &str = "js";

/// A kind stored as a labeled ConfigMap
pub trait Record: HasMetadata + Clone + Send + Sync + 'static {
    /// The kind label value identifying this record
    const KIND: ResourceKind;

    /// Read a record from its ConfigMap. Unknown data keys are retained.
    fn from_config_map(config_map: ConfigMap) -> Self;

    /// Encode the record as a ConfigMap carrying the kind label
    fn to_config_map(&self) -> ConfigMap;
}

/// Remove a data entry, treating empty values as absent
fn take(data: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    data.remove(key).filter(|value| !value.is_empty())
}

fn put(data: &mut BTreeMap<String, String>, key: &str, value: Option<&String>) {
    if let Some(value) = value {
        data.insert(key.to_owned(), value.clone());
    }
}

fn split_config_map(config_map: ConfigMap) -> (ObjectMeta, BTreeMap<String, String>) {
    (config_map.metadata, config_map.data.unwrap_or_default())
}

fn assemble<R: Record>(record: &R, data: BTreeMap<String, String>) -> ConfigMap {
    let mut metadata = record.metadata().clone();
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(KIND_LABEL.to_owned(), R::KIND.label_value().to_owned());
    ConfigMap {
        metadata,
        data: Some(data),
        ..ConfigMap::default()
    }
}

/// User function executed by a Runtime
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionRecord {
    /// ConfigMap metadata
    pub metadata: ObjectMeta,
    /// Source code of the function
    pub source: Option<String>,
    /// Whether the debug Deployment template of the Runtime is used
    pub debug: bool,
    /// Environment variables in declaration order
    pub env_vars: Vec<(String, String)>,
    /// Data entries this record does not interpret
    pub extra: BTreeMap<String, String>,
}

impl FunctionRecord {
    /// Name of the Runtime this function references
    pub fn runtime(&self) -> Option<&str> {
        self.label(RUNTIME_LABEL).filter(|r| !r.is_empty())
    }

    /// Cache key of the referenced Runtime
    pub fn runtime_key(&self) -> Option<ObjectKey> {
        let namespace = self.metadata.namespace.as_deref().unwrap_or_default();
        self.runtime()
            .map(|runtime| ObjectKey::from_reference(namespace, runtime))
    }
}

impl HasMetadata for FunctionRecord {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl Record for FunctionRecord {
    const KIND: ResourceKind = ResourceKind::Function;

    fn from_config_map(config_map: ConfigMap) -> Self {
        let (metadata, mut data) = split_config_map(config_map);
        let debug = take(&mut data, DEBUG_PROPERTY).is_some_and(|d| d.eq_ignore_ascii_case("true"));
        let env_vars = take(&mut data, ENV_VARS_PROPERTY)
            .map(|text| parse_env_vars(&text))
            .unwrap_or_default();
        Self {
            metadata,
            source: take(&mut data, SOURCE_PROPERTY),
            debug,
            env_vars,
            extra: data,
        }
    }

    fn to_config_map(&self) -> ConfigMap {
        let mut data = self.extra.clone();
        put(&mut data, SOURCE_PROPERTY, self.source.as_ref());
        if self.debug {
            data.insert(DEBUG_PROPERTY.to_owned(), "true".to_owned());
        }
        if !self.env_vars.is_empty() {
            let text = self
                .env_vars
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("\n");
            data.insert(ENV_VARS_PROPERTY.to_owned(), text);
        }
        assemble(self, data)
    }
}

/// Parse newline separated `NAME=VALUE` pairs. Blank lines are skipped,
/// lines without `=` are dropped with a warning.
pub fn parse_env_vars(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.split_once('=') {
            Some((name, value)) => Some((name.to_owned(), value.to_owned())),
            None => {
                warn!("Ignoring bad environment variable pair. Expecting `NAME=VALUE` but got: {line}");
                None
            }
        })
        .collect()
}

/// Execution environment of functions, e.g. a language runtime image
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuntimeRecord {
    /// ConfigMap metadata
    pub metadata: ObjectMeta,
    /// Deployment template as YAML
    pub deployment: Option<String>,
    /// Deployment template used for functions with debugging enabled
    pub deployment_debug: Option<String>,
    /// Service template as YAML
    pub service: Option<String>,
    /// Port the debugger listens on
    pub debug_port: Option<i32>,
    /// Path function sources are mounted at
    pub source_mount_path: Option<String>,
    /// Source file extensions handled by this runtime, preferred first
    pub file_extensions: Vec<String>,
    /// Data entries this record does not interpret
    pub extra: BTreeMap<String, String>,
}

impl RuntimeRecord {
    /// Mount path of function sources, defaulting to [DEFAULT_SOURCE_MOUNT_PATH]
    pub fn mount_path(&self) -> &str {
        self.source_mount_path
            .as_deref()
            .unwrap_or(DEFAULT_SOURCE_MOUNT_PATH)
    }

    /// File name the function source is mounted as
    pub fn source_file_name(&self) -> String {
        let extension = self
            .file_extensions
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_SOURCE_EXTENSION);
        format!("source.{extension}")
    }

    /// Version label of the runtime
    pub fn version(&self) -> Option<&str> {
        self.label(VERSION_LABEL)
    }
}

impl HasMetadata for RuntimeRecord {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl Record for RuntimeRecord {
    const KIND: ResourceKind = ResourceKind::Runtime;

    fn from_config_map(config_map: ConfigMap) -> Self {
        let (metadata, mut data) = split_config_map(config_map);
        let debug_port = take(&mut data, DEBUG_PORT_PROPERTY).and_then(|port| {
            port.trim()
                .parse()
                .inspect_err(|e| warn!("Ignoring invalid debug port `{port}`: {e}"))
                .ok()
        });
        let file_extensions = take(&mut data, FILE_EXTENSIONS_PROPERTY)
            .map(|exts| {
                exts.split(',')
                    .map(|ext| ext.trim().trim_start_matches('.').to_owned())
                    .filter(|ext| !ext.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            metadata,
            deployment: take(&mut data, DEPLOYMENT_PROPERTY),
            deployment_debug: take(&mut data, DEPLOYMENT_DEBUG_PROPERTY),
            service: take(&mut data, SERVICE_PROPERTY),
            debug_port,
            source_mount_path: take(&mut data, SOURCE_MOUNT_PATH_PROPERTY),
            file_extensions,
            extra: data,
        }
    }

    fn to_config_map(&self) -> ConfigMap {
        let mut data = self.extra.clone();
        put(&mut data, DEPLOYMENT_PROPERTY, self.deployment.as_ref());
        put(&mut data, DEPLOYMENT_DEBUG_PROPERTY, self.deployment_debug.as_ref());
        put(&mut data, SERVICE_PROPERTY, self.service.as_ref());
        put(&mut data, SOURCE_MOUNT_PATH_PROPERTY, self.source_mount_path.as_ref());
        if let Some(port) = self.debug_port {
            data.insert(DEBUG_PORT_PROPERTY.to_owned(), port.to_string());
        }
        if !self.file_extensions.is_empty() {
            data.insert(
                FILE_EXTENSIONS_PROPERTY.to_owned(),
                self.file_extensions.join(","),
            );
        }
        assemble(self, data)
    }
}

/// Event source integration, backed by an external container image
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectorRecord {
    /// ConfigMap metadata
    pub metadata: ObjectMeta,
    /// Deployment template as YAML
    pub deployment_yml: Option<String>,
    /// Schema of the connector properties
    pub schema_yml: Option<String>,
    /// Default spring boot properties copied into new Flows
    pub application_properties: Option<String>,
    /// Data entries this record does not interpret
    pub extra: BTreeMap<String, String>,
}

impl HasMetadata for ConnectorRecord {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl Record for ConnectorRecord {
    const KIND: ResourceKind = ResourceKind::Connector;

    fn from_config_map(config_map: ConfigMap) -> Self {
        let (metadata, mut data) = split_config_map(config_map);
        Self {
            metadata,
            deployment_yml: take(&mut data, DEPLOYMENT_YML_PROPERTY),
            schema_yml: take(&mut data, SCHEMA_YML_PROPERTY),
            application_properties: take(&mut data, APPLICATION_PROPERTIES_PROPERTY),
            extra: data,
        }
    }

    fn to_config_map(&self) -> ConfigMap {
        let mut data = self.extra.clone();
        put(&mut data, DEPLOYMENT_YML_PROPERTY, self.deployment_yml.as_ref());
        put(&mut data, SCHEMA_YML_PROPERTY, self.schema_yml.as_ref());
        put(
            &mut data,
            APPLICATION_PROPERTIES_PROPERTY,
            self.application_properties.as_ref(),
        );
        assemble(self, data)
    }
}

/// Event pipeline run by the Deployment of its Connector
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlowRecord {
    /// ConfigMap metadata
    pub metadata: ObjectMeta,
    /// Flow definition, see [crate::flow::FunktionConfig]
    pub funktion_yml: Option<String>,
    /// Spring boot properties of the connector
    pub application_properties: Option<String>,
    /// Spring boot YAML configuration of the connector
    pub application_yml: Option<String>,
    /// Data entries this record does not interpret
    pub extra: BTreeMap<String, String>,
}

impl FlowRecord {
    /// Name of the Connector this flow references
    pub fn connector(&self) -> Option<&str> {
        self.label(CONNECTOR_LABEL).filter(|c| !c.is_empty())
    }

    /// Cache key of the referenced Connector
    pub fn connector_key(&self) -> Option<ObjectKey> {
        let namespace = self.metadata.namespace.as_deref().unwrap_or_default();
        self.connector()
            .map(|connector| ObjectKey::from_reference(namespace, connector))
    }
}

impl HasMetadata for FlowRecord {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl Record for FlowRecord {
    const KIND: ResourceKind = ResourceKind::Flow;

    fn from_config_map(config_map: ConfigMap) -> Self {
        let (metadata, mut data) = split_config_map(config_map);
        Self {
            metadata,
            funktion_yml: take(&mut data, FUNKTION_YML_PROPERTY),
            application_properties: take(&mut data, APPLICATION_PROPERTIES_PROPERTY),
            application_yml: take(&mut data, APPLICATION_YML_PROPERTY),
            extra: data,
        }
    }

    fn to_config_map(&self) -> ConfigMap {
        let mut data = self.extra.clone();
        put(&mut data, FUNKTION_YML_PROPERTY, self.funktion_yml.as_ref());
        put(
            &mut data,
            APPLICATION_PROPERTIES_PROPERTY,
            self.application_properties.as_ref(),
        );
        put(&mut data, APPLICATION_YML_PROPERTY, self.application_yml.as_ref());
        assemble(self, data)
    }
}
