//! The property schema a Connector publishes under `schema.yml`.
//!
//! Component properties are configured through the connector's
//! `application.properties` using spring boot style keys, see
//! [component_property_key].
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ConnectorRecord;

const COMPONENT_PROPERTY_PREFIX: &str = "camel.component.";

/// Root of a `schema.yml` document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSchema {
    /// Description of the connector component
    #[serde(default)]
    pub component: ComponentSpec,
    /// Properties configuring the component as a whole
    #[serde(default)]
    pub component_properties: BTreeMap<String, PropertySpec>,
    /// Path and query parameters of an endpoint URI
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySpec>,
}

/// The component implementing a connector
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComponentSpec {
    /// Always `component`
    pub kind: String,
    /// URI scheme of endpoints, e.g. `twitter`
    pub scheme: String,
    /// Endpoint URI syntax, e.g. `twitter:kind`
    pub syntax: String,
    /// Display name
    pub title: String,
    /// Description
    pub description: String,
    /// Comma separated categories
    pub label: String,
    /// Deprecated
    pub deprecated: bool,
    /// Whether the component only supports asynchronous exchanges
    #[serde(rename = "async")]
    pub is_async: bool,
    /// Implementing class
    pub java_type: String,
    /// Maven group id
    pub group_id: String,
    /// Maven artifact id
    pub artifact_id: String,
    /// Component version
    pub version: String,
}

/// A single configurable property
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertySpec {
    /// `property`, `path` or `parameter`
    pub kind: String,
    /// Group shown when listing properties
    pub group: String,
    /// Comma separated categories
    pub label: String,
    /// Required
    pub required: bool,
    /// Value type, e.g. `string`, `integer` or `boolean`
    #[serde(rename = "type")]
    pub type_: String,
    /// Implementing type
    pub java_type: String,
    /// Allowed values, empty if any value is allowed
    #[serde(rename = "enum")]
    pub enum_values: Vec<String>,
    /// Deprecated
    pub deprecated: bool,
    /// Whether the value is a credential
    pub secret: bool,
    /// Description
    pub description: String,
    /// Schemas write defaults both quoted and as plain YAML scalars
    pub default_value: Option<serde_yaml::Value>,
    /// Prefix of all keys of a multi value property
    pub prefix: String,
    /// Prefix the parameter may also be given with
    pub optional_prefix: String,
    /// Whether the property collects all parameters carrying its prefix
    pub multi_value: bool,
}

impl ConnectorSchema {
    /// Parse a `schema.yml` document
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

impl PropertySpec {
    /// Whether the property holds a boolean flag
    pub fn is_boolean(&self) -> bool {
        self.type_ == "boolean"
    }
}

impl ConnectorRecord {
    /// Parsed property schema, `None` if the connector publishes none
    pub fn schema(&self) -> Option<Result<ConnectorSchema, serde_yaml::Error>> {
        self.schema_yml.as_deref().map(ConnectorSchema::from_yaml)
    }
}

/// Key of a component property in the connector's `application.properties`,
/// e.g. `camel.component.twitter.access-token`
pub fn component_property_key(connector: &str, property: &str) -> String {
    format!(
        "{COMPONENT_PROPERTY_PREFIX}{connector}.{}",
        to_spring_boot_property_name(property)
    )
}

/// Turn a camelCase name into a label: words are split on case changes and
/// the first letter is capitalised, so `accessToken` becomes `Access Token`.
pub fn humanize_string(text: &str) -> String {
    let words = un_camel_case_string(text, " ");
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Insert `separator` before every uppercase letter that starts a new word.
/// Runs of uppercase letters are kept together.
pub fn un_camel_case_string(text: &str, separator: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_upper = false;
    for (i, c) in text.chars().enumerate() {
        if c.is_uppercase() {
            if !last_upper && i > 0 {
                out.push_str(separator);
            }
            last_upper = true;
        } else {
            last_upper = false;
        }
        out.push(c);
    }
    out
}

/// Spring boot relaxed binding name of a camelCase property, e.g.
/// `httpProxyHost` becomes `http-proxy-host`
pub fn to_spring_boot_property_name(text: &str) -> String {
    un_camel_case_string(text, "-").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWITTER_SCHEMA: &str = r#"---
component:
  kind: component
  scheme: twitter
  syntax: twitter:kind
  title: Twitter
  description: This component integrates with Twitter to send tweets or search for tweets and more.
  label: api,social
  deprecated: false
  async: false
  javaType: org.apache.camel.component.twitter.TwitterComponent
  groupId: org.apache.camel
  artifactId: camel-twitter
  version: 2.18.1
componentProperties:
  accessToken:
    kind: property
    type: string
    javaType: java.lang.String
    deprecated: false
    secret: false
    description: The access token
  httpProxyPort:
    kind: property
    type: integer
    javaType: int
    deprecated: false
    secret: false
    description: The http proxy port which can be used for the camel-twitter.
properties:
  kind:
    kind: path
    group: common
    required: true
    type: string
    javaType: java.lang.String
    enum:
    - directmessage
    - search
    - timeline/user
    deprecated: false
    secret: false
    description: What polling mode to use direct polling or event based.
  bridgeErrorHandler:
    kind: parameter
    group: consumer
    label: consumer
    type: boolean
    javaType: boolean
    optionalPrefix: consumer.
    deprecated: false
    secret: false
    defaultValue: false
    description: Allows for bridging the consumer to the Camel routing Error Handler.
  count:
    kind: parameter
    group: consumer
    type: integer
    javaType: java.lang.Integer
    deprecated: false
    secret: false
    defaultValue: "1"
    description: Limiting number of results per page.
  scheduler:
    kind: parameter
    group: scheduler
    label: consumer,scheduler
    type: object
    javaType: java.util.Map<java.lang.String,java.lang.Object>
    prefix: scheduler.
    multiValue: true
    deprecated: false
    secret: false
    description: To configure additional properties when using a custom scheduler.
"#;

    #[test]
    fn test_load_connector_schema() {
        let schema = ConnectorSchema::from_yaml(TWITTER_SCHEMA).unwrap();
        assert_eq!(schema.component.kind, "component");
        assert_eq!(schema.component.scheme, "twitter");
        assert_eq!(schema.component.artifact_id, "camel-twitter");
        assert!(!schema.component.is_async);
        assert_eq!(schema.component_properties.len(), 2);
        assert_eq!(schema.properties.len(), 4);

        let kind = &schema.properties["kind"];
        assert!(kind.required);
        assert_eq!(kind.enum_values.len(), 3);
        assert_eq!(schema.component_properties["httpProxyPort"].type_, "integer");
    }

    #[test]
    fn test_default_values_keep_their_yaml_type() {
        let schema = ConnectorSchema::from_yaml(TWITTER_SCHEMA).unwrap();
        let bridge = &schema.properties["bridgeErrorHandler"];
        assert!(bridge.is_boolean());
        assert_eq!(bridge.default_value, Some(serde_yaml::Value::Bool(false)));
        assert_eq!(
            schema.properties["count"].default_value,
            Some(serde_yaml::Value::String("1".into()))
        );

        let scheduler = &schema.properties["scheduler"];
        assert!(scheduler.multi_value);
        assert_eq!(scheduler.prefix, "scheduler.");
        assert_eq!(scheduler.default_value, None);
    }

    #[test]
    fn test_invalid_schema_yaml_is_an_error() {
        assert!(ConnectorSchema::from_yaml("componentProperties: [unclosed").is_err());
        assert!(ConnectorSchema::from_yaml("properties: 42").is_err());
    }

    #[test]
    fn test_connector_record_schema() {
        let mut connector = ConnectorRecord::default();
        assert!(connector.schema().is_none());

        connector.schema_yml = Some(TWITTER_SCHEMA.to_owned());
        let schema = connector.schema().unwrap().unwrap();
        assert_eq!(schema.component.title, "Twitter");
    }

    #[test]
    fn test_humanize_string() {
        assert_eq!(humanize_string("accessToken"), "Access Token");
        assert_eq!(humanize_string("httpProxyHost"), "Http Proxy Host");
        assert_eq!(humanize_string("useSSL"), "Use SSL");
        assert_eq!(humanize_string("x"), "X");
        assert_eq!(humanize_string(""), "");
    }

    #[test]
    fn test_un_camel_case_string() {
        assert_eq!(un_camel_case_string("accessTokenSecret", " "), "access Token Secret");
        assert_eq!(un_camel_case_string("AccessToken", "_"), "Access_Token");
        assert_eq!(un_camel_case_string("sslHTTPPort", "-"), "ssl-HTTPPort");
        assert_eq!(un_camel_case_string("lower", "-"), "lower");
    }

    #[test]
    fn test_spring_boot_property_name() {
        assert_eq!(to_spring_boot_property_name("httpProxyHost"), "http-proxy-host");
        assert_eq!(to_spring_boot_property_name("consumerKey"), "consumer-key");
        assert_eq!(
            component_property_key("twitter", "accessTokenSecret"),
            "camel.component.twitter.access-token-secret"
        );
    }
}
