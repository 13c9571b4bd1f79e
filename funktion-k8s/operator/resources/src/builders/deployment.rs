use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, EnvVar, KeyToPath, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{derive_metadata, set_default, BuildError, TemplateSource};
use crate::records::{
    APPLICATION_PROPERTIES_PROPERTY, APPLICATION_YML_PROPERTY, DEPLOYMENT_DEBUG_PROPERTY,
    DEPLOYMENT_PROPERTY, DEPLOYMENT_YML_PROPERTY, FUNKTION_YML_PROPERTY, SOURCE_PROPERTY,
};
use crate::{
    ConnectorRecord, FlowRecord, FunctionRecord, HasMetadata, ResourceKind, RuntimeRecord,
    CONFIGMAP_CONTROLLER_ANNOTATION, NAME_LABEL,
};

const SOURCE_VOLUME: &str = "source";
const CONFIG_VOLUME: &str = "config";
const CONFIG_MOUNT_PATH: &str = "/deployments/config";
const FUNCTION_CONTAINER: &str = "function";
const CONNECTOR_CONTAINER: &str = "connector";

/// Build the Deployment running a Function on its Runtime.
///
/// The Runtime's `deployment` template is used, or `deploymentDebug` if the
/// Function has debugging enabled. The Function's source is mounted from
/// its own ConfigMap and its environment variables override the template's.
pub fn function_deployment(
    function: &FunctionRecord,
    runtime: &RuntimeRecord,
    previous: Option<&Deployment>,
) -> Result<Deployment, BuildError> {
    let template = if function.debug {
        TemplateSource::new(
            runtime,
            DEPLOYMENT_DEBUG_PROPERTY,
            runtime.deployment_debug.as_deref(),
        )
    } else {
        TemplateSource::new(runtime, DEPLOYMENT_PROPERTY, runtime.deployment.as_deref())
    };
    let mut deployment: Deployment = template.parse()?;
    let name = derive_deployment_metadata(&mut deployment, function, previous);

    if function.source.as_deref().map_or(true, str::is_empty) {
        return Err(BuildError::MissingProperty {
            property: SOURCE_PROPERTY,
            kind: ResourceKind::Function,
            name,
        });
    }

    let pod_spec = pod_spec_mut(&mut deployment, &template)?;
    mount_source_volume(pod_spec, &name, runtime);

    let env: Vec<EnvVar> = function
        .env_vars
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..EnvVar::default()
        })
        .collect();
    for container in pod_spec.containers.iter_mut() {
        let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
        if !mounts.iter().any(|m| m.name == SOURCE_VOLUME) {
            mounts.push(VolumeMount {
                name: SOURCE_VOLUME.to_owned(),
                mount_path: runtime.mount_path().to_owned(),
                read_only: Some(true),
                ..VolumeMount::default()
            });
        }
        if !env.is_empty() {
            // Function variables win, a template `valueFrom` is dropped
            k8s_openapi::merge_strategies::list::map(
                container.env.get_or_insert_with(Vec::new),
                env.clone(),
                &[|current, new| current.name == new.name],
                |current, new| {
                    current.value = new.value;
                    current.value_from = None;
                },
            );
        }
    }
    default_first_container_name(pod_spec, FUNCTION_CONTAINER);
    set_name_label(&mut deployment, &name);
    Ok(deployment)
}

/// Build the Deployment running a Flow on its Connector.
///
/// The Flow's configuration files are mounted read-only into every container
/// of the Connector's `deployment.yml` template.
pub fn flow_deployment(
    flow: &FlowRecord,
    connector: &ConnectorRecord,
    previous: Option<&Deployment>,
) -> Result<Deployment, BuildError> {
    let template = TemplateSource::new(
        connector,
        DEPLOYMENT_YML_PROPERTY,
        connector.deployment_yml.as_deref(),
    );
    let mut deployment: Deployment = template.parse()?;
    let name = derive_deployment_metadata(&mut deployment, flow, previous);

    let items: Vec<KeyToPath> = [
        (FUNKTION_YML_PROPERTY, &flow.funktion_yml),
        (APPLICATION_PROPERTIES_PROPERTY, &flow.application_properties),
        (APPLICATION_YML_PROPERTY, &flow.application_yml),
    ]
    .into_iter()
    .filter(|(_, value)| value.as_deref().is_some_and(|v| !v.is_empty()))
    .map(|(key, _)| KeyToPath {
        key: key.to_owned(),
        path: key.to_owned(),
        ..KeyToPath::default()
    })
    .collect();

    let pod_spec = pod_spec_mut(&mut deployment, &template)?;
    if !items.is_empty() {
        upsert_volume(pod_spec, config_map_volume(CONFIG_VOLUME, &name, items));
        for container in pod_spec.containers.iter_mut() {
            let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
            if !mounts.iter().any(|m| m.name == CONFIG_VOLUME) {
                mounts.push(VolumeMount {
                    name: CONFIG_VOLUME.to_owned(),
                    mount_path: CONFIG_MOUNT_PATH.to_owned(),
                    read_only: Some(true),
                    ..VolumeMount::default()
                });
            }
        }
    }
    default_first_container_name(pod_spec, CONNECTOR_CONTAINER);
    set_name_label(&mut deployment, &name);
    Ok(deployment)
}

/// Apply the shared metadata rules and return the Deployment name
fn derive_deployment_metadata(
    deployment: &mut Deployment,
    primary: &impl HasMetadata,
    previous: Option<&Deployment>,
) -> String {
    derive_metadata(
        &mut deployment.metadata,
        primary,
        previous.map(|p| &p.metadata),
    );
    let name = primary.object_key().name;
    set_default(
        deployment.metadata.annotations.get_or_insert_with(BTreeMap::new),
        CONFIGMAP_CONTROLLER_ANNOTATION,
        &name,
    );
    name
}

fn pod_spec_mut<'d>(
    deployment: &'d mut Deployment,
    template: &TemplateSource<'_>,
) -> Result<&'d mut PodSpec, BuildError> {
    let pod_spec = deployment
        .spec
        .get_or_insert_with(DeploymentSpec::default)
        .template
        .spec
        .get_or_insert_with(PodSpec::default);
    if pod_spec.containers.is_empty() {
        return Err(template.no_containers());
    }
    Ok(pod_spec)
}

/// Point the template's `source` ConfigMap volume at the Function, or add one
/// holding the source under the Runtime's file name
fn mount_source_volume(pod_spec: &mut PodSpec, name: &str, runtime: &RuntimeRecord) {
    let template_volume = pod_spec
        .volumes
        .iter_mut()
        .flatten()
        .find(|v| v.name == SOURCE_VOLUME)
        .and_then(|v| v.config_map.as_mut());
    if let Some(config_map) = template_volume {
        name.clone_into(&mut config_map.name);
        return;
    }
    let items = vec![KeyToPath {
        key: SOURCE_PROPERTY.to_owned(),
        path: runtime.source_file_name(),
        ..KeyToPath::default()
    }];
    upsert_volume(pod_spec, config_map_volume(SOURCE_VOLUME, name, items));
}

fn config_map_volume(volume: &str, config_map: &str, items: Vec<KeyToPath>) -> Volume {
    Volume {
        name: volume.to_owned(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_owned(),
            items: Some(items),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }
}

/// Add a volume, replacing a template volume of the same name
fn upsert_volume(pod_spec: &mut PodSpec, volume: Volume) {
    k8s_openapi::merge_strategies::list::map(
        pod_spec.volumes.get_or_insert_with(Vec::new),
        vec![volume],
        &[|current, new| current.name == new.name],
        |current, new| {
            *current = new;
        },
    );
}

fn default_first_container_name(pod_spec: &mut PodSpec, default: &str) {
    if let Some(container) = pod_spec.containers.first_mut() {
        if container.name.is_empty() {
            default.clone_into(&mut container.name);
        }
    }
}

/// Set the name label on the Deployment, its selector and its pod template
fn set_name_label(deployment: &mut Deployment, name: &str) {
    deployment
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(NAME_LABEL.to_owned(), name.to_owned());
    let spec = deployment.spec.get_or_insert_with(DeploymentSpec::default);
    spec.selector
        .match_labels
        .get_or_insert_with(BTreeMap::new)
        .insert(NAME_LABEL.to_owned(), name.to_owned());
    spec.template
        .metadata
        .get_or_insert_with(ObjectMeta::default)
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(NAME_LABEL.to_owned(), name.to_owned());
}
