use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServiceSpec};

use super::{derive_metadata, set_default, BuildError, TemplateSource};
use crate::records::SERVICE_PROPERTY;
use crate::{FunctionRecord, RuntimeRecord, EXPOSE_LABEL};

/// Build the Service in front of a Function's Deployment.
///
/// The type and cluster IPs of a previous Service always win over the
/// Runtime's template since the API server rejects changing them in place.
/// Node ports are taken over where the template leaves them unset, so
/// updating an existing Service never reallocates them.
pub fn function_service(
    function: &FunctionRecord,
    runtime: &RuntimeRecord,
    previous: Option<&Service>,
    deployment: &Deployment,
) -> Result<Service, BuildError> {
    let template = TemplateSource::new(runtime, SERVICE_PROPERTY, runtime.service.as_deref());
    let mut service: Service = template.parse()?;
    derive_metadata(
        &mut service.metadata,
        function,
        previous.map(|p| &p.metadata),
    );
    set_default(
        service.metadata.labels.get_or_insert_with(BTreeMap::new),
        EXPOSE_LABEL,
        "true",
    );

    let spec = service.spec.get_or_insert_with(ServiceSpec::default);
    spec.selector = deployment
        .spec
        .as_ref()
        .and_then(|s| s.selector.match_labels.clone());

    if let Some(previous) = previous {
        service.metadata.resource_version = previous.metadata.resource_version.clone();
        if let Some(previous_spec) = previous.spec.as_ref() {
            keep_assigned_fields(spec, previous_spec);
        }
    }
    Ok(service)
}

fn keep_assigned_fields(spec: &mut ServiceSpec, previous: &ServiceSpec) {
    if previous.cluster_ip.is_some() {
        spec.cluster_ip.clone_from(&previous.cluster_ip);
    }
    if previous.cluster_ips.is_some() {
        spec.cluster_ips.clone_from(&previous.cluster_ips);
    }
    if previous.type_.is_some() {
        spec.type_.clone_from(&previous.type_);
    }
    if let (Some(ports), Some(previous_ports)) = (spec.ports.as_mut(), previous.ports.as_ref()) {
        for (port, previous_port) in ports.iter_mut().zip(previous_ports) {
            if port.node_port.is_none() {
                port.node_port = previous_port.node_port;
            }
        }
    }
}
