use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use resources::{HasMetadata, ObjectKey};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterError, DeploymentApi, ObjectApi};

/// How long and how often to check a Deployment while it scales down
#[derive(Debug, Clone)]
pub(crate) struct TeardownPolicy {
    pub poll_interval: Duration,
    /// Wait forever if `None`
    pub timeout: Option<Duration>,
}

/// Deletes a derived Deployment.
///
/// The Deployment is first scaled to zero replicas. Once the controller
/// observed the new generation and no replicas are left it is deleted
/// together with its ReplicaSets.
///
/// # Arguments:
/// - `api` - Deployments of the cluster
/// - `cached` - The Deployment as last seen by the informer, nothing is done if `None`
/// - `policy` - Polling interval and timeout of the scale down
pub(crate) async fn destroy_deployment<A>(
    api: &A,
    cached: Option<&Deployment>,
    policy: &TeardownPolicy,
) -> Result<(), DestroyError>
where
    A: DeploymentApi + ?Sized,
{
    let Some(deployment) = cached else {
        return Ok(());
    };
    let key = deployment.object_key();
    if let Err(e) = api.set_replicas(&key, 0).await {
        return tolerate_not_found(&key, e);
    }

    let generation = deployment.metadata.generation.unwrap_or(0);
    let scaled_down = wait_scaled_down(api, &key, generation, policy.poll_interval);
    match policy.timeout {
        Some(timeout) => tokio::time::timeout(timeout, scaled_down)
            .await
            .map_err(|_| DestroyError::Timeout {
                key: key.clone(),
                timeout,
            })??,
        None => scaled_down.await?,
    }

    match api.delete(&key, true).await {
        Ok(()) => {
            info!("Deleted Deployment {key}");
            Ok(())
        }
        Err(e) => tolerate_not_found(&key, e),
    }
}

/// Deletes a derived Service, if one is cached
pub(crate) async fn destroy_service<A>(
    api: &A,
    cached: Option<&Service>,
) -> Result<(), DestroyError>
where
    A: ObjectApi<Service> + ?Sized,
{
    let Some(service) = cached else {
        return Ok(());
    };
    let key = service.object_key();
    match api.delete(&key, true).await {
        Ok(()) => {
            info!("Deleted Service {key}");
            Ok(())
        }
        Err(e) => tolerate_not_found(&key, e),
    }
}

fn tolerate_not_found(key: &ObjectKey, error: ClusterError) -> Result<(), DestroyError> {
    if error.is_not_found() {
        warn!("Attempted to delete resource '{key}' but resource does not exist");
        Ok(())
    } else {
        Err(DestroyError::Kubernetes(error))
    }
}

/// Poll until the Deployment reports zero replicas for at least
/// `generation`, or is gone
async fn wait_scaled_down<A>(
    api: &A,
    key: &ObjectKey,
    generation: i64,
    interval: Duration,
) -> Result<(), DestroyError>
where
    A: DeploymentApi + ?Sized,
{
    loop {
        let Some(deployment) = api.get(key).await? else {
            return Ok(());
        };
        let status = deployment.status.unwrap_or_default();
        let observed = status.observed_generation.unwrap_or(0);
        let replicas = status.replicas.unwrap_or(0);
        if observed >= generation && replicas == 0 {
            return Ok(());
        }
        debug!("Waiting for Deployment {key} to scale down, {replicas} replicas left");
        tokio::time::sleep(interval).await;
    }
}

#[derive(Debug, Error)]
pub(crate) enum DestroyError {
    #[error("Error from Kubernetes: {0}")]
    Kubernetes(#[from] ClusterError),
    #[error("Deployment {key} did not scale down within {timeout:?}")]
    Timeout { key: ObjectKey, timeout: Duration },
}
