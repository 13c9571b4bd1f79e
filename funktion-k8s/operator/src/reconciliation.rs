//! Converges the cluster towards the state declared by Functions and Flows.
//!
//! A sync reads everything it needs from the informer caches, so the outcome
//! only depends on the latest observed state and never on the event that
//! queued the key.
use std::fmt::{self, Display};
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use resources::builders::{flow_deployment, function_deployment, function_service, BuildError};
use resources::{
    ConnectorRecord, FlowRecord, FunctionRecord, ObjectKey, ResourceKind, RuntimeRecord,
    CONNECTOR_LABEL, RUNTIME_LABEL,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cluster::{DeploymentApi, ObjectApi};
use crate::informer::Store;
use crate::workload::{
    apply, destroy_deployment, destroy_service, ApplyError, DestroyError, TeardownPolicy,
};

/// A key handed out by the work queue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum WorkKey {
    Function(ObjectKey),
    Flow(ObjectKey),
}

impl Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkKey::Function(key) => write!(f, "Function {key}"),
            WorkKey::Flow(key) => write!(f, "Flow {key}"),
        }
    }
}

/// Read handles to every informer cache
#[derive(Clone)]
pub(crate) struct Caches {
    pub functions: Store<FunctionRecord>,
    pub flows: Store<FlowRecord>,
    pub runtimes: Store<RuntimeRecord>,
    pub connectors: Store<ConnectorRecord>,
    pub deployments: Store<Deployment>,
    pub services: Store<Service>,
}

impl Caches {
    /// Wait for the first listing of every cache. Returns `false` if an
    /// informer stopped before.
    pub async fn wait_until_ready(&self) -> bool {
        self.functions.wait_until_ready().await
            && self.flows.wait_until_ready().await
            && self.runtimes.wait_until_ready().await
            && self.connectors.wait_until_ready().await
            && self.deployments.wait_until_ready().await
            && self.services.wait_until_ready().await
    }
}

pub(crate) struct Reconciler {
    caches: Caches,
    deployments: Arc<dyn DeploymentApi>,
    services: Arc<dyn ObjectApi<Service>>,
    teardown: TeardownPolicy,
}

impl Reconciler {
    pub fn new(
        caches: Caches,
        deployments: Arc<dyn DeploymentApi>,
        services: Arc<dyn ObjectApi<Service>>,
        teardown: TeardownPolicy,
    ) -> Self {
        Self {
            caches,
            deployments,
            services,
            teardown,
        }
    }

    /// Bring the derived objects of one Function or Flow up to date
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn sync(&self, key: &WorkKey) -> Result<(), ReconcileError> {
        match key {
            WorkKey::Function(key) => self.sync_function(key).await,
            WorkKey::Flow(key) => self.sync_flow(key).await,
        }
    }

    async fn sync_function(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let deployment = self.caches.deployments.get(key);
        let service = self.caches.services.get(key);

        let Some(function) = self.caches.functions.get(key) else {
            debug!("Function is gone, removing its Deployment and Service");
            destroy_deployment(&*self.deployments, deployment.as_deref(), &self.teardown).await?;
            destroy_service(&*self.services, service.as_deref()).await?;
            return Ok(());
        };

        let runtime_key = function
            .runtime_key()
            .ok_or_else(|| ReconcileError::MissingReference {
                owner_kind: ResourceKind::Function,
                owner: key.clone(),
                label: RUNTIME_LABEL,
            })?;
        let runtime = self.caches.runtimes.get(&runtime_key).ok_or_else(|| {
            ReconcileError::MissingDependency {
                kind: ResourceKind::Runtime,
                key: runtime_key.clone(),
                owner: key.clone(),
            }
        })?;

        let desired_deployment = function_deployment(&function, &runtime, deployment.as_deref())?;
        let desired_service = function_service(
            &function,
            &runtime,
            service.as_deref(),
            &desired_deployment,
        )?;
        apply(&*self.deployments, &desired_deployment, deployment.as_deref()).await?;
        apply(&*self.services, &desired_service, service.as_deref()).await?;
        Ok(())
    }

    async fn sync_flow(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let deployment = self.caches.deployments.get(key);

        let Some(flow) = self.caches.flows.get(key) else {
            debug!("Flow is gone, removing its Deployment");
            destroy_deployment(&*self.deployments, deployment.as_deref(), &self.teardown).await?;
            return Ok(());
        };

        let connector_key = flow
            .connector_key()
            .ok_or_else(|| ReconcileError::MissingReference {
                owner_kind: ResourceKind::Flow,
                owner: key.clone(),
                label: CONNECTOR_LABEL,
            })?;
        let connector = self.caches.connectors.get(&connector_key).ok_or_else(|| {
            ReconcileError::MissingDependency {
                kind: ResourceKind::Connector,
                key: connector_key.clone(),
                owner: key.clone(),
            }
        })?;

        match flow.config() {
            Some(Ok(config)) => debug!("Flow steps: {}", config.summary()),
            Some(Err(e)) => warn!("Flow has an unreadable funktion.yml: {e}"),
            None => {}
        }

        let desired = flow_deployment(&flow, &connector, deployment.as_deref())?;
        apply(&*self.deployments, &desired, deployment.as_deref()).await?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub(crate) enum ReconcileError {
    #[error("{owner_kind} {owner} has no `{label}` label")]
    MissingReference {
        owner_kind: ResourceKind,
        owner: ObjectKey,
        label: &'static str,
    },
    #[error("{kind} {key} referenced by {owner} does not exist")]
    MissingDependency {
        kind: ResourceKind,
        key: ObjectKey,
        owner: ObjectKey,
    },
    #[error("Error building derived object: {0}")]
    Build(#[from] BuildError),
    #[error("Error applying derived object: {0}")]
    Apply(#[from] ApplyError),
    #[error("Error tearing down derived objects: {0}")]
    Destroy(#[from] DestroyError),
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::fixtures::*;
    use super::*;
    use crate::cluster::fake::{Call, FakeObjects};
    use crate::informer::Writer;

    struct Harness {
        functions: Writer<FunctionRecord>,
        flows: Writer<FlowRecord>,
        runtimes: Writer<RuntimeRecord>,
        connectors: Writer<ConnectorRecord>,
        deployment_cache: Writer<Deployment>,
        service_cache: Writer<Service>,
        deployments: Arc<FakeObjects<Deployment>>,
        services: Arc<FakeObjects<Service>>,
        reconciler: Reconciler,
    }

    impl Harness {
        fn new() -> Self {
            let functions = Writer::default();
            let flows = Writer::default();
            let runtimes = Writer::default();
            let connectors = Writer::default();
            let deployment_cache = Writer::default();
            let service_cache = Writer::default();
            let caches = Caches {
                functions: functions.as_reader(),
                flows: flows.as_reader(),
                runtimes: runtimes.as_reader(),
                connectors: connectors.as_reader(),
                deployments: deployment_cache.as_reader(),
                services: service_cache.as_reader(),
            };
            let deployments: Arc<FakeObjects<Deployment>> = Arc::new(FakeObjects::default());
            let services: Arc<FakeObjects<Service>> = Arc::new(FakeObjects::default());
            let reconciler = Reconciler::new(
                caches,
                deployments.clone(),
                services.clone(),
                TeardownPolicy {
                    poll_interval: Duration::from_secs(1),
                    timeout: None,
                },
            );
            Self {
                functions,
                flows,
                runtimes,
                connectors,
                deployment_cache,
                service_cache,
                deployments,
                services,
                reconciler,
            }
        }

        /// Put derived objects into the cluster and the caches
        fn existing(&mut self, deployment: Deployment, service: Option<Service>) {
            let deployment = self.deployments.put(deployment);
            self.deployment_cache.replace(vec![deployment]);
            if let Some(service) = service {
                let service = self.services.put(service);
                self.service_cache.replace(vec![service]);
            }
            self.deployments.clear_calls();
            self.services.clear_calls();
        }
    }

    #[tokio::test]
    async fn test_function_creates_deployment_and_service() {
        let mut harness = Harness::new();
        harness.runtimes.replace(vec![runtime("nodejs")]);
        harness.functions.replace(vec![function("hello", "nodejs")]);

        harness
            .reconciler
            .sync(&WorkKey::Function(key("hello")))
            .await
            .unwrap();

        assert_eq!(harness.deployments.calls(), vec![Call::Create(key("hello"))]);
        assert_eq!(harness.services.calls(), vec![Call::Create(key("hello"))]);
        let service = harness.services.object(&key("hello")).unwrap();
        let selector = service.spec.unwrap().selector.unwrap();
        assert_eq!(selector.get("name").map(String::as_str), Some("hello"));
    }

    #[tokio::test]
    async fn test_function_updates_cached_objects() {
        let mut harness = Harness::new();
        harness.runtimes.replace(vec![runtime("nodejs")]);
        harness.functions.replace(vec![function("hello", "nodejs")]);
        harness.existing(deployment("hello"), Some(service("hello")));

        harness
            .reconciler
            .sync(&WorkKey::Function(key("hello")))
            .await
            .unwrap();

        assert_eq!(harness.deployments.calls(), vec![Call::Update(key("hello"))]);
        assert_eq!(harness.services.calls(), vec![Call::Update(key("hello"))]);
    }

    #[tokio::test]
    async fn test_missing_runtime_changes_nothing() {
        let mut harness = Harness::new();
        harness.functions.replace(vec![function("hello", "nodejs")]);

        let err = harness
            .reconciler
            .sync(&WorkKey::Function(key("hello")))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::MissingDependency { kind: ResourceKind::Runtime, ref key, .. }
                if key.name == "nodejs"
        ));
        assert!(harness.deployments.calls().is_empty());
        assert!(harness.services.calls().is_empty());
    }

    #[tokio::test]
    async fn test_function_without_runtime_label() {
        let mut harness = Harness::new();
        harness.runtimes.replace(vec![runtime("nodejs")]);
        let mut unlabeled = function("hello", "nodejs");
        unlabeled.metadata.labels = None;
        harness.functions.replace(vec![unlabeled]);

        let err = harness
            .reconciler
            .sync(&WorkKey::Function(key("hello")))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Function default/hello has no `runtime` label"
        );
        assert!(harness.deployments.calls().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_in_other_namespace() {
        let mut harness = Harness::new();
        let mut shared = runtime("nodejs");
        shared.metadata.namespace = Some("shared".to_owned());
        harness.runtimes.replace(vec![shared]);
        harness
            .functions
            .replace(vec![function("hello", "shared/nodejs")]);

        harness
            .reconciler
            .sync(&WorkKey::Function(key("hello")))
            .await
            .unwrap();
        assert_eq!(harness.deployments.calls(), vec![Call::Create(key("hello"))]);
    }

    #[tokio::test]
    async fn test_deleted_function_tears_down() {
        let mut harness = Harness::new();
        harness.existing(deployment("hello"), Some(service("hello")));

        harness
            .reconciler
            .sync(&WorkKey::Function(key("hello")))
            .await
            .unwrap();

        assert_eq!(
            harness.deployments.calls(),
            vec![
                Call::Scale {
                    key: key("hello"),
                    replicas: 0
                },
                Call::Delete {
                    key: key("hello"),
                    cascade: true
                },
            ]
        );
        assert_eq!(
            harness.services.calls(),
            vec![Call::Delete {
                key: key("hello"),
                cascade: true
            }]
        );
    }

    #[tokio::test]
    async fn test_deleted_function_without_derived_objects() {
        let harness = Harness::new();
        harness
            .reconciler
            .sync(&WorkKey::Function(key("hello")))
            .await
            .unwrap();
        assert!(harness.deployments.calls().is_empty());
        assert!(harness.services.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_template_changes_nothing() {
        let mut harness = Harness::new();
        let mut broken = runtime("nodejs");
        broken.deployment = Some("spec: [unclosed".to_owned());
        harness.runtimes.replace(vec![broken]);
        harness.functions.replace(vec![function("hello", "nodejs")]);

        let err = harness
            .reconciler
            .sync(&WorkKey::Function(key("hello")))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Build(BuildError::InvalidTemplate { .. })));
        assert!(harness.deployments.calls().is_empty());
        assert!(harness.services.calls().is_empty());
    }

    #[tokio::test]
    async fn test_flow_creates_deployment() {
        let mut harness = Harness::new();
        harness.connectors.replace(vec![connector("timer")]);
        harness.flows.replace(vec![flow("timer1", "timer")]);

        harness
            .reconciler
            .sync(&WorkKey::Flow(key("timer1")))
            .await
            .unwrap();

        assert_eq!(harness.deployments.calls(), vec![Call::Create(key("timer1"))]);
        assert!(harness.services.calls().is_empty());
        let created = harness.deployments.object(&key("timer1")).unwrap();
        let containers = created.spec.unwrap().template.spec.unwrap().containers;
        assert_eq!(containers[0].name, "connector");
    }

    #[tokio::test]
    async fn test_flow_missing_connector() {
        let mut harness = Harness::new();
        harness.flows.replace(vec![flow("timer1", "timer")]);

        let err = harness
            .reconciler
            .sync(&WorkKey::Flow(key("timer1")))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Connector default/timer referenced by default/timer1 does not exist"
        );
        assert!(harness.deployments.calls().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_flow_keeps_services() {
        let mut harness = Harness::new();
        harness.existing(deployment("timer1"), Some(service("timer1")));

        harness
            .reconciler
            .sync(&WorkKey::Flow(key("timer1")))
            .await
            .unwrap();

        assert_eq!(harness.deployments.calls().len(), 2);
        assert!(harness.deployments.object(&key("timer1")).is_none());
        assert!(harness.services.calls().is_empty());
    }

    #[test]
    fn test_work_key_display() {
        assert_eq!(
            WorkKey::Function(key("hello")).to_string(),
            "Function default/hello"
        );
        assert_eq!(WorkKey::Flow(key("timer1")).to_string(), "Flow default/timer1");
    }
}
