//! Wires informers, event handlers, the work queue and the reconciler into
//! the running operator.
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::Client;
use resources::{
    ConnectorRecord, FlowRecord, FunctionRecord, HasMetadata, ObjectKey, RuntimeRecord,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cluster::{DeploymentApi, KubeObjects, ObjectApi, ResourceStore};
use crate::config::OperatorConfig;
use crate::informer::{stopped, EventHandler, Informer, Store};
use crate::queue::WorkQueue;
use crate::reconciliation::{Caches, Reconciler, WorkKey};
use crate::workload::TeardownPolicy;

/// Cluster access of the operator. `D` serves Deployments to both the
/// informer and the reconciler.
pub(crate) struct Apis<D> {
    pub functions: Arc<dyn ObjectApi<FunctionRecord>>,
    pub flows: Arc<dyn ObjectApi<FlowRecord>>,
    pub runtimes: Arc<dyn ObjectApi<RuntimeRecord>>,
    pub connectors: Arc<dyn ObjectApi<ConnectorRecord>>,
    pub deployments: Arc<D>,
    pub services: Arc<dyn ObjectApi<Service>>,
}

impl Apis<KubeObjects<Deployment>> {
    /// Access everything in `namespace`, or in all namespaces if `None`
    pub fn from_client(client: Client, namespace: Option<String>) -> Self {
        Self {
            functions: Arc::new(ResourceStore::<FunctionRecord>::new(
                client.clone(),
                namespace.clone(),
            )),
            flows: Arc::new(ResourceStore::<FlowRecord>::new(
                client.clone(),
                namespace.clone(),
            )),
            runtimes: Arc::new(ResourceStore::<RuntimeRecord>::new(
                client.clone(),
                namespace.clone(),
            )),
            connectors: Arc::new(ResourceStore::<ConnectorRecord>::new(
                client.clone(),
                namespace.clone(),
            )),
            deployments: Arc::new(KubeObjects::new(client.clone(), namespace.clone())),
            services: Arc::new(KubeObjects::<Service>::new(client, namespace)),
        }
    }
}

/// Queues the changed object itself
struct EnqueueSelf {
    queue: Arc<WorkQueue<WorkKey>>,
    to_key: fn(ObjectKey) -> WorkKey,
}

impl<T: HasMetadata> EventHandler<T> for EnqueueSelf {
    fn on_add(&self, object: &T) {
        self.queue.add((self.to_key)(object.object_key()));
    }

    fn on_update(&self, _old: &T, new: &T) {
        self.queue.add((self.to_key)(new.object_key()));
    }

    fn on_delete(&self, object: &T) {
        self.queue.add((self.to_key)(object.object_key()));
    }
}

/// Queues every cached object referencing the changed one
struct EnqueueDependents<D> {
    queue: Arc<WorkQueue<WorkKey>>,
    dependents: Store<D>,
    reference: fn(&D) -> Option<ObjectKey>,
    to_key: fn(ObjectKey) -> WorkKey,
}

impl<D: HasMetadata> EnqueueDependents<D> {
    fn enqueue(&self, changed: &ObjectKey) {
        for dependent in self.dependents.state() {
            if (self.reference)(&*dependent).as_ref() == Some(changed) {
                debug!("Requeueing {} after change of {changed}", dependent.object_key());
                self.queue.add((self.to_key)(dependent.object_key()));
            }
        }
    }
}

impl<T, D> EventHandler<T> for EnqueueDependents<D>
where
    T: HasMetadata,
    D: HasMetadata + Send + Sync,
{
    fn on_add(&self, object: &T) {
        self.enqueue(&object.object_key());
    }

    fn on_update(&self, _old: &T, new: &T) {
        self.enqueue(&new.object_key());
    }

    fn on_delete(&self, object: &T) {
        self.enqueue(&object.object_key());
    }
}

/// Queues the Function or Flow a derived Deployment or Service belongs to.
/// Objects without a cached owner of the same name are not ours.
struct EnqueueOwner {
    queue: Arc<WorkQueue<WorkKey>>,
    functions: Store<FunctionRecord>,
    flows: Store<FlowRecord>,
}

impl EnqueueOwner {
    fn enqueue(&self, key: ObjectKey) {
        if self.functions.get(&key).is_some() {
            self.queue.add(WorkKey::Function(key.clone()));
        }
        if self.flows.get(&key).is_some() {
            self.queue.add(WorkKey::Flow(key));
        }
    }
}

impl<T: HasMetadata> EventHandler<T> for EnqueueOwner {
    fn on_add(&self, object: &T) {
        self.enqueue(object.object_key());
    }

    fn on_update(&self, old: &T, new: &T) {
        if old.resource_version() == new.resource_version() {
            return;
        }
        self.enqueue(new.object_key());
    }

    fn on_delete(&self, object: &T) {
        self.enqueue(object.object_key());
    }
}

/// Run the operator until `stop` turns true.
///
/// One informer task per kind fills the caches. A single worker starts once
/// every cache holds its first listing and syncs one key at a time. Failed
/// keys are retried after the configured delay.
pub(crate) async fn run<D>(
    apis: Apis<D>,
    config: &OperatorConfig,
    mut stop: watch::Receiver<bool>,
) where
    D: DeploymentApi + 'static,
{
    let resync = config.resync_period();
    let queue = Arc::new(WorkQueue::new());

    let mut functions = Informer::new("functions", apis.functions, resync);
    let mut flows = Informer::new("flows", apis.flows, resync);
    let mut runtimes = Informer::new("runtimes", apis.runtimes, resync);
    let mut connectors = Informer::new("connectors", apis.connectors, resync);
    let deployment_objects: Arc<dyn ObjectApi<Deployment>> = apis.deployments.clone();
    let mut deployments = Informer::new("deployments", deployment_objects, resync);
    let mut services = Informer::new("services", Arc::clone(&apis.services), resync);

    let caches = Caches {
        functions: functions.store(),
        flows: flows.store(),
        runtimes: runtimes.store(),
        connectors: connectors.store(),
        deployments: deployments.store(),
        services: services.store(),
    };

    functions.add_handler(Arc::new(EnqueueSelf {
        queue: Arc::clone(&queue),
        to_key: WorkKey::Function,
    }));
    flows.add_handler(Arc::new(EnqueueSelf {
        queue: Arc::clone(&queue),
        to_key: WorkKey::Flow,
    }));
    runtimes.add_handler(Arc::new(EnqueueDependents {
        queue: Arc::clone(&queue),
        dependents: caches.functions.clone(),
        reference: FunctionRecord::runtime_key,
        to_key: WorkKey::Function,
    }));
    connectors.add_handler(Arc::new(EnqueueDependents {
        queue: Arc::clone(&queue),
        dependents: caches.flows.clone(),
        reference: FlowRecord::connector_key,
        to_key: WorkKey::Flow,
    }));
    let owner = Arc::new(EnqueueOwner {
        queue: Arc::clone(&queue),
        functions: caches.functions.clone(),
        flows: caches.flows.clone(),
    });
    deployments.add_handler(owner.clone());
    services.add_handler(owner);

    let mut tasks: Vec<JoinHandle<()>> = vec![
        tokio::spawn(functions.run(stop.clone())),
        tokio::spawn(flows.run(stop.clone())),
        tokio::spawn(runtimes.run(stop.clone())),
        tokio::spawn(connectors.run(stop.clone())),
        tokio::spawn(deployments.run(stop.clone())),
        tokio::spawn(services.run(stop.clone())),
    ];

    let reconciler = Reconciler::new(
        caches.clone(),
        apis.deployments,
        apis.services,
        TeardownPolicy {
            poll_interval: config.teardown_poll_interval(),
            timeout: config.teardown_timeout(),
        },
    );
    tasks.push(tokio::spawn(work(
        Arc::clone(&queue),
        caches,
        reconciler,
        config.retry_delay(),
    )));

    stopped(&mut stop).await;
    info!("Stop requested, shutting down");
    queue.shut_down();
    let grace = config.shutdown_grace();
    if tokio::time::timeout(grace, futures::future::join_all(tasks))
        .await
        .is_err()
    {
        warn!("Tasks still running after {grace:?}, exiting anyway");
    }
}

/// The single worker: sync keys one at a time until the queue shuts down
async fn work(
    queue: Arc<WorkQueue<WorkKey>>,
    caches: Caches,
    reconciler: Reconciler,
    retry_delay: Duration,
) {
    if !caches.wait_until_ready().await {
        return;
    }
    info!("Caches synced, starting worker");
    while let Some(key) = queue.get().await {
        match reconciler.sync(&key).await {
            Ok(()) => queue.done(&key),
            Err(e) => {
                error!("Error syncing {key}: {e}");
                queue.add(key.clone());
                queue.done_after(key, retry_delay);
            }
        }
    }
    info!("Worker stopped");
}
