//! Object store of the cluster as seen by the operator.
//!
//! Everything the operator does to the cluster goes through [ObjectApi] and
//! [ScaleApi], so informers, reconciliation and teardown can run against the
//! in-memory store in tests.
use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::Deployment;
use resources::ObjectKey;
use thiserror::Error;

#[cfg(test)]
pub(crate) mod fake;
mod kubernetes;

pub(crate) use kubernetes::{KubeObjects, ResourceStore};

/// Result of a full list
#[derive(Debug)]
pub(crate) struct Listing<T> {
    /// All matching objects
    pub items: Vec<T>,
    /// Version to start a watch from
    pub resource_version: Option<String>,
}

/// A change reported by a watch
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WatchOp<T> {
    Added(T),
    Modified(T),
    /// Carries the last state of the object
    Deleted(T),
}

impl<T> WatchOp<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WatchOp<U> {
        match self {
            WatchOp::Added(o) => WatchOp::Added(f(o)),
            WatchOp::Modified(o) => WatchOp::Modified(f(o)),
            WatchOp::Deleted(o) => WatchOp::Deleted(f(o)),
        }
    }
}

/// Stream of changes since a resource version
pub(crate) type WatchStream<T> = BoxStream<'static, Result<WatchOp<T>, ClusterError>>;

#[derive(Debug, Error)]
pub(crate) enum ClusterError {
    #[error("Kubernetes reported error: {0}")]
    Kubernetes(#[from] kube::Error),
    #[error("Object {0} does not exist")]
    NotFound(ObjectKey),
    /// The watch can not resume, a fresh list is needed
    #[error("Watch expired: {0}")]
    WatchExpired(String),
    #[error("Watch failed: {0}")]
    Watch(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        match self {
            ClusterError::NotFound(_) => true,
            ClusterError::Kubernetes(kube::Error::Api(e)) => e.reason == "NotFound",
            _ => false,
        }
    }
}

/// CRUD and watch access to objects of one kind
#[async_trait]
pub(crate) trait ObjectApi<T: Send + Sync + 'static>: Send + Sync {
    /// List all objects
    async fn list(&self) -> Result<Listing<T>, ClusterError>;

    /// Watch for changes after `since`
    async fn watch(&self, since: &str) -> Result<WatchStream<T>, ClusterError>;

    /// Fetch a single object, `None` if it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<T>, ClusterError>;

    async fn create(&self, object: &T) -> Result<T, ClusterError>;

    /// Replace an existing object
    async fn update(&self, object: &T) -> Result<T, ClusterError>;

    /// Delete an object. With `cascade` dependents are garbage collected,
    /// otherwise they are orphaned
    async fn delete(&self, key: &ObjectKey, cascade: bool) -> Result<(), ClusterError>;
}

/// The scale sub-resource
#[async_trait]
pub(crate) trait ScaleApi: Send + Sync {
    /// Set the desired replica count
    async fn set_replicas(&self, key: &ObjectKey, replicas: i32) -> Result<(), ClusterError>;
}

/// Everything done to Deployments
pub(crate) trait DeploymentApi: ObjectApi<Deployment> + ScaleApi {}

impl<A: ObjectApi<Deployment> + ScaleApi> DeploymentApi for A {}
