use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{
    DeleteParams, ListParams, Patch, PatchParams, PostParams, WatchEvent, WatchParams,
};
use kube::{Api, Client, Resource, ResourceExt};
use resources::{ObjectKey, Record};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use super::{ClusterError, Listing, ObjectApi, ScaleApi, WatchOp, WatchStream};

/// HTTP status of an expired watch resource version
const GONE: u16 = 410;

/// Namespaced Kubernetes kinds the operator works with
pub(crate) trait KubeKind:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<K> KubeKind for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

/// [ObjectApi] backed by the Kubernetes API
pub(crate) struct KubeObjects<K> {
    client: Client,
    /// Namespace lists and watches are limited to, all if `None`
    namespace: Option<String>,
    /// Label selector applied to lists and watches
    selector: Option<String>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: KubeKind> KubeObjects<K> {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self {
            client,
            namespace,
            selector: None,
            _kind: PhantomData,
        }
    }

    pub fn with_selector(mut self, selector: String) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Api for lists and watches
    fn watched(&self) -> Api<K> {
        match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    fn in_namespace(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn for_object(&self, object: &K) -> Api<K> {
        self.in_namespace(&object.namespace().unwrap_or_default())
    }
}

/// Map a Kubernetes `NotFound` response to [ClusterError::NotFound]
fn not_found(key: &ObjectKey, error: kube::Error) -> ClusterError {
    match error {
        kube::Error::Api(e) if e.reason == "NotFound" => ClusterError::NotFound(key.clone()),
        e => ClusterError::Kubernetes(e),
    }
}

#[async_trait]
impl<K: KubeKind> ObjectApi<K> for KubeObjects<K> {
    async fn list(&self) -> Result<Listing<K>, ClusterError> {
        let mut params = ListParams::default();
        if let Some(selector) = &self.selector {
            params = params.labels(selector);
        }
        let list = self.watched().list(&params).await?;
        Ok(Listing {
            resource_version: list.metadata.resource_version.clone(),
            items: list.items,
        })
    }

    async fn watch(&self, since: &str) -> Result<WatchStream<K>, ClusterError> {
        let mut params = WatchParams::default();
        if let Some(selector) = &self.selector {
            params = params.labels(selector);
        }
        let events = self.watched().watch(&params, since).await?;
        let ops = events.filter_map(|event| async move {
            match event {
                Ok(WatchEvent::Added(o)) => Some(Ok(WatchOp::Added(o))),
                Ok(WatchEvent::Modified(o)) => Some(Ok(WatchOp::Modified(o))),
                Ok(WatchEvent::Deleted(o)) => Some(Ok(WatchOp::Deleted(o))),
                Ok(WatchEvent::Bookmark(_)) => None,
                Ok(WatchEvent::Error(e)) if e.code == GONE => {
                    Some(Err(ClusterError::WatchExpired(e.message)))
                }
                Ok(WatchEvent::Error(e)) => Some(Err(ClusterError::Watch(e.message))),
                Err(e) => Some(Err(ClusterError::Kubernetes(e))),
            }
        });
        Ok(ops.boxed())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, ClusterError> {
        Ok(self.in_namespace(&key.namespace).get_opt(&key.name).await?)
    }

    async fn create(&self, object: &K) -> Result<K, ClusterError> {
        Ok(self
            .for_object(object)
            .create(&PostParams::default(), object)
            .await?)
    }

    async fn update(&self, object: &K) -> Result<K, ClusterError> {
        let key = ObjectKey::new(object.namespace().unwrap_or_default(), object.name_any());
        self.for_object(object)
            .replace(&key.name, &PostParams::default(), object)
            .await
            .map_err(|e| not_found(&key, e))
    }

    async fn delete(&self, key: &ObjectKey, cascade: bool) -> Result<(), ClusterError> {
        let params = if cascade {
            DeleteParams::background()
        } else {
            DeleteParams::orphan()
        };
        self.in_namespace(&key.namespace)
            .delete(&key.name, &params)
            .await
            .map(|_| ())
            .map_err(|e| not_found(key, e))
    }
}

#[async_trait]
impl ScaleApi for KubeObjects<Deployment> {
    async fn set_replicas(&self, key: &ObjectKey, replicas: i32) -> Result<(), ClusterError> {
        let patch = json!({ "spec": { "replicas": replicas } });
        self.in_namespace(&key.namespace)
            .patch_scale(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| not_found(key, e))
    }
}

/// Typed records stored as ConfigMaps labeled with their kind.
///
/// Records are converted at this boundary, so informers and the reconciler
/// never see raw ConfigMap data.
pub(crate) struct ResourceStore<R> {
    config_maps: KubeObjects<ConfigMap>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> ResourceStore<R> {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self {
            config_maps: KubeObjects::new(client, namespace).with_selector(R::KIND.selector()),
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<R: Record> ObjectApi<R> for ResourceStore<R> {
    async fn list(&self) -> Result<Listing<R>, ClusterError> {
        let listing = self.config_maps.list().await?;
        Ok(Listing {
            items: listing.items.into_iter().map(R::from_config_map).collect(),
            resource_version: listing.resource_version,
        })
    }

    async fn watch(&self, since: &str) -> Result<WatchStream<R>, ClusterError> {
        let ops = self.config_maps.watch(since).await?;
        Ok(ops
            .map(|op| op.map(|op| op.map(R::from_config_map)))
            .boxed())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<R>, ClusterError> {
        Ok(self.config_maps.get(key).await?.map(R::from_config_map))
    }

    async fn create(&self, object: &R) -> Result<R, ClusterError> {
        let created = self.config_maps.create(&object.to_config_map()).await?;
        Ok(R::from_config_map(created))
    }

    async fn update(&self, object: &R) -> Result<R, ClusterError> {
        let updated = self.config_maps.update(&object.to_config_map()).await?;
        Ok(R::from_config_map(updated))
    }

    async fn delete(&self, key: &ObjectKey, cascade: bool) -> Result<(), ClusterError> {
        self.config_maps.delete(key, cascade).await
    }
}
