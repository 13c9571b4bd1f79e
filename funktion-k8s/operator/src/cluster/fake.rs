//! In-memory cluster for tests. Writes are recorded for sequencing
//! assertions and broadcast to open watches.
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::Mutex;
use resources::{
    ConnectorRecord, FlowRecord, FunctionRecord, HasMetadata, ObjectKey, RuntimeRecord,
};

use super::{ClusterError, Listing, ObjectApi, ScaleApi, WatchOp, WatchStream};

/// A cluster write
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Create(ObjectKey),
    Update(ObjectKey),
    Delete { key: ObjectKey, cascade: bool },
    Scale { key: ObjectKey, replicas: i32 },
}

pub(crate) trait FakeObject: HasMetadata + Clone + PartialEq + Send + Sync + 'static {
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Take over the fields the server manages from the stored object
    fn keep_server_fields(&mut self, stored: &Self) {
        let metadata = self.metadata_mut();
        metadata.resource_version.clone_from(&stored.metadata().resource_version);
        metadata.generation = stored.metadata().generation;
    }

    /// Server side bookkeeping on create or update
    fn written(&mut self, _previous: Option<&Self>) {}

    /// Make the status catch up with the desired state
    fn settle(&mut self) {}
}

impl FakeObject for Deployment {
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn keep_server_fields(&mut self, stored: &Self) {
        self.metadata.resource_version.clone_from(&stored.metadata.resource_version);
        self.metadata.generation = stored.metadata.generation;
        self.status.clone_from(&stored.status);
    }

    fn written(&mut self, previous: Option<&Self>) {
        let generation = previous.and_then(|p| p.metadata.generation).unwrap_or(0);
        self.metadata.generation = Some(generation + 1);
        if let Some(previous) = previous {
            self.status.clone_from(&previous.status);
        }
    }

    fn settle(&mut self) {
        let replicas = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let status = self.status.get_or_insert_with(DeploymentStatus::default);
        status.observed_generation = self.metadata.generation;
        status.replicas = Some(replicas);
    }
}

macro_rules! fake_object {
    ($($kind:ty),*) => {
        $(impl FakeObject for $kind {
            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        })*
    };
}

fake_object!(Service, FunctionRecord, RuntimeRecord, FlowRecord, ConnectorRecord);

struct State<T> {
    objects: BTreeMap<ObjectKey, T>,
    version: u64,
    calls: Vec<Call>,
    /// Remaining `get` calls before a scaled object settles
    unsettled: HashMap<ObjectKey, usize>,
    watchers: Vec<mpsc::UnboundedSender<Result<WatchOp<T>, ClusterError>>>,
}

pub(crate) struct FakeObjects<T> {
    state: Mutex<State<T>>,
    settle_after_polls: usize,
}

impl<T: FakeObject> Default for FakeObjects<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T: FakeObject> FakeObjects<T> {
    /// Scaled objects report the new status only after `settle_after_polls`
    /// reads
    pub fn new(settle_after_polls: usize) -> Self {
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                version: 0,
                calls: Vec::new(),
                unsettled: HashMap::new(),
                watchers: Vec::new(),
            }),
            settle_after_polls,
        }
    }

    /// Writes done through [ObjectApi] and [ScaleApi] so far
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Current state of an object
    pub fn object(&self, key: &ObjectKey) -> Option<T> {
        self.state.lock().objects.get(key).cloned()
    }

    /// Create or modify an object from outside the operator
    pub fn put(&self, object: T) -> T {
        let mut state = self.state.lock();
        Self::store(&mut state, object)
    }

    /// Delete an object from outside the operator
    pub fn remove(&self, key: &ObjectKey) -> Option<T> {
        let mut state = self.state.lock();
        let removed = state.objects.remove(key)?;
        Self::broadcast(&mut state, WatchOp::Deleted(removed.clone()));
        Some(removed)
    }

    /// Number of watches still listening
    pub fn watcher_count(&self) -> usize {
        self.state
            .lock()
            .watchers
            .iter()
            .filter(|watcher| !watcher.is_closed())
            .count()
    }

    /// End all open watches
    pub fn end_watches(&self) {
        self.state.lock().watchers.clear();
    }

    /// Fail all open watches
    pub fn fail_watches(&self, message: &str) {
        let mut state = self.state.lock();
        for watcher in state.watchers.drain(..) {
            let _ = watcher.unbounded_send(Err(ClusterError::Watch(message.to_owned())));
        }
    }

    /// Store a write. Writes not changing anything are dropped, like the API
    /// server does.
    fn store(state: &mut State<T>, mut object: T) -> T {
        let key = object.object_key();
        let previous = state.objects.get(&key);
        if let Some(previous) = previous {
            let mut candidate = object.clone();
            candidate.keep_server_fields(previous);
            if candidate == *previous {
                return candidate;
            }
        }
        let existed = previous.is_some();
        object.written(previous);
        state.version += 1;
        object.metadata_mut().resource_version = Some(state.version.to_string());
        let op = if existed {
            WatchOp::Modified(object.clone())
        } else {
            WatchOp::Added(object.clone())
        };
        state.objects.insert(key, object.clone());
        Self::broadcast(state, op);
        object
    }

    fn broadcast(state: &mut State<T>, op: WatchOp<T>) {
        state
            .watchers
            .retain(|watcher| watcher.unbounded_send(Ok(op.clone())).is_ok());
    }
}

#[async_trait]
impl<T: FakeObject> ObjectApi<T> for FakeObjects<T> {
    async fn list(&self) -> Result<Listing<T>, ClusterError> {
        let state = self.state.lock();
        Ok(Listing {
            items: state.objects.values().cloned().collect(),
            resource_version: Some(state.version.to_string()),
        })
    }

    async fn watch(&self, _since: &str) -> Result<WatchStream<T>, ClusterError> {
        let (sender, receiver) = mpsc::unbounded();
        self.state.lock().watchers.push(sender);
        Ok(receiver.boxed())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<T>, ClusterError> {
        let mut state = self.state.lock();
        if let Some(remaining) = state.unsettled.get_mut(key) {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                state.unsettled.remove(key);
                if let Some(object) = state.objects.get_mut(key) {
                    object.settle();
                }
            }
        }
        Ok(state.objects.get(key).cloned())
    }

    async fn create(&self, object: &T) -> Result<T, ClusterError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Create(object.object_key()));
        Ok(Self::store(&mut state, object.clone()))
    }

    async fn update(&self, object: &T) -> Result<T, ClusterError> {
        let key = object.object_key();
        let mut state = self.state.lock();
        state.calls.push(Call::Update(key.clone()));
        if !state.objects.contains_key(&key) {
            return Err(ClusterError::NotFound(key));
        }
        Ok(Self::store(&mut state, object.clone()))
    }

    async fn delete(&self, key: &ObjectKey, cascade: bool) -> Result<(), ClusterError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Delete {
            key: key.clone(),
            cascade,
        });
        let removed = state
            .objects
            .remove(key)
            .ok_or_else(|| ClusterError::NotFound(key.clone()))?;
        Self::broadcast(&mut state, WatchOp::Deleted(removed));
        Ok(())
    }
}

#[async_trait]
impl ScaleApi for FakeObjects<Deployment> {
    async fn set_replicas(&self, key: &ObjectKey, replicas: i32) -> Result<(), ClusterError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Scale {
            key: key.clone(),
            replicas,
        });
        let mut deployment = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(key.clone()))?;
        deployment.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
        let mut stored = Self::store(&mut state, deployment);
        if self.settle_after_polls == 0 {
            stored.settle();
            state.objects.insert(key.clone(), stored);
        } else {
            state.unsettled.insert(key.clone(), self.settle_after_polls);
        }
        Ok(())
    }
}
