use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use resources::{HasMetadata, ObjectKey};
use tokio::sync::watch;

use crate::cluster::WatchOp;

/// A change to the cache, as handed to event handlers
#[derive(Debug)]
pub(crate) enum Event<T> {
    Added(Arc<T>),
    Updated { old: Arc<T>, new: Arc<T> },
    /// Carries the last known state
    Deleted(Arc<T>),
}

type Objects<T> = Arc<RwLock<HashMap<ObjectKey, Arc<T>>>>;

/// The writable side of a cache, owned by exactly one informer
pub(crate) struct Writer<T> {
    objects: Objects<T>,
    ready: watch::Sender<bool>,
}

impl<T: HasMetadata> Default for Writer<T> {
    fn default() -> Self {
        Self {
            objects: Arc::default(),
            ready: watch::channel(false).0,
        }
    }
}

impl<T: HasMetadata> Writer<T> {
    /// Return a read handle to the cache
    pub fn as_reader(&self) -> Store<T> {
        Store {
            objects: Arc::clone(&self.objects),
            ready: self.ready.subscribe(),
        }
    }

    /// Replace the content with a full listing.
    ///
    /// New objects yield [Event::Added], objects still present
    /// [Event::Updated] and objects gone [Event::Deleted].
    pub fn replace(&mut self, items: Vec<T>) -> Vec<Event<T>> {
        let mut objects = self.objects.write();
        let mut previous = std::mem::take(&mut *objects);
        let mut events = Vec::with_capacity(items.len());
        for item in items {
            let key = item.object_key();
            let new = Arc::new(item);
            objects.insert(key.clone(), Arc::clone(&new));
            events.push(match previous.remove(&key) {
                Some(old) => Event::Updated { old, new },
                None => Event::Added(new),
            });
        }
        let mut gone: Vec<_> = previous.into_iter().collect();
        gone.sort_by(|(a, _), (b, _)| a.cmp(b));
        events.extend(gone.into_iter().map(|(_, old)| Event::Deleted(old)));
        events
    }

    /// Apply a single watch change
    pub fn apply(&mut self, op: WatchOp<T>) -> Event<T> {
        let mut objects = self.objects.write();
        match op {
            WatchOp::Added(item) | WatchOp::Modified(item) => {
                let key = item.object_key();
                let new = Arc::new(item);
                match objects.insert(key, Arc::clone(&new)) {
                    Some(old) => Event::Updated { old, new },
                    None => Event::Added(new),
                }
            }
            WatchOp::Deleted(item) => {
                let last = objects
                    .remove(&item.object_key())
                    .unwrap_or_else(|| Arc::new(item));
                Event::Deleted(last)
            }
        }
    }

    /// Signal readers that the first listing is complete
    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }
}

/// A readable cache of objects of kind `T`.
///
/// Cloning produces a new handle to the same cache.
pub(crate) struct Store<T> {
    objects: Objects<T>,
    ready: watch::Receiver<bool>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            objects: Arc::clone(&self.objects),
            ready: self.ready.clone(),
        }
    }
}

impl<T> Store<T> {
    /// Cached state of an object
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<T>> {
        self.objects.read().get(key).cloned()
    }

    /// Snapshot of all cached objects
    pub fn state(&self) -> Vec<Arc<T>> {
        self.objects.read().values().cloned().collect()
    }

    /// Wait until the first listing has been applied. Returns `false` if the
    /// informer went away before that.
    pub async fn wait_until_ready(&self) -> bool {
        let mut ready = self.ready.clone();
        let ok = ready.wait_for(|ready| *ready).await.is_ok();
        ok
    }
}
