//! List and watch one kind of object into a local cache and notify handlers
//! of every change.
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use resources::HasMetadata;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterError, ObjectApi};

mod cache;

pub(crate) use cache::{Event, Store, Writer};

/// Observer of cache changes. Called from the informer task, so handlers
/// must not block.
pub(crate) trait EventHandler<T>: Send + Sync {
    fn on_add(&self, object: &T);

    /// Also called for every object still present on a full resync
    fn on_update(&self, old: &T, new: &T);

    /// Called with the last known state of the object
    fn on_delete(&self, object: &T);
}

/// How a watch session ended
enum WatchEnd {
    Stopped,
    /// Re-list right away
    Relist,
    /// Re-list after waiting one resync period
    Failed,
}

pub(crate) struct Informer<T: Send + Sync + 'static> {
    name: &'static str,
    api: Arc<dyn ObjectApi<T>>,
    writer: Writer<T>,
    handlers: Vec<Arc<dyn EventHandler<T>>>,
    resync_period: Duration,
}

impl<T: HasMetadata + Send + Sync + 'static> Informer<T> {
    pub fn new(name: &'static str, api: Arc<dyn ObjectApi<T>>, resync_period: Duration) -> Self {
        Self {
            name,
            api,
            writer: Writer::default(),
            handlers: Vec::new(),
            resync_period,
        }
    }

    /// Read handle to the cache filled by this informer
    pub fn store(&self) -> Store<T> {
        self.writer.as_reader()
    }

    pub fn add_handler(&mut self, handler: Arc<dyn EventHandler<T>>) {
        self.handlers.push(handler);
    }

    /// Keep the cache in sync until `stop` turns true
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!("Starting {} informer", self.name);
        loop {
            let end = tokio::select! {
                _ = stopped(&mut stop) => WatchEnd::Stopped,
                end = self.list_and_watch() => end,
            };
            match end {
                WatchEnd::Stopped => break,
                WatchEnd::Relist => continue,
                WatchEnd::Failed => {
                    tokio::select! {
                        _ = stopped(&mut stop) => break,
                        _ = tokio::time::sleep(self.resync_period) => {}
                    }
                }
            }
        }
        info!("Stopped {} informer", self.name);
    }

    /// One list followed by a watch lasting at most one resync period
    async fn list_and_watch(&mut self) -> WatchEnd {
        let listing = match self.api.list().await {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Failed to list {}: {e}", self.name);
                return WatchEnd::Failed;
            }
        };
        for event in self.writer.replace(listing.items) {
            self.dispatch(&event);
        }
        self.writer.mark_ready();

        let since = listing.resource_version.unwrap_or_default();
        let mut changes = match self.api.watch(&since).await {
            Ok(changes) => changes,
            Err(e) => {
                warn!("Failed to watch {}: {e}", self.name);
                return WatchEnd::Failed;
            }
        };
        let resync = tokio::time::sleep(self.resync_period);
        tokio::pin!(resync);
        loop {
            tokio::select! {
                _ = &mut resync => {
                    debug!("Resyncing {}", self.name);
                    return WatchEnd::Relist;
                }
                change = changes.next() => match change {
                    Some(Ok(op)) => {
                        let event = self.writer.apply(op);
                        self.dispatch(&event);
                    }
                    Some(Err(ClusterError::WatchExpired(reason))) => {
                        debug!("Watch of {} expired: {reason}", self.name);
                        return WatchEnd::Relist;
                    }
                    Some(Err(e)) => {
                        warn!("Watch of {} failed: {e}", self.name);
                        return WatchEnd::Failed;
                    }
                    None => {
                        debug!("Watch of {} ended", self.name);
                        return WatchEnd::Relist;
                    }
                }
            }
        }
    }

    fn dispatch(&self, event: &Event<T>) {
        for handler in &self.handlers {
            match event {
                Event::Added(object) => handler.on_add(object),
                Event::Updated { old, new } => handler.on_update(old, new),
                Event::Deleted(object) => handler.on_delete(object),
            }
        }
    }
}

/// Resolves once the stop signal is raised or its sender is gone
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}
