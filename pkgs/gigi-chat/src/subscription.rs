//! Owned handle for a live change stream

use std::sync::Arc;

use gigi_store::{ChangeEvent, ChangeFeed, DocumentStore, ListenerId};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A registered change listener and the task forwarding its events.
///
/// Call [`Subscription::dispose`] on teardown. A handle dropped without being
/// disposed still unregisters, but logs a warning.
pub struct Subscription {
    docs: Arc<dyn DocumentStore>,
    listener: ListenerId,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Forward every event of `feed` to `on_event` on a background task
    pub fn spawn<F>(docs: Arc<dyn DocumentStore>, feed: ChangeFeed, mut on_event: F) -> Self
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        let ChangeFeed {
            listener,
            mut events,
        } = feed;

        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                on_event(event);
            }
            debug!("Change stream {:?} ended", listener);
        });

        Self {
            docs,
            listener,
            task: Some(task),
        }
    }

    pub fn listener(&self) -> ListenerId {
        self.listener
    }

    /// Whether the forwarding task is still running
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the stream. Consumes the handle, so it can only happen once.
    pub fn dispose(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            self.docs.unlisten(self.listener);
            task.abort();
            debug!("Subscription {:?} disposed", self.listener);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.task.is_some() {
            warn!(
                "Subscription {:?} dropped without dispose(), closing it",
                self.listener
            );
            self.close();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("listener", &self.listener)
            .field("active", &self.task.is_some())
            .finish()
    }
}
