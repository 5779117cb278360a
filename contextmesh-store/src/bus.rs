//! Change notification bus.
//!
//! A thin wrapper over `tokio::sync::broadcast`. Each subsystem holds its own
//! `ChangeSubscription` and drains it from a dedicated task, so there is no
//! hidden listener registration order.

use contextmesh_types::ContextEvent;
use tokio::sync::broadcast;
use tracing::warn;

/// Publisher side, owned by the store.
#[derive(Debug)]
pub struct ChangeBus {
    sender: broadcast::Sender<ContextEvent>,
}

impl ChangeBus {
    /// Creates a bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all current subscribers.
    pub fn publish(&self, event: ContextEvent) {
        // no subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribes to events published from now on.
    pub fn subscribe(&self) -> ChangeSubscription {
        ChangeSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Consumer side of the bus.
#[derive(Debug)]
pub struct ChangeSubscription {
    receiver: broadcast::Receiver<ContextEvent>,
}

impl ChangeSubscription {
    /// Waits for the next event. Returns `None` once the store is gone.
    ///
    /// A lagging subscriber skips the events it missed and logs how many.
    pub async fn next(&mut self) -> Option<ContextEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Change subscriber lagged, skipped {} events", n);
                }
            }
        }
    }

    /// Returns the next event if one is already queued.
    pub fn try_next(&mut self) -> Option<ContextEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Change subscriber lagged, skipped {} events", n);
                }
                Err(_) => return None,
            }
        }
    }
}
