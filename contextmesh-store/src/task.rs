//! Owned background tasks with explicit shutdown.
//!
//! Every periodic loop and event consumer in contextmesh is spawned through a
//! `TaskHandle`, created when a subsystem starts and stopped when it is
//! disposed. Shutdown is signalled over a watch channel; dropping the handle
//! without calling `shutdown` also stops the loops at their next wake-up.

use crate::bus::ChangeSubscription;
use contextmesh_types::ContextEvent;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// A group of background tasks belonging to one subsystem.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl TaskHandle {
    /// Creates an empty task group.
    pub fn new(name: &'static str) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name,
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Name of the owning subsystem.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of spawned tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if no task was spawned.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Runs `tick` every `period`, first after one full period.
    pub fn spawn_periodic<F, Fut>(&mut self, label: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut stop = self.shutdown.subscribe();
        let owner = self.name;
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("{}: {} loop stopped", owner, label);
        }));
    }

    /// Drains `subscription`, calling `handle` for each event until shutdown
    /// or until the store goes away.
    pub fn spawn_consumer<F, Fut>(
        &mut self,
        label: &'static str,
        mut subscription: ChangeSubscription,
        mut handle: F,
    ) where
        F: FnMut(ContextEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut stop = self.shutdown.subscribe();
        let owner = self.name;
        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = subscription.next() => match event {
                        Some(event) => handle(event).await,
                        None => break,
                    },
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("{}: {} consumer stopped", owner, label);
        }));
    }

    /// Signals every task to stop and waits for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("{}: background task ended abnormally: {}", self.name, e);
            }
        }
        debug!("{}: background tasks stopped", self.name);
    }
}
