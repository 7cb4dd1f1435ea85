use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Error)]
#[error("activity signal failed: {0}")]
pub struct ActivityError(pub String);

/// Receives the periodic "still working" signal for a destination.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn signal(&self, destination: &str) -> Result<(), ActivityError>;
}

struct RunningLoop {
    id: u64,
    cancel: watch::Sender<bool>,
}

struct Inner {
    period: Duration,
    next_id: AtomicU64,
    loops: Mutex<HashMap<String, RunningLoop>>,
}

impl Inner {
    fn loops(&self) -> MutexGuard<'_, HashMap<String, RunningLoop>> {
        self.loops.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel_if_owner(&self, destination: &str, id: u64) {
        let mut loops = self.loops();
        if loops.get(destination).is_some_and(|running| running.id == id) {
            if let Some(running) = loops.remove(destination) {
                let _ = running.cancel.send(true);
            }
        }
    }
}

/// Keeps at most one signal loop per destination.
#[derive(Clone)]
pub struct LivenessRegistry {
    inner: Arc<Inner>,
}

impl LivenessRegistry {
    pub fn new(period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                period: period.max(Duration::from_millis(1)),
                next_id: AtomicU64::new(1),
                loops: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Signals `destination` right away and then once per period until the
    /// returned handle is stopped or dropped. A loop already running for the
    /// same destination is cancelled first.
    pub fn start(&self, destination: &str, sink: Arc<dyn ActivitySink>) -> LivenessHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        {
            let mut loops = self.inner.loops();
            if let Some(previous) = loops.insert(
                destination.to_string(),
                RunningLoop {
                    id,
                    cancel: cancel_tx,
                },
            ) {
                debug!(destination, replaced = previous.id, "replacing liveness loop");
                let _ = previous.cancel.send(true);
            }
        }

        let period = self.inner.period;
        let target = destination.to_string();
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = sink.signal(&target).await {
                            debug!(destination = %target, error = %err, "liveness signal dropped");
                        }
                    }
                }
            }
        });

        LivenessHandle {
            inner: Arc::clone(&self.inner),
            destination: destination.to_string(),
            id,
            task: Some(task),
        }
    }

    pub fn is_running(&self, destination: &str) -> bool {
        self.inner.loops().contains_key(destination)
    }
}

pub struct LivenessHandle {
    inner: Arc<Inner>,
    destination: String,
    id: u64,
    task: Option<JoinHandle<()>>,
}

impl LivenessHandle {
    /// Cancels the loop and waits for it to wind down.
    pub async fn stop(mut self) {
        self.inner.cancel_if_owner(&self.destination, self.id);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LivenessHandle {
    fn drop(&mut self) {
        self.inner.cancel_if_owner(&self.destination, self.id);
    }
}
