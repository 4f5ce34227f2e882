use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::registry::TaskRegistry;

/// Periodically evicts terminal tasks older than the retention window,
/// bounding registry memory independently of request flow.
pub struct Sweeper {
    registry: Arc<TaskRegistry>,
    interval: Duration,
    retention: chrono::Duration,
}

impl Sweeper {
    pub fn new(registry: Arc<TaskRegistry>, interval: Duration, retention: chrono::Duration) -> Self {
        Self {
            registry,
            interval,
            retention,
        }
    }

    /// Spawns the sweep loop. The returned handle stops it deterministically.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh process
            // does not sweep an empty registry.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = self.registry.evict(self.retention);
                        if evicted > 0 {
                            info!(evicted, retained = self.registry.len(), "sweeper evicted expired tasks");
                        } else {
                            debug!(retained = self.registry.len(), "sweeper tick, nothing to evict");
                        }
                    }
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            debug!("sweeper stopping");
                            break;
                        }
                    }
                }
            }
        });
        SweeperHandle { shutdown_tx, join }
    }
}

pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.join.await {
            warn!(error = %err, "sweeper join error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ErrorCode, TaskOutcome, TaskRequest};
    use std::time::Duration as StdDuration;

    fn request() -> TaskRequest {
        TaskRequest {
            url: "https://example.com".into(),
            site_key: "0x4AAAAAAA".into(),
            action: None,
            cdata: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_on_tick_and_stops_on_shutdown() {
        let registry = Arc::new(TaskRegistry::new());
        let task = registry.create(request());
        registry.begin(task.id).unwrap();
        registry
            .finish(
                task.id,
                TaskOutcome::Failed {
                    code: ErrorCode::CaptchaFail,
                    elapsed: StdDuration::from_secs(1),
                },
            )
            .unwrap();

        // Zero retention: anything terminal is past the window.
        let sweeper = Sweeper::new(
            Arc::clone(&registry),
            StdDuration::from_secs(60),
            chrono::Duration::zero(),
        );
        let handle = sweeper.spawn();

        tokio::time::sleep(StdDuration::from_secs(61)).await;
        assert!(registry.get(task.id).is_none());
        assert!(registry.is_empty());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_retains_non_terminal_tasks() {
        let registry = Arc::new(TaskRegistry::new());
        let task = registry.create(request());

        let sweeper = Sweeper::new(
            Arc::clone(&registry),
            StdDuration::from_secs(10),
            chrono::Duration::zero(),
        );
        let handle = sweeper.spawn();

        tokio::time::sleep(StdDuration::from_secs(35)).await;
        assert!(registry.get(task.id).is_some());

        handle.shutdown().await;
    }
}
