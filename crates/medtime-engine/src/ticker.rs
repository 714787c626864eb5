use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// One unit of periodic work.
#[async_trait]
pub trait Tick: Send + Sync + 'static {
    async fn tick(&self);
}

/// Runs a [`Tick`] on a fixed period until stopped.
///
/// The first tick fires immediately. A slow tick delays the next one rather
/// than causing a burst. `stop` lets the tick in progress finish.
pub struct PeriodicTask {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn start(name: &'static str, period: Duration, task: Arc<dyn Tick>) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("{} started (every {:?})", name, period);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => task.tick().await,
                }
            }
        });

        Self {
            name,
            stop_tx,
            handle,
        }
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!("{} ended abnormally: {}", self.name, e);
        }
        info!("{} stopped", self.name);
    }
}
