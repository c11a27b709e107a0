use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::{handlers::relay_worker::RelayWorker, services::relay_status::RelayStatus};

/// Runs relay workers on a fixed interval until cancelled.
pub struct RelayScheduler {
    workers: Vec<Arc<RelayWorker>>,
    status: Arc<RelayStatus>,
    poll_interval: Duration,
}

impl RelayScheduler {
    pub fn new(workers: Vec<RelayWorker>, status: Arc<RelayStatus>, poll_interval: Duration) -> Self {
        Self {
            workers: workers.into_iter().map(Arc::new).collect(),
            status,
            poll_interval,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> RelayHandle {
        self.status.set_running(true);
        let handles = self
            .workers
            .into_iter()
            .map(|worker| {
                tokio::spawn(drive(
                    worker,
                    self.status.clone(),
                    self.poll_interval,
                    cancel.clone(),
                ))
            })
            .collect();

        RelayHandle {
            handles,
            cancel,
            status: self.status,
        }
    }
}

pub struct RelayHandle {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    status: Arc<RelayStatus>,
}

impl RelayHandle {
    /// Stops claiming new batches and waits up to `grace` for in-flight cycles.
    /// Returns false when the grace period ran out first.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.cancel.cancel();
        let status = self.status.clone();
        let finished = tokio::time::timeout(grace, self.join()).await.is_ok();
        if !finished {
            warn!(grace_secs = grace.as_secs(), "relay workers did not stop within grace period");
        }
        status.set_running(false);
        finished
    }

    /// Awaits `server` while the relay runs. The relay stops when the token is
    /// cancelled and the server exiting cancels it too. Both wind down at the
    /// same time, so a stuck shutdown costs one grace period rather than two.
    pub async fn run_with<F, T>(self, server: F, grace: Duration) -> (T, bool)
    where
        F: Future<Output = T>,
    {
        let cancel = self.cancel.clone();
        let server = async move {
            let served = server.await;
            cancel.cancel();
            served
        };
        let relay = async move {
            self.cancel.cancelled().await;
            self.shutdown(grace).await
        };
        tokio::join!(server, relay)
    }

    pub async fn join(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "relay worker task failed");
            }
        }
        self.status.set_running(false);
    }
}

async fn drive(
    worker: Arc<RelayWorker>,
    status: Arc<RelayStatus>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(worker = worker.name(), "relay worker started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // keep going while full batches are making progress
        loop {
            match worker.run_cycle(&cancel).await {
                Ok(report) => {
                    status.record_cycle(&report);
                    if report.claimed < worker.config().batch_size
                        || !report.attempted_any()
                        || cancel.is_cancelled()
                    {
                        break;
                    }
                }
                Err(err) => {
                    error!(worker = worker.name(), error = %err, "relay cycle failed");
                    status.record_error(&err.to_string());
                    break;
                }
            }
        }
    }

    info!(worker = worker.name(), "relay worker stopped");
}
