//! Cluster operator background worker.
//!
//! Runs a pass over every declared cluster on a periodic interval, records
//! the outcome in each cluster's status and finalizes deleted clusters once
//! their infrastructure is gone.

use std::sync::Arc;
use std::time::Duration;

use strato_reconcile::{
    ChangeKind, ConvergenceStatus, Controller, Error, ErrorKind, Reconcilable, Result,
    RetryTracker, DEFAULT_FAILURE_WINDOW, DEFAULT_MAX_FAILED_PASSES, DEFAULT_RECONCILE_INTERVAL,
};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::cluster::{update_status, Cluster, ClusterStore};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub interval: Duration,
    /// Clusters reconciled at the same time.
    pub max_concurrent: usize,
    /// Failed passes within `failure_window` before a cluster is reported as
    /// not converged.
    pub max_failed_passes: u32,
    pub failure_window: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONCILE_INTERVAL,
            max_concurrent: 4,
            max_failed_passes: DEFAULT_MAX_FAILED_PASSES,
            failure_window: DEFAULT_FAILURE_WINDOW,
        }
    }
}

/// How one cluster's pass ended, as seen by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterOutcome {
    /// Nothing left to change.
    Converged,
    /// Changes were applied or the pass was canceled; more passes follow.
    Converging,
    /// Teardown is still underway.
    Deleting,
    /// Teardown finished and the cluster was removed from the store.
    Finalized,
    /// The pass failed. `exhausted` once the failure budget is spent.
    Failed { kind: ErrorKind, exhausted: bool },
}

/// Statistics from one pass over every cluster.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassStats {
    pub clusters_processed: u32,
    pub converged: u32,
    pub converging: u32,
    pub deleting: u32,
    pub finalized: u32,
    pub failed: u32,
}

impl PassStats {
    fn record(&mut self, outcome: &ClusterOutcome) {
        self.clusters_processed += 1;
        match outcome {
            ClusterOutcome::Converged => self.converged += 1,
            ClusterOutcome::Converging => self.converging += 1,
            ClusterOutcome::Deleting => self.deleting += 1,
            ClusterOutcome::Finalized => self.finalized += 1,
            ClusterOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Cluster worker that runs the reconciliation loop.
#[derive(Clone)]
pub struct ClusterWorker {
    controller: Arc<Controller<Cluster>>,
    store: Arc<dyn ClusterStore>,
    tracker: Arc<Mutex<RetryTracker>>,
    config: WorkerConfig,
}

impl ClusterWorker {
    pub fn new(
        controller: Controller<Cluster>,
        store: Arc<dyn ClusterStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            controller: Arc::new(controller),
            store,
            tracker: Arc::new(Mutex::new(RetryTracker::new(
                config.max_failed_passes,
                config.failure_window,
            ))),
            config,
        }
    }

    /// Run the worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_concurrent = self.config.max_concurrent,
            "Starting cluster worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.reconcile_all().await {
                        error!(error = %e, "Cluster reconciliation failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Cluster worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run one pass over every cluster in the store.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Result<PassStats> {
        let clusters = self.store.list().await?;
        debug!(cluster_count = clusters.len(), "Found clusters to reconcile");
        self.tracker.lock().await.prune();

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();
        for cluster in clusters {
            let worker = self.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::ExecutionFailed(e.to_string()))?;
                worker.reconcile_one(&cluster).await
            });
        }

        let mut stats = PassStats::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => stats.record(&outcome),
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed to record cluster outcome");
                    stats.clusters_processed += 1;
                    stats.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Cluster task panicked");
                    stats.clusters_processed += 1;
                    stats.failed += 1;
                }
            }
        }

        info!(
            clusters_processed = stats.clusters_processed,
            converged = stats.converged,
            converging = stats.converging,
            deleting = stats.deleting,
            finalized = stats.finalized,
            failed = stats.failed,
            "Reconciliation pass complete"
        );
        Ok(stats)
    }

    /// Run one pass for `cluster` and record its outcome.
    ///
    /// A failed pass is an outcome, not an error; errors come from writing
    /// the status or finalizing.
    #[instrument(skip_all, fields(cluster = %cluster.id))]
    pub async fn reconcile_one(&self, cluster: &Cluster) -> Result<ClusterOutcome> {
        let key = cluster.key();

        let report = match self.controller.reconcile(cluster).await {
            Ok(report) => report,
            Err(err) => return self.record_failure(cluster, &key, err).await,
        };
        self.tracker.lock().await.clear(&key);

        if cluster.deleting {
            if !report.may_finalize() {
                return Ok(ClusterOutcome::Deleting);
            }
            self.store.remove(&cluster.id).await?;
            info!(pass_id = %report.pass_id, "Cluster finalized");
            return Ok(ClusterOutcome::Finalized);
        }

        let settled = report.is_completed()
            && report
                .changes
                .iter()
                .all(|(_, change)| *change == ChangeKind::None);
        let convergence = if settled {
            ConvergenceStatus::Converged
        } else {
            ConvergenceStatus::Converging
        };
        update_status(self.store.as_ref(), &cluster.id, |status| {
            status.convergence = convergence;
            status.last_error_kind = None;
            status.last_error = None;
        })
        .await?;

        Ok(if settled {
            ClusterOutcome::Converged
        } else {
            ClusterOutcome::Converging
        })
    }

    async fn record_failure(
        &self,
        cluster: &Cluster,
        key: &str,
        err: Error,
    ) -> Result<ClusterOutcome> {
        let kind = err.kind();
        let exhausted = self.tracker.lock().await.record_failure(key, kind);
        warn!(
            error = %err,
            kind = kind.as_str(),
            exhausted,
            "Reconciliation pass failed"
        );

        let message = err.to_string();
        let convergence = if exhausted {
            ConvergenceStatus::NotConverged
        } else {
            ConvergenceStatus::Converging
        };
        update_status(self.store.as_ref(), &cluster.id, |status| {
            status.convergence = convergence;
            status.last_error_kind = Some(kind.as_str().to_string());
            status.last_error = Some(message.clone());
        })
        .await?;

        Ok(ClusterOutcome::Failed { kind, exhausted })
    }
}
