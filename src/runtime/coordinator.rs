//! Process-level owner of one scheduler and one resource ledger.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CoordinatorConfig;
use crate::core::{ResourceLedger, Scheduler};
use crate::runtime::api::Health;

/// Explicitly constructed coordinator; hand clones of its scheduler and
/// ledger to the API layer instead of reaching for globals.
pub struct Coordinator {
    config: CoordinatorConfig,
    scheduler: Scheduler,
    ledger: Arc<ResourceLedger>,
    shutdown: CancellationToken,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Wrap an already wired scheduler and ledger.
    #[must_use]
    pub fn new(config: CoordinatorConfig, scheduler: Scheduler, ledger: Arc<ResourceLedger>) -> Self {
        Self {
            config,
            scheduler,
            ledger,
            shutdown: CancellationToken::new(),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Scheduler handle.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Ledger handle.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    /// Token fired by [`Coordinator::shutdown`].
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn the scheduling, timeout, allocation and metrics loops on the
    /// current tokio runtime.
    pub fn spawn_loops(&self) {
        let mut loops = self.loops.lock();
        if !loops.is_empty() {
            warn!("coordinator loops already running");
            return;
        }

        let scheduler = self.scheduler.clone();
        let token = self.shutdown.clone();
        loops.push(tokio::spawn(async move { scheduler.run_scheduling_loop(token).await }));

        let scheduler = self.scheduler.clone();
        let token = self.shutdown.clone();
        loops.push(tokio::spawn(async move { scheduler.run_timeout_loop(token).await }));

        let ledger = Arc::clone(&self.ledger);
        let token = self.shutdown.clone();
        loops.push(tokio::spawn(async move { ledger.run_allocation_loop(token).await }));

        let ledger = Arc::clone(&self.ledger);
        let token = self.shutdown.clone();
        loops.push(tokio::spawn(async move { ledger.run_metrics_loop(token).await }));

        info!(loops = loops.len(), "coordinator started");
    }

    /// Stop the loops, fire every in-flight attempt's token and wait for
    /// the loops to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.scheduler.cancel_in_flight();
        let loops = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "coordinator loop ended abnormally");
            }
        }
        info!("coordinator stopped");
    }

    /// Liveness snapshot.
    #[must_use]
    pub fn health(&self) -> Health {
        Health::from_parts(&self.scheduler, &self.ledger, !self.shutdown.is_cancelled())
    }
}
