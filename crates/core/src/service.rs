use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use crate::config::ConverterConfig;
use crate::encoder::Encoder;
use crate::limiter::{Admission, AdmissionLimiter, UserId};
use crate::session::SessionHandler;
use crate::sweeper;
use crate::transport::FileResolver;

/// Process-wide state: admission, the shared session handler, background housekeeping
/// and the shutdown signal.
pub struct Service {
    config: Arc<ConverterConfig>,
    limiter: Arc<AdmissionLimiter>,
    handler: Arc<SessionHandler>,
    accepting: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl Service {
    pub fn new(
        config: ConverterConfig,
        encoder: Arc<dyn Encoder>,
        resolver: Arc<dyn FileResolver>,
    ) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let handler = SessionHandler::new(&config, encoder, resolver)
            .context("Failed to build download client")?;
        let limiter = AdmissionLimiter::new(config.throttle.max_requests, config.throttle.window());
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            limiter: Arc::new(limiter),
            handler: Arc::new(handler),
            accepting: AtomicBool::new(true),
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<AdmissionLimiter> {
        &self.limiter
    }

    /// Create the scratch directory and clear whatever a previous run left behind
    pub async fn startup(&self) -> Result<usize> {
        let scratch = self.handler.scratch().clone();
        scratch
            .ensure()
            .with_context(|| format!("Failed to create scratch directory: {}", scratch.root().display()))?;

        info!("🔄 Startup sweep of {}", scratch.root().display());
        let removed = sweeper::sweep_once(scratch, self.config.max_file_age())
            .await
            .context("Startup sweep failed")?;
        if removed > 0 {
            info!("✅ Startup sweep removed {} orphaned file(s)", removed);
        } else {
            info!("✅ Startup sweep found no orphaned files");
        }
        Ok(removed)
    }

    /// Spawn the storage sweeper and the limiter pruner. Both stop on [`Service::shutdown`].
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        vec![
            sweeper::spawn_storage_sweeper(
                self.handler.scratch().clone(),
                self.config.sweep_interval(),
                self.config.max_file_age(),
                self.shutdown_tx.subscribe(),
            ),
            sweeper::spawn_limiter_pruner(
                self.limiter.clone(),
                self.config.throttle.prune_interval(),
                self.shutdown_tx.subscribe(),
            ),
        ]
    }

    /// Admission check for one media request
    pub fn admit(&self, user: UserId) -> Admission {
        if !self.is_accepting() {
            return Admission::Closed;
        }
        let admission = self.limiter.admit(user);
        if let Admission::Denied { retry_after_secs } = admission {
            warn!("Throttled user {}: retry in {}s", user, retry_after_secs);
        }
        admission
    }

    /// Shared handler; clone the `Arc` into each request task
    pub fn handler(&self) -> Arc<SessionHandler> {
        self.handler.clone()
    }

    /// Stop admitting requests and signal background tasks to exit.
    /// In-flight sessions are left to the caller to drain.
    pub fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("Shutting down: no longer accepting requests");
        }
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Receiver that flips to `true` on shutdown
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}
