use crate::{context::AppContext, error::PortalResult};
use std::{future::Future, sync::Arc};
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::expired_session_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::expired_email_token_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::orphaned_upload_sweep_job(Arc::clone(&self)));
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    async fn run_every<F, Fut>(scheduler: Arc<Self>, period: Duration, name: &'static str, task: F)
    where
        F: Fn(Arc<AppContext>) -> Fut,
        Fut: Future<Output = PortalResult<u64>>,
    {
        let mut interval = interval(period);

        loop {
            interval.tick().await;

            match task(Arc::clone(&scheduler.context)).await {
                Ok(0) => {}
                Ok(count) => info!(job = name, count, "Background job removed records"),
                Err(e) => error!(job = name, error = %e, "Background job failed"),
            }
        }
    }

    /// Cleanup expired sessions (runs every hour)
    async fn expired_session_cleanup_job(scheduler: Arc<Self>) {
        Self::run_every(scheduler, Duration::from_secs(3600), "session_cleanup", |ctx| async move {
            tasks::cleanup_expired_sessions(&ctx).await
        })
        .await
    }

    /// Cleanup expired email tokens (runs every hour)
    async fn expired_email_token_cleanup_job(scheduler: Arc<Self>) {
        Self::run_every(scheduler, Duration::from_secs(3600), "email_token_cleanup", |ctx| async move {
            tasks::cleanup_expired_email_tokens(&ctx).await
        })
        .await
    }

    /// Remove upload files with no metadata (runs every 6 hours)
    async fn orphaned_upload_sweep_job(scheduler: Arc<Self>) {
        Self::run_every(scheduler, Duration::from_secs(21600), "upload_sweep", |ctx| async move {
            tasks::sweep_orphaned_uploads(&ctx).await
        })
        .await
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        Self::run_every(scheduler, Duration::from_secs(300), "health_check", |ctx| async move {
            tasks::health_check(&ctx).await.map(|_| 0)
        })
        .await
    }
}
