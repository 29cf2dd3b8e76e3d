/// Application context and dependency injection
use crate::{
    account::AccountManager,
    admin::{ActivityLogger, ReportManager},
    blog::BlogManager,
    conference::ConferenceManager,
    config::ServerConfig,
    db,
    error::PortalResult,
    mailer::Mailer,
    rate_limit::RateLimiter,
    registration::RegistrationManager,
    upload_store::UploadStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub account_manager: Arc<AccountManager>,
    pub conference_manager: Arc<ConferenceManager>,
    pub registration_manager: Arc<RegistrationManager>,
    pub blog_manager: Arc<BlogManager>,
    pub report_manager: Arc<ReportManager>,
    pub upload_store: Arc<UploadStore>,
    pub activity: Arc<ActivityLogger>,
    pub rate_limiter: Arc<RateLimiter>,
    pub mailer: Arc<Mailer>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> PortalResult<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.storage.data_directory).await?;
        tokio::fs::create_dir_all(&config.storage.upload_directory).await?;

        let db = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        Self::from_pool(config, db)
    }

    /// Wire services around an existing, migrated pool
    pub fn from_pool(config: ServerConfig, db: SqlitePool) -> PortalResult<Self> {
        let config = Arc::new(config);

        let mailer = Mailer::new(
            config.email.clone(),
            config.service.organization_name.clone(),
            config.service.public_url.clone(),
        )?;
        if !mailer.is_configured() {
            tracing::warn!("SMTP is not configured; outgoing email will be skipped");
        }

        let conference_manager =
            ConferenceManager::new(db.clone(), config.registration.currency.clone());
        let registration_manager = RegistrationManager::new(
            db.clone(),
            conference_manager.clone(),
            config.authentication.require_email_verification,
        );

        Ok(Self {
            account_manager: Arc::new(AccountManager::new(db.clone(), config.clone())),
            conference_manager: Arc::new(conference_manager),
            registration_manager: Arc::new(registration_manager),
            blog_manager: Arc::new(BlogManager::new(db.clone())),
            report_manager: Arc::new(ReportManager::new(db.clone())),
            upload_store: Arc::new(UploadStore::on_disk(
                db.clone(),
                config.storage.upload_directory.clone(),
                config.storage.upload_limit,
            )),
            activity: Arc::new(ActivityLogger::new(db.clone())),
            rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            mailer: Arc::new(mailer),
            config,
            db,
        })
    }
}
