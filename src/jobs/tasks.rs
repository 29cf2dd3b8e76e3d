/// Background task implementations
use crate::{context::AppContext, error::PortalResult};

/// Cleanup expired sessions and refresh tokens
pub async fn cleanup_expired_sessions(ctx: &AppContext) -> PortalResult<u64> {
    let (sessions_deleted, refresh_tokens_deleted) =
        ctx.account_manager.cleanup_expired_sessions().await?;

    Ok(sessions_deleted + refresh_tokens_deleted)
}

/// Cleanup expired or used email tokens
pub async fn cleanup_expired_email_tokens(ctx: &AppContext) -> PortalResult<u64> {
    ctx.account_manager.cleanup_expired_email_tokens().await
}

/// Remove upload files that no upload row references
pub async fn sweep_orphaned_uploads(ctx: &AppContext) -> PortalResult<u64> {
    ctx.upload_store.sweep_orphans().await
}

/// Health check - verify the database answers
pub async fn health_check(ctx: &AppContext) -> PortalResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ServerConfig, db};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_tasks_run_on_empty_database() {
        let dir = tempdir().unwrap();
        let pool = db::connect_in_memory().await.unwrap();
        let ctx = AppContext::from_pool(ServerConfig::for_testing(dir.path().to_path_buf()), pool)
            .unwrap();

        assert_eq!(cleanup_expired_sessions(&ctx).await.unwrap(), 0);
        assert_eq!(cleanup_expired_email_tokens(&ctx).await.unwrap(), 0);
        assert_eq!(sweep_orphaned_uploads(&ctx).await.unwrap(), 0);
        health_check(&ctx).await.unwrap();
    }
}
