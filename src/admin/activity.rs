/// Activity log
///
/// Append-only audit trail of member and admin actions. Recording never
/// fails the request that triggered it.
use crate::error::PortalResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, QueryBuilder, Sqlite, SqlitePool};

/// Logged action names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityAction {
    UserRegister,
    UserLogin,
    UserLogout,
    UserVerifyEmail,
    UserPasswordReset,
    UserPasswordChange,
    UserOnboarded,
    UserProfileUpdate,
    UserRoleChange,
    UserDisabled,
    UserEnabled,
    ConferenceCreate,
    ConferenceUpdate,
    ConferenceDelete,
    RegistrationCreate,
    RegistrationCancel,
    RegistrationApprove,
    RegistrationReject,
    RegistrationPromote,
    PaymentProofSubmitted,
    PaymentConfirmed,
    PaymentProofRejected,
    PaymentRefunded,
    PaymentWaived,
    PostCreate,
    PostUpdate,
    PostDelete,
    CommentCreate,
    CommentDelete,
    ReportSubmit,
    ReportResolve,
    UploadCreate,
    UploadDelete,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::UserRegister => "user.register",
            ActivityAction::UserLogin => "user.login",
            ActivityAction::UserLogout => "user.logout",
            ActivityAction::UserVerifyEmail => "user.verify_email",
            ActivityAction::UserPasswordReset => "user.password_reset",
            ActivityAction::UserPasswordChange => "user.password_change",
            ActivityAction::UserOnboarded => "user.onboarded",
            ActivityAction::UserProfileUpdate => "user.profile_update",
            ActivityAction::UserRoleChange => "user.role_change",
            ActivityAction::UserDisabled => "user.disabled",
            ActivityAction::UserEnabled => "user.enabled",
            ActivityAction::ConferenceCreate => "conference.create",
            ActivityAction::ConferenceUpdate => "conference.update",
            ActivityAction::ConferenceDelete => "conference.delete",
            ActivityAction::RegistrationCreate => "registration.create",
            ActivityAction::RegistrationCancel => "registration.cancel",
            ActivityAction::RegistrationApprove => "registration.approve",
            ActivityAction::RegistrationReject => "registration.reject",
            ActivityAction::RegistrationPromote => "registration.promote",
            ActivityAction::PaymentProofSubmitted => "payment.proof_submitted",
            ActivityAction::PaymentConfirmed => "payment.confirmed",
            ActivityAction::PaymentProofRejected => "payment.proof_rejected",
            ActivityAction::PaymentRefunded => "payment.refunded",
            ActivityAction::PaymentWaived => "payment.waived",
            ActivityAction::PostCreate => "post.create",
            ActivityAction::PostUpdate => "post.update",
            ActivityAction::PostDelete => "post.delete",
            ActivityAction::CommentCreate => "comment.create",
            ActivityAction::CommentDelete => "comment.delete",
            ActivityAction::ReportSubmit => "report.submit",
            ActivityAction::ReportResolve => "report.resolve",
            ActivityAction::UploadCreate => "upload.create",
            ActivityAction::UploadDelete => "upload.delete",
        }
    }
}

/// A single entry to record
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub user_id: Option<String>,
    pub action: ActivityAction,
    pub entity_type: Option<&'static str>,
    pub entity_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
}

impl ActivityEntry {
    pub fn new(action: ActivityAction) -> Self {
        Self {
            user_id: None,
            action,
            entity_type: None,
            entity_id: None,
            details: None,
            ip_address: None,
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn entity(mut self, entity_type: &'static str, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type);
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }
}

/// Stored log record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: i64,
    pub user_id: Option<String>,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub details: Option<Json<serde_json::Value>>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Admin listing filter; `before_id` pages backwards through history
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub user_id: Option<String>,
    /// Matches `registration.` style prefixes as well as full names
    pub action_prefix: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub before_id: Option<i64>,
    pub limit: i64,
}

const ACTIVITY_COLUMNS: &str =
    "id, user_id, action, entity_type, entity_id, details, ip_address, created_at";

/// Activity logger
#[derive(Clone)]
pub struct ActivityLogger {
    db: SqlitePool,
}

impl ActivityLogger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record an entry; failures are logged and swallowed
    pub async fn record(&self, entry: ActivityEntry) {
        if let Err(e) = self.try_record(&entry).await {
            tracing::warn!(
                action = entry.action.as_str(),
                error = %e,
                "Failed to record activity"
            );
        }
    }

    async fn try_record(&self, entry: &ActivityEntry) -> PortalResult<()> {
        let details = entry.details.as_ref().map(|d| d.to_string());

        sqlx::query(
            r#"
            INSERT INTO activity_log (user_id, action, entity_type, entity_id, details, ip_address, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&entry.user_id)
        .bind(entry.action.as_str())
        .bind(entry.entity_type)
        .bind(&entry.entity_id)
        .bind(details)
        .bind(&entry.ip_address)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// A member's own history, newest first
    pub async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        before_id: Option<i64>,
    ) -> PortalResult<Vec<ActivityRecord>> {
        self.list(&ActivityFilter {
            user_id: Some(user_id.to_string()),
            before_id,
            limit,
            ..Default::default()
        })
        .await
    }

    /// Filtered history across all members, newest first
    pub async fn list(&self, filter: &ActivityFilter) -> PortalResult<Vec<ActivityRecord>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM activity_log WHERE 1 = 1",
            ACTIVITY_COLUMNS
        ));

        if let Some(user_id) = &filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id.clone());
        }
        if let Some(prefix) = &filter.action_prefix {
            // substr keeps `_` and `%` in action names literal
            query
                .push(" AND substr(action, 1, length(")
                .push_bind(prefix.clone())
                .push(")) = ")
                .push_bind(prefix.clone());
        }
        if let Some(entity_type) = &filter.entity_type {
            query.push(" AND entity_type = ").push_bind(entity_type.clone());
        }
        if let Some(entity_id) = &filter.entity_id {
            query.push(" AND entity_id = ").push_bind(entity_id.clone());
        }
        if let Some(before_id) = filter.before_id {
            query.push(" AND id < ").push_bind(before_id);
        }

        query
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(filter.limit.clamp(1, 500));

        Ok(query
            .build_query_as::<ActivityRecord>()
            .fetch_all(&self.db)
            .await?)
    }
}
