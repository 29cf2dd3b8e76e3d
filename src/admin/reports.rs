/// Report Management System
///
/// Members flag posts and comments; moderators resolve the flags by
/// dismissing them, hiding the content or deleting it.
use crate::{
    blog::{purge_comment, purge_post, ContentKind},
    error::{PortalError, PortalResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

/// Report reason types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportReason {
    Spam,
    Harassment,
    Inappropriate,
    Misinformation,
    Other,
}

impl ReportReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportReason::Spam => "spam",
            ReportReason::Harassment => "harassment",
            ReportReason::Inappropriate => "inappropriate",
            ReportReason::Misinformation => "misinformation",
            ReportReason::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> PortalResult<Self> {
        match s.to_lowercase().as_str() {
            "spam" => Ok(ReportReason::Spam),
            "harassment" => Ok(ReportReason::Harassment),
            "inappropriate" => Ok(ReportReason::Inappropriate),
            "misinformation" => Ok(ReportReason::Misinformation),
            "other" => Ok(ReportReason::Other),
            _ => Err(PortalError::Validation(format!("Invalid report reason: {}", s))),
        }
    }
}

impl TryFrom<String> for ReportReason {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ReportReason::from_str(&value)
    }
}

/// Report status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Open,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Open => "open",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Dismissed => "dismissed",
        }
    }

    pub fn from_str(s: &str) -> PortalResult<Self> {
        match s.to_lowercase().as_str() {
            "open" => Ok(ReportStatus::Open),
            "resolved" => Ok(ReportStatus::Resolved),
            "dismissed" => Ok(ReportStatus::Dismissed),
            _ => Err(PortalError::Validation(format!("Invalid report status: {}", s))),
        }
    }
}

impl TryFrom<String> for ReportStatus {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ReportStatus::from_str(&value)
    }
}

/// What a moderator does about a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportAction {
    Dismiss,
    Hide,
    Delete,
}

impl ReportAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportAction::Dismiss => "dismiss",
            ReportAction::Hide => "hide",
            ReportAction::Delete => "delete",
        }
    }

    /// Status a report ends up in after this action
    pub fn outcome(&self) -> ReportStatus {
        match self {
            ReportAction::Dismiss => ReportStatus::Dismissed,
            ReportAction::Hide | ReportAction::Delete => ReportStatus::Resolved,
        }
    }
}

/// Report record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: i64,
    #[sqlx(try_from = "String")]
    pub target_type: ContentKind,
    pub target_id: String,
    #[sqlx(try_from = "String")]
    pub reason: ReportReason,
    pub details: Option<String>,
    pub reported_by: String,
    #[sqlx(try_from = "String")]
    pub status: ReportStatus,
    pub resolution: Option<String>,
    pub resolution_note: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Submit report request
#[derive(Debug, Clone, Deserialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReportRequest {
    pub target_type: ContentKind,
    pub target_id: String,
    pub reason: ReportReason,
    #[validate(length(max = 2000))]
    pub details: Option<String>,
}

/// Resolve report request
#[derive(Debug, Clone, Deserialize, validator::Validate)]
pub struct ResolveReportRequest {
    pub action: ReportAction,
    #[validate(length(max = 2000))]
    pub note: Option<String>,
}

/// Outcome of resolving a report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedReport {
    pub report: Report,
    /// Other open reports on the same content closed alongside
    pub also_closed: u64,
    /// Author of the reported content, for notification
    #[serde(skip)]
    pub content_author_id: Option<String>,
}

const REPORT_COLUMNS: &str = "id, target_type, target_id, reason, details, reported_by, status, \
     resolution, resolution_note, resolved_by, resolved_at, created_at";

/// Report manager
#[derive(Clone)]
pub struct ReportManager {
    db: SqlitePool,
}

async fn content_author(
    conn: &mut SqliteConnection,
    kind: ContentKind,
    target_id: &str,
) -> PortalResult<Option<String>> {
    let query = match kind {
        ContentKind::Post => "SELECT author_id FROM post WHERE id = ?1",
        ContentKind::Comment => "SELECT author_id FROM comment WHERE id = ?1",
    };

    Ok(sqlx::query_scalar(query)
        .bind(target_id)
        .fetch_optional(&mut *conn)
        .await?)
}

impl ReportManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Submit a report
    pub async fn submit_report(
        &self,
        target_type: ContentKind,
        target_id: &str,
        reason: ReportReason,
        details: Option<&str>,
        reported_by: &str,
    ) -> PortalResult<Report> {
        let mut conn = self.db.acquire().await?;

        let author = content_author(&mut conn, target_type, target_id)
            .await?
            .ok_or_else(|| PortalError::NotFound(format!("{} not found", target_type.as_str())))?;

        if author == reported_by {
            return Err(PortalError::Validation(
                "You cannot report your own content".to_string(),
            ));
        }

        let open: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM report
             WHERE target_type = ?1 AND target_id = ?2 AND reported_by = ?3 AND status = 'open'",
        )
        .bind(target_type.as_str())
        .bind(target_id)
        .bind(reported_by)
        .fetch_one(&mut *conn)
        .await?;

        if open > 0 {
            return Err(PortalError::Conflict(
                "You have already reported this content".to_string(),
            ));
        }

        let details = details.map(str::trim).filter(|d| !d.is_empty());
        let result = sqlx::query(
            r#"
            INSERT INTO report (target_type, target_id, reason, details, reported_by, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'open', ?6)
            "#,
        )
        .bind(target_type.as_str())
        .bind(target_id)
        .bind(reason.as_str())
        .bind(details)
        .bind(reported_by)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        drop(conn);

        tracing::info!(
            target_type = target_type.as_str(),
            target_id = %target_id,
            reason = reason.as_str(),
            "Report submitted"
        );

        self.get_report(result.last_insert_rowid()).await
    }

    /// Resolve an open report and every other open report on the same content
    pub async fn resolve_report(
        &self,
        report_id: i64,
        action: ReportAction,
        resolved_by: &str,
        note: Option<&str>,
    ) -> PortalResult<ResolvedReport> {
        let mut tx = self.db.begin().await?;

        let report = sqlx::query_as::<_, Report>(&format!(
            "SELECT {} FROM report WHERE id = ?1",
            REPORT_COLUMNS
        ))
        .bind(report_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| PortalError::NotFound(format!("Report {} not found", report_id)))?;

        if report.status != ReportStatus::Open {
            return Err(PortalError::InvalidTransition(format!(
                "Report {} is already {}",
                report_id,
                report.status.as_str()
            )));
        }

        let content_author_id = content_author(&mut tx, report.target_type, &report.target_id).await?;

        // The content may already be gone; closing the reports still applies
        if content_author_id.is_some() {
            match (action, report.target_type) {
                (ReportAction::Dismiss, _) => {}
                (ReportAction::Hide, ContentKind::Post) => {
                    sqlx::query("UPDATE post SET status = 'hidden', updated_at = ?1 WHERE id = ?2")
                        .bind(Utc::now())
                        .bind(&report.target_id)
                        .execute(&mut *tx)
                        .await?;
                }
                (ReportAction::Hide, ContentKind::Comment) => {
                    sqlx::query("UPDATE comment SET hidden = 1, updated_at = ?1 WHERE id = ?2")
                        .bind(Utc::now())
                        .bind(&report.target_id)
                        .execute(&mut *tx)
                        .await?;
                }
                (ReportAction::Delete, ContentKind::Post) => {
                    purge_post(&mut tx, &report.target_id).await?;
                }
                (ReportAction::Delete, ContentKind::Comment) => {
                    purge_comment(&mut tx, &report.target_id).await?;
                }
            }
        }

        let note = note.map(str::trim).filter(|n| !n.is_empty());
        let closed = sqlx::query(
            r#"
            UPDATE report
            SET status = ?1, resolution = ?2, resolution_note = ?3, resolved_by = ?4, resolved_at = ?5
            WHERE target_type = ?6 AND target_id = ?7 AND status = 'open'
            "#,
        )
        .bind(action.outcome().as_str())
        .bind(action.as_str())
        .bind(note)
        .bind(resolved_by)
        .bind(Utc::now())
        .bind(report.target_type.as_str())
        .bind(&report.target_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        tracing::info!(
            report_id,
            action = action.as_str(),
            closed,
            "Report resolved"
        );

        Ok(ResolvedReport {
            report: self.get_report(report_id).await?,
            also_closed: closed.saturating_sub(1),
            content_author_id,
        })
    }

    /// Get report by ID
    pub async fn get_report(&self, report_id: i64) -> PortalResult<Report> {
        sqlx::query_as::<_, Report>(&format!(
            "SELECT {} FROM report WHERE id = ?1",
            REPORT_COLUMNS
        ))
        .bind(report_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| PortalError::NotFound(format!("Report {} not found", report_id)))
    }

    /// List reports with optional status filter, newest first
    pub async fn list_reports(
        &self,
        status: Option<ReportStatus>,
        limit: Option<i64>,
    ) -> PortalResult<Vec<Report>> {
        let limit = limit.unwrap_or(100).clamp(1, 500);

        let reports = if let Some(status) = status {
            sqlx::query_as::<_, Report>(&format!(
                "SELECT {} FROM report WHERE status = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
                REPORT_COLUMNS
            ))
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.db)
            .await?
        } else {
            sqlx::query_as::<_, Report>(&format!(
                "SELECT {} FROM report ORDER BY created_at DESC, id DESC LIMIT ?1",
                REPORT_COLUMNS
            ))
            .bind(limit)
            .fetch_all(&self.db)
            .await?
        };

        Ok(reports)
    }

    /// Number of reports awaiting review
    pub async fn count_open(&self) -> PortalResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM report WHERE status = 'open'")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}
