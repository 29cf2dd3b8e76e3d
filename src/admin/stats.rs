/// Dashboard statistics
use crate::error::PortalResult;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

/// Revenue collected in one currency
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Revenue {
    pub currency: String,
    pub amount_cents: i64,
}

/// Headline numbers for the admin dashboard
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: i64,
    pub onboarded_users: i64,
    pub total_conferences: i64,
    pub published_conferences: i64,
    pub registrations_by_status: BTreeMap<String, i64>,
    pub payments_by_status: BTreeMap<String, i64>,
    pub revenue: Vec<Revenue>,
    pub open_reports: i64,
    pub total_posts: i64,
    pub total_comments: i64,
}

async fn count(db: &SqlitePool, sql: &str) -> PortalResult<i64> {
    Ok(sqlx::query_scalar(sql).fetch_one(db).await?)
}

async fn grouped(db: &SqlitePool, sql: &str) -> PortalResult<BTreeMap<String, i64>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(sql).fetch_all(db).await?;
    Ok(rows.into_iter().collect())
}

/// Gather dashboard statistics
pub async fn dashboard_stats(db: &SqlitePool) -> PortalResult<DashboardStats> {
    let revenue: Vec<(String, i64)> = sqlx::query_as(
        "SELECT currency, SUM(amount_paid_cents) FROM registration
         WHERE payment_status = 'paid' GROUP BY currency ORDER BY currency",
    )
    .fetch_all(db)
    .await?;

    Ok(DashboardStats {
        total_users: count(db, "SELECT COUNT(*) FROM account").await?,
        onboarded_users: count(db, "SELECT COUNT(*) FROM account WHERE onboarded_at IS NOT NULL")
            .await?,
        total_conferences: count(db, "SELECT COUNT(*) FROM conference").await?,
        published_conferences: count(db, "SELECT COUNT(*) FROM conference WHERE published = 1")
            .await?,
        registrations_by_status: grouped(
            db,
            "SELECT status, COUNT(*) FROM registration GROUP BY status",
        )
        .await?,
        payments_by_status: grouped(
            db,
            "SELECT payment_status, COUNT(*) FROM registration GROUP BY payment_status",
        )
        .await?,
        revenue: revenue
            .into_iter()
            .map(|(currency, amount_cents)| Revenue {
                currency,
                amount_cents,
            })
            .collect(),
        open_reports: count(db, "SELECT COUNT(*) FROM report WHERE status = 'open'").await?,
        total_posts: count(db, "SELECT COUNT(*) FROM post").await?,
        total_comments: count(db, "SELECT COUNT(*) FROM comment").await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::{NaiveDate, Utc};

    #[tokio::test]
    async fn test_empty_database() {
        let pool = db::connect_in_memory().await.unwrap();
        let stats = dashboard_stats(&pool).await.unwrap();
        assert_eq!(stats.total_users, 0);
        assert!(stats.registrations_by_status.is_empty());
        assert!(stats.revenue.is_empty());
    }

    #[tokio::test]
    async fn test_revenue_counts_only_paid() {
        let pool = db::connect_in_memory().await.unwrap();
        let now = Utc::now();
        let date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();

        sqlx::query(
            "INSERT INTO account (id, email, password_hash, full_name, created_at, updated_at)
             VALUES ('u1', 'a@fpa.test', 'x', 'A', ?1, ?1)",
        )
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO conference (id, title, slug, venue, start_date, end_date, registration_deadline, price_cents, currency, published, created_at, updated_at)
             VALUES ('c1', 'C', 'c', 'Suva', ?1, ?1, ?1, 100, 'FJD', 1, ?2, ?2)",
        )
        .bind(date)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();
        for (id, payment, paid) in [("r1", "paid", 100), ("r2", "refunded", 100), ("r3", "unpaid", 0)] {
            sqlx::query(
                "INSERT INTO registration (id, conference_id, user_id, status, payment_status, amount_due_cents, amount_paid_cents, currency, created_at, updated_at)
                 VALUES (?1, 'c1', 'u1', 'approved', ?2, 100, ?3, 'FJD', ?4, ?4)",
            )
            .bind(id)
            .bind(payment)
            .bind(paid)
            .bind(now)
            .execute(&pool)
            .await
            .unwrap();
        }

        let stats = dashboard_stats(&pool).await.unwrap();
        assert_eq!(stats.published_conferences, 1);
        assert_eq!(stats.registrations_by_status.get("approved"), Some(&3));
        assert_eq!(stats.payments_by_status.get("paid"), Some(&1));
        assert_eq!(stats.revenue.len(), 1);
        assert_eq!(stats.revenue[0].amount_cents, 100);
    }
}
