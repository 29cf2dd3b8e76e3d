/// Registration manager
///
/// Every status change is a guarded update on the expected current value, so
/// two admins acting on the same registration cannot both win.
use crate::{
    admin::Role,
    conference::ConferenceManager,
    db::account::Account,
    error::{conflict_on_unique, PortalError, PortalResult},
    registration::{PaymentStatus, Registration, RegistrationDetail, RegistrationStatus},
};
use chrono::Utc;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

const REGISTRATION_COLUMNS: &str = "id, conference_id, user_id, status, payment_status, \
     amount_due_cents, amount_paid_cents, currency, payment_reference, payment_proof_upload_id, \
     notes, admin_note, decided_by, decided_at, paid_at, created_at, updated_at";

const DETAIL_SELECT: &str = r#"
    SELECT r.id AS id, r.conference_id AS conference_id, r.user_id AS user_id,
           r.status AS status, r.payment_status AS payment_status,
           r.amount_due_cents AS amount_due_cents, r.amount_paid_cents AS amount_paid_cents,
           r.currency AS currency, r.payment_reference AS payment_reference,
           r.payment_proof_upload_id AS payment_proof_upload_id, r.notes AS notes,
           r.admin_note AS admin_note, r.decided_by AS decided_by, r.decided_at AS decided_at,
           r.paid_at AS paid_at, r.created_at AS created_at, r.updated_at AS updated_at,
           c.title AS conference_title, c.start_date AS conference_start_date,
           a.full_name AS member_name, a.email AS member_email, a.school AS member_school
    FROM registration r
    JOIN conference c ON c.id = r.conference_id
    JOIN account a ON a.id = r.user_id
"#;

/// Admin listing filter
#[derive(Debug, Clone, Default)]
pub struct RegistrationFilter {
    pub conference_id: Option<String>,
    pub status: Option<RegistrationStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub limit: i64,
    pub offset: i64,
}

/// Result of a status change that may free a seat
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub registration: Registration,
    /// Waitlisted registration moved to pending into the freed seat
    pub promoted: Option<Registration>,
}

/// Registration manager
#[derive(Clone)]
pub struct RegistrationManager {
    db: SqlitePool,
    conferences: ConferenceManager,
    require_email_verification: bool,
}

impl RegistrationManager {
    pub fn new(
        db: SqlitePool,
        conferences: ConferenceManager,
        require_email_verification: bool,
    ) -> Self {
        Self {
            db,
            conferences,
            require_email_verification,
        }
    }

    /// Register a member for a conference
    ///
    /// A full conference places the registration on the waitlist.
    pub async fn register(
        &self,
        account: &Account,
        conference_id: &str,
        notes: Option<&str>,
    ) -> PortalResult<Registration> {
        if !account.is_onboarded() {
            return Err(PortalError::Authorization(
                "Complete your profile before registering for a conference".to_string(),
            ));
        }
        if self.require_email_verification && !account.email_verified {
            return Err(PortalError::Authorization(
                "Verify your email address before registering for a conference".to_string(),
            ));
        }

        let conference = self.conferences.get(conference_id).await?;
        if !conference.published {
            return Err(PortalError::NotFound("Conference not found".to_string()));
        }

        let today = Utc::now().date_naive();
        if !conference.is_open(today) {
            return Err(PortalError::Validation(
                "Registration for this conference is closed".to_string(),
            ));
        }

        let mut tx = self.begin_immediate().await?;

        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registration
             WHERE conference_id = ?1 AND user_id = ?2 AND status NOT IN ('rejected', 'cancelled')",
        )
        .bind(&conference.id)
        .bind(&account.id)
        .fetch_one(&mut *tx)
        .await?;

        if existing > 0 {
            return Err(PortalError::Conflict(
                "You are already registered for this conference".to_string(),
            ));
        }

        let status = if has_free_seat(&mut tx, &conference.id).await? {
            RegistrationStatus::Pending
        } else {
            RegistrationStatus::Waitlisted
        };
        let amount_due = conference.price_at(today);
        let payment_status = if amount_due == 0 {
            PaymentStatus::Waived
        } else {
            PaymentStatus::Unpaid
        };
        let notes = notes.map(str::trim).filter(|n| !n.is_empty());

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO registration (id, conference_id, user_id, status, payment_status,
                amount_due_cents, amount_paid_cents, currency, notes, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?9)
            "#,
        )
        .bind(&id)
        .bind(&conference.id)
        .bind(&account.id)
        .bind(status.as_str())
        .bind(payment_status.as_str())
        .bind(amount_due)
        .bind(&conference.currency)
        .bind(notes)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(conflict_on_unique("You are already registered for this conference"))?;

        tx.commit().await?;

        tracing::info!(
            registration_id = %id,
            conference_id = %conference.id,
            user_id = %account.id,
            status = status.as_str(),
            "Conference registration created"
        );

        self.get(&id).await
    }

    /// Cancel a registration (owner or admin)
    pub async fn cancel(&self, id: &str, actor: &Account) -> PortalResult<StatusChange> {
        let registration = self.get(id).await?;

        let is_owner = registration.user_id == actor.id;
        if !is_owner && !actor.role.can_act_as(Role::Admin) {
            return Err(PortalError::Authorization(
                "Only the member or an admin can cancel this registration".to_string(),
            ));
        }

        let decided_by = if is_owner { None } else { Some(actor.id.as_str()) };
        self.release_seat(&registration, RegistrationStatus::Cancelled, decided_by, None)
            .await
    }

    /// Approve a pending or waitlisted registration
    pub async fn approve(&self, id: &str, admin_id: &str) -> PortalResult<Registration> {
        let registration = self.get(id).await?;
        ensure_status(&registration, RegistrationStatus::Approved)?;

        let mut tx = self.begin_immediate().await?;
        if registration.status == RegistrationStatus::Waitlisted
            && !has_free_seat(&mut tx, &registration.conference_id).await?
        {
            return Err(PortalError::Conflict(
                "The conference is full; cancel or reject another registration first".to_string(),
            ));
        }
        update_status(&mut tx, &registration, RegistrationStatus::Approved, Some(admin_id), None)
            .await?;
        tx.commit().await?;

        self.get(&registration.id).await
    }

    /// Reject a registration; a freed seat goes to the waitlist
    pub async fn reject(
        &self,
        id: &str,
        admin_id: &str,
        note: Option<&str>,
    ) -> PortalResult<StatusChange> {
        let registration = self.get(id).await?;
        self.release_seat(&registration, RegistrationStatus::Rejected, Some(admin_id), note)
            .await
    }

    /// Promote waitlisted registrations into every free seat, oldest first
    ///
    /// Called after a conference's capacity is raised or removed.
    pub async fn fill_open_seats(&self, conference_id: &str) -> PortalResult<Vec<Registration>> {
        let mut tx = self.begin_immediate().await?;
        let mut promoted_ids = Vec::new();
        while let Some(id) = promote_next_waitlisted(&mut tx, conference_id).await? {
            promoted_ids.push(id);
        }
        tx.commit().await?;

        let mut promoted = Vec::with_capacity(promoted_ids.len());
        for id in &promoted_ids {
            promoted.push(self.get(id).await?);
        }
        Ok(promoted)
    }

    /// Record a member's proof of payment
    pub async fn submit_payment_proof(
        &self,
        id: &str,
        owner_id: &str,
        upload_id: &str,
        reference: Option<&str>,
    ) -> PortalResult<Registration> {
        let registration = self.get(id).await?;

        if registration.user_id != owner_id {
            return Err(PortalError::Authorization(
                "Only the registered member can submit payment proof".to_string(),
            ));
        }
        if !registration.status.is_active() {
            return Err(PortalError::InvalidTransition(format!(
                "Cannot pay for a {} registration",
                registration.status.as_str()
            )));
        }
        ensure_payment(&registration, PaymentStatus::PendingVerification)?;

        let upload_owner: Option<String> =
            sqlx::query_scalar("SELECT owner_id FROM upload WHERE id = ?1")
                .bind(upload_id)
                .fetch_optional(&self.db)
                .await?;
        match upload_owner {
            None => return Err(PortalError::NotFound("Upload not found".to_string())),
            Some(owner) if owner != owner_id => {
                return Err(PortalError::Authorization(
                    "Payment proof must be one of your own uploads".to_string(),
                ))
            }
            Some(_) => {}
        }

        let reference = reference.map(str::trim).filter(|r| !r.is_empty());
        let result = sqlx::query(
            r#"
            UPDATE registration
            SET payment_status = ?1, payment_proof_upload_id = ?2,
                payment_reference = coalesce(?3, payment_reference), updated_at = ?4
            WHERE id = ?5 AND payment_status = ?6
            "#,
        )
        .bind(PaymentStatus::PendingVerification.as_str())
        .bind(upload_id)
        .bind(reference)
        .bind(Utc::now())
        .bind(id)
        .bind(registration.payment_status.as_str())
        .execute(&self.db)
        .await?;

        self.finish_payment_update(&registration, PaymentStatus::PendingVerification, result.rows_affected())
            .await
    }

    /// Confirm payment received
    pub async fn confirm_payment(
        &self,
        id: &str,
        admin_id: &str,
        amount_cents: Option<i64>,
        reference: Option<&str>,
    ) -> PortalResult<Registration> {
        let registration = self.get(id).await?;
        ensure_payment(&registration, PaymentStatus::Paid)?;

        let amount = amount_cents.unwrap_or(registration.amount_due_cents);
        if amount < 0 {
            return Err(PortalError::Validation("Amount cannot be negative".to_string()));
        }

        let reference = reference.map(str::trim).filter(|r| !r.is_empty());
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE registration
            SET payment_status = ?1, amount_paid_cents = ?2,
                payment_reference = coalesce(?3, payment_reference),
                paid_at = ?4, decided_by = ?5, updated_at = ?4
            WHERE id = ?6 AND payment_status = ?7
            "#,
        )
        .bind(PaymentStatus::Paid.as_str())
        .bind(amount)
        .bind(reference)
        .bind(now)
        .bind(admin_id)
        .bind(id)
        .bind(registration.payment_status.as_str())
        .execute(&self.db)
        .await?;

        self.finish_payment_update(&registration, PaymentStatus::Paid, result.rows_affected())
            .await
    }

    /// Send a payment proof back to the member
    pub async fn reject_payment_proof(
        &self,
        id: &str,
        admin_id: &str,
        note: Option<&str>,
    ) -> PortalResult<Registration> {
        let registration = self.get(id).await?;
        if registration.payment_status != PaymentStatus::PendingVerification {
            return Err(PortalError::InvalidTransition(
                "No payment proof is awaiting verification".to_string(),
            ));
        }

        let result = sqlx::query(
            r#"
            UPDATE registration
            SET payment_status = ?1, payment_proof_upload_id = NULL,
                admin_note = coalesce(?2, admin_note), decided_by = ?3, updated_at = ?4
            WHERE id = ?5 AND payment_status = ?6
            "#,
        )
        .bind(PaymentStatus::Unpaid.as_str())
        .bind(note)
        .bind(admin_id)
        .bind(Utc::now())
        .bind(id)
        .bind(registration.payment_status.as_str())
        .execute(&self.db)
        .await?;

        self.finish_payment_update(&registration, PaymentStatus::Unpaid, result.rows_affected())
            .await
    }

    /// Mark a paid registration as refunded
    pub async fn refund(
        &self,
        id: &str,
        admin_id: &str,
        note: Option<&str>,
    ) -> PortalResult<Registration> {
        let registration = self.get(id).await?;
        ensure_payment(&registration, PaymentStatus::Refunded)?;

        let result = sqlx::query(
            r#"
            UPDATE registration
            SET payment_status = ?1, admin_note = coalesce(?2, admin_note),
                decided_by = ?3, updated_at = ?4
            WHERE id = ?5 AND payment_status = ?6
            "#,
        )
        .bind(PaymentStatus::Refunded.as_str())
        .bind(note)
        .bind(admin_id)
        .bind(Utc::now())
        .bind(id)
        .bind(registration.payment_status.as_str())
        .execute(&self.db)
        .await?;

        self.finish_payment_update(&registration, PaymentStatus::Refunded, result.rows_affected())
            .await
    }

    /// Excuse an unpaid registration from payment (sponsored places, staff)
    pub async fn waive_payment(
        &self,
        id: &str,
        admin_id: &str,
        note: Option<&str>,
    ) -> PortalResult<Registration> {
        let registration = self.get(id).await?;
        ensure_payment(&registration, PaymentStatus::Waived)?;

        let result = sqlx::query(
            r#"
            UPDATE registration
            SET payment_status = ?1, admin_note = coalesce(?2, admin_note),
                decided_by = ?3, updated_at = ?4
            WHERE id = ?5 AND payment_status = ?6
            "#,
        )
        .bind(PaymentStatus::Waived.as_str())
        .bind(note)
        .bind(admin_id)
        .bind(Utc::now())
        .bind(id)
        .bind(registration.payment_status.as_str())
        .execute(&self.db)
        .await?;

        self.finish_payment_update(&registration, PaymentStatus::Waived, result.rows_affected())
            .await
    }

    /// Get a registration by id
    pub async fn get(&self, id: &str) -> PortalResult<Registration> {
        sqlx::query_as::<_, Registration>(&format!(
            "SELECT {} FROM registration WHERE id = ?1",
            REGISTRATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| PortalError::NotFound("Registration not found".to_string()))
    }

    /// Get a registration with member and conference names
    pub async fn get_detail(&self, id: &str) -> PortalResult<RegistrationDetail> {
        sqlx::query_as::<_, RegistrationDetail>(&format!("{} WHERE r.id = ?1", DETAIL_SELECT))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| PortalError::NotFound("Registration not found".to_string()))
    }

    /// A member's registrations, newest first
    pub async fn list_for_user(&self, user_id: &str) -> PortalResult<Vec<RegistrationDetail>> {
        Ok(sqlx::query_as::<_, RegistrationDetail>(&format!(
            "{} WHERE r.user_id = ?1 ORDER BY r.created_at DESC",
            DETAIL_SELECT
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?)
    }

    /// Admin listing, oldest first so the queue reads in arrival order
    pub async fn list(&self, filter: &RegistrationFilter) -> PortalResult<Vec<RegistrationDetail>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(DETAIL_SELECT);
        query.push(" WHERE 1 = 1");

        if let Some(conference_id) = &filter.conference_id {
            query.push(" AND r.conference_id = ").push_bind(conference_id.clone());
        }
        if let Some(status) = filter.status {
            query.push(" AND r.status = ").push_bind(status.as_str());
        }
        if let Some(payment_status) = filter.payment_status {
            query
                .push(" AND r.payment_status = ")
                .push_bind(payment_status.as_str());
        }

        query
            .push(" ORDER BY r.created_at ASC, r.id LIMIT ")
            .push_bind(filter.limit.clamp(1, 500))
            .push(" OFFSET ")
            .push_bind(filter.offset.max(0));

        Ok(query
            .build_query_as::<RegistrationDetail>()
            .fetch_all(&self.db)
            .await?)
    }

    /// Transaction holding the write lock from its first statement
    ///
    /// Seat counts read inside it cannot change before commit.
    async fn begin_immediate(&self) -> PortalResult<Transaction<'static, Sqlite>> {
        Ok(self.db.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Apply a status change that may free a seat, promoting from the
    /// waitlist in the same transaction
    async fn release_seat(
        &self,
        registration: &Registration,
        next: RegistrationStatus,
        decided_by: Option<&str>,
        note: Option<&str>,
    ) -> PortalResult<StatusChange> {
        ensure_status(registration, next)?;

        let mut tx = self.begin_immediate().await?;
        update_status(&mut tx, registration, next, decided_by, note).await?;
        let promoted_id = if registration.status.holds_seat() {
            promote_next_waitlisted(&mut tx, &registration.conference_id).await?
        } else {
            None
        };
        tx.commit().await?;

        let promoted = match promoted_id {
            Some(id) => Some(self.get(&id).await?),
            None => None,
        };

        Ok(StatusChange {
            registration: self.get(&registration.id).await?,
            promoted,
        })
    }

    async fn finish_payment_update(
        &self,
        registration: &Registration,
        next: PaymentStatus,
        rows_affected: u64,
    ) -> PortalResult<Registration> {
        if rows_affected == 0 {
            return Err(PortalError::InvalidTransition(format!(
                "Payment changed concurrently; it is no longer {}",
                registration.payment_status.as_str()
            )));
        }

        tracing::info!(
            registration_id = %registration.id,
            from = registration.payment_status.as_str(),
            to = next.as_str(),
            "Payment status changed"
        );

        self.get(&registration.id).await
    }
}

async fn has_free_seat(conn: &mut SqliteConnection, conference_id: &str) -> PortalResult<bool> {
    let capacity: Option<i64> = sqlx::query_scalar("SELECT capacity FROM conference WHERE id = ?1")
        .bind(conference_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| PortalError::NotFound("Conference not found".to_string()))?;

    let Some(capacity) = capacity else {
        return Ok(true);
    };

    let taken: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM registration WHERE conference_id = ?1 AND status IN ('pending', 'approved')",
    )
    .bind(conference_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(taken < capacity)
}

/// Move the oldest waitlisted registration into a free seat; returns its id
async fn promote_next_waitlisted(
    conn: &mut SqliteConnection,
    conference_id: &str,
) -> PortalResult<Option<String>> {
    if !has_free_seat(conn, conference_id).await? {
        return Ok(None);
    }

    let next = sqlx::query_as::<_, Registration>(&format!(
        "SELECT {} FROM registration WHERE conference_id = ?1 AND status = 'waitlisted'
         ORDER BY created_at ASC, id ASC LIMIT 1",
        REGISTRATION_COLUMNS
    ))
    .bind(conference_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(next) = next else {
        return Ok(None);
    };

    update_status(conn, &next, RegistrationStatus::Pending, None, None).await?;

    tracing::info!(
        registration_id = %next.id,
        conference_id = %conference_id,
        "Promoted registration from waitlist"
    );

    Ok(Some(next.id))
}

/// Guarded status update; fails if the row moved on since it was read
async fn update_status(
    conn: &mut SqliteConnection,
    registration: &Registration,
    next: RegistrationStatus,
    decided_by: Option<&str>,
    note: Option<&str>,
) -> PortalResult<()> {
    ensure_status(registration, next)?;

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE registration
        SET status = ?1,
            decided_by = coalesce(?2, decided_by),
            decided_at = CASE WHEN ?2 IS NULL THEN decided_at ELSE ?3 END,
            admin_note = coalesce(?4, admin_note),
            updated_at = ?3
        WHERE id = ?5 AND status = ?6
        "#,
    )
    .bind(next.as_str())
    .bind(decided_by)
    .bind(now)
    .bind(note)
    .bind(&registration.id)
    .bind(registration.status.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(PortalError::InvalidTransition(format!(
            "Registration changed concurrently; it is no longer {}",
            registration.status.as_str()
        )));
    }

    tracing::info!(
        registration_id = %registration.id,
        from = registration.status.as_str(),
        to = next.as_str(),
        "Registration status changed"
    );

    Ok(())
}

fn ensure_status(registration: &Registration, next: RegistrationStatus) -> PortalResult<()> {
    if registration.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(PortalError::InvalidTransition(format!(
            "Cannot move registration from {} to {}",
            registration.status.as_str(),
            next.as_str()
        )))
    }
}

fn ensure_payment(registration: &Registration, next: PaymentStatus) -> PortalResult<()> {
    if registration.payment_status.can_transition_to(next) {
        Ok(())
    } else {
        Err(PortalError::InvalidTransition(format!(
            "Cannot move payment from {} to {}",
            registration.payment_status.as_str(),
            next.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{AccountManager, OnboardingRequest},
        config::ServerConfig,
        conference::ConferenceInput,
        db,
    };
    use chrono::NaiveDate;
    use std::{path::PathBuf, sync::Arc};

    struct Fixture {
        db: SqlitePool,
        accounts: AccountManager,
        conferences: ConferenceManager,
        registrations: RegistrationManager,
    }

    async fn fixture() -> Fixture {
        fixture_with(db::connect_in_memory().await.unwrap())
    }

    /// File-backed pool with several connections, for concurrent writers
    async fn file_fixture(dir: &tempfile::TempDir) -> Fixture {
        let pool = db::create_pool(&dir.path().join("portal.sqlite"), db::DatabaseOptions::default())
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        fixture_with(pool)
    }

    fn fixture_with(pool: SqlitePool) -> Fixture {
        let config = Arc::new(ServerConfig::for_testing(PathBuf::from("./data")));
        let conferences = ConferenceManager::new(pool.clone(), "FJD");
        Fixture {
            db: pool.clone(),
            accounts: AccountManager::new(pool.clone(), config),
            registrations: RegistrationManager::new(pool, conferences.clone(), false),
            conferences,
        }
    }

    fn conference_input(capacity: Option<i64>, price_cents: i64) -> ConferenceInput {
        let date = |m, d| NaiveDate::from_ymd_opt(2030, m, d).unwrap();
        ConferenceInput {
            title: "Annual Conference".to_string(),
            description: String::new(),
            venue: "Nadi".to_string(),
            start_date: date(9, 10),
            end_date: date(9, 12),
            registration_opens: None,
            registration_deadline: date(8, 31),
            early_bird_deadline: None,
            price_cents,
            early_bird_price_cents: None,
            currency: None,
            capacity,
            published: true,
        }
    }

    impl Fixture {
        async fn member(&self, email: &str) -> Account {
            let account = self
                .accounts
                .register(email, "password123", "Member")
                .await
                .unwrap();
            self.accounts
                .complete_onboarding(
                    &account.id,
                    &OnboardingRequest {
                        full_name: format!("Member {}", email),
                        school: "Lautoka Central College".to_string(),
                        position: "Principal".to_string(),
                        region: "Western".to_string(),
                        phone: None,
                    },
                )
                .await
                .unwrap()
        }

        async fn admin(&self) -> Account {
            self.accounts
                .register("admin@fpa.test", "password123", "Admin")
                .await
                .unwrap()
        }

        async fn conference(&self, capacity: Option<i64>, price_cents: i64) -> String {
            self.conferences
                .create(&conference_input(capacity, price_cents))
                .await
                .unwrap()
                .id
        }

        async fn status_counts(&self, conference_id: &str) -> (i64, i64) {
            sqlx::query_as(
                "SELECT
                    COUNT(CASE WHEN status IN ('pending', 'approved') THEN 1 END),
                    COUNT(CASE WHEN status = 'waitlisted' THEN 1 END)
                 FROM registration WHERE conference_id = ?1",
            )
            .bind(conference_id)
            .fetch_one(&self.db)
            .await
            .unwrap()
        }

        async fn upload_for(&self, owner_id: &str) -> String {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO upload (id, owner_id, storage_key, original_name, mime_type, size, purpose, created_at)
                 VALUES (?1, ?2, 'abc', 'receipt.pdf', 'application/pdf', 10, 'payment_proof', ?3)",
            )
            .bind(&id)
            .bind(owner_id)
            .bind(Utc::now())
            .execute(&self.db)
            .await
            .unwrap();
            id
        }
    }

    #[tokio::test]
    async fn test_register_requires_onboarding() {
        let f = fixture().await;
        let conference_id = f.conference(None, 10000).await;
        let account = f
            .accounts
            .register("fresh@fpa.test", "password123", "Fresh")
            .await
            .unwrap();

        let err = f
            .registrations
            .register(&account, &conference_id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_register_requires_verified_email_when_configured() {
        let f = fixture().await;
        let strict = RegistrationManager::new(f.db.clone(), f.conferences.clone(), true);
        let conference_id = f.conference(None, 10000).await;
        let member = f.member("a@fpa.test").await;

        let err = strict.register(&member, &conference_id, None).await.unwrap_err();
        assert!(matches!(err, PortalError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_duplicate_active_registration_conflicts() {
        let f = fixture().await;
        let conference_id = f.conference(None, 10000).await;
        let member = f.member("a@fpa.test").await;

        let first = f
            .registrations
            .register(&member, &conference_id, Some("  vegetarian meals  "))
            .await
            .unwrap();
        assert_eq!(first.status, RegistrationStatus::Pending);
        assert_eq!(first.payment_status, PaymentStatus::Unpaid);
        assert_eq!(first.amount_due_cents, 10000);
        assert_eq!(first.notes.as_deref(), Some("vegetarian meals"));

        let err = f
            .registrations
            .register(&member, &conference_id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Conflict(_)));

        // After cancelling, registering again is allowed
        f.registrations.cancel(&first.id, &member).await.unwrap();
        assert!(f
            .registrations
            .register(&member, &conference_id, None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_free_conference_waives_payment() {
        let f = fixture().await;
        let conference_id = f.conference(None, 0).await;
        let member = f.member("a@fpa.test").await;

        let registration = f
            .registrations
            .register(&member, &conference_id, None)
            .await
            .unwrap();
        assert_eq!(registration.payment_status, PaymentStatus::Waived);
    }

    #[tokio::test]
    async fn test_full_conference_waitlists_and_promotes_on_cancel() {
        let f = fixture().await;
        let conference_id = f.conference(Some(1), 10000).await;
        let first = f.member("first@fpa.test").await;
        let second = f.member("second@fpa.test").await;

        let seat = f.registrations.register(&first, &conference_id, None).await.unwrap();
        let queued = f.registrations.register(&second, &conference_id, None).await.unwrap();
        assert_eq!(seat.status, RegistrationStatus::Pending);
        assert_eq!(queued.status, RegistrationStatus::Waitlisted);

        let change = f.registrations.cancel(&seat.id, &first).await.unwrap();
        assert_eq!(change.registration.status, RegistrationStatus::Cancelled);
        let promoted = change.promoted.unwrap();
        assert_eq!(promoted.id, queued.id);
        assert_eq!(promoted.status, RegistrationStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancelling_waitlisted_does_not_promote() {
        let f = fixture().await;
        let conference_id = f.conference(Some(1), 10000).await;
        let first = f.member("first@fpa.test").await;
        let second = f.member("second@fpa.test").await;

        f.registrations.register(&first, &conference_id, None).await.unwrap();
        let queued = f.registrations.register(&second, &conference_id, None).await.unwrap();

        let change = f.registrations.cancel(&queued.id, &second).await.unwrap();
        assert!(change.promoted.is_none());
    }

    #[tokio::test]
    async fn test_other_members_cannot_cancel() {
        let f = fixture().await;
        let conference_id = f.conference(None, 10000).await;
        let owner = f.member("owner@fpa.test").await;
        let other = f.member("other@fpa.test").await;

        let registration = f.registrations.register(&owner, &conference_id, None).await.unwrap();
        let err = f.registrations.cancel(&registration.id, &other).await.unwrap_err();
        assert!(matches!(err, PortalError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_approve_and_invalid_transitions() {
        let f = fixture().await;
        let admin = f.admin().await;
        let conference_id = f.conference(None, 10000).await;
        let member = f.member("a@fpa.test").await;

        let registration = f.registrations.register(&member, &conference_id, None).await.unwrap();
        let approved = f.registrations.approve(&registration.id, &admin.id).await.unwrap();
        assert_eq!(approved.status, RegistrationStatus::Approved);
        assert_eq!(approved.decided_by.as_deref(), Some(admin.id.as_str()));
        assert!(approved.decided_at.is_some());

        // Approved cannot be approved or rejected again
        assert!(matches!(
            f.registrations.approve(&registration.id, &admin.id).await.unwrap_err(),
            PortalError::InvalidTransition(_)
        ));
        assert!(matches!(
            f.registrations
                .reject(&registration.id, &admin.id, None)
                .await
                .unwrap_err(),
            PortalError::InvalidTransition(_)
        ));

        // Cancelled is terminal
        f.registrations.cancel(&registration.id, &member).await.unwrap();
        assert!(matches!(
            f.registrations.cancel(&registration.id, &member).await.unwrap_err(),
            PortalError::InvalidTransition(_)
        ));
    }

    #[tokio::test]
    async fn test_approving_waitlisted_requires_free_seat() {
        let f = fixture().await;
        let admin = f.admin().await;
        let conference_id = f.conference(Some(1), 10000).await;
        let first = f.member("first@fpa.test").await;
        let second = f.member("second@fpa.test").await;

        f.registrations.register(&first, &conference_id, None).await.unwrap();
        let queued = f.registrations.register(&second, &conference_id, None).await.unwrap();

        let err = f.registrations.approve(&queued.id, &admin.id).await.unwrap_err();
        assert!(matches!(err, PortalError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_reject_pending_promotes_waitlist() {
        let f = fixture().await;
        let admin = f.admin().await;
        let conference_id = f.conference(Some(1), 10000).await;
        let first = f.member("first@fpa.test").await;
        let second = f.member("second@fpa.test").await;

        let seat = f.registrations.register(&first, &conference_id, None).await.unwrap();
        let queued = f.registrations.register(&second, &conference_id, None).await.unwrap();

        let change = f
            .registrations
            .reject(&seat.id, &admin.id, Some("Not a member school"))
            .await
            .unwrap();
        assert_eq!(change.registration.status, RegistrationStatus::Rejected);
        assert_eq!(
            change.registration.admin_note.as_deref(),
            Some("Not a member school")
        );
        assert_eq!(change.promoted.map(|r| r.id), Some(queued.id));
    }

    #[tokio::test]
    async fn test_payment_proof_flow() {
        let f = fixture().await;
        let admin = f.admin().await;
        let conference_id = f.conference(None, 10000).await;
        let member = f.member("a@fpa.test").await;
        let other = f.member("b@fpa.test").await;

        let registration = f.registrations.register(&member, &conference_id, None).await.unwrap();

        // Someone else's upload is refused
        let foreign_upload = f.upload_for(&other.id).await;
        assert!(matches!(
            f.registrations
                .submit_payment_proof(&registration.id, &member.id, &foreign_upload, None)
                .await
                .unwrap_err(),
            PortalError::Authorization(_)
        ));

        let upload = f.upload_for(&member.id).await;
        let submitted = f
            .registrations
            .submit_payment_proof(&registration.id, &member.id, &upload, Some("BSP-1234"))
            .await
            .unwrap();
        assert_eq!(submitted.payment_status, PaymentStatus::PendingVerification);
        assert_eq!(submitted.payment_reference.as_deref(), Some("BSP-1234"));

        let rejected = f
            .registrations
            .reject_payment_proof(&registration.id, &admin.id, Some("Blurry receipt"))
            .await
            .unwrap();
        assert_eq!(rejected.payment_status, PaymentStatus::Unpaid);
        assert!(rejected.payment_proof_upload_id.is_none());

        f.registrations
            .submit_payment_proof(&registration.id, &member.id, &upload, None)
            .await
            .unwrap();
        let paid = f
            .registrations
            .confirm_payment(&registration.id, &admin.id, None, None)
            .await
            .unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(paid.amount_paid_cents, 10000);
        assert!(paid.paid_at.is_some());

        // Paid cannot be confirmed twice, but can be refunded
        assert!(matches!(
            f.registrations
                .confirm_payment(&registration.id, &admin.id, None, None)
                .await
                .unwrap_err(),
            PortalError::InvalidTransition(_)
        ));
        let refunded = f
            .registrations
            .refund(&registration.id, &admin.id, None)
            .await
            .unwrap();
        assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_waive_payment_only_from_unpaid() {
        let f = fixture().await;
        let admin = f.admin().await;
        let conference_id = f.conference(None, 10000).await;
        let member = f.member("a@fpa.test").await;
        let other = f.member("b@fpa.test").await;

        let registration = f.registrations.register(&member, &conference_id, None).await.unwrap();
        let waived = f
            .registrations
            .waive_payment(&registration.id, &admin.id, Some("Sponsored by the district"))
            .await
            .unwrap();
        assert_eq!(waived.payment_status, PaymentStatus::Waived);
        assert_eq!(waived.admin_note.as_deref(), Some("Sponsored by the district"));

        // Waived is final
        assert!(matches!(
            f.registrations
                .waive_payment(&registration.id, &admin.id, None)
                .await
                .unwrap_err(),
            PortalError::InvalidTransition(_)
        ));

        // A proof awaiting verification is decided by confirm or reject instead
        let pending = f.registrations.register(&other, &conference_id, None).await.unwrap();
        let upload = f.upload_for(&other.id).await;
        f.registrations
            .submit_payment_proof(&pending.id, &other.id, &upload, None)
            .await
            .unwrap();
        assert!(matches!(
            f.registrations
                .waive_payment(&pending.id, &admin.id, None)
                .await
                .unwrap_err(),
            PortalError::InvalidTransition(_)
        ));
    }

    #[tokio::test]
    async fn test_cannot_pay_for_cancelled_registration() {
        let f = fixture().await;
        let conference_id = f.conference(None, 10000).await;
        let member = f.member("a@fpa.test").await;
        let registration = f.registrations.register(&member, &conference_id, None).await.unwrap();
        f.registrations.cancel(&registration.id, &member).await.unwrap();

        let upload = f.upload_for(&member.id).await;
        let err = f
            .registrations
            .submit_payment_proof(&registration.id, &member.id, &upload, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_listing_and_detail() {
        let f = fixture().await;
        let conference_id = f.conference(Some(1), 10000).await;
        let first = f.member("first@fpa.test").await;
        let second = f.member("second@fpa.test").await;

        let seat = f.registrations.register(&first, &conference_id, None).await.unwrap();
        f.registrations.register(&second, &conference_id, None).await.unwrap();

        let detail = f.registrations.get_detail(&seat.id).await.unwrap();
        assert_eq!(detail.conference_title, "Annual Conference");
        assert_eq!(detail.member_email, "first@fpa.test");

        let waitlisted = f
            .registrations
            .list(&RegistrationFilter {
                conference_id: Some(conference_id.clone()),
                status: Some(RegistrationStatus::Waitlisted),
                limit: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(waitlisted.len(), 1);
        assert_eq!(waitlisted[0].member_email, "second@fpa.test");

        let mine = f.registrations.list_for_user(&first.id).await.unwrap();
        assert_eq!(mine.len(), 1);

        // Conferences with registrations cannot be deleted
        assert!(matches!(
            f.conferences.delete(&conference_id).await.unwrap_err(),
            PortalError::Conflict(_)
        ));
    }
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_respect_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let f = file_fixture(&dir).await;
        let conference_id = f.conference(Some(1), 10000).await;

        let mut members = Vec::new();
        for i in 0..8 {
            members.push(f.member(&format!("m{}@fpa.test", i)).await);
        }
        // The first member also tries again four times at once
        let mut attempts: Vec<Account> = members.clone();
        attempts.extend(std::iter::repeat(members[0].clone()).take(4));

        let handles: Vec<_> = attempts
            .into_iter()
            .map(|account| {
                let registrations = f.registrations.clone();
                let conference_id = conference_id.clone();
                tokio::spawn(async move {
                    registrations.register(&account, &conference_id, None).await
                })
            })
            .collect();

        let mut created = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(PortalError::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!((created, conflicts), (8, 4));
        assert_eq!(f.status_counts(&conference_id).await, (1, 7));

        let first_member_rows: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registration WHERE conference_id = ?1 AND user_id = ?2",
        )
        .bind(&conference_id)
        .bind(&members[0].id)
        .fetch_one(&f.db)
        .await
        .unwrap();
        assert_eq!(first_member_rows, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_promotion_races_new_registration() {
        let dir = tempfile::tempdir().unwrap();
        let f = file_fixture(&dir).await;

        for round in 0..5 {
            let conference_id = f.conference(Some(1), 10000).await;
            let holder = f.member(&format!("holder{}@fpa.test", round)).await;
            let waiting = f.member(&format!("waiting{}@fpa.test", round)).await;
            let late = f.member(&format!("late{}@fpa.test", round)).await;

            let seat = f.registrations.register(&holder, &conference_id, None).await.unwrap();
            let queued = f.registrations.register(&waiting, &conference_id, None).await.unwrap();
            assert_eq!(queued.status, RegistrationStatus::Waitlisted);

            let cancelling = {
                let registrations = f.registrations.clone();
                tokio::spawn(async move { registrations.cancel(&seat.id, &holder).await })
            };
            let registering = {
                let registrations = f.registrations.clone();
                let conference_id = conference_id.clone();
                tokio::spawn(async move { registrations.register(&late, &conference_id, None).await })
            };

            let change = cancelling.await.unwrap().unwrap();
            let newcomer = registering.await.unwrap().unwrap();

            // The freed seat always goes to the earlier waitlisted member
            assert_eq!(change.promoted.map(|r| r.id), Some(queued.id.clone()));
            assert_eq!(newcomer.status, RegistrationStatus::Waitlisted);
            assert_eq!(f.status_counts(&conference_id).await, (1, 1));
        }
    }

    #[tokio::test]
    async fn test_raising_capacity_fills_seats_from_waitlist() {
        let f = fixture().await;
        let conference_id = f.conference(Some(1), 10000).await;

        let mut registered = Vec::new();
        for i in 0..4 {
            let member = f.member(&format!("m{}@fpa.test", i)).await;
            registered.push(f.registrations.register(&member, &conference_id, None).await.unwrap());
        }
        assert_eq!(f.status_counts(&conference_id).await, (1, 3));

        f.conferences
            .update(&conference_id, &conference_input(Some(3), 10000))
            .await
            .unwrap();
        let promoted = f.registrations.fill_open_seats(&conference_id).await.unwrap();

        let ids: Vec<&str> = promoted.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![registered[1].id.as_str(), registered[2].id.as_str()]);
        assert!(promoted.iter().all(|r| r.status == RegistrationStatus::Pending));
        assert_eq!(f.status_counts(&conference_id).await, (3, 1));

        // Nothing left to fill
        assert!(f.registrations.fill_open_seats(&conference_id).await.unwrap().is_empty());
    }
}
