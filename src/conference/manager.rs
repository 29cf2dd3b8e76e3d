/// Conference manager
use crate::{
    conference::{Conference, ConferenceInput, ConferenceView},
    error::{conflict_on_unique, PortalError, PortalResult},
    slug::unique_slug,
};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

const CONFERENCE_COLUMNS: &str = "id, title, slug, description, venue, start_date, end_date, \
     registration_opens, registration_deadline, early_bird_deadline, price_cents, \
     early_bird_price_cents, currency, capacity, published, created_at, updated_at";

/// Conference manager
#[derive(Clone)]
pub struct ConferenceManager {
    db: SqlitePool,
    default_currency: String,
}

impl ConferenceManager {
    pub fn new(db: SqlitePool, default_currency: impl Into<String>) -> Self {
        Self {
            db,
            default_currency: default_currency.into(),
        }
    }

    /// Create a conference
    pub async fn create(&self, input: &ConferenceInput) -> PortalResult<Conference> {
        validate_dates_and_prices(input)?;

        let id = Uuid::new_v4().to_string();
        let slug = unique_slug(&self.db, "conference", &input.title).await?;
        let currency = self.currency_for(input);
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO conference (id, title, slug, description, venue, start_date, end_date,
                registration_opens, registration_deadline, early_bird_deadline, price_cents,
                early_bird_price_cents, currency, capacity, published, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
            "#,
        )
        .bind(&id)
        .bind(input.title.trim())
        .bind(&slug)
        .bind(&input.description)
        .bind(input.venue.trim())
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.registration_opens)
        .bind(input.registration_deadline)
        .bind(input.early_bird_deadline)
        .bind(input.price_cents)
        .bind(input.early_bird_price_cents)
        .bind(&currency)
        .bind(input.capacity)
        .bind(input.published)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(conflict_on_unique(
            "A conference with this title was created at the same time; try again",
        ))?;

        tracing::info!(conference_id = %id, slug = %slug, "Created conference");

        self.get(&id).await
    }

    /// Replace a conference's details
    ///
    /// The slug stays stable so shared links keep working.
    pub async fn update(&self, id: &str, input: &ConferenceInput) -> PortalResult<Conference> {
        validate_dates_and_prices(input)?;

        let existing = self.get(id).await?;
        if let Some(capacity) = input.capacity {
            let taken = self.seats_taken(id).await?;
            if capacity < taken && existing.capacity != input.capacity {
                return Err(PortalError::Validation(format!(
                    "Capacity cannot be lower than the {} seats already taken",
                    taken
                )));
            }
        }

        sqlx::query(
            r#"
            UPDATE conference
            SET title = ?1, description = ?2, venue = ?3, start_date = ?4, end_date = ?5,
                registration_opens = ?6, registration_deadline = ?7, early_bird_deadline = ?8,
                price_cents = ?9, early_bird_price_cents = ?10, currency = ?11, capacity = ?12,
                published = ?13, updated_at = ?14
            WHERE id = ?15
            "#,
        )
        .bind(input.title.trim())
        .bind(&input.description)
        .bind(input.venue.trim())
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.registration_opens)
        .bind(input.registration_deadline)
        .bind(input.early_bird_deadline)
        .bind(input.price_cents)
        .bind(input.early_bird_price_cents)
        .bind(input.currency.as_deref().unwrap_or(&existing.currency).to_uppercase())
        .bind(input.capacity)
        .bind(input.published)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;

        self.get(id).await
    }

    /// Delete a conference that has no registrations
    pub async fn delete(&self, id: &str) -> PortalResult<Conference> {
        let conference = self.get(id).await?;

        let registrations: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM registration WHERE conference_id = ?1")
                .bind(id)
                .fetch_one(&self.db)
                .await?;

        if registrations > 0 {
            return Err(PortalError::Conflict(
                "Conference has registrations; unpublish it instead".to_string(),
            ));
        }

        sqlx::query("DELETE FROM conference WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;

        tracing::info!(conference_id = %id, "Deleted conference");

        Ok(conference)
    }

    /// Get a conference by id
    pub async fn get(&self, id: &str) -> PortalResult<Conference> {
        sqlx::query_as::<_, Conference>(&format!(
            "SELECT {} FROM conference WHERE id = ?1",
            CONFERENCE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| PortalError::NotFound("Conference not found".to_string()))
    }

    /// Get a conference by slug
    pub async fn get_by_slug(&self, slug: &str) -> PortalResult<Conference> {
        sqlx::query_as::<_, Conference>(&format!(
            "SELECT {} FROM conference WHERE slug = ?1",
            CONFERENCE_COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| PortalError::NotFound("Conference not found".to_string()))
    }

    /// Look up by id, falling back to slug
    pub async fn get_by_id_or_slug(&self, key: &str) -> PortalResult<Conference> {
        match self.get(key).await {
            Err(PortalError::NotFound(_)) => self.get_by_slug(key).await,
            other => other,
        }
    }

    /// List conferences, soonest first
    pub async fn list(&self, published_only: bool) -> PortalResult<Vec<Conference>> {
        let filter = if published_only { "WHERE published = 1" } else { "" };

        Ok(sqlx::query_as::<_, Conference>(&format!(
            "SELECT {} FROM conference {} ORDER BY start_date ASC, title ASC",
            CONFERENCE_COLUMNS, filter
        ))
        .fetch_all(&self.db)
        .await?)
    }

    /// Seats held by pending and approved registrations
    pub async fn seats_taken(&self, id: &str) -> PortalResult<i64> {
        let taken: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registration WHERE conference_id = ?1 AND status IN ('pending', 'approved')",
        )
        .bind(id)
        .fetch_one(&self.db)
        .await?;

        Ok(taken)
    }

    /// Attach live seat counts and pricing
    pub async fn view(&self, conference: Conference) -> PortalResult<ConferenceView> {
        let taken = self.seats_taken(&conference.id).await?;
        Ok(ConferenceView::new(conference, taken, Utc::now().date_naive()))
    }

    fn currency_for(&self, input: &ConferenceInput) -> String {
        input
            .currency
            .as_deref()
            .unwrap_or(&self.default_currency)
            .to_uppercase()
    }
}

fn validate_dates_and_prices(input: &ConferenceInput) -> PortalResult<()> {
    if input.title.trim().is_empty() || input.venue.trim().is_empty() {
        return Err(PortalError::Validation("Title and venue are required".to_string()));
    }
    if input.end_date < input.start_date {
        return Err(PortalError::Validation(
            "End date cannot be before start date".to_string(),
        ));
    }
    if input.registration_deadline > input.end_date {
        return Err(PortalError::Validation(
            "Registration deadline cannot be after the conference ends".to_string(),
        ));
    }
    if let Some(opens) = input.registration_opens {
        if opens > input.registration_deadline {
            return Err(PortalError::Validation(
                "Registration cannot open after its deadline".to_string(),
            ));
        }
    }
    if input.price_cents < 0 {
        return Err(PortalError::Validation("Price cannot be negative".to_string()));
    }
    if let Some(early) = input.early_bird_price_cents {
        if early < 0 || early > input.price_cents {
            return Err(PortalError::Validation(
                "Early-bird price must be between zero and the regular price".to_string(),
            ));
        }
    }
    if input.early_bird_price_cents.is_some() != input.early_bird_deadline.is_some() {
        return Err(PortalError::Validation(
            "Early-bird price and deadline must be set together".to_string(),
        ));
    }
    if matches!(input.capacity, Some(c) if c <= 0) {
        return Err(PortalError::Validation("Capacity must be positive".to_string()));
    }
    Ok(())
}
