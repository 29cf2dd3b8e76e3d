/// Conferences
///
/// Events members can register for, with dates, pricing and an optional
/// seat capacity.

mod manager;

pub use manager::ConferenceManager;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Conference record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conference {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub venue: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub registration_opens: Option<NaiveDate>,
    pub registration_deadline: NaiveDate,
    pub early_bird_deadline: Option<NaiveDate>,
    pub price_cents: i64,
    pub early_bird_price_cents: Option<i64>,
    pub currency: String,
    pub capacity: Option<i64>,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conference {
    /// Price charged for a registration made on `today`
    ///
    /// The early-bird price applies up to and including the early-bird deadline.
    pub fn price_at(&self, today: NaiveDate) -> i64 {
        match (self.early_bird_deadline, self.early_bird_price_cents) {
            (Some(deadline), Some(price)) if today <= deadline => price,
            _ => self.price_cents,
        }
    }

    /// Whether members can register on `today`
    pub fn is_open(&self, today: NaiveDate) -> bool {
        self.published
            && self.registration_opens.map_or(true, |opens| opens <= today)
            && today <= self.registration_deadline
    }
}

/// Conference with live registration figures
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceView {
    #[serde(flatten)]
    pub conference: Conference,
    pub seats_taken: i64,
    pub seats_remaining: Option<i64>,
    pub registration_open: bool,
    pub current_price_cents: i64,
}

impl ConferenceView {
    pub fn new(conference: Conference, seats_taken: i64, today: NaiveDate) -> Self {
        let seats_remaining = conference
            .capacity
            .map(|capacity| (capacity - seats_taken).max(0));
        let registration_open = conference.is_open(today);
        let current_price_cents = conference.price_at(today);

        Self {
            conference,
            seats_taken,
            seats_remaining,
            registration_open,
            current_price_cents,
        }
    }
}

/// Create or replace a conference
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceInput {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 20000))]
    pub description: String,
    #[validate(length(min = 1, max = 200))]
    pub venue: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub registration_opens: Option<NaiveDate>,
    pub registration_deadline: NaiveDate,
    pub early_bird_deadline: Option<NaiveDate>,
    #[validate(range(min = 0))]
    pub price_cents: i64,
    #[validate(range(min = 0))]
    pub early_bird_price_cents: Option<i64>,
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
    #[validate(range(min = 1))]
    pub capacity: Option<i64>,
    #[serde(default)]
    pub published: bool,
}
