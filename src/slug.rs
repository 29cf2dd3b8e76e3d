/// URL slugs for conferences and posts
use sqlx::SqlitePool;

use crate::error::PortalResult;

const MAX_SLUG_LEN: usize = 80;

/// Lowercase ASCII slug with single dashes between words
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }

        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }

    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// Find a slug not yet used in `table`, appending `-2`, `-3`, ... as needed
///
/// `table` is always a compile-time constant.
pub async fn unique_slug(db: &SqlitePool, table: &'static str, text: &str) -> PortalResult<String> {
    let base = slugify(text);
    let query = format!("SELECT COUNT(*) FROM {} WHERE slug = ?1", table);

    let mut candidate = base.clone();
    let mut n = 2;
    loop {
        let taken: i64 = sqlx::query_scalar(&query)
            .bind(&candidate)
            .fetch_one(db)
            .await?;
        if taken == 0 {
            return Ok(candidate);
        }
        candidate = format!("{}-{}", base, n);
        n += 1;
    }
}
