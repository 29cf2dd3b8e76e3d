/// Account manager
///
/// Member sign-up and login, JWT sessions with single-use refresh tokens,
/// email verification and password reset tokens, onboarding and the admin
/// controls over roles and disabled accounts.

use crate::{
    account::{
        password::{hash_password, verify_password},
        OnboardingRequest, UpdateProfileRequest, ValidatedSession,
    },
    admin::Role,
    config::ServerConfig,
    db::account::{Account, EmailTokenPurpose, Session, ACCOUNT_COLUMNS},
    error::{conflict_on_unique, PortalError, PortalResult},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// JWT claims for access and refresh tokens
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    sid: String,
    typ: String,
    iat: i64,
    exp: i64,
}

/// Filter for the admin account listing
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    /// Matches email, full name or school
    pub search: Option<String>,
    pub role: Option<Role>,
    pub onboarded: Option<bool>,
    pub limit: i64,
    pub offset: i64,
}

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    /// Register a new member account
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> PortalResult<Account> {
        let email = normalize_email(email);
        let full_name = full_name.trim();

        if full_name.is_empty() {
            return Err(PortalError::Validation("Full name cannot be empty".to_string()));
        }
        validate_password(password)?;

        if self.email_exists(&email).await? {
            return Err(PortalError::Conflict("Email already registered".to_string()));
        }

        let password_hash = hash_password(password)?;
        let role = if self.config.is_bootstrap_admin(&email) {
            Role::Admin
        } else {
            Role::Member
        };

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO account (id, email, password_hash, full_name, role, email_verified, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
        )
        .bind(&id)
        .bind(&email)
        .bind(&password_hash)
        .bind(full_name)
        .bind(role.as_str())
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(conflict_on_unique("Email already registered"))?;

        tracing::info!(user_id = %id, role = role.as_str(), "Registered new account");

        self.get_account(&id).await
    }

    /// Authenticate account and create session
    pub async fn login(&self, email: &str, password: &str) -> PortalResult<(Account, Session)> {
        let account = match self.get_account_by_email(email).await {
            Ok(account) => account,
            Err(PortalError::NotFound(_)) => {
                return Err(PortalError::Authentication(
                    "Invalid email or password".to_string(),
                ))
            }
            Err(e) => return Err(e),
        };

        if !verify_password(password, &account.password_hash)? {
            return Err(PortalError::Authentication(
                "Invalid email or password".to_string(),
            ));
        }

        if account.is_disabled() {
            return Err(PortalError::Authorization("Account is disabled".to_string()));
        }

        let session = self.create_session(&account.id).await?;

        Ok((account, session))
    }

    /// Create a session for a user
    pub async fn create_session(&self, user_id: &str) -> PortalResult<Session> {
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.config.authentication.access_token_ttl_secs);
        let refresh_expires =
            now + Duration::days(self.config.authentication.refresh_token_ttl_days);

        let access_token = self.generate_token(user_id, &session_id, "access", expires_at)?;
        let refresh_token = self.generate_token(user_id, &session_id, "refresh", refresh_expires)?;

        sqlx::query(
            "INSERT INTO session (id, user_id, access_token, refresh_token, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&session_id)
        .bind(user_id)
        .bind(&access_token)
        .bind(&refresh_token)
        .bind(now)
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        sqlx::query(
            "INSERT INTO refresh_token (id, user_id, token, created_at, expires_at, used)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(&refresh_token)
        .bind(now)
        .bind(refresh_expires)
        .execute(&self.db)
        .await?;

        Ok(Session {
            id: session_id,
            user_id: user_id.to_string(),
            access_token,
            refresh_token,
            created_at: now,
            expires_at,
        })
    }

    /// Validate access token and return session info
    pub async fn validate_access_token(&self, token: &str) -> PortalResult<ValidatedSession> {
        let claims = self.decode_token(token)?;
        if claims.typ != "access" {
            return Err(PortalError::Authentication("Not an access token".to_string()));
        }

        let row = sqlx::query("SELECT id, user_id, expires_at FROM session WHERE access_token = ?1")
            .bind(token)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| PortalError::Authentication("Invalid or expired session".to_string()))?;

        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
        if Utc::now() > expires_at {
            return Err(PortalError::Authentication("Session expired".to_string()));
        }

        Ok(ValidatedSession {
            user_id: row.try_get("user_id")?,
            session_id: row.try_get("id")?,
        })
    }

    /// Delete a session (logout)
    pub async fn delete_session(&self, session_id: &str) -> PortalResult<()> {
        let refresh_token: Option<String> =
            sqlx::query_scalar("SELECT refresh_token FROM session WHERE id = ?1")
                .bind(session_id)
                .fetch_optional(&self.db)
                .await?;

        sqlx::query("DELETE FROM session WHERE id = ?1")
            .bind(session_id)
            .execute(&self.db)
            .await?;

        if let Some(token) = refresh_token {
            sqlx::query("DELETE FROM refresh_token WHERE token = ?1")
                .bind(token)
                .execute(&self.db)
                .await?;
        }

        Ok(())
    }

    /// Rotate a refresh token into a new session
    ///
    /// Refresh tokens are single use; the session they belonged to is closed.
    pub async fn refresh_session(&self, refresh_token: &str) -> PortalResult<Session> {
        let claims = self.decode_token(refresh_token)?;
        if claims.typ != "refresh" {
            return Err(PortalError::Authentication("Not a refresh token".to_string()));
        }

        let row = sqlx::query(
            "SELECT id, user_id, expires_at, used FROM refresh_token WHERE token = ?1",
        )
        .bind(refresh_token)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| PortalError::Authentication("Invalid refresh token".to_string()))?;

        let token_id: String = row.try_get("id")?;
        let user_id: String = row.try_get("user_id")?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
        let used: bool = row.try_get("used")?;

        if used {
            return Err(PortalError::Authentication(
                "Refresh token already used".to_string(),
            ));
        }

        if Utc::now() > expires_at {
            return Err(PortalError::Authentication("Refresh token expired".to_string()));
        }

        let account = self.get_account(&user_id).await?;
        if account.is_disabled() {
            return Err(PortalError::Authorization("Account is disabled".to_string()));
        }

        // Guarded so two concurrent refreshes cannot both succeed
        let marked = sqlx::query(
            "UPDATE refresh_token SET used = 1, used_at = ?1 WHERE id = ?2 AND used = 0",
        )
        .bind(Utc::now())
        .bind(&token_id)
        .execute(&self.db)
        .await?;

        if marked.rows_affected() == 0 {
            return Err(PortalError::Authentication(
                "Refresh token already used".to_string(),
            ));
        }

        sqlx::query("DELETE FROM session WHERE refresh_token = ?1")
            .bind(refresh_token)
            .execute(&self.db)
            .await?;

        self.create_session(&user_id).await
    }

    /// Get account by id
    pub async fn get_account(&self, user_id: &str) -> PortalResult<Account> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM account WHERE id = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| PortalError::NotFound("Account not found".to_string()))
    }

    /// Get account by email (case-insensitive)
    pub async fn get_account_by_email(&self, email: &str) -> PortalResult<Account> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM account WHERE email = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| PortalError::NotFound("Account not found".to_string()))
    }

    /// Check if email exists
    async fn email_exists(&self, email: &str) -> PortalResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE email = ?1")
            .bind(email)
            .fetch_one(&self.db)
            .await?;

        Ok(count > 0)
    }

    fn generate_token(
        &self,
        user_id: &str,
        session_id: &str,
        typ: &str,
        expires_at: DateTime<Utc>,
    ) -> PortalResult<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            typ: typ.to_string(),
            iat: Utc::now().timestamp(),
            exp: expires_at.timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.authentication.jwt_secret.as_bytes()),
        )
        .map_err(|e| PortalError::TokenSigning(format!("Failed to generate token: {}", e)))
    }

    fn decode_token(&self, token: &str) -> PortalResult<Claims> {
        let key = DecodingKey::from_secret(self.config.authentication.jwt_secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);

        decode::<Claims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    PortalError::Authentication("Token has expired".to_string())
                }
                _ => PortalError::Authentication(format!("Invalid token: {}", e)),
            })
    }

    /// Cleanup expired sessions and refresh tokens
    ///
    /// Returns (sessions_deleted, refresh_tokens_deleted)
    pub async fn cleanup_expired_sessions(&self) -> PortalResult<(u64, u64)> {
        let now = Utc::now();

        let sessions_deleted = sqlx::query("DELETE FROM session WHERE expires_at < ?1")
            .bind(now)
            .execute(&self.db)
            .await?
            .rows_affected();

        let refresh_tokens_deleted =
            sqlx::query("DELETE FROM refresh_token WHERE expires_at < ?1 OR used = 1")
                .bind(now)
                .execute(&self.db)
                .await?
                .rows_affected();

        if sessions_deleted > 0 || refresh_tokens_deleted > 0 {
            tracing::info!(
                sessions_deleted,
                refresh_tokens_deleted,
                "Cleaned up expired tokens"
            );
        } else {
            tracing::debug!("Session cleanup: no expired tokens found");
        }

        Ok((sessions_deleted, refresh_tokens_deleted))
    }

    /// Delete used or expired email tokens
    pub async fn cleanup_expired_email_tokens(&self) -> PortalResult<u64> {
        let deleted = sqlx::query("DELETE FROM email_token WHERE expires_at < ?1 OR used = 1")
            .bind(Utc::now())
            .execute(&self.db)
            .await?
            .rows_affected();

        Ok(deleted)
    }

    async fn insert_email_token(
        &self,
        user_id: &str,
        purpose: EmailTokenPurpose,
        ttl: Duration,
    ) -> PortalResult<String> {
        let token = Uuid::new_v4().simple().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO email_token (token, user_id, purpose, created_at, expires_at, used)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        )
        .bind(&token)
        .bind(user_id)
        .bind(purpose.as_str())
        .bind(now)
        .bind(now + ttl)
        .execute(&self.db)
        .await?;

        Ok(token)
    }

    /// Consume a one-time email token and return its user id
    async fn consume_email_token(
        &self,
        token: &str,
        purpose: EmailTokenPurpose,
    ) -> PortalResult<String> {
        let row = sqlx::query(
            "SELECT user_id, expires_at, used FROM email_token WHERE token = ?1 AND purpose = ?2",
        )
        .bind(token)
        .bind(purpose.as_str())
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| PortalError::NotFound("Invalid or unknown token".to_string()))?;

        let user_id: String = row.try_get("user_id")?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
        let used: bool = row.try_get("used")?;

        if used {
            return Err(PortalError::Validation("Token has already been used".to_string()));
        }

        if Utc::now() > expires_at {
            return Err(PortalError::Validation("Token has expired".to_string()));
        }

        let marked = sqlx::query("UPDATE email_token SET used = 1 WHERE token = ?1 AND used = 0")
            .bind(token)
            .execute(&self.db)
            .await?;
        if marked.rows_affected() == 0 {
            return Err(PortalError::Validation("Token has already been used".to_string()));
        }

        Ok(user_id)
    }

    /// Generate and store email verification token (valid 24 hours)
    pub async fn generate_email_verification_token(&self, user_id: &str) -> PortalResult<String> {
        self.insert_email_token(user_id, EmailTokenPurpose::VerifyEmail, Duration::hours(24))
            .await
    }

    /// Confirm email address using verification token
    pub async fn confirm_email(&self, token: &str) -> PortalResult<String> {
        let user_id = self
            .consume_email_token(token, EmailTokenPurpose::VerifyEmail)
            .await?;
        let now = Utc::now();

        sqlx::query(
            "UPDATE account SET email_verified = 1, email_verified_at = ?1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(now)
        .bind(&user_id)
        .execute(&self.db)
        .await?;

        tracing::info!(user_id = %user_id, "Email verified");

        Ok(user_id)
    }

    /// Issue a fresh verification token for an unverified account
    pub async fn request_email_confirmation(&self, user_id: &str) -> PortalResult<(Account, String)> {
        let account = self.get_account(user_id).await?;

        if account.email_verified {
            return Err(PortalError::Conflict("Email is already verified".to_string()));
        }

        let token = self.generate_email_verification_token(user_id).await?;
        Ok((account, token))
    }

    /// Generate password reset token (valid 1 hour)
    pub async fn generate_password_reset_token(&self, email: &str) -> PortalResult<(Account, String)> {
        let account = self.get_account_by_email(email).await?;

        if account.is_disabled() {
            return Err(PortalError::Authorization("Account is disabled".to_string()));
        }

        let token = self
            .insert_email_token(&account.id, EmailTokenPurpose::ResetPassword, Duration::hours(1))
            .await?;

        Ok((account, token))
    }

    /// Reset password using reset token
    ///
    /// Invalidates every session and refresh token of the account.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> PortalResult<String> {
        validate_password(new_password)?;

        let user_id = self
            .consume_email_token(token, EmailTokenPurpose::ResetPassword)
            .await?;

        self.store_password(&user_id, new_password).await?;
        self.revoke_all_sessions(&user_id).await?;

        tracing::info!(user_id = %user_id, "Password reset");

        Ok(user_id)
    }

    /// Change password after verifying the current one
    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> PortalResult<()> {
        validate_password(new_password)?;

        let account = self.get_account(user_id).await?;
        if !verify_password(current_password, &account.password_hash)? {
            return Err(PortalError::Authentication(
                "Current password is incorrect".to_string(),
            ));
        }

        self.store_password(user_id, new_password).await
    }

    async fn store_password(&self, user_id: &str, password: &str) -> PortalResult<()> {
        let password_hash = hash_password(password)?;

        sqlx::query("UPDATE account SET password_hash = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(&password_hash)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Delete all sessions and refresh tokens for an account
    pub async fn revoke_all_sessions(&self, user_id: &str) -> PortalResult<()> {
        sqlx::query("DELETE FROM session WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        sqlx::query("DELETE FROM refresh_token WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    // ==================== Onboarding & Profile ====================

    /// Complete the one-time onboarding profile
    pub async fn complete_onboarding(
        &self,
        user_id: &str,
        profile: &OnboardingRequest,
    ) -> PortalResult<Account> {
        let full_name = required_field("fullName", &profile.full_name)?;
        let school = required_field("school", &profile.school)?;
        let position = required_field("position", &profile.position)?;
        let region = required_field("region", &profile.region)?;
        let phone = optional_field(profile.phone.as_deref());

        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE account
             SET full_name = ?1, school = ?2, position = ?3, region = ?4, phone = ?5,
                 onboarded_at = ?6, updated_at = ?6
             WHERE id = ?7 AND onboarded_at IS NULL",
        )
        .bind(full_name)
        .bind(school)
        .bind(position)
        .bind(region)
        .bind(phone)
        .bind(now)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish unknown account from repeated onboarding
            self.get_account(user_id).await?;
            return Err(PortalError::Conflict("Onboarding already completed".to_string()));
        }

        tracing::info!(user_id = %user_id, "Onboarding completed");

        self.get_account(user_id).await
    }

    /// Apply a partial profile update
    pub async fn update_profile(
        &self,
        user_id: &str,
        patch: &UpdateProfileRequest,
    ) -> PortalResult<Account> {
        let mut account = self.get_account(user_id).await?;

        if let Some(name) = &patch.full_name {
            account.full_name = required_field("fullName", name)?.to_string();
        }
        if let Some(school) = &patch.school {
            account.school = Some(required_field("school", school)?.to_string());
        }
        if let Some(position) = &patch.position {
            account.position = Some(required_field("position", position)?.to_string());
        }
        if let Some(region) = &patch.region {
            account.region = Some(required_field("region", region)?.to_string());
        }
        if let Some(phone) = &patch.phone {
            account.phone = optional_field(Some(phone)).map(String::from);
        }
        if let Some(upload_id) = &patch.avatar_upload_id {
            self.check_avatar(user_id, upload_id).await?;
            account.avatar_upload_id = Some(upload_id.clone());
        }

        sqlx::query(
            "UPDATE account
             SET full_name = ?1, school = ?2, position = ?3, region = ?4, phone = ?5,
                 avatar_upload_id = ?6, updated_at = ?7
             WHERE id = ?8",
        )
        .bind(&account.full_name)
        .bind(&account.school)
        .bind(&account.position)
        .bind(&account.region)
        .bind(&account.phone)
        .bind(&account.avatar_upload_id)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.db)
        .await?;

        self.get_account(user_id).await
    }

    async fn check_avatar(&self, user_id: &str, upload_id: &str) -> PortalResult<()> {
        let row = sqlx::query("SELECT owner_id, mime_type FROM upload WHERE id = ?1")
            .bind(upload_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| PortalError::NotFound("Upload not found".to_string()))?;

        let owner_id: String = row.try_get("owner_id")?;
        let mime_type: String = row.try_get("mime_type")?;

        if owner_id != user_id {
            return Err(PortalError::Authorization(
                "Avatar must be one of your own uploads".to_string(),
            ));
        }
        if !mime_type.starts_with("image/") {
            return Err(PortalError::Validation("Avatar must be an image".to_string()));
        }

        Ok(())
    }

    // ==================== Administration ====================

    /// List accounts for the admin dashboard
    pub async fn list_accounts(&self, filter: &AccountFilter) -> PortalResult<Vec<Account>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM account WHERE 1 = 1", ACCOUNT_COLUMNS));

        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search.to_lowercase());
            query
                .push(" AND (lower(email) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR lower(full_name) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR lower(coalesce(school, '')) LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(role) = filter.role {
            query.push(" AND role = ").push_bind(role.as_str());
        }
        match filter.onboarded {
            Some(true) => {
                query.push(" AND onboarded_at IS NOT NULL");
            }
            Some(false) => {
                query.push(" AND onboarded_at IS NULL");
            }
            None => {}
        }

        query
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(filter.limit.clamp(1, 200))
            .push(" OFFSET ")
            .push_bind(filter.offset.max(0));

        Ok(query.build_query_as::<Account>().fetch_all(&self.db).await?)
    }

    /// Change a member's role
    pub async fn set_role(&self, actor_id: &str, user_id: &str, role: Role) -> PortalResult<Account> {
        if actor_id == user_id {
            return Err(PortalError::Validation("You cannot change your own role".to_string()));
        }

        let result = sqlx::query("UPDATE account SET role = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(role.as_str())
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PortalError::NotFound("Account not found".to_string()));
        }

        self.get_account(user_id).await
    }

    /// Disable or re-enable an account
    ///
    /// Disabling signs the member out everywhere.
    pub async fn set_disabled(
        &self,
        actor_id: &str,
        user_id: &str,
        disabled: bool,
    ) -> PortalResult<Account> {
        if actor_id == user_id {
            return Err(PortalError::Validation(
                "You cannot disable your own account".to_string(),
            ));
        }

        let now = Utc::now();
        let result = sqlx::query("UPDATE account SET disabled_at = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(if disabled { Some(now) } else { None })
            .bind(now)
            .bind(user_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PortalError::NotFound("Account not found".to_string()));
        }

        if disabled {
            self.revoke_all_sessions(user_id).await?;
        }

        self.get_account(user_id).await
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_password(password: &str) -> PortalResult<()> {
    let len = password.chars().count();
    if !(8..=128).contains(&len) {
        return Err(PortalError::Validation(
            "Password must be 8 to 128 characters".to_string(),
        ));
    }
    Ok(())
}

fn required_field<'a>(name: &str, value: &'a str) -> PortalResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PortalError::Validation(format!("{} cannot be empty", name)));
    }
    Ok(trimmed)
}

fn optional_field(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::path::PathBuf;

    async fn create_test_manager() -> AccountManager {
        let pool = db::connect_in_memory().await.unwrap();
        let config = Arc::new(ServerConfig::for_testing(PathBuf::from("./data")));
        AccountManager::new(pool, config)
    }

    fn onboarding() -> OnboardingRequest {
        OnboardingRequest {
            full_name: "Mere Tuilagi".to_string(),
            school: "Suva Grammar School".to_string(),
            position: "Principal".to_string(),
            region: "Central".to_string(),
            phone: Some(" 679 123 4567 ".to_string()),
        }
    }

    #[tokio::test]
    async fn test_register_normalizes_email_and_rejects_duplicates() {
        let manager = create_test_manager().await;

        let account = manager
            .register("  Mere@School.FJ ", "password123", "Mere")
            .await
            .unwrap();
        assert_eq!(account.email, "mere@school.fj");
        assert_eq!(account.role, Role::Member);
        assert!(!account.email_verified);

        let err = manager
            .register("mere@school.fj", "password123", "Mere again")
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Conflict(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_signups_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&dir.path().join("portal.sqlite"), db::DatabaseOptions::default())
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        let config = Arc::new(ServerConfig::for_testing(dir.path().to_path_buf()));
        let manager = Arc::new(AccountManager::new(pool, config));

        let attempts: Vec<_> = (0..6)
            .map(|i| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager
                        .register("same@school.fj", "password123", &format!("Member {}", i))
                        .await
                })
            })
            .collect();

        let mut created = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => created += 1,
                Err(PortalError::Conflict(_)) => {}
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_bootstrap_admin_gets_admin_role() {
        let manager = create_test_manager().await;
        let account = manager
            .register("admin@fpa.test", "password123", "Admin")
            .await
            .unwrap();
        assert_eq!(account.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_register_rejects_short_password() {
        let manager = create_test_manager().await;
        let err = manager.register("a@b.fj", "short", "A").await.unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
    }

    #[tokio::test]
    async fn test_login_and_validate_session() {
        let manager = create_test_manager().await;
        manager
            .register("member@fpa.test", "password123", "Member")
            .await
            .unwrap();

        let (account, session) = manager.login("MEMBER@fpa.test", "password123").await.unwrap();
        assert_eq!(session.user_id, account.id);

        let validated = manager
            .validate_access_token(&session.access_token)
            .await
            .unwrap();
        assert_eq!(validated.user_id, account.id);
        assert_eq!(validated.session_id, session.id);

        // Refresh tokens are not accepted as access tokens
        assert!(manager
            .validate_access_token(&session.refresh_token)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_login_wrong_password_and_unknown_email_look_the_same() {
        let manager = create_test_manager().await;
        manager
            .register("member@fpa.test", "password123", "Member")
            .await
            .unwrap();

        let wrong = manager.login("member@fpa.test", "nope-nope").await.unwrap_err();
        let unknown = manager.login("ghost@fpa.test", "password123").await.unwrap_err();
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn test_logout_invalidates_access_token() {
        let manager = create_test_manager().await;
        manager
            .register("member@fpa.test", "password123", "Member")
            .await
            .unwrap();
        let (_, session) = manager.login("member@fpa.test", "password123").await.unwrap();

        manager.delete_session(&session.id).await.unwrap();
        assert!(manager
            .validate_access_token(&session.access_token)
            .await
            .is_err());
        assert!(manager.refresh_session(&session.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_tokens_are_single_use() {
        let manager = create_test_manager().await;
        manager
            .register("member@fpa.test", "password123", "Member")
            .await
            .unwrap();
        let (_, session) = manager.login("member@fpa.test", "password123").await.unwrap();

        let rotated = manager.refresh_session(&session.refresh_token).await.unwrap();
        assert_ne!(rotated.id, session.id);
        assert!(manager
            .validate_access_token(&rotated.access_token)
            .await
            .is_ok());

        // Old session is gone and the refresh token cannot be replayed
        assert!(manager
            .validate_access_token(&session.access_token)
            .await
            .is_err());
        let err = manager
            .refresh_session(&session.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_email_verification_flow() {
        let manager = create_test_manager().await;
        let account = manager
            .register("member@fpa.test", "password123", "Member")
            .await
            .unwrap();

        let token = manager
            .generate_email_verification_token(&account.id)
            .await
            .unwrap();
        let user_id = manager.confirm_email(&token).await.unwrap();
        assert_eq!(user_id, account.id);
        assert!(manager.get_account(&account.id).await.unwrap().email_verified);

        // Tokens are single use
        assert!(manager.confirm_email(&token).await.is_err());

        // Verified accounts cannot request another token
        let err = manager
            .request_email_confirmation(&account.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_expired_email_token_is_rejected() {
        let manager = create_test_manager().await;
        let account = manager
            .register("member@fpa.test", "password123", "Member")
            .await
            .unwrap();
        let token = manager
            .generate_email_verification_token(&account.id)
            .await
            .unwrap();

        sqlx::query("UPDATE email_token SET expires_at = ?1 WHERE token = ?2")
            .bind(Utc::now() - Duration::hours(1))
            .bind(&token)
            .execute(&manager.db)
            .await
            .unwrap();

        let err = manager.confirm_email(&token).await.unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
    }

    #[tokio::test]
    async fn test_password_reset_revokes_sessions() {
        let manager = create_test_manager().await;
        manager
            .register("member@fpa.test", "password123", "Member")
            .await
            .unwrap();
        let (_, session) = manager.login("member@fpa.test", "password123").await.unwrap();

        let (_, token) = manager
            .generate_password_reset_token("member@fpa.test")
            .await
            .unwrap();
        manager.reset_password(&token, "new-password-1").await.unwrap();

        assert!(manager
            .validate_access_token(&session.access_token)
            .await
            .is_err());
        assert!(manager.login("member@fpa.test", "password123").await.is_err());
        assert!(manager.login("member@fpa.test", "new-password-1").await.is_ok());
        assert!(manager.reset_password(&token, "another-pass").await.is_err());
    }

    #[tokio::test]
    async fn test_change_password_requires_current() {
        let manager = create_test_manager().await;
        let account = manager
            .register("member@fpa.test", "password123", "Member")
            .await
            .unwrap();

        let err = manager
            .change_password(&account.id, "wrong-current", "new-password-1")
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Authentication(_)));

        manager
            .change_password(&account.id, "password123", "new-password-1")
            .await
            .unwrap();
        assert!(manager.login("member@fpa.test", "new-password-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_onboarding_is_one_time() {
        let manager = create_test_manager().await;
        let account = manager
            .register("member@fpa.test", "password123", "Member")
            .await
            .unwrap();
        assert!(!account.is_onboarded());

        let onboarded = manager
            .complete_onboarding(&account.id, &onboarding())
            .await
            .unwrap();
        assert!(onboarded.is_onboarded());
        assert_eq!(onboarded.full_name, "Mere Tuilagi");
        assert_eq!(onboarded.phone.as_deref(), Some("679 123 4567"));

        let err = manager
            .complete_onboarding(&account.id, &onboarding())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_onboarding_rejects_blank_fields() {
        let manager = create_test_manager().await;
        let account = manager
            .register("member@fpa.test", "password123", "Member")
            .await
            .unwrap();

        let mut profile = onboarding();
        profile.school = "   ".to_string();
        let err = manager
            .complete_onboarding(&account.id, &profile)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_profile_is_partial() {
        let manager = create_test_manager().await;
        let account = manager
            .register("member@fpa.test", "password123", "Member")
            .await
            .unwrap();
        manager
            .complete_onboarding(&account.id, &onboarding())
            .await
            .unwrap();

        let updated = manager
            .update_profile(
                &account.id,
                &UpdateProfileRequest {
                    position: Some("Deputy Principal".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.position.as_deref(), Some("Deputy Principal"));
        assert_eq!(updated.school.as_deref(), Some("Suva Grammar School"));
    }

    #[tokio::test]
    async fn test_disable_account_blocks_login() {
        let manager = create_test_manager().await;
        let admin = manager
            .register("admin@fpa.test", "password123", "Admin")
            .await
            .unwrap();
        let member = manager
            .register("member@fpa.test", "password123", "Member")
            .await
            .unwrap();
        let (_, session) = manager.login("member@fpa.test", "password123").await.unwrap();

        manager.set_disabled(&admin.id, &member.id, true).await.unwrap();
        assert!(manager
            .validate_access_token(&session.access_token)
            .await
            .is_err());
        let err = manager.login("member@fpa.test", "password123").await.unwrap_err();
        assert!(matches!(err, PortalError::Authorization(_)));

        manager.set_disabled(&admin.id, &member.id, false).await.unwrap();
        assert!(manager.login("member@fpa.test", "password123").await.is_ok());

        // Admins cannot lock themselves out
        assert!(manager.set_disabled(&admin.id, &admin.id, true).await.is_err());
    }

    #[tokio::test]
    async fn test_set_role_and_list_filters() {
        let manager = create_test_manager().await;
        let admin = manager
            .register("admin@fpa.test", "password123", "Admin")
            .await
            .unwrap();
        let member = manager
            .register("member@fpa.test", "password123", "Sereana Member")
            .await
            .unwrap();

        let promoted = manager
            .set_role(&admin.id, &member.id, Role::Moderator)
            .await
            .unwrap();
        assert_eq!(promoted.role, Role::Moderator);
        assert!(manager.set_role(&admin.id, &admin.id, Role::Member).await.is_err());

        let moderators = manager
            .list_accounts(&AccountFilter {
                role: Some(Role::Moderator),
                limit: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(moderators.len(), 1);

        let searched = manager
            .list_accounts(&AccountFilter {
                search: Some("sereana".to_string()),
                limit: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].id, member.id);
    }

    #[tokio::test]
    async fn test_cleanup_expired_sessions() {
        let manager = create_test_manager().await;
        manager
            .register("member@fpa.test", "password123", "Member")
            .await
            .unwrap();
        let (_, expired) = manager.login("member@fpa.test", "password123").await.unwrap();
        let (_, active) = manager.login("member@fpa.test", "password123").await.unwrap();

        let past = Utc::now() - Duration::hours(2);
        sqlx::query("UPDATE session SET expires_at = ?1 WHERE id = ?2")
            .bind(past)
            .bind(&expired.id)
            .execute(&manager.db)
            .await
            .unwrap();
        sqlx::query("UPDATE refresh_token SET expires_at = ?1 WHERE token = ?2")
            .bind(past)
            .bind(&expired.refresh_token)
            .execute(&manager.db)
            .await
            .unwrap();

        let (sessions, refresh) = manager.cleanup_expired_sessions().await.unwrap();
        assert_eq!(sessions, 1);
        assert_eq!(refresh, 1);
        assert!(manager
            .validate_access_token(&active.access_token)
            .await
            .is_ok());
    }
}
