/// Authentication extractors
use crate::{
    admin::Role,
    api::middleware::{extract_bearer_token, request_ip},
    context::AppContext,
    db::account::Account,
    error::PortalError,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated member - validates the bearer token and loads the account
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account: Account,
    pub session_id: String,
    pub ip: Option<String>,
}

impl AuthContext {
    pub fn user_id(&self) -> &str {
        &self.account.id
    }

    pub fn role(&self) -> Role {
        self.account.role
    }
}

async fn authenticate(parts: &Parts, state: &AppContext) -> Result<AuthContext, PortalError> {
    let token = extract_bearer_token(&parts.headers)
        .ok_or_else(|| PortalError::Authentication("Missing authorization header".to_string()))?;

    let session = state.account_manager.validate_access_token(&token).await?;
    let account = state
        .account_manager
        .get_account(&session.user_id)
        .await
        .map_err(|e| match e {
            PortalError::NotFound(_) => {
                PortalError::Authentication("Account no longer exists".to_string())
            }
            other => other,
        })?;

    if account.is_disabled() {
        return Err(PortalError::Authorization("Account is disabled".to_string()));
    }

    Ok(AuthContext {
        account,
        session_id: session.session_id,
        ip: request_ip(parts, state),
    })
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).await
    }
}

/// Optional authenticated context - does not fail if no auth provided
#[derive(Debug, Clone)]
pub struct OptionalAuthContext {
    pub auth: Option<AuthContext>,
}

impl OptionalAuthContext {
    pub fn account(&self) -> Option<&Account> {
        self.auth.as_ref().map(|a| &a.account)
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for OptionalAuthContext {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        if extract_bearer_token(&parts.headers).is_none() {
            return Ok(OptionalAuthContext { auth: None });
        }

        // A bad token on a public endpoint is treated as anonymous
        let auth = authenticate(parts, state).await.ok();
        Ok(OptionalAuthContext { auth })
    }
}

fn require_role(auth: AuthContext, required: Role) -> Result<AuthContext, PortalError> {
    if !auth.account.role.can_act_as(required) {
        tracing::warn!(
            user_id = %auth.account.id,
            role = auth.account.role.as_str(),
            required = required.as_str(),
            "Denied privileged request"
        );
        return Err(PortalError::Authorization(format!(
            "Requires {} role or higher",
            required.as_str()
        )));
    }
    Ok(auth)
}

/// Moderator or admin
#[derive(Debug, Clone)]
pub struct ModeratorAuthContext(pub AuthContext);

#[async_trait]
impl FromRequestParts<AppContext> for ModeratorAuthContext {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let auth = authenticate(parts, state).await?;
        Ok(ModeratorAuthContext(require_role(auth, Role::Moderator)?))
    }
}

/// Admin only
#[derive(Debug, Clone)]
pub struct AdminAuthContext(pub AuthContext);

#[async_trait]
impl FromRequestParts<AppContext> for AdminAuthContext {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let auth = authenticate(parts, state).await?;
        Ok(AdminAuthContext(require_role(auth, Role::Admin)?))
    }
}
