/// Authentication endpoints: sign-up, sessions, email verification and passwords
use crate::{
    account::{
        ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, RefreshSessionRequest,
        RegisterRequest, ResetPasswordRequest, SessionResponse, VerifyEmailRequest,
    },
    admin::{ActivityAction, ActivityEntry},
    api::middleware::ClientIp,
    auth::AuthContext,
    context::AppContext,
    db::account::{Account, Session},
    error::{PortalError, PortalResult},
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use validator::Validate;

/// Build auth routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(get_session))
        .route("/api/auth/verify-email", post(verify_email))
        .route("/api/auth/resend-verification", post(resend_verification))
        .route("/api/auth/forgot-password", post(forgot_password))
        .route("/api/auth/reset-password", post(reset_password))
        .route("/api/auth/change-password", post(change_password))
}

fn session_response(user: Account, session: Session) -> SessionResponse {
    SessionResponse {
        user,
        access_token: session.access_token,
        refresh_token: session.refresh_token,
        expires_at: session.expires_at,
    }
}

/// Email the verification link; failures are logged only
async fn send_verification(ctx: &AppContext, account: &Account, token: &str) {
    let email = ctx.mailer.verification_email(&account.full_name, token);
    ctx.mailer.send_logged(&account.email, email).await;
}

/// Sign-up endpoint
async fn register(
    State(ctx): State<AppContext>,
    ClientIp(ip): ClientIp,
    Json(req): Json<RegisterRequest>,
) -> PortalResult<(StatusCode, Json<SessionResponse>)> {
    req.validate()?;

    let account = ctx
        .account_manager
        .register(&req.email, &req.password, &req.full_name)
        .await?;

    match ctx
        .account_manager
        .generate_email_verification_token(&account.id)
        .await
    {
        Ok(token) => send_verification(&ctx, &account, &token).await,
        Err(e) => tracing::warn!(user_id = %account.id, error = %e, "Failed to create verification token"),
    }

    let session = ctx.account_manager.create_session(&account.id).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::UserRegister)
                .user(&account.id)
                .entity("account", &account.id)
                .ip(ip),
        )
        .await;

    Ok((StatusCode::CREATED, Json(session_response(account, session))))
}

/// Login endpoint
async fn login(
    State(ctx): State<AppContext>,
    ClientIp(ip): ClientIp,
    Json(req): Json<LoginRequest>,
) -> PortalResult<Json<SessionResponse>> {
    let (account, session) = ctx.account_manager.login(&req.email, &req.password).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::UserLogin)
                .user(&account.id)
                .ip(ip),
        )
        .await;

    Ok(Json(session_response(account, session)))
}

/// Exchange a refresh token for a new session
async fn refresh(
    State(ctx): State<AppContext>,
    Json(req): Json<RefreshSessionRequest>,
) -> PortalResult<Json<SessionResponse>> {
    let session = ctx
        .account_manager
        .refresh_session(&req.refresh_token)
        .await?;
    let account = ctx.account_manager.get_account(&session.user_id).await?;

    if account.is_disabled() {
        ctx.account_manager.delete_session(&session.id).await?;
        return Err(PortalError::Authorization("Account is disabled".to_string()));
    }

    Ok(Json(session_response(account, session)))
}

/// Logout endpoint
async fn logout(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> PortalResult<Json<serde_json::Value>> {
    ctx.account_manager.delete_session(&auth.session_id).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::UserLogout)
                .user(auth.user_id())
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(Json(json!({})))
}

/// Current session's account
async fn get_session(auth: AuthContext) -> Json<Account> {
    Json(auth.account)
}

/// Confirm an email address
async fn verify_email(
    State(ctx): State<AppContext>,
    ClientIp(ip): ClientIp,
    Json(req): Json<VerifyEmailRequest>,
) -> PortalResult<Json<Account>> {
    let user_id = ctx.account_manager.confirm_email(&req.token).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::UserVerifyEmail)
                .user(&user_id)
                .ip(ip),
        )
        .await;

    Ok(Json(ctx.account_manager.get_account(&user_id).await?))
}

/// Send a fresh verification link
async fn resend_verification(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> PortalResult<Json<serde_json::Value>> {
    let (account, token) = ctx
        .account_manager
        .request_email_confirmation(auth.user_id())
        .await?;
    send_verification(&ctx, &account, &token).await;

    Ok(Json(json!({ "sent": true })))
}

/// Start a password reset
///
/// Always succeeds so the response does not reveal which emails exist.
async fn forgot_password(
    State(ctx): State<AppContext>,
    Json(req): Json<ForgotPasswordRequest>,
) -> PortalResult<Json<serde_json::Value>> {
    match ctx
        .account_manager
        .generate_password_reset_token(&req.email)
        .await
    {
        Ok((account, token)) => {
            let email = ctx.mailer.password_reset_email(&account.full_name, &token);
            ctx.mailer.send_logged(&account.email, email).await;
        }
        Err(PortalError::NotFound(_)) | Err(PortalError::Authorization(_)) => {
            tracing::debug!("Password reset requested for unknown or disabled account");
        }
        Err(e) => return Err(e),
    }

    Ok(Json(json!({ "sent": true })))
}

/// Finish a password reset
async fn reset_password(
    State(ctx): State<AppContext>,
    ClientIp(ip): ClientIp,
    Json(req): Json<ResetPasswordRequest>,
) -> PortalResult<Json<serde_json::Value>> {
    req.validate()?;

    let user_id = ctx
        .account_manager
        .reset_password(&req.token, &req.password)
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::UserPasswordReset)
                .user(&user_id)
                .ip(ip),
        )
        .await;

    Ok(Json(json!({ "reset": true })))
}

/// Change password while signed in
async fn change_password(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> PortalResult<Json<serde_json::Value>> {
    req.validate()?;

    ctx.account_manager
        .change_password(auth.user_id(), &req.current_password, &req.new_password)
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::UserPasswordChange)
                .user(auth.user_id())
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(Json(json!({ "changed": true })))
}
