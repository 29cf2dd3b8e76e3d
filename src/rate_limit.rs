/// Rate Limiting System
use crate::{
    config::RateLimitConfig,
    context::AppContext,
    error::{PortalError, PortalResult},
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc};

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Endpoints that take credentials and get the stricter per-minute quota
const CREDENTIAL_PATHS: &[&str] = &[
    "/api/auth/login",
    "/api/auth/register",
    "/api/auth/forgot-password",
    "/api/auth/reset-password",
];

fn nonzero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    authenticated: Arc<DirectLimiter>,
    unauthenticated: Arc<DirectLimiter>,
    admin: Arc<DirectLimiter>,
    credentials: Arc<DirectLimiter>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let burst = config.burst_size.max(1);

        let auth_quota =
            Quota::per_second(nonzero(config.authenticated_rps)).allow_burst(nonzero(burst));
        let unauth_quota = Quota::per_second(nonzero(config.unauthenticated_rps))
            .allow_burst(nonzero(burst / 5));
        let admin_quota = Quota::per_second(nonzero(config.admin_rps))
            .allow_burst(nonzero(burst.saturating_mul(2)));
        let credential_quota = Quota::per_minute(nonzero(config.credential_attempts_per_minute));

        Self {
            authenticated: Arc::new(GovernorLimiter::direct(auth_quota)),
            unauthenticated: Arc::new(GovernorLimiter::direct(unauth_quota)),
            admin: Arc::new(GovernorLimiter::direct(admin_quota)),
            credentials: Arc::new(GovernorLimiter::direct(credential_quota)),
        }
    }

    fn check(limiter: &DirectLimiter) -> PortalResult<()> {
        limiter.check().map_err(|not_until| PortalError::RateLimitExceeded {
            retry_after: not_until.wait_time_from(DefaultClock::default().now()),
        })
    }

    /// Check rate limit for authenticated user
    pub fn check_authenticated(&self) -> PortalResult<()> {
        Self::check(&self.authenticated)
    }

    /// Check rate limit for unauthenticated user
    pub fn check_unauthenticated(&self) -> PortalResult<()> {
        Self::check(&self.unauthenticated)
    }

    /// Check rate limit for admin endpoints
    pub fn check_admin(&self) -> PortalResult<()> {
        Self::check(&self.admin)
    }

    /// Check the login/registration/password-reset quota
    pub fn check_credentials(&self) -> PortalResult<()> {
        Self::check(&self.credentials)
    }

    /// Pick the tier for a request and check it
    pub fn check_request(&self, path: &str, has_auth_header: bool) -> PortalResult<()> {
        if CREDENTIAL_PATHS.contains(&path) {
            self.check_credentials()?;
        }

        if path.starts_with("/api/admin") && has_auth_header {
            self.check_admin()
        } else if has_auth_header {
            self.check_authenticated()
        } else {
            self.check_unauthenticated()
        }
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Response {
    if !ctx.config.rate_limit.enabled {
        return next.run(request).await;
    }

    let has_auth_header = request
        .headers()
        .contains_key(axum::http::header::AUTHORIZATION);

    match ctx
        .rate_limiter
        .check_request(request.uri().path(), has_auth_header)
    {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::debug!(path = %request.uri().path(), "Rate limit exceeded");
            e.into_response()
        }
    }
}
