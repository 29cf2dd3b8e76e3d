/// The signed-in member's own profile, history and registrations
use crate::{
    account::{OnboardingRequest, UpdateProfileRequest},
    admin::{ActivityAction, ActivityEntry, ActivityRecord},
    auth::AuthContext,
    context::AppContext,
    db::account::Account,
    error::PortalResult,
    registration::RegistrationDetail,
};
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

/// Build profile routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/me", get(get_profile).put(update_profile))
        .route("/api/me/onboarding", post(complete_onboarding))
        .route("/api/me/activity", get(list_activity))
        .route("/api/me/registrations", get(list_registrations))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityQuery {
    limit: Option<i64>,
    before_id: Option<i64>,
}

async fn get_profile(auth: AuthContext) -> Json<Account> {
    Json(auth.account)
}

async fn update_profile(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<UpdateProfileRequest>,
) -> PortalResult<Json<Account>> {
    req.validate()?;

    let account = ctx
        .account_manager
        .update_profile(auth.user_id(), &req)
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::UserProfileUpdate)
                .user(auth.user_id())
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(Json(account))
}

async fn complete_onboarding(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<OnboardingRequest>,
) -> PortalResult<Json<Account>> {
    req.validate()?;

    let account = ctx
        .account_manager
        .complete_onboarding(auth.user_id(), &req)
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::UserOnboarded)
                .user(auth.user_id())
                .details(json!({ "school": account.school, "region": account.region }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(Json(account))
}

async fn list_activity(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(query): Query<ActivityQuery>,
) -> PortalResult<Json<Vec<ActivityRecord>>> {
    let records = ctx
        .activity
        .list_for_user(auth.user_id(), query.limit.unwrap_or(50), query.before_id)
        .await?;
    Ok(Json(records))
}

async fn list_registrations(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> PortalResult<Json<Vec<RegistrationDetail>>> {
    Ok(Json(
        ctx.registration_manager
            .list_for_user(auth.user_id())
            .await?,
    ))
}
