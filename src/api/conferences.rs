/// Public conference listings and member registration
use crate::{
    admin::{ActivityAction, ActivityEntry, Role},
    auth::{AuthContext, OptionalAuthContext},
    conference::ConferenceView,
    context::AppContext,
    error::{PortalError, PortalResult},
    registration::{RegisterForConferenceRequest, Registration, RegistrationStatus},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use validator::Validate;

/// Build conference routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/conferences", get(list_conferences))
        .route("/api/conferences/:id", get(get_conference))
        .route("/api/conferences/:id/register", post(register_for_conference))
}

/// Published conferences with seat availability
async fn list_conferences(State(ctx): State<AppContext>) -> PortalResult<Json<Vec<ConferenceView>>> {
    let conferences = ctx.conference_manager.list(true).await?;

    let mut views = Vec::with_capacity(conferences.len());
    for conference in conferences {
        views.push(ctx.conference_manager.view(conference).await?);
    }

    Ok(Json(views))
}

/// One conference by id or slug; drafts are visible to admins only
async fn get_conference(
    State(ctx): State<AppContext>,
    viewer: OptionalAuthContext,
    Path(key): Path<String>,
) -> PortalResult<Json<ConferenceView>> {
    let conference = ctx.conference_manager.get_by_id_or_slug(&key).await?;

    let is_admin = viewer
        .account()
        .is_some_and(|a| a.role.can_act_as(Role::Admin));
    if !conference.published && !is_admin {
        return Err(PortalError::NotFound("Conference not found".to_string()));
    }

    Ok(Json(ctx.conference_manager.view(conference).await?))
}

async fn register_for_conference(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(key): Path<String>,
    body: Option<Json<RegisterForConferenceRequest>>,
) -> PortalResult<(StatusCode, Json<Registration>)> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    req.validate()?;

    let conference = ctx.conference_manager.get_by_id_or_slug(&key).await?;
    let registration = ctx
        .registration_manager
        .register(&auth.account, &conference.id, req.notes.as_deref())
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::RegistrationCreate)
                .user(auth.user_id())
                .entity("registration", &registration.id)
                .details(json!({
                    "conferenceId": conference.id,
                    "status": registration.status.as_str(),
                    "amountDueCents": registration.amount_due_cents,
                }))
                .ip(auth.ip.clone()),
        )
        .await;

    let email = ctx.mailer.registration_received_email(
        &auth.account.full_name,
        &conference.title,
        registration.status == RegistrationStatus::Waitlisted,
        registration.amount_due_cents,
        &registration.currency,
    );
    ctx.mailer.send_logged(&auth.account.email, email).await;

    Ok((StatusCode::CREATED, Json(registration)))
}
