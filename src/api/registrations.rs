/// Member-facing registration endpoints
use crate::{
    admin::{ActivityAction, ActivityEntry, Role},
    auth::AuthContext,
    context::AppContext,
    error::{PortalError, PortalResult},
    mailer::RegistrationNotice,
    registration::{
        PaymentProofRequest, Registration, RegistrationDetail, StatusChange,
    },
};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use validator::Validate;

/// Build registration routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/registrations/:id", get(get_registration))
        .route("/api/registrations/:id/cancel", post(cancel_registration))
        .route("/api/registrations/:id/payment-proof", post(submit_payment_proof))
}

/// Tell the member about a registration status change
pub(crate) async fn notify_status(
    ctx: &AppContext,
    registration_id: &str,
    notice: RegistrationNotice,
    note: Option<&str>,
) {
    match ctx.registration_manager.get_detail(registration_id).await {
        Ok(detail) => {
            let email = ctx.mailer.registration_status_email(
                &detail.member_name,
                &detail.conference_title,
                notice,
                note,
            );
            ctx.mailer.send_logged(&detail.member_email, email).await;
        }
        Err(e) => tracing::warn!(
            registration_id = %registration_id,
            error = %e,
            "Could not load registration for notification"
        ),
    }
}

/// Log and announce a waitlist promotion, if any
pub(crate) async fn announce_promotion(ctx: &AppContext, change: &StatusChange, actor_id: &str) {
    if let Some(promoted) = &change.promoted {
        announce_promoted(ctx, promoted, actor_id).await;
    }
}

/// Log and email a registration that left the waitlist
pub(crate) async fn announce_promoted(ctx: &AppContext, promoted: &Registration, actor_id: &str) {
    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::RegistrationPromote)
                .user(actor_id)
                .entity("registration", &promoted.id)
                .details(json!({ "conferenceId": promoted.conference_id })),
        )
        .await;
    notify_status(ctx, &promoted.id, RegistrationNotice::PromotedFromWaitlist, None).await;
}

async fn get_registration(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> PortalResult<Json<RegistrationDetail>> {
    let detail = ctx.registration_manager.get_detail(&id).await?;

    if detail.registration.user_id != auth.account.id && !auth.role().can_act_as(Role::Admin) {
        // Other members' registrations do not exist as far as the caller knows
        return Err(PortalError::NotFound("Registration not found".to_string()));
    }

    Ok(Json(detail))
}

async fn cancel_registration(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> PortalResult<Json<StatusChange>> {
    let change = ctx.registration_manager.cancel(&id, &auth.account).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::RegistrationCancel)
                .user(auth.user_id())
                .entity("registration", &id)
                .ip(auth.ip.clone()),
        )
        .await;

    if change.registration.user_id != auth.account.id {
        notify_status(&ctx, &id, RegistrationNotice::CancelledByAdmin, None).await;
    }
    announce_promotion(&ctx, &change, auth.user_id()).await;

    Ok(Json(change))
}

async fn submit_payment_proof(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(req): Json<PaymentProofRequest>,
) -> PortalResult<Json<Registration>> {
    req.validate()?;

    let registration = ctx
        .registration_manager
        .submit_payment_proof(&id, auth.user_id(), &req.upload_id, req.reference.as_deref())
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::PaymentProofSubmitted)
                .user(auth.user_id())
                .entity("registration", &id)
                .details(json!({ "uploadId": req.upload_id }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(Json(registration))
}
