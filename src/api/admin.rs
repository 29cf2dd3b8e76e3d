/// Admin and moderator endpoints
use crate::{
    account::AccountFilter,
    admin::{
        dashboard_stats,
        reports::{ResolveReportRequest, ResolvedReport},
        ActivityAction, ActivityEntry, ActivityFilter, ActivityRecord, DashboardStats, Report,
        ReportAction, ReportStatus, Role,
    },
    api::registrations::{announce_promoted, announce_promotion, notify_status},
    auth::{AdminAuthContext, ModeratorAuthContext},
    conference::{Conference, ConferenceInput, ConferenceView},
    context::AppContext,
    db::account::Account,
    error::PortalResult,
    mailer::RegistrationNotice,
    registration::{
        ConfirmPaymentRequest, DecisionRequest, PaymentStatus, Registration, RegistrationDetail,
        RegistrationFilter, RegistrationStatus, StatusChange,
    },
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

/// Build admin routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        // Dashboard
        .route("/api/admin/stats", get(get_stats))
        .route("/api/admin/activity", get(list_activity))
        // Members
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/users/:id", get(get_user))
        .route("/api/admin/users/:id/role", post(set_role))
        .route("/api/admin/users/:id/disable", post(disable_user))
        .route("/api/admin/users/:id/enable", post(enable_user))
        // Conferences
        .route(
            "/api/admin/conferences",
            get(list_conferences).post(create_conference),
        )
        .route(
            "/api/admin/conferences/:id",
            put(update_conference).delete(delete_conference),
        )
        // Registrations
        .route("/api/admin/registrations", get(list_registrations))
        .route("/api/admin/registrations/:id/approve", post(approve_registration))
        .route("/api/admin/registrations/:id/reject", post(reject_registration))
        .route("/api/admin/registrations/:id/confirm-payment", post(confirm_payment))
        .route("/api/admin/registrations/:id/reject-payment", post(reject_payment))
        .route("/api/admin/registrations/:id/refund", post(refund_payment))
        .route("/api/admin/registrations/:id/waive-payment", post(waive_payment))
        // Reports
        .route("/api/admin/reports", get(list_reports))
        .route("/api/admin/reports/:id/resolve", post(resolve_report))
}

// ============================================================================
// Dashboard
// ============================================================================

async fn get_stats(
    State(ctx): State<AppContext>,
    _auth: ModeratorAuthContext,
) -> PortalResult<Json<DashboardStats>> {
    Ok(Json(dashboard_stats(&ctx.db).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityQuery {
    user_id: Option<String>,
    action: Option<String>,
    entity_type: Option<String>,
    entity_id: Option<String>,
    before_id: Option<i64>,
    limit: Option<i64>,
}

async fn list_activity(
    State(ctx): State<AppContext>,
    _auth: ModeratorAuthContext,
    Query(query): Query<ActivityQuery>,
) -> PortalResult<Json<Vec<ActivityRecord>>> {
    let filter = ActivityFilter {
        user_id: query.user_id,
        action_prefix: query.action,
        entity_type: query.entity_type,
        entity_id: query.entity_id,
        before_id: query.before_id,
        limit: query.limit.unwrap_or(100),
    };
    Ok(Json(ctx.activity.list(&filter).await?))
}

// ============================================================================
// Members
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserQuery {
    search: Option<String>,
    role: Option<Role>,
    onboarded: Option<bool>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_users(
    State(ctx): State<AppContext>,
    _auth: AdminAuthContext,
    Query(query): Query<UserQuery>,
) -> PortalResult<Json<Vec<Account>>> {
    let filter = AccountFilter {
        search: query.search,
        role: query.role,
        onboarded: query.onboarded,
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    };
    Ok(Json(ctx.account_manager.list_accounts(&filter).await?))
}

/// A member with their registrations and recent activity
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserDetail {
    account: Account,
    registrations: Vec<RegistrationDetail>,
    recent_activity: Vec<ActivityRecord>,
}

async fn get_user(
    State(ctx): State<AppContext>,
    _auth: AdminAuthContext,
    Path(id): Path<String>,
) -> PortalResult<Json<UserDetail>> {
    let account = ctx.account_manager.get_account(&id).await?;
    let registrations = ctx.registration_manager.list_for_user(&id).await?;
    let recent_activity = ctx.activity.list_for_user(&id, 20, None).await?;

    Ok(Json(UserDetail {
        account,
        registrations,
        recent_activity,
    }))
}

#[derive(Debug, Deserialize)]
struct SetRoleRequest {
    role: Role,
}

async fn set_role(
    State(ctx): State<AppContext>,
    AdminAuthContext(auth): AdminAuthContext,
    Path(id): Path<String>,
    Json(req): Json<SetRoleRequest>,
) -> PortalResult<Json<Account>> {
    let account = ctx
        .account_manager
        .set_role(auth.user_id(), &id, req.role)
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::UserRoleChange)
                .user(auth.user_id())
                .entity("account", &id)
                .details(json!({ "role": req.role.as_str() }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(Json(account))
}

async fn disable_user(
    State(ctx): State<AppContext>,
    AdminAuthContext(auth): AdminAuthContext,
    Path(id): Path<String>,
) -> PortalResult<Json<Account>> {
    let account = ctx
        .account_manager
        .set_disabled(auth.user_id(), &id, true)
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::UserDisabled)
                .user(auth.user_id())
                .entity("account", &id)
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(Json(account))
}

async fn enable_user(
    State(ctx): State<AppContext>,
    AdminAuthContext(auth): AdminAuthContext,
    Path(id): Path<String>,
) -> PortalResult<Json<Account>> {
    let account = ctx
        .account_manager
        .set_disabled(auth.user_id(), &id, false)
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::UserEnabled)
                .user(auth.user_id())
                .entity("account", &id)
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(Json(account))
}

// ============================================================================
// Conferences
// ============================================================================

/// Every conference, drafts included
async fn list_conferences(
    State(ctx): State<AppContext>,
    _auth: AdminAuthContext,
) -> PortalResult<Json<Vec<ConferenceView>>> {
    let conferences = ctx.conference_manager.list(false).await?;

    let mut views = Vec::with_capacity(conferences.len());
    for conference in conferences {
        views.push(ctx.conference_manager.view(conference).await?);
    }

    Ok(Json(views))
}

async fn create_conference(
    State(ctx): State<AppContext>,
    AdminAuthContext(auth): AdminAuthContext,
    Json(input): Json<ConferenceInput>,
) -> PortalResult<(StatusCode, Json<Conference>)> {
    input.validate()?;

    let conference = ctx.conference_manager.create(&input).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::ConferenceCreate)
                .user(auth.user_id())
                .entity("conference", &conference.id)
                .details(json!({ "title": conference.title, "published": conference.published }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok((StatusCode::CREATED, Json(conference)))
}

async fn update_conference(
    State(ctx): State<AppContext>,
    AdminAuthContext(auth): AdminAuthContext,
    Path(id): Path<String>,
    Json(input): Json<ConferenceInput>,
) -> PortalResult<Json<Conference>> {
    input.validate()?;

    let conference = ctx.conference_manager.update(&id, &input).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::ConferenceUpdate)
                .user(auth.user_id())
                .entity("conference", &conference.id)
                .details(json!({ "published": conference.published }))
                .ip(auth.ip.clone()),
        )
        .await;

    // Extra capacity goes to the waitlist first
    let promoted = ctx.registration_manager.fill_open_seats(&conference.id).await?;
    for registration in &promoted {
        announce_promoted(&ctx, registration, auth.user_id()).await;
    }

    Ok(Json(conference))
}

async fn delete_conference(
    State(ctx): State<AppContext>,
    AdminAuthContext(auth): AdminAuthContext,
    Path(id): Path<String>,
) -> PortalResult<StatusCode> {
    let conference = ctx.conference_manager.delete(&id).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::ConferenceDelete)
                .user(auth.user_id())
                .entity("conference", &conference.id)
                .details(json!({ "title": conference.title }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Registrations
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationQuery {
    conference_id: Option<String>,
    status: Option<RegistrationStatus>,
    payment_status: Option<PaymentStatus>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_registrations(
    State(ctx): State<AppContext>,
    _auth: AdminAuthContext,
    Query(query): Query<RegistrationQuery>,
) -> PortalResult<Json<Vec<RegistrationDetail>>> {
    let filter = RegistrationFilter {
        conference_id: query.conference_id,
        status: query.status,
        payment_status: query.payment_status,
        limit: query.limit.unwrap_or(100),
        offset: query.offset.unwrap_or(0),
    };
    Ok(Json(ctx.registration_manager.list(&filter).await?))
}

fn decision(body: Option<Json<DecisionRequest>>) -> PortalResult<DecisionRequest> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    req.validate()?;
    Ok(req)
}

async fn approve_registration(
    State(ctx): State<AppContext>,
    AdminAuthContext(auth): AdminAuthContext,
    Path(id): Path<String>,
) -> PortalResult<Json<Registration>> {
    let registration = ctx.registration_manager.approve(&id, auth.user_id()).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::RegistrationApprove)
                .user(auth.user_id())
                .entity("registration", &id)
                .ip(auth.ip.clone()),
        )
        .await;
    notify_status(&ctx, &id, RegistrationNotice::Approved, None).await;

    Ok(Json(registration))
}

async fn reject_registration(
    State(ctx): State<AppContext>,
    AdminAuthContext(auth): AdminAuthContext,
    Path(id): Path<String>,
    body: Option<Json<DecisionRequest>>,
) -> PortalResult<Json<StatusChange>> {
    let req = decision(body)?;

    let change = ctx
        .registration_manager
        .reject(&id, auth.user_id(), req.note.as_deref())
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::RegistrationReject)
                .user(auth.user_id())
                .entity("registration", &id)
                .details(json!({ "note": req.note }))
                .ip(auth.ip.clone()),
        )
        .await;
    notify_status(&ctx, &id, RegistrationNotice::Rejected, req.note.as_deref()).await;
    announce_promotion(&ctx, &change, auth.user_id()).await;

    Ok(Json(change))
}

async fn confirm_payment(
    State(ctx): State<AppContext>,
    AdminAuthContext(auth): AdminAuthContext,
    Path(id): Path<String>,
    body: Option<Json<ConfirmPaymentRequest>>,
) -> PortalResult<Json<Registration>> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    req.validate()?;

    let registration = ctx
        .registration_manager
        .confirm_payment(&id, auth.user_id(), req.amount_cents, req.reference.as_deref())
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::PaymentConfirmed)
                .user(auth.user_id())
                .entity("registration", &id)
                .details(json!({
                    "amountPaidCents": registration.amount_paid_cents,
                    "currency": registration.currency,
                }))
                .ip(auth.ip.clone()),
        )
        .await;

    match ctx.registration_manager.get_detail(&id).await {
        Ok(detail) => {
            let email = ctx.mailer.payment_confirmed_email(
                &detail.member_name,
                &detail.conference_title,
                registration.amount_paid_cents,
                &registration.currency,
            );
            ctx.mailer.send_logged(&detail.member_email, email).await;
        }
        Err(e) => tracing::warn!(registration_id = %id, error = %e, "Could not notify payment"),
    }

    Ok(Json(registration))
}

async fn reject_payment(
    State(ctx): State<AppContext>,
    AdminAuthContext(auth): AdminAuthContext,
    Path(id): Path<String>,
    body: Option<Json<DecisionRequest>>,
) -> PortalResult<Json<Registration>> {
    let req = decision(body)?;

    let registration = ctx
        .registration_manager
        .reject_payment_proof(&id, auth.user_id(), req.note.as_deref())
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::PaymentProofRejected)
                .user(auth.user_id())
                .entity("registration", &id)
                .details(json!({ "note": req.note }))
                .ip(auth.ip.clone()),
        )
        .await;

    match ctx.registration_manager.get_detail(&id).await {
        Ok(detail) => {
            let email = ctx.mailer.payment_proof_rejected_email(
                &detail.member_name,
                &detail.conference_title,
                req.note.as_deref(),
            );
            ctx.mailer.send_logged(&detail.member_email, email).await;
        }
        Err(e) => tracing::warn!(registration_id = %id, error = %e, "Could not notify payment"),
    }

    Ok(Json(registration))
}

async fn refund_payment(
    State(ctx): State<AppContext>,
    AdminAuthContext(auth): AdminAuthContext,
    Path(id): Path<String>,
    body: Option<Json<DecisionRequest>>,
) -> PortalResult<Json<Registration>> {
    let req = decision(body)?;

    let registration = ctx
        .registration_manager
        .refund(&id, auth.user_id(), req.note.as_deref())
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::PaymentRefunded)
                .user(auth.user_id())
                .entity("registration", &id)
                .details(json!({
                    "amountPaidCents": registration.amount_paid_cents,
                    "note": req.note,
                }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(Json(registration))
}

async fn waive_payment(
    State(ctx): State<AppContext>,
    AdminAuthContext(auth): AdminAuthContext,
    Path(id): Path<String>,
    body: Option<Json<DecisionRequest>>,
) -> PortalResult<Json<Registration>> {
    let req = decision(body)?;

    let registration = ctx
        .registration_manager
        .waive_payment(&id, auth.user_id(), req.note.as_deref())
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::PaymentWaived)
                .user(auth.user_id())
                .entity("registration", &id)
                .details(json!({
                    "amountDueCents": registration.amount_due_cents,
                    "note": req.note,
                }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(Json(registration))
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Deserialize)]
struct ReportQuery {
    status: Option<ReportStatus>,
    limit: Option<i64>,
}

async fn list_reports(
    State(ctx): State<AppContext>,
    _auth: ModeratorAuthContext,
    Query(query): Query<ReportQuery>,
) -> PortalResult<Json<Vec<Report>>> {
    Ok(Json(
        ctx.report_manager
            .list_reports(query.status, query.limit)
            .await?,
    ))
}

async fn resolve_report(
    State(ctx): State<AppContext>,
    ModeratorAuthContext(auth): ModeratorAuthContext,
    Path(id): Path<i64>,
    Json(req): Json<ResolveReportRequest>,
) -> PortalResult<Json<ResolvedReport>> {
    req.validate()?;

    let resolved = ctx
        .report_manager
        .resolve_report(id, req.action, auth.user_id(), req.note.as_deref())
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::ReportResolve)
                .user(auth.user_id())
                .entity("report", id.to_string())
                .details(json!({
                    "action": req.action.as_str(),
                    "targetType": resolved.report.target_type.as_str(),
                    "targetId": resolved.report.target_id,
                    "alsoClosed": resolved.also_closed,
                }))
                .ip(auth.ip.clone()),
        )
        .await;

    if req.action != ReportAction::Dismiss {
        if let Some(author_id) = &resolved.content_author_id {
            match ctx.account_manager.get_account(author_id).await {
                Ok(author) => {
                    let email = ctx.mailer.content_removed_email(
                        &author.full_name,
                        resolved.report.target_type.as_str(),
                        req.note.as_deref(),
                    );
                    ctx.mailer.send_logged(&author.email, email).await;
                }
                Err(e) => tracing::warn!(user_id = %author_id, error = %e, "Could not notify author"),
            }
        }
    }

    Ok(Json(resolved))
}
