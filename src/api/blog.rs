/// Community blog: posts, comments, likes and reports
use crate::{
    admin::{reports::SubmitReportRequest, ActivityAction, ActivityEntry, Report},
    auth::{AuthContext, OptionalAuthContext},
    blog::{
        Comment, CommentView, ContentKind, CreateCommentRequest, CreatePostRequest, LikeState,
        Post, PostFilter, PostStatus, PostView, UpdatePostRequest,
    },
    context::AppContext,
    error::PortalResult,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

/// Build blog routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/posts", get(list_posts).post(create_post))
        .route(
            "/api/posts/:id",
            get(get_post).put(update_post).delete(delete_post),
        )
        .route("/api/posts/:id/like", post(like_post))
        .route("/api/posts/:id/comments", get(list_comments).post(add_comment))
        .route("/api/comments/:id", delete(delete_comment))
        .route("/api/comments/:id/like", post(like_comment))
        .route("/api/reports", post(submit_report))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostQuery {
    author_id: Option<String>,
    status: Option<PostStatus>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_posts(
    State(ctx): State<AppContext>,
    viewer: OptionalAuthContext,
    Query(query): Query<PostQuery>,
) -> PortalResult<Json<Vec<PostView>>> {
    let filter = PostFilter {
        author_id: query.author_id,
        status: query.status,
        limit: query.limit.unwrap_or(20),
        offset: query.offset.unwrap_or(0),
    };
    Ok(Json(ctx.blog_manager.list_posts(viewer.account(), &filter).await?))
}

async fn create_post(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<CreatePostRequest>,
) -> PortalResult<(StatusCode, Json<Post>)> {
    req.validate()?;

    let post = ctx.blog_manager.create_post(&auth.account, &req).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::PostCreate)
                .user(auth.user_id())
                .entity("post", &post.id)
                .details(json!({ "status": post.status.as_str() }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok((StatusCode::CREATED, Json(post)))
}

async fn get_post(
    State(ctx): State<AppContext>,
    viewer: OptionalAuthContext,
    Path(key): Path<String>,
) -> PortalResult<Json<PostView>> {
    Ok(Json(ctx.blog_manager.get_post(&key, viewer.account()).await?))
}

async fn update_post(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(req): Json<UpdatePostRequest>,
) -> PortalResult<Json<Post>> {
    req.validate()?;

    let post = ctx.blog_manager.update_post(&id, &auth.account, &req).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::PostUpdate)
                .user(auth.user_id())
                .entity("post", &post.id)
                .details(json!({ "status": post.status.as_str() }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(Json(post))
}

async fn delete_post(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> PortalResult<StatusCode> {
    let post = ctx.blog_manager.delete_post(&id, &auth.account).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::PostDelete)
                .user(auth.user_id())
                .entity("post", &post.id)
                .details(json!({ "authorId": post.author_id, "title": post.title }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

async fn like_post(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> PortalResult<Json<LikeState>> {
    Ok(Json(
        ctx.blog_manager
            .toggle_like(ContentKind::Post, &id, auth.user_id())
            .await?,
    ))
}

async fn list_comments(
    State(ctx): State<AppContext>,
    viewer: OptionalAuthContext,
    Path(post_id): Path<String>,
) -> PortalResult<Json<Vec<CommentView>>> {
    Ok(Json(
        ctx.blog_manager
            .list_comments(&post_id, viewer.account())
            .await?,
    ))
}

async fn add_comment(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(post_id): Path<String>,
    Json(req): Json<CreateCommentRequest>,
) -> PortalResult<(StatusCode, Json<Comment>)> {
    req.validate()?;

    let comment = ctx
        .blog_manager
        .add_comment(&post_id, &auth.account, &req)
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::CommentCreate)
                .user(auth.user_id())
                .entity("comment", &comment.id)
                .details(json!({ "postId": post_id }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok((StatusCode::CREATED, Json(comment)))
}

async fn delete_comment(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> PortalResult<StatusCode> {
    let comment = ctx.blog_manager.delete_comment(&id, &auth.account).await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::CommentDelete)
                .user(auth.user_id())
                .entity("comment", &comment.id)
                .details(json!({ "postId": comment.post_id, "authorId": comment.author_id }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

async fn like_comment(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> PortalResult<Json<LikeState>> {
    Ok(Json(
        ctx.blog_manager
            .toggle_like(ContentKind::Comment, &id, auth.user_id())
            .await?,
    ))
}

async fn submit_report(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<SubmitReportRequest>,
) -> PortalResult<(StatusCode, Json<Report>)> {
    req.validate()?;

    let report = ctx
        .report_manager
        .submit_report(
            req.target_type,
            &req.target_id,
            req.reason,
            req.details.as_deref(),
            auth.user_id(),
        )
        .await?;

    ctx.activity
        .record(
            ActivityEntry::new(ActivityAction::ReportSubmit)
                .user(auth.user_id())
                .entity("report", report.id.to_string())
                .details(json!({
                    "targetType": report.target_type.as_str(),
                    "targetId": report.target_id,
                    "reason": report.reason.as_str(),
                }))
                .ip(auth.ip.clone()),
        )
        .await;

    Ok((StatusCode::CREATED, Json(report)))
}
