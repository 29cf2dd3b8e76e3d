/// Community blog
///
/// Posts written by onboarded members, one level of threaded comments, and
/// likes on both.

mod manager;

pub use manager::{BlogManager, PostFilter};
pub(crate) use manager::{purge_comment, purge_post};

use crate::error::{PortalError, PortalResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Post visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Published,
    /// Removed from public view by a moderator
    Hidden,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
            PostStatus::Hidden => "hidden",
        }
    }

    pub fn from_str(s: &str) -> PortalResult<Self> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "published" => Ok(PostStatus::Published),
            "hidden" => Ok(PostStatus::Hidden),
            _ => Err(PortalError::Validation(format!("Invalid post status: {}", s))),
        }
    }
}

impl TryFrom<String> for PostStatus {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PostStatus::from_str(&value)
    }
}

/// Things members can like or report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Post,
    Comment,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Post => "post",
            ContentKind::Comment => "comment",
        }
    }

    pub fn from_str(s: &str) -> PortalResult<Self> {
        match s {
            "post" => Ok(ContentKind::Post),
            "comment" => Ok(ContentKind::Comment),
            _ => Err(PortalError::Validation(format!("Invalid content type: {}", s))),
        }
    }
}

impl TryFrom<String> for ContentKind {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ContentKind::from_str(&value)
    }
}

/// Blog post record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub slug: String,
    pub excerpt: Option<String>,
    pub content: String,
    pub cover_upload_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: PostStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Post with author and engagement counts for a given viewer
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub post: Post,
    pub author_name: String,
    pub like_count: i64,
    pub comment_count: i64,
    pub liked_by_viewer: bool,
}

/// Comment record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub parent_id: Option<String>,
    pub content: String,
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Comment with author and likes for a given viewer
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub comment: Comment,
    pub author_name: String,
    pub like_count: i64,
    pub liked_by_viewer: bool,
}

/// New post
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 500))]
    pub excerpt: Option<String>,
    #[validate(length(min = 1, max = 100000))]
    pub content: String,
    pub cover_upload_id: Option<String>,
    /// Draft unless stated
    pub status: Option<PostStatus>,
}

/// Partial post update
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 500))]
    pub excerpt: Option<String>,
    #[validate(length(min = 1, max = 100000))]
    pub content: Option<String>,
    pub cover_upload_id: Option<String>,
    pub status: Option<PostStatus>,
}

/// New comment
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    #[validate(length(min = 1, max = 5000))]
    pub content: String,
    pub parent_id: Option<String>,
}

/// Like toggle result
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeState {
    pub liked: bool,
    pub like_count: i64,
}
