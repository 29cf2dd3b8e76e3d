/// Blog manager: posts, comments and likes
use crate::{
    admin::Role,
    blog::{
        Comment, CommentView, ContentKind, CreateCommentRequest, CreatePostRequest, LikeState,
        Post, PostStatus, PostView, UpdatePostRequest,
    },
    db::account::Account,
    error::{conflict_on_unique, PortalError, PortalResult},
    slug::unique_slug,
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

const POST_COLUMNS: &str = "id, author_id, title, slug, excerpt, content, cover_upload_id, \
     status, published_at, created_at, updated_at";

const COMMENT_COLUMNS: &str =
    "id, post_id, author_id, parent_id, content, hidden, created_at, updated_at";

/// Post listing filter
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub author_id: Option<String>,
    /// Published unless stated
    pub status: Option<PostStatus>,
    pub limit: i64,
    pub offset: i64,
}

/// Blog manager
#[derive(Clone)]
pub struct BlogManager {
    db: SqlitePool,
}

fn is_moderator(viewer: Option<&Account>) -> bool {
    viewer.map_or(false, |v| v.role.can_act_as(Role::Moderator))
}

fn can_view(post: &Post, viewer: Option<&Account>) -> bool {
    post.status == PostStatus::Published
        || is_moderator(viewer)
        || viewer.map_or(false, |v| v.id == post.author_id)
}

fn can_manage(author_id: &str, actor: &Account) -> bool {
    actor.id == author_id || actor.role.can_act_as(Role::Moderator)
}

fn clean_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Start a post query that reports engagement for `viewer_id`
fn post_view_query(viewer_id: Option<String>) -> QueryBuilder<'static, Sqlite> {
    let mut query = QueryBuilder::new(
        r#"
        SELECT p.id AS id, p.author_id AS author_id, p.title AS title, p.slug AS slug,
               p.excerpt AS excerpt, p.content AS content, p.cover_upload_id AS cover_upload_id,
               p.status AS status, p.published_at AS published_at,
               p.created_at AS created_at, p.updated_at AS updated_at,
               a.full_name AS author_name,
               (SELECT COUNT(*) FROM content_like l
                 WHERE l.target_type = 'post' AND l.target_id = p.id) AS like_count,
               (SELECT COUNT(*) FROM comment c
                 WHERE c.post_id = p.id AND c.hidden = 0) AS comment_count,
               EXISTS(SELECT 1 FROM content_like l
                 WHERE l.target_type = 'post' AND l.target_id = p.id AND l.user_id = "#,
    );
    query.push_bind(viewer_id);
    query.push(") AS liked_by_viewer FROM post p JOIN account a ON a.id = p.author_id WHERE 1 = 1");
    query
}

impl BlogManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    // ==================== Posts ====================

    /// Create a post as `author`
    pub async fn create_post(&self, author: &Account, req: &CreatePostRequest) -> PortalResult<Post> {
        if !author.is_onboarded() {
            return Err(PortalError::Authorization(
                "Complete your profile before writing posts".to_string(),
            ));
        }

        let status = req.status.unwrap_or(PostStatus::Draft);
        if status == PostStatus::Hidden {
            return Err(PortalError::Validation(
                "New posts must be draft or published".to_string(),
            ));
        }

        let title = req.title.trim();
        let content = req.content.trim();
        if title.is_empty() || content.is_empty() {
            return Err(PortalError::Validation("Title and content are required".to_string()));
        }

        if let Some(cover) = &req.cover_upload_id {
            self.check_cover(&author.id, cover).await?;
        }

        let id = Uuid::new_v4().to_string();
        let slug = unique_slug(&self.db, "post", title).await?;
        let now = Utc::now();
        let published_at = (status == PostStatus::Published).then_some(now);

        sqlx::query(
            r#"
            INSERT INTO post (id, author_id, title, slug, excerpt, content, cover_upload_id,
                status, published_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
        )
        .bind(&id)
        .bind(&author.id)
        .bind(title)
        .bind(&slug)
        .bind(clean_optional(req.excerpt.as_deref()))
        .bind(content)
        .bind(&req.cover_upload_id)
        .bind(status.as_str())
        .bind(published_at)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(conflict_on_unique(
            "A post with this title was created at the same time; try again",
        ))?;

        tracing::info!(post_id = %id, author_id = %author.id, status = status.as_str(), "Created post");

        self.get_post_record(&id).await
    }

    /// Apply a partial update (author or moderator)
    pub async fn update_post(
        &self,
        id: &str,
        actor: &Account,
        req: &UpdatePostRequest,
    ) -> PortalResult<Post> {
        let mut post = self.get_post_record(id).await?;
        let moderator = actor.role.can_act_as(Role::Moderator);

        if !can_manage(&post.author_id, actor) {
            return Err(PortalError::Authorization(
                "Only the author or a moderator can edit this post".to_string(),
            ));
        }
        if post.status == PostStatus::Hidden && !moderator {
            return Err(PortalError::Authorization(
                "This post was hidden by a moderator".to_string(),
            ));
        }

        if let Some(title) = &req.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(PortalError::Validation("Title cannot be empty".to_string()));
            }
            post.title = title.to_string();
        }
        if let Some(content) = &req.content {
            let content = content.trim();
            if content.is_empty() {
                return Err(PortalError::Validation("Content cannot be empty".to_string()));
            }
            post.content = content.to_string();
        }
        if let Some(excerpt) = &req.excerpt {
            post.excerpt = clean_optional(Some(excerpt));
        }
        if let Some(cover) = &req.cover_upload_id {
            self.check_cover(&post.author_id, cover).await?;
            post.cover_upload_id = Some(cover.clone());
        }
        if let Some(status) = req.status {
            if status == PostStatus::Hidden && !moderator {
                return Err(PortalError::Authorization(
                    "Only moderators can hide posts".to_string(),
                ));
            }
            post.status = status;
        }

        let now = Utc::now();
        if post.status == PostStatus::Published && post.published_at.is_none() {
            post.published_at = Some(now);
        }

        sqlx::query(
            r#"
            UPDATE post
            SET title = ?1, excerpt = ?2, content = ?3, cover_upload_id = ?4, status = ?5,
                published_at = ?6, updated_at = ?7
            WHERE id = ?8
            "#,
        )
        .bind(&post.title)
        .bind(&post.excerpt)
        .bind(&post.content)
        .bind(&post.cover_upload_id)
        .bind(post.status.as_str())
        .bind(post.published_at)
        .bind(now)
        .bind(id)
        .execute(&self.db)
        .await?;

        self.get_post_record(id).await
    }

    /// Delete a post with its comments and likes (author or moderator)
    pub async fn delete_post(&self, id: &str, actor: &Account) -> PortalResult<Post> {
        let post = self.get_post_record(id).await?;
        if !can_manage(&post.author_id, actor) {
            return Err(PortalError::Authorization(
                "Only the author or a moderator can delete this post".to_string(),
            ));
        }

        let mut tx = self.db.begin().await?;
        purge_post(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!(post_id = %id, actor_id = %actor.id, "Deleted post");

        Ok(post)
    }

    /// Get a post by id or slug, as seen by `viewer`
    pub async fn get_post(&self, key: &str, viewer: Option<&Account>) -> PortalResult<PostView> {
        let mut query = post_view_query(viewer.map(|v| v.id.clone()));
        query
            .push(" AND (p.id = ")
            .push_bind(key.to_string())
            .push(" OR p.slug = ")
            .push_bind(key.to_string())
            .push(")");

        let view = query
            .build_query_as::<PostView>()
            .fetch_optional(&self.db)
            .await?
            .filter(|view| can_view(&view.post, viewer))
            .ok_or_else(|| PortalError::NotFound("Post not found".to_string()))?;

        Ok(view)
    }

    /// List posts visible to `viewer`
    ///
    /// Drafts and hidden posts are listed only for moderators, or for members
    /// looking at their own posts.
    pub async fn list_posts(
        &self,
        viewer: Option<&Account>,
        filter: &PostFilter,
    ) -> PortalResult<Vec<PostView>> {
        let status = filter.status.unwrap_or(PostStatus::Published);
        let mut author_id = filter.author_id.clone();

        if status != PostStatus::Published && !is_moderator(viewer) {
            match viewer {
                Some(v) => author_id = Some(v.id.clone()),
                None => {
                    return Err(PortalError::Authentication(
                        "Sign in to see unpublished posts".to_string(),
                    ))
                }
            }
        }

        let mut query = post_view_query(viewer.map(|v| v.id.clone()));
        query.push(" AND p.status = ").push_bind(status.as_str());
        if let Some(author_id) = author_id {
            query.push(" AND p.author_id = ").push_bind(author_id);
        }
        query
            .push(" ORDER BY coalesce(p.published_at, p.updated_at) DESC, p.id LIMIT ")
            .push_bind(filter.limit.clamp(1, 100))
            .push(" OFFSET ")
            .push_bind(filter.offset.max(0));

        Ok(query.build_query_as::<PostView>().fetch_all(&self.db).await?)
    }

    /// Get a post record without visibility checks
    pub async fn get_post_record(&self, id: &str) -> PortalResult<Post> {
        sqlx::query_as::<_, Post>(&format!("SELECT {} FROM post WHERE id = ?1", POST_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| PortalError::NotFound("Post not found".to_string()))
    }

    async fn check_cover(&self, author_id: &str, upload_id: &str) -> PortalResult<()> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT owner_id, mime_type FROM upload WHERE id = ?1")
                .bind(upload_id)
                .fetch_optional(&self.db)
                .await?;

        match row {
            None => Err(PortalError::NotFound("Cover upload not found".to_string())),
            Some((owner, _)) if owner != author_id => Err(PortalError::Authorization(
                "Cover image must be one of the author's uploads".to_string(),
            )),
            Some((_, mime)) if !mime.starts_with("image/") => Err(PortalError::Validation(
                "Cover must be an image".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }

    // ==================== Comments ====================

    /// Comment on a published post
    ///
    /// Replies are one level deep: a parent must be a top-level comment of
    /// the same post.
    pub async fn add_comment(
        &self,
        post_id: &str,
        author: &Account,
        req: &CreateCommentRequest,
    ) -> PortalResult<Comment> {
        let post = self.get_post_record(post_id).await?;
        if post.status != PostStatus::Published {
            return Err(PortalError::NotFound("Post not found".to_string()));
        }

        let content = req.content.trim();
        if content.is_empty() {
            return Err(PortalError::Validation("Comment cannot be empty".to_string()));
        }

        if let Some(parent_id) = &req.parent_id {
            let parent = self.get_comment(parent_id).await?;
            if parent.post_id != post.id {
                return Err(PortalError::Validation(
                    "Parent comment belongs to another post".to_string(),
                ));
            }
            if parent.parent_id.is_some() {
                return Err(PortalError::Validation(
                    "Replies can only be made to top-level comments".to_string(),
                ));
            }
            if parent.hidden {
                return Err(PortalError::NotFound("Comment not found".to_string()));
            }
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO comment (id, post_id, author_id, parent_id, content, hidden, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)
            "#,
        )
        .bind(&id)
        .bind(&post.id)
        .bind(&author.id)
        .bind(&req.parent_id)
        .bind(content)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.get_comment(&id).await
    }

    /// Delete a comment and its replies (author or moderator)
    pub async fn delete_comment(&self, id: &str, actor: &Account) -> PortalResult<Comment> {
        let comment = self.get_comment(id).await?;
        if !can_manage(&comment.author_id, actor) {
            return Err(PortalError::Authorization(
                "Only the author or a moderator can delete this comment".to_string(),
            ));
        }

        let mut tx = self.db.begin().await?;
        purge_comment(&mut tx, id).await?;
        tx.commit().await?;

        Ok(comment)
    }

    /// Get a comment by id
    pub async fn get_comment(&self, id: &str) -> PortalResult<Comment> {
        sqlx::query_as::<_, Comment>(&format!(
            "SELECT {} FROM comment WHERE id = ?1",
            COMMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| PortalError::NotFound("Comment not found".to_string()))
    }

    /// Comments on a post in conversation order
    ///
    /// Hidden comments are only returned to moderators.
    pub async fn list_comments(
        &self,
        post_id: &str,
        viewer: Option<&Account>,
    ) -> PortalResult<Vec<CommentView>> {
        let post = self.get_post_record(post_id).await?;
        if !can_view(&post, viewer) {
            return Err(PortalError::NotFound("Post not found".to_string()));
        }

        let comments = sqlx::query_as::<_, CommentView>(
            r#"
            SELECT c.id AS id, c.post_id AS post_id, c.author_id AS author_id,
                   c.parent_id AS parent_id, c.content AS content, c.hidden AS hidden,
                   c.created_at AS created_at, c.updated_at AS updated_at,
                   a.full_name AS author_name,
                   (SELECT COUNT(*) FROM content_like l
                     WHERE l.target_type = 'comment' AND l.target_id = c.id) AS like_count,
                   EXISTS(SELECT 1 FROM content_like l
                     WHERE l.target_type = 'comment' AND l.target_id = c.id AND l.user_id = ?2) AS liked_by_viewer
            FROM comment c
            JOIN account a ON a.id = c.author_id
            WHERE c.post_id = ?1 AND (c.hidden = 0 OR ?3)
            ORDER BY c.created_at ASC, c.id ASC
            "#,
        )
        .bind(post_id)
        .bind(viewer.map(|v| v.id.as_str()))
        .bind(is_moderator(viewer))
        .fetch_all(&self.db)
        .await?;

        Ok(comments)
    }

    // ==================== Likes ====================

    /// Like or unlike visible content
    pub async fn toggle_like(
        &self,
        kind: ContentKind,
        target_id: &str,
        user_id: &str,
    ) -> PortalResult<LikeState> {
        self.ensure_publicly_visible(kind, target_id).await?;

        let mut tx = self.db.begin().await?;

        let removed = sqlx::query(
            "DELETE FROM content_like WHERE target_type = ?1 AND target_id = ?2 AND user_id = ?3",
        )
        .bind(kind.as_str())
        .bind(target_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let liked = removed == 0;
        if liked {
            sqlx::query(
                "INSERT INTO content_like (target_type, target_id, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(kind.as_str())
            .bind(target_id)
            .bind(user_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(conflict_on_unique("Already liked"))?;
        }

        let like_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM content_like WHERE target_type = ?1 AND target_id = ?2",
        )
        .bind(kind.as_str())
        .bind(target_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(LikeState { liked, like_count })
    }

    async fn ensure_publicly_visible(&self, kind: ContentKind, target_id: &str) -> PortalResult<()> {
        let post_id = match kind {
            ContentKind::Post => target_id.to_string(),
            ContentKind::Comment => {
                let comment = self.get_comment(target_id).await?;
                if comment.hidden {
                    return Err(PortalError::NotFound("Comment not found".to_string()));
                }
                comment.post_id
            }
        };

        let post = self.get_post_record(&post_id).await?;
        if post.status != PostStatus::Published {
            return Err(PortalError::NotFound("Post not found".to_string()));
        }
        Ok(())
    }
}

/// Delete a post, its comments and every like attached to them
pub(crate) async fn purge_post(conn: &mut SqliteConnection, post_id: &str) -> PortalResult<()> {
    sqlx::query(
        "DELETE FROM content_like
         WHERE (target_type = 'post' AND target_id = ?1)
            OR (target_type = 'comment' AND target_id IN (SELECT id FROM comment WHERE post_id = ?1))",
    )
    .bind(post_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM post WHERE id = ?1")
        .bind(post_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Delete a comment, its replies and their likes
pub(crate) async fn purge_comment(conn: &mut SqliteConnection, comment_id: &str) -> PortalResult<()> {
    sqlx::query(
        "DELETE FROM content_like
         WHERE target_type = 'comment'
           AND (target_id = ?1 OR target_id IN (SELECT id FROM comment WHERE parent_id = ?1))",
    )
    .bind(comment_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM comment WHERE id = ?1")
        .bind(comment_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{AccountManager, OnboardingRequest},
        config::ServerConfig,
        db,
    };
    use std::{path::PathBuf, sync::Arc};

    struct Fixture {
        accounts: AccountManager,
        blog: BlogManager,
    }

    async fn fixture() -> Fixture {
        let pool = db::connect_in_memory().await.unwrap();
        let config = Arc::new(ServerConfig::for_testing(PathBuf::from("./data")));
        Fixture {
            accounts: AccountManager::new(pool.clone(), config),
            blog: BlogManager::new(pool),
        }
    }

    impl Fixture {
        async fn member(&self, email: &str) -> Account {
            let account = self
                .accounts
                .register(email, "password123", "Writer")
                .await
                .unwrap();
            self.accounts
                .complete_onboarding(
                    &account.id,
                    &OnboardingRequest {
                        full_name: "Writer".to_string(),
                        school: "Labasa College".to_string(),
                        position: "Principal".to_string(),
                        region: "Northern".to_string(),
                        phone: None,
                    },
                )
                .await
                .unwrap()
        }

        async fn moderator(&self) -> Account {
            let admin = self
                .accounts
                .register("admin@fpa.test", "password123", "Admin")
                .await
                .unwrap();
            let moderator = self.member("mod@fpa.test").await;
            self.accounts
                .set_role(&admin.id, &moderator.id, Role::Moderator)
                .await
                .unwrap()
        }

        async fn published(&self, author: &Account, title: &str) -> Post {
            self.blog
                .create_post(
                    author,
                    &CreatePostRequest {
                        title: title.to_string(),
                        excerpt: None,
                        content: "Body text".to_string(),
                        cover_upload_id: None,
                        status: Some(PostStatus::Published),
                    },
                )
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_create_requires_onboarding() {
        let f = fixture().await;
        let fresh = f
            .accounts
            .register("fresh@fpa.test", "password123", "Fresh")
            .await
            .unwrap();

        let err = f
            .blog
            .create_post(
                &fresh,
                &CreatePostRequest {
                    title: "Hello".to_string(),
                    excerpt: None,
                    content: "World".to_string(),
                    cover_upload_id: None,
                    status: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_drafts_are_private_until_published() {
        let f = fixture().await;
        let author = f.member("author@fpa.test").await;
        let reader = f.member("reader@fpa.test").await;

        let draft = f
            .blog
            .create_post(
                &author,
                &CreatePostRequest {
                    title: "Term Planning".to_string(),
                    excerpt: Some("  ".to_string()),
                    content: "Draft body".to_string(),
                    cover_upload_id: None,
                    status: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(draft.status, PostStatus::Draft);
        assert!(draft.published_at.is_none());
        assert!(draft.excerpt.is_none());

        assert!(f.blog.get_post(&draft.id, None).await.is_err());
        assert!(f.blog.get_post(&draft.id, Some(&reader)).await.is_err());
        assert!(f.blog.get_post(&draft.slug, Some(&author)).await.is_ok());

        let published = f
            .blog
            .update_post(
                &draft.id,
                &author,
                &UpdatePostRequest {
                    status: Some(PostStatus::Published),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let first_published_at = published.published_at.unwrap();

        // Republishing keeps the original publication time
        f.blog
            .update_post(
                &draft.id,
                &author,
                &UpdatePostRequest {
                    status: Some(PostStatus::Draft),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let again = f
            .blog
            .update_post(
                &draft.id,
                &author,
                &UpdatePostRequest {
                    status: Some(PostStatus::Published),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(again.published_at, Some(first_published_at));

        let view = f.blog.get_post("term-planning", None).await.unwrap();
        assert_eq!(view.post.id, draft.id);
        assert_eq!(view.author_name, "Writer");
    }

    #[tokio::test]
    async fn test_only_author_or_moderator_can_edit() {
        let f = fixture().await;
        let author = f.member("author@fpa.test").await;
        let other = f.member("other@fpa.test").await;
        let moderator = f.moderator().await;
        let post = f.published(&author, "Exams").await;

        let err = f
            .blog
            .update_post(
                &post.id,
                &other,
                &UpdatePostRequest {
                    title: Some("Hijacked".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Authorization(_)));

        // Authors cannot hide; moderators can, after which the author is locked out
        assert!(f
            .blog
            .update_post(
                &post.id,
                &author,
                &UpdatePostRequest {
                    status: Some(PostStatus::Hidden),
                    ..Default::default()
                },
            )
            .await
            .is_err());
        f.blog
            .update_post(
                &post.id,
                &moderator,
                &UpdatePostRequest {
                    status: Some(PostStatus::Hidden),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(f
            .blog
            .update_post(
                &post.id,
                &author,
                &UpdatePostRequest {
                    status: Some(PostStatus::Published),
                    ..Default::default()
                },
            )
            .await
            .is_err());

        assert!(f.blog.get_post(&post.id, Some(&other)).await.is_err());
        assert!(f.blog.get_post(&post.id, Some(&moderator)).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_posts_visibility() {
        let f = fixture().await;
        let author = f.member("author@fpa.test").await;
        f.published(&author, "One").await;
        f.published(&author, "Two").await;
        f.blog
            .create_post(
                &author,
                &CreatePostRequest {
                    title: "Secret".to_string(),
                    excerpt: None,
                    content: "Draft".to_string(),
                    cover_upload_id: None,
                    status: None,
                },
            )
            .await
            .unwrap();

        let public = f
            .blog
            .list_posts(None, &PostFilter { limit: 20, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(public.len(), 2);

        let drafts = f
            .blog
            .list_posts(
                Some(&author),
                &PostFilter {
                    status: Some(PostStatus::Draft),
                    limit: 20,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);

        assert!(f
            .blog
            .list_posts(
                None,
                &PostFilter {
                    status: Some(PostStatus::Draft),
                    limit: 20,
                    ..Default::default()
                },
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_comment_threading_rules() {
        let f = fixture().await;
        let author = f.member("author@fpa.test").await;
        let post = f.published(&author, "Discussion").await;
        let other_post = f.published(&author, "Elsewhere").await;

        let top = f
            .blog
            .add_comment(
                &post.id,
                &author,
                &CreateCommentRequest {
                    content: "First!".to_string(),
                    parent_id: None,
                },
            )
            .await
            .unwrap();
        let reply = f
            .blog
            .add_comment(
                &post.id,
                &author,
                &CreateCommentRequest {
                    content: "Reply".to_string(),
                    parent_id: Some(top.id.clone()),
                },
            )
            .await
            .unwrap();

        // No replies to replies
        assert!(f
            .blog
            .add_comment(
                &post.id,
                &author,
                &CreateCommentRequest {
                    content: "Too deep".to_string(),
                    parent_id: Some(reply.id.clone()),
                },
            )
            .await
            .is_err());

        // Parent must be on the same post
        assert!(f
            .blog
            .add_comment(
                &other_post.id,
                &author,
                &CreateCommentRequest {
                    content: "Wrong post".to_string(),
                    parent_id: Some(top.id.clone()),
                },
            )
            .await
            .is_err());

        let comments = f.blog.list_comments(&post.id, None).await.unwrap();
        assert_eq!(comments.len(), 2);

        // Deleting the parent removes the reply
        f.blog.delete_comment(&top.id, &author).await.unwrap();
        assert!(f.blog.list_comments(&post.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hidden_comments_only_for_moderators() {
        let f = fixture().await;
        let author = f.member("author@fpa.test").await;
        let moderator = f.moderator().await;
        let post = f.published(&author, "Discussion").await;

        let comment = f
            .blog
            .add_comment(
                &post.id,
                &author,
                &CreateCommentRequest {
                    content: "Rude remark".to_string(),
                    parent_id: None,
                },
            )
            .await
            .unwrap();

        sqlx::query("UPDATE comment SET hidden = 1 WHERE id = ?1")
            .bind(&comment.id)
            .execute(&f.blog.db)
            .await
            .unwrap();

        assert!(f.blog.list_comments(&post.id, Some(&author)).await.unwrap().is_empty());
        assert_eq!(
            f.blog.list_comments(&post.id, Some(&moderator)).await.unwrap().len(),
            1
        );
        assert_eq!(f.blog.get_post(&post.id, None).await.unwrap().comment_count, 0);
    }

    #[tokio::test]
    async fn test_toggle_like() {
        let f = fixture().await;
        let author = f.member("author@fpa.test").await;
        let reader = f.member("reader@fpa.test").await;
        let post = f.published(&author, "Likeable").await;

        let liked = f
            .blog
            .toggle_like(ContentKind::Post, &post.id, &reader.id)
            .await
            .unwrap();
        assert!(liked.liked);
        assert_eq!(liked.like_count, 1);

        let view = f.blog.get_post(&post.id, Some(&reader)).await.unwrap();
        assert!(view.liked_by_viewer);
        assert_eq!(view.like_count, 1);
        assert!(!f.blog.get_post(&post.id, None).await.unwrap().liked_by_viewer);

        let unliked = f
            .blog
            .toggle_like(ContentKind::Post, &post.id, &reader.id)
            .await
            .unwrap();
        assert!(!unliked.liked);
        assert_eq!(unliked.like_count, 0);
    }

    #[tokio::test]
    async fn test_cannot_like_draft() {
        let f = fixture().await;
        let author = f.member("author@fpa.test").await;
        let draft = f
            .blog
            .create_post(
                &author,
                &CreatePostRequest {
                    title: "Draft".to_string(),
                    excerpt: None,
                    content: "Body".to_string(),
                    cover_upload_id: None,
                    status: None,
                },
            )
            .await
            .unwrap();

        let err = f
            .blog
            .toggle_like(ContentKind::Post, &draft.id, &author.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_post_removes_likes() {
        let f = fixture().await;
        let author = f.member("author@fpa.test").await;
        let post = f.published(&author, "Short Lived").await;
        f.blog
            .toggle_like(ContentKind::Post, &post.id, &author.id)
            .await
            .unwrap();

        f.blog.delete_post(&post.id, &author).await.unwrap();

        let likes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_like")
            .fetch_one(&f.blog.db)
            .await
            .unwrap();
        assert_eq!(likes, 0);
    }
}
