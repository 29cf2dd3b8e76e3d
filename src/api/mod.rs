/// API routes and handlers
pub mod admin;
pub mod auth;
pub mod blog;
pub mod conferences;
pub mod middleware;
pub mod profile;
pub mod registrations;
pub mod uploads;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes(upload_limit: usize) -> Router<AppContext> {
    Router::new()
        .merge(auth::routes())
        .merge(profile::routes())
        .merge(conferences::routes())
        .merge(registrations::routes())
        .merge(blog::routes())
        .merge(uploads::routes(upload_limit))
        .merge(admin::routes())
}
