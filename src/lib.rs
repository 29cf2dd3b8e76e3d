/// FPA Portal
///
/// Membership, conference registration and community blog service for the
/// Fiji Principals Association.

pub mod account;
pub mod admin;
pub mod api;
pub mod auth;
pub mod blog;
pub mod conference;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod mailer;
pub mod rate_limit;
pub mod registration;
pub mod server;
pub mod slug;
pub mod upload_store;

pub use config::ServerConfig;
pub use context::AppContext;
pub use error::{PortalError, PortalResult};
