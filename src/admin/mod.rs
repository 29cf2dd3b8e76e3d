/// Admin and Moderation System
///
/// Handles member roles, content reports, the activity log and dashboard
/// statistics.

pub mod activity;
pub mod reports;
pub mod roles;
pub mod stats;

pub use activity::{ActivityAction, ActivityEntry, ActivityFilter, ActivityLogger, ActivityRecord};
pub use reports::{Report, ReportAction, ReportManager, ReportReason, ReportStatus};
pub use roles::Role;
pub use stats::{dashboard_stats, DashboardStats};
