/// Conference registrations
///
/// A registration moves through two independent lifecycles: the attendance
/// status decided by admins, and the payment status driven by proof uploads
/// and admin confirmation.

mod manager;

pub use manager::{RegistrationFilter, RegistrationManager, StatusChange};

use crate::error::{PortalError, PortalResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Attendance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Waitlisted,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Approved => "approved",
            RegistrationStatus::Rejected => "rejected",
            RegistrationStatus::Cancelled => "cancelled",
            RegistrationStatus::Waitlisted => "waitlisted",
        }
    }

    pub fn from_str(s: &str) -> PortalResult<Self> {
        match s {
            "pending" => Ok(RegistrationStatus::Pending),
            "approved" => Ok(RegistrationStatus::Approved),
            "rejected" => Ok(RegistrationStatus::Rejected),
            "cancelled" => Ok(RegistrationStatus::Cancelled),
            "waitlisted" => Ok(RegistrationStatus::Waitlisted),
            _ => Err(PortalError::Validation(format!(
                "Invalid registration status: {}",
                s
            ))),
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: RegistrationStatus) -> bool {
        use RegistrationStatus::*;
        matches!(
            (self, next),
            (Pending, Approved | Rejected | Cancelled)
                | (Waitlisted, Pending | Approved | Rejected | Cancelled)
                | (Approved, Cancelled)
        )
    }

    /// Statuses that hold a seat
    pub fn holds_seat(&self) -> bool {
        matches!(self, RegistrationStatus::Pending | RegistrationStatus::Approved)
    }

    /// Statuses that block a second registration for the same conference
    pub fn is_active(&self) -> bool {
        !matches!(self, RegistrationStatus::Rejected | RegistrationStatus::Cancelled)
    }
}

impl TryFrom<String> for RegistrationStatus {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RegistrationStatus::from_str(&value)
    }
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    PendingVerification,
    Paid,
    Refunded,
    Waived,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::PendingVerification => "pending_verification",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Waived => "waived",
        }
    }

    pub fn from_str(s: &str) -> PortalResult<Self> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "pending_verification" => Ok(PaymentStatus::PendingVerification),
            "paid" => Ok(PaymentStatus::Paid),
            "refunded" => Ok(PaymentStatus::Refunded),
            "waived" => Ok(PaymentStatus::Waived),
            _ => Err(PortalError::Validation(format!("Invalid payment status: {}", s))),
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Unpaid, PendingVerification | Paid | Waived)
                | (PendingVerification, Paid | Unpaid)
                | (Paid, Refunded)
        )
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PaymentStatus::from_str(&value)
    }
}

/// Registration record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: String,
    pub conference_id: String,
    pub user_id: String,
    #[sqlx(try_from = "String")]
    pub status: RegistrationStatus,
    #[sqlx(try_from = "String")]
    pub payment_status: PaymentStatus,
    pub amount_due_cents: i64,
    pub amount_paid_cents: i64,
    pub currency: String,
    pub payment_reference: Option<String>,
    pub payment_proof_upload_id: Option<String>,
    pub notes: Option<String>,
    pub admin_note: Option<String>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration joined with the member and conference it belongs to
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationDetail {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub registration: Registration,
    pub conference_title: String,
    pub conference_start_date: chrono::NaiveDate,
    pub member_name: String,
    pub member_email: String,
    pub member_school: Option<String>,
}

/// Member's registration request
#[derive(Debug, Clone, Default, Deserialize, validator::Validate)]
pub struct RegisterForConferenceRequest {
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Member's payment proof submission
#[derive(Debug, Clone, Deserialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProofRequest {
    pub upload_id: String,
    #[validate(length(max = 120))]
    pub reference: Option<String>,
}

/// Admin decision with an optional note
#[derive(Debug, Clone, Default, Deserialize, validator::Validate)]
pub struct DecisionRequest {
    #[validate(length(max = 2000))]
    pub note: Option<String>,
}

/// Admin payment confirmation
#[derive(Debug, Clone, Default, Deserialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    /// Defaults to the amount due
    #[validate(range(min = 0))]
    pub amount_cents: Option<i64>,
    #[validate(length(max = 120))]
    pub reference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUSES: [RegistrationStatus; 5] = [
        RegistrationStatus::Pending,
        RegistrationStatus::Approved,
        RegistrationStatus::Rejected,
        RegistrationStatus::Cancelled,
        RegistrationStatus::Waitlisted,
    ];

    #[test]
    fn test_status_transitions() {
        use RegistrationStatus::*;

        let allowed = [
            (Pending, Approved),
            (Pending, Rejected),
            (Pending, Cancelled),
            (Waitlisted, Pending),
            (Waitlisted, Approved),
            (Waitlisted, Rejected),
            (Waitlisted, Cancelled),
            (Approved, Cancelled),
        ];

        for from in STATUSES {
            for to in STATUSES {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from.as_str(),
                    to.as_str()
                );
            }
        }
    }

    #[test]
    fn test_terminal_statuses() {
        for to in STATUSES {
            assert!(!RegistrationStatus::Rejected.can_transition_to(to));
            assert!(!RegistrationStatus::Cancelled.can_transition_to(to));
        }
    }

    #[test]
    fn test_payment_transitions() {
        use PaymentStatus::*;

        assert!(Unpaid.can_transition_to(PendingVerification));
        assert!(Unpaid.can_transition_to(Paid));
        assert!(Unpaid.can_transition_to(Waived));
        assert!(PendingVerification.can_transition_to(Paid));
        assert!(PendingVerification.can_transition_to(Unpaid));
        assert!(Paid.can_transition_to(Refunded));

        assert!(!Paid.can_transition_to(Unpaid));
        assert!(!Refunded.can_transition_to(Paid));
        assert!(!Waived.can_transition_to(Paid));
        assert!(!Unpaid.can_transition_to(Refunded));
    }

    #[test]
    fn test_status_strings() {
        for status in STATUSES {
            assert_eq!(RegistrationStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert_eq!(
            PaymentStatus::from_str("pending_verification").unwrap(),
            PaymentStatus::PendingVerification
        );
        assert!(PaymentStatus::from_str("bogus").is_err());
    }
}
