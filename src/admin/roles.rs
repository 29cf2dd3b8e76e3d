/// Member roles
use crate::error::{PortalError, PortalResult};
use serde::{Deserialize, Serialize};

/// Role levels, ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular association member
    Member,
    /// Can review reports and moderate blog content
    Moderator,
    /// Full access to conferences, registrations and users
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> PortalResult<Self> {
        match s.to_lowercase().as_str() {
            "member" => Ok(Role::Member),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            _ => Err(PortalError::Validation(format!("Invalid role: {}", s))),
        }
    }

    /// Check if this role can perform actions requiring another role
    pub fn can_act_as(&self, required: Role) -> bool {
        self >= &required
    }
}

impl TryFrom<String> for Role {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Role::from_str(&value)
    }
}
