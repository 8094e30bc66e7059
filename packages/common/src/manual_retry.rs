use serde::{Deserialize, Serialize};

/// Why an administrator's resend request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryRejectionCode {
    /// No message with that id.
    NotFound,
    /// The message exists but cannot be resent (wrong intent, no parcel, not failed, dismissed).
    InvalidAction,
    /// The pickup starts too soon for a resend to be useful.
    TooLate,
    /// Another message for the same parcel was created moments ago.
    CooldownActive,
}

impl RetryRejectionCode {
    /// Returns the string representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::InvalidAction => "INVALID_ACTION",
            Self::TooLate => "TOO_LATE",
            Self::CooldownActive => "COOLDOWN_ACTIVE",
        }
    }
}

impl std::fmt::Display for RetryRejectionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
