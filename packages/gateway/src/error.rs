use std::time::Duration;

use thiserror::Error;

/// A failed call to the SMS provider.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The provider answered with a non-2xx status.
    #[error("Provider rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Connection refused, DNS failure, reset, ...
    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider did not answer within {0:?}")]
    Timeout(Duration),

    /// A 2xx response whose body could not be understood.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Gateway misconfigured: {0}")]
    Config(String),
}

impl GatewayError {
    /// HTTP status reported by the provider, if the request got that far.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout(Duration::ZERO)
        } else if e.is_decode() {
            GatewayError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            GatewayError::Rejected {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}
