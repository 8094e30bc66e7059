use std::fmt;
use std::sync::Arc;

use crate::error::GatewayError;

/// How a failed send is handled by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The account is out of credit. Fail immediately and pause the batch.
    Balance,
    /// The provider refused this particular message. Fail immediately.
    Permanent,
    /// Worth another attempt later.
    Transient,
}

/// Decides whether a gateway error means "out of credit".
pub type BalanceFailurePredicate = Arc<dyn Fn(&GatewayError) -> bool + Send + Sync>;

/// HTTP 402 Payment Required.
pub fn payment_required() -> BalanceFailurePredicate {
    Arc::new(|err: &GatewayError| err.http_status() == Some(402))
}

/// Maps gateway errors onto [`FailureClass`].
#[derive(Clone)]
pub struct FailureClassifier {
    is_balance_failure: BalanceFailurePredicate,
}

impl FailureClassifier {
    pub fn new(is_balance_failure: BalanceFailurePredicate) -> Self {
        Self { is_balance_failure }
    }

    pub fn classify(&self, err: &GatewayError) -> FailureClass {
        if (self.is_balance_failure)(err) {
            return FailureClass::Balance;
        }

        match err {
            GatewayError::Network(_) | GatewayError::Timeout(_) => FailureClass::Transient,
            GatewayError::Rejected { status, .. } => match status {
                408 | 425 | 429 => FailureClass::Transient,
                500..=599 => FailureClass::Transient,
                _ => FailureClass::Permanent,
            },
            // The provider may already have accepted the message; never resend blindly.
            GatewayError::InvalidResponse(_) => FailureClass::Permanent,
            GatewayError::Config(_) => FailureClass::Permanent,
        }
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new(payment_required())
    }
}

impl fmt::Debug for FailureClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureClassifier").finish_non_exhaustive()
    }
}
