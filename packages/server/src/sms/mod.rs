//! Outbound SMS pipeline: eligibility scanning, queueing, sending and recovery.

pub mod balance;
pub mod enqueue;
pub mod processor;
pub mod retry_gate;
pub mod scanners;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod stuck;
pub mod templates;

use gateway::GatewayError;
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

pub use balance::{BalanceMonitor, BalanceStatus};
pub use enqueue::{EnqueueReport, enqueue_eligible_notifications, enqueue_enrolment};
pub use processor::{ProcessReport, QueueProcessor};
pub use retry_gate::{RetryOutcome, RetryRejection, retry_message};
pub use service::{DismissResult, FailureStats, InsertOutcome, SmsService, sms_service};
pub use state::SmsState;

#[derive(Debug, Error)]
pub enum SmsError {
    #[error("Database error: {0}")]
    Db(#[from] DbErr),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A stored row violates the message invariants.
    #[error("Message {id} is in an inconsistent state: {reason}")]
    CorruptState { id: Uuid, reason: &'static str },
}
