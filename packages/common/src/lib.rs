pub mod config;
pub mod idempotency;
pub mod intent;
pub mod manual_retry;
pub mod redact;
pub mod retry;
pub mod sms_status;

pub use config::{ManualRetryConfig, RetryConfig, SchedulerConfig, SmsConfig};
pub use idempotency::IdempotencyKey;
pub use intent::SmsIntent;
pub use manual_retry::RetryRejectionCode;
pub use retry::{RetryDecision, RetryPolicy};
pub use sms_status::SmsStatus;
