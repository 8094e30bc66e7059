pub mod classify;
pub mod config;
pub mod dry_run;
pub mod error;
pub mod http;
pub mod models;

pub use classify::{BalanceFailurePredicate, FailureClass, FailureClassifier, payment_required};
pub use config::GatewayConfig;
pub use dry_run::DryRunGateway;
pub use error::GatewayError;
pub use models::{Balance, SendReceipt, SmsGateway, init_gateway};
