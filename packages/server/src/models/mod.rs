pub mod shared;
pub mod sms;
