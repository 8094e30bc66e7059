use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;

/// Backoff settings for transient send failures.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Total send attempts before a message is marked failed. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry. Default: 60.
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    /// Upper bound for any single delay. Default: 3600.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_secs() -> u64 {
    60
}
fn default_max_delay_secs() -> u64 {
    3600
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

/// Business rules applied when an administrator resends a failed message.
#[derive(Debug, Deserialize, Clone)]
pub struct ManualRetryConfig {
    /// Pickup must start at least this far in the future. Default: 60.
    #[serde(default = "default_min_lead_minutes")]
    pub min_lead_minutes: i64,
    /// Minimum gap between two messages for the same parcel. Default: 5.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
}

fn default_min_lead_minutes() -> i64 {
    60
}
fn default_cooldown_minutes() -> i64 {
    5
}

impl Default for ManualRetryConfig {
    fn default() -> Self {
        Self {
            min_lead_minutes: default_min_lead_minutes(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

/// Periodic in-process trigger for enqueue + send.
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Default: false (an external cron calls the job endpoints instead).
    #[serde(default)]
    pub enabled: bool,
    /// Default: 60.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval_secs(),
        }
    }
}

/// SMS pipeline configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct SmsConfig {
    /// Master switch for the queue processor. Default: true.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Messages claimed per processor run. Default: 50.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// How far ahead of pickup reminders are queued. Default: 48.
    #[serde(default = "default_reminder_lead_hours")]
    pub reminder_lead_hours: i64,
    /// Quiet period after the last terminal parcel before the "ended" message. Default: 48.
    #[serde(default = "default_ended_after_hours")]
    pub ended_after_hours: i64,
    /// A `sending` claim older than this is considered abandoned. Default: 10.
    #[serde(default = "default_stale_claim_minutes")]
    pub stale_claim_minutes: i64,
    /// Offset of local time from UTC, used for rendering and "start of today". Default: 60.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub manual_retry: ManualRetryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_enabled() -> bool {
    true
}
fn default_batch_size() -> u64 {
    50
}
fn default_reminder_lead_hours() -> i64 {
    48
}
fn default_ended_after_hours() -> i64 {
    48
}
fn default_stale_claim_minutes() -> i64 {
    10
}
fn default_utc_offset_minutes() -> i32 {
    60
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            batch_size: default_batch_size(),
            reminder_lead_hours: default_reminder_lead_hours(),
            ended_after_hours: default_ended_after_hours(),
            stale_claim_minutes: default_stale_claim_minutes(),
            utc_offset_minutes: default_utc_offset_minutes(),
            retry: RetryConfig::default(),
            manual_retry: ManualRetryConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl SmsConfig {
    /// Local offset used when rendering times and computing "today".
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}
