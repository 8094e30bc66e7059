use std::time::Duration;

use serde::Deserialize;

/// SMS provider configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// When false, messages are logged instead of sent. Default: false.
    #[serde(default)]
    pub enabled: bool,
    /// Provider API root. Default: "https://api.hellosms.se/api/v1".
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Sender name shown on the handset. Default: "Parcels".
    #[serde(default = "default_sender")]
    pub sender: String,
    /// Per-request timeout. Default: 10.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Ask the provider to validate but not deliver. Default: false.
    #[serde(default)]
    pub test_mode: bool,
}

fn default_base_url() -> String {
    "https://api.hellosms.se/api/v1".into()
}
fn default_sender() -> String {
    "Parcels".into()
}
fn default_timeout_secs() -> u64 {
    10
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_base_url(),
            username: String::new(),
            password: String::new(),
            sender: default_sender(),
            timeout_secs: default_timeout_secs(),
            test_mode: false,
        }
    }
}
