//! Tracker configuration.
//!
//! All tunables default to the values the protocol was designed around; a
//! host may override them from a JSON file or by building the struct
//! directly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Pre-authorized phone destination for the best-effort relay.
///
/// The relay requires recipient-side opt-in; only a phone number the user
/// has registered an API key for can be messaged. Contacts whose digits match
/// `local_digits` are dispatched to `international` with `api_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedPhone {
    /// Digits of the contact entry as stored locally (country code optional).
    pub local_digits: String,
    /// Full international number the relay expects.
    pub international: String,
    /// Relay API key obtained by the recipient.
    pub api_key: String,
}

/// Configuration for the session tracker and its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum seconds between durable fix writes (time half of the throttle).
    pub min_write_interval_secs: u64,
    /// Minimum movement in meters that forces a write despite the interval.
    pub min_write_distance_m: f64,
    /// Implied speed above which a fix is flagged as implausible (m/s).
    pub anomaly_speed_mps: f64,
    /// How long the wellbeing prompt stays visible per cycle.
    pub check_visible_secs: u64,
    /// How long the prompt stays hidden between cycles.
    pub check_hidden_secs: u64,
    /// Timeout for the one-shot fix at session start.
    pub initial_fix_timeout_secs: u64,
    /// Timeout for fixes on the continuous watch.
    pub watch_fix_timeout_secs: u64,
    /// Base URL the observer link is built from.
    pub tracking_link_base: String,
    /// Base URL of the best-effort relay.
    pub relay_base_url: String,
    /// Optional pre-authorized phone destination; without it, phone contacts
    /// are skipped.
    pub authorized_phone: Option<AuthorizedPhone>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_write_interval_secs: 10,
            min_write_distance_m: 20.0,
            anomaly_speed_mps: 50.0,
            check_visible_secs: 15,
            check_hidden_secs: 15,
            initial_fix_timeout_secs: 10,
            watch_fix_timeout_secs: 20,
            tracking_link_base: "https://safewalk.example".to_string(),
            relay_base_url: "https://api.callmebot.com".to_string(),
            authorized_phone: None,
        }
    }
}

impl TrackerConfig {
    /// Loads configuration from a JSON file; absent fields keep defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn min_write_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_write_interval_secs as i64)
    }

    pub fn check_visible(&self) -> Duration {
        Duration::from_secs(self.check_visible_secs)
    }

    pub fn check_hidden(&self) -> Duration {
        Duration::from_secs(self.check_hidden_secs)
    }

    pub fn initial_fix_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_fix_timeout_secs)
    }

    pub fn watch_fix_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_fix_timeout_secs)
    }
}
