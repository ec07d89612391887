//! Shared data model for tracking sessions.
//!
//! These types mirror the schema of the realtime store tree that the remote
//! observer reads: field names serialize as camelCase and statuses as
//! lowercase snake strings, so a record written by this crate is readable by
//! any observer page already consuming the tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque session identifier (store-generated key).
pub type SessionId = String;

/// Lifecycle status of a session as stored in the shared tree.
///
/// Mutated only by the state machine; see `state_machine` for the allowed
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Tracking in progress, device reporting normally.
    Active,
    /// The device unloaded while tracking; recoverable on resume.
    ConnectionLost,
    /// The user signalled danger; the shared record carries the alert while
    /// the user's own screen stays unchanged.
    PanicTriggeredByUser,
    /// The user ended tracking voluntarily. Terminal.
    Cancelled,
}

impl SessionStatus {
    /// A session in one of these statuses is picked up by the resume query.
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Active | Self::ConnectionLost)
    }
}

/// A single geolocation sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported accuracy radius in meters.
    pub accuracy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Resolution state of an observer check request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Written by the user; awaiting the observer.
    Pending,
    /// Observer confirmed everything looks fine.
    Ok,
    /// Observer flagged possible danger.
    Danger,
}

/// Single-slot mailbox for asking the observer "are you watching / am I ok?".
///
/// Created by the user with [`CheckStatus::Pending`], resolved by the
/// observer, deleted by the user after consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub timestamp: DateTime<Utc>,
    pub status: CheckStatus,
}

impl CheckRequest {
    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            status: CheckStatus::Pending,
        }
    }
}

/// A tracking session record, keyed by [`SessionId`] in the store.
///
/// `path` is append-only and never reordered; everything else mutates via
/// [`SessionPatch`] so sibling fields are never clobbered. Records are
/// status-terminated, never deleted, preserving an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Owning user. Immutable after creation.
    pub user_id: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_timestamp: Option<DateTime<Utc>>,
    pub initial_location: LocationFix,
    /// Most recent accepted fix, overwritten in place.
    pub live_location: LocationFix,
    /// Historical accepted fixes in chronological order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<LocationFix>,
    /// Liveness timestamp; staleness signals connection loss to the observer.
    pub heartbeat: DateTime<Utc>,
    /// Set once an implausible-speed fix is observed; never cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_detected: Option<bool>,
    /// True while a panic is active but the user's screen must stay normal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silent_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_request: Option<CheckRequest>,
    /// Timestamp of the most recent affirmative wellbeing answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_safety_confirmation: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Builds the record written at session start: initial and live location
    /// are the same fix and the heartbeat is primed.
    pub fn open(user_id: impl Into<String>, initial: LocationFix, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            status: SessionStatus::Active,
            start_time: now,
            end_time: None,
            last_event_timestamp: None,
            live_location: initial.clone(),
            initial_location: initial,
            path: Vec::new(),
            heartbeat: now,
            anomaly_detected: None,
            silent_mode: None,
            check_request: None,
            user_safety_confirmation: None,
        }
    }

    /// Location to rehydrate from on resume: the live fix, falling back to
    /// the initial one.
    pub fn last_known_location(&self) -> &LocationFix {
        &self.live_location
    }
}

/// Partial update for a session record.
///
/// Every field is optional; appliers must leave absent fields untouched
/// (the store contract forbids clobbering siblings). `user_id`, `start_time`,
/// `initial_location` and `path` are deliberately not representable here:
/// the first three are immutable and `path` only grows through the dedicated
/// append operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_location: Option<LocationFix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_detected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silent_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_safety_confirmation: Option<DateTime<Utc>>,
}

impl SessionPatch {
    /// Applies the set fields onto a record, leaving the rest untouched.
    pub fn apply_to(&self, record: &mut SessionRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(fix) = &self.live_location {
            record.live_location = fix.clone();
        }
        if let Some(ts) = self.heartbeat {
            record.heartbeat = ts;
        }
        if let Some(ts) = self.last_event_timestamp {
            record.last_event_timestamp = Some(ts);
        }
        if let Some(ts) = self.end_time {
            record.end_time = Some(ts);
        }
        if let Some(flag) = self.anomaly_detected {
            record.anomaly_detected = Some(flag);
        }
        if let Some(flag) = self.silent_mode {
            record.silent_mode = Some(flag);
        }
        if let Some(ts) = self.user_safety_confirmation {
            record.user_safety_confirmation = Some(ts);
        }
    }
}
