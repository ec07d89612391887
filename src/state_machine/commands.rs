//! Commands that can mutate session lifecycle state.
//!
//! All state changes MUST go through the state machine's `apply()` method.
//! This is the only way to mutate state, ensuring a single source of truth.

use crate::session::{SessionId, SessionStatus};

/// What set a silent panic off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicSource {
    /// The wellbeing prompt was answered negatively.
    WellbeingDenied,
    /// The host surfaced an explicit panic control.
    HostRequest,
}

/// Commands that can mutate session lifecycle state.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Start tracking: a session record was created with a successful
    /// initial fix. Valid from idle only.
    StartTracking { session_id: SessionId },
    /// The runtime is about to unload mid-session (fail-safe path).
    MarkConnectionLost,
    /// Rehydrate from a stored unfinished session after reload.
    ResumeSession {
        session_id: SessionId,
        status: SessionStatus,
        silent_mode: bool,
    },
    /// A resumed `connection_lost` session is reporting again.
    RestoreConnection,
    /// Engage the discreet panic: shared state changes, the local screen
    /// must not.
    TriggerSilentPanic { source: PanicSource },
    /// The user explicitly cancelled the alert; tracking continues.
    CancelPanic,
    /// The user ended tracking voluntarily. Terminal for the session.
    CancelTracking,
}
