//! Events emitted by the state machine after processing commands.
//!
//! These are for logging and side-effect dispatch only - not for UI state.
//! The UI gets updates via the watch channel's SessionSnapshot.

use super::commands::PanicSource;
use super::MachineStatus;
use serde::Serialize;

/// Events emitted by the state machine after processing commands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Lifecycle status changed.
    StatusChanged {
        from: MachineStatus,
        to: MachineStatus,
    },
    /// A discreet panic engaged; observable only in the shared store.
    SilentPanicEngaged { source: PanicSource },
    /// The user cancelled an active panic.
    PanicCleared,
    /// An unfinished session was rehydrated after a reload.
    SessionResumed { session_id: String },
    /// Tracking ended voluntarily.
    SessionEnded { session_id: String },
}
