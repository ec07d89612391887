//! Read-only snapshot of session state for host display.
//!
//! The host NEVER mutates this; it receives new snapshots via watch channel.
//! Rendering MUST go through [`SessionSnapshot::display_status`]: that is
//! where the silent-panic contract lives.

use super::MachineStatus;
use crate::session::SessionId;
use serde::Serialize;

/// Read-only view of the machine for the host UI and background tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<SessionId>,
    pub status: MachineStatus,
    pub silent_mode: bool,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            session_id: None,
            status: MachineStatus::Idle,
            silent_mode: false,
        }
    }

    /// Status the user's own screen is allowed to see. While a silent panic
    /// is active the display keeps reporting `Active`; the real status is
    /// visible only through the shared store.
    pub fn display_status(&self) -> MachineStatus {
        if self.status == MachineStatus::PanicTriggered && self.silent_mode {
            MachineStatus::Active
        } else {
            self.status
        }
    }

    /// Whether a session is underway (sampling should be running).
    pub fn is_tracking(&self) -> bool {
        matches!(
            self.status,
            MachineStatus::Active | MachineStatus::ConnectionLost | MachineStatus::PanicTriggered
        )
    }

    /// Whether the wellbeing cycle may show its prompt right now.
    pub fn allows_wellbeing_prompt(&self) -> bool {
        self.status == MachineStatus::Active || self.status == MachineStatus::ConnectionLost
    }
}
