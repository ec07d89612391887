//! Centralized state machine for the session lifecycle.
//!
//! This module provides the ONLY place where lifecycle transitions happen.
//! The state machine owns the lifecycle state, validates commands, emits
//! events, and broadcasts snapshots to subscribers via a watch channel.
//! Store writes and task management stay outside, in the tracker, driven by
//! the emitted events.

mod commands;
mod events;
mod snapshot;

#[cfg(test)]
mod tests;

pub use commands::{PanicSource, SessionCommand};
pub use events::SessionEvent;
pub use snapshot::SessionSnapshot;

use crate::session::{SessionId, SessionStatus};
use anyhow::{bail, Result};
use serde::Serialize;
use tokio::sync::watch;

/// Lifecycle states of the local machine. `Idle` and `Cancelled` exist only
/// locally; the other three map onto the stored [`SessionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    /// No session.
    Idle,
    Active,
    ConnectionLost,
    PanicTriggered,
    /// Previous session ended; a new one may start.
    Cancelled,
}

impl MachineStatus {
    /// The stored status this machine state corresponds to, if any.
    pub fn stored(self) -> Option<SessionStatus> {
        match self {
            Self::Idle => None,
            Self::Active => Some(SessionStatus::Active),
            Self::ConnectionLost => Some(SessionStatus::ConnectionLost),
            Self::PanicTriggered => Some(SessionStatus::PanicTriggeredByUser),
            Self::Cancelled => Some(SessionStatus::Cancelled),
        }
    }

    fn from_stored(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Active => Self::Active,
            SessionStatus::ConnectionLost => Self::ConnectionLost,
            SessionStatus::PanicTriggeredByUser => Self::PanicTriggered,
            SessionStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// The ONLY place lifecycle transitions happen.
/// Owns the state, validates commands, emits events, broadcasts snapshots.
pub struct SessionStateMachine {
    session_id: Option<SessionId>,
    status: MachineStatus,
    silent_mode: bool,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    seq: u64,
}

impl SessionStateMachine {
    /// Creates an idle machine and a watch receiver for snapshots. The host
    /// UI and the wellbeing cycle poll the receiver for updates.
    pub fn new() -> (Self, watch::Receiver<SessionSnapshot>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::idle());
        let machine = Self {
            session_id: None,
            status: MachineStatus::Idle,
            silent_mode: false,
            snapshot_tx,
            seq: 0,
        };
        (machine, snapshot_rx)
    }

    pub fn status(&self) -> MachineStatus {
        self.status
    }

    pub fn silent_mode(&self) -> bool {
        self.silent_mode
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            status: self.status,
            silent_mode: self.silent_mode,
        }
    }

    /// All mutations go through this single method.
    /// Returns events for the caller to act on; broadcasts the snapshot
    /// automatically.
    pub fn apply(&mut self, command: SessionCommand) -> Result<Vec<SessionEvent>> {
        self.seq += 1;
        tracing::debug!(seq = self.seq, ?command, "applying session command");

        let events = self.apply_internal(command)?;

        for event in &events {
            tracing::debug!(seq = self.seq, ?event, "session event");
        }
        self.snapshot_tx.send_replace(self.snapshot());

        Ok(events)
    }

    fn apply_internal(&mut self, command: SessionCommand) -> Result<Vec<SessionEvent>> {
        use MachineStatus::*;
        use SessionCommand::*;
        use SessionEvent::*;

        match command {
            StartTracking { session_id } => {
                if !matches!(self.status, Idle | Cancelled) {
                    bail!("Cannot start tracking while status is {:?}", self.status);
                }
                let from = self.status;
                self.session_id = Some(session_id);
                self.status = Active;
                self.silent_mode = false;
                Ok(vec![StatusChanged { from, to: Active }])
            }

            MarkConnectionLost => {
                // Only the plain-active path marks the link down: a panic
                // status must survive an unload, not be overwritten by it.
                if self.status != Active {
                    bail!(
                        "Cannot mark connection lost while status is {:?}",
                        self.status
                    );
                }
                self.status = ConnectionLost;
                Ok(vec![StatusChanged {
                    from: Active,
                    to: ConnectionLost,
                }])
            }

            ResumeSession {
                session_id,
                status,
                silent_mode,
            } => {
                if !matches!(self.status, Idle | Cancelled) {
                    bail!("Cannot resume while status is {:?}", self.status);
                }
                if status == SessionStatus::Cancelled {
                    bail!("Cannot resume a cancelled session");
                }
                let from = self.status;
                let to = MachineStatus::from_stored(status);
                self.session_id = Some(session_id.clone());
                self.status = to;
                self.silent_mode = silent_mode;
                Ok(vec![
                    SessionResumed { session_id },
                    StatusChanged { from, to },
                ])
            }

            RestoreConnection => {
                if self.status != ConnectionLost {
                    bail!(
                        "Cannot restore connection while status is {:?}",
                        self.status
                    );
                }
                self.status = Active;
                Ok(vec![StatusChanged {
                    from: ConnectionLost,
                    to: Active,
                }])
            }

            TriggerSilentPanic { source } => {
                if !matches!(self.status, Active | ConnectionLost) {
                    bail!("Cannot trigger panic while status is {:?}", self.status);
                }
                let from = self.status;
                self.status = PanicTriggered;
                self.silent_mode = true;
                Ok(vec![
                    StatusChanged {
                        from,
                        to: PanicTriggered,
                    },
                    SilentPanicEngaged { source },
                ])
            }

            CancelPanic => {
                if self.status != PanicTriggered {
                    bail!("Cannot cancel panic while status is {:?}", self.status);
                }
                self.status = Active;
                self.silent_mode = false;
                Ok(vec![
                    StatusChanged {
                        from: PanicTriggered,
                        to: Active,
                    },
                    PanicCleared,
                ])
            }

            CancelTracking => {
                if !matches!(self.status, Active | ConnectionLost | PanicTriggered) {
                    bail!("Cannot cancel tracking while status is {:?}", self.status);
                }
                let from = self.status;
                let session_id = self
                    .session_id
                    .take()
                    .unwrap_or_default();
                self.status = Cancelled;
                self.silent_mode = false;
                Ok(vec![
                    StatusChanged {
                        from,
                        to: Cancelled,
                    },
                    SessionEnded { session_id },
                ])
            }
        }
    }
}
