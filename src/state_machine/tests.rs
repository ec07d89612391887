//! Tests for the session state machine.

use super::*;

fn machine() -> (SessionStateMachine, watch::Receiver<SessionSnapshot>) {
    SessionStateMachine::new()
}

fn started() -> (SessionStateMachine, watch::Receiver<SessionSnapshot>) {
    let (mut m, rx) = machine();
    m.apply(SessionCommand::StartTracking {
        session_id: "session-1".to_string(),
    })
    .expect("start should succeed");
    (m, rx)
}

#[test]
fn test_start_tracking_from_idle() {
    let (mut m, rx) = machine();
    assert_eq!(m.status(), MachineStatus::Idle);

    let events = m
        .apply(SessionCommand::StartTracking {
            session_id: "session-1".to_string(),
        })
        .expect("start should succeed");

    assert_eq!(
        events,
        vec![SessionEvent::StatusChanged {
            from: MachineStatus::Idle,
            to: MachineStatus::Active,
        }]
    );
    assert_eq!(m.status(), MachineStatus::Active);
    assert_eq!(m.session_id().map(String::as_str), Some("session-1"));

    let snapshot = rx.borrow();
    assert_eq!(snapshot.status, MachineStatus::Active);
    assert!(snapshot.is_tracking());
}

#[test]
fn test_start_tracking_twice_is_rejected() {
    let (mut m, _rx) = started();
    let err = m
        .apply(SessionCommand::StartTracking {
            session_id: "session-2".to_string(),
        })
        .expect_err("double start must fail");
    assert!(err.to_string().contains("Cannot start tracking"));
    // The original session is untouched.
    assert_eq!(m.session_id().map(String::as_str), Some("session-1"));
}

#[test]
fn test_connection_lost_and_restore() {
    let (mut m, _rx) = started();

    m.apply(SessionCommand::MarkConnectionLost)
        .expect("mark lost");
    assert_eq!(m.status(), MachineStatus::ConnectionLost);

    let events = m
        .apply(SessionCommand::RestoreConnection)
        .expect("restore");
    assert_eq!(
        events,
        vec![SessionEvent::StatusChanged {
            from: MachineStatus::ConnectionLost,
            to: MachineStatus::Active,
        }]
    );
}

#[test]
fn test_unload_does_not_overwrite_panic() {
    let (mut m, _rx) = started();
    m.apply(SessionCommand::TriggerSilentPanic {
        source: PanicSource::WellbeingDenied,
    })
    .expect("panic");

    let err = m
        .apply(SessionCommand::MarkConnectionLost)
        .expect_err("panic status must survive an unload");
    assert!(err.to_string().contains("Cannot mark connection lost"));
    assert_eq!(m.status(), MachineStatus::PanicTriggered);
}

#[test]
fn test_silent_panic_sets_flag_and_hides_from_display() {
    let (mut m, rx) = started();

    let events = m
        .apply(SessionCommand::TriggerSilentPanic {
            source: PanicSource::WellbeingDenied,
        })
        .expect("panic should engage");

    assert!(events.contains(&SessionEvent::SilentPanicEngaged {
        source: PanicSource::WellbeingDenied,
    }));
    assert!(m.silent_mode());

    // The shared state knows; the user's screen must not.
    let snapshot = rx.borrow();
    assert_eq!(snapshot.status, MachineStatus::PanicTriggered);
    assert_eq!(snapshot.display_status(), MachineStatus::Active);
    assert!(!snapshot.allows_wellbeing_prompt());
}

#[test]
fn test_cancel_panic_returns_to_active() {
    let (mut m, rx) = started();
    m.apply(SessionCommand::TriggerSilentPanic {
        source: PanicSource::HostRequest,
    })
    .expect("panic");

    let events = m.apply(SessionCommand::CancelPanic).expect("cancel panic");
    assert!(events.contains(&SessionEvent::PanicCleared));
    assert_eq!(m.status(), MachineStatus::Active);
    assert!(!m.silent_mode());
    assert!(rx.borrow().allows_wellbeing_prompt());
}

#[test]
fn test_cancel_tracking_is_terminal_but_allows_new_session() {
    let (mut m, rx) = started();

    let events = m.apply(SessionCommand::CancelTracking).expect("cancel");
    assert!(events.contains(&SessionEvent::SessionEnded {
        session_id: "session-1".to_string(),
    }));
    assert_eq!(m.status(), MachineStatus::Cancelled);
    assert!(m.session_id().is_none());
    assert!(!rx.borrow().is_tracking());

    // Nothing but a fresh start or resume is valid from here.
    assert!(m.apply(SessionCommand::CancelPanic).is_err());
    assert!(m.apply(SessionCommand::RestoreConnection).is_err());
    m.apply(SessionCommand::StartTracking {
        session_id: "session-2".to_string(),
    })
    .expect("new session after cancel");
    assert_eq!(m.status(), MachineStatus::Active);
}

#[test]
fn test_resume_connection_lost_session() {
    let (mut m, _rx) = machine();
    let events = m
        .apply(SessionCommand::ResumeSession {
            session_id: "stored-1".to_string(),
            status: crate::session::SessionStatus::ConnectionLost,
            silent_mode: false,
        })
        .expect("resume");

    assert!(events.contains(&SessionEvent::SessionResumed {
        session_id: "stored-1".to_string(),
    }));
    assert_eq!(m.status(), MachineStatus::ConnectionLost);

    m.apply(SessionCommand::RestoreConnection)
        .expect("restore after resume");
    assert_eq!(m.status(), MachineStatus::Active);
}

#[test]
fn test_resume_panic_session_keeps_silence() {
    let (mut m, rx) = machine();
    m.apply(SessionCommand::ResumeSession {
        session_id: "stored-1".to_string(),
        status: crate::session::SessionStatus::PanicTriggeredByUser,
        silent_mode: true,
    })
    .expect("resume");

    assert_eq!(m.status(), MachineStatus::PanicTriggered);
    assert_eq!(rx.borrow().display_status(), MachineStatus::Active);
}

#[test]
fn test_resume_cancelled_session_is_rejected() {
    let (mut m, _rx) = machine();
    let err = m
        .apply(SessionCommand::ResumeSession {
            session_id: "stored-1".to_string(),
            status: crate::session::SessionStatus::Cancelled,
            silent_mode: false,
        })
        .expect_err("cancelled sessions never resume");
    assert!(err.to_string().contains("cancelled"));
    assert_eq!(m.status(), MachineStatus::Idle);
}
