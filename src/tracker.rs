//! Session orchestration: the explicit context object that owns the state
//! machine, the throttle gate, and every background task and listener.
//!
//! The store record is the single source of truth; everything held here
//! (session id, last fix, panic flag) is a cache that resume rehydrates
//! from the store rather than trusting across reloads. All teardown paths
//! unwind tasks manually and idempotently - there is no automatic
//! cancellation propagation to rely on.

use crate::config::TrackerConfig;
use crate::contacts::{ContactId, TrustedContact};
use crate::geo::{FixOptions, LocationProvider};
use crate::notifier::{AlertRelay, Notifier};
use crate::safety_cycle::SafetyCheckCycle;
use crate::session::{
    CheckRequest, CheckStatus, LocationFix, SessionPatch, SessionRecord, SessionStatus,
};
use crate::share::{self, SharePayload};
use crate::state_machine::{
    MachineStatus, PanicSource, SessionCommand, SessionSnapshot, SessionStateMachine,
};
use crate::store::SessionStore;
use crate::throttle::FixGate;
use crate::ui::UiSurface;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

struct TrackerInner {
    machine: SessionStateMachine,
    gate: FixGate,
    sampling_task: Option<JoinHandle<()>>,
    check_listener: Option<JoinHandle<()>>,
    contacts_listener: Option<JoinHandle<()>>,
    cycle: SafetyCheckCycle,
}

struct TrackerShared {
    config: TrackerConfig,
    store: Arc<dyn SessionStore>,
    locations: Arc<dyn LocationProvider>,
    notifier: Notifier,
    ui: Arc<dyn UiSurface>,
    user_id: String,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    inner: Mutex<TrackerInner>,
}

/// Coordinates one user's tracking sessions end to end.
///
/// Cheap to clone; background tasks hold clones and re-enter through the
/// single inner mutex, which keeps throttle and transition state strictly
/// sequential.
#[derive(Clone)]
pub struct SessionTracker {
    shared: Arc<TrackerShared>,
}

impl SessionTracker {
    pub fn new(
        config: TrackerConfig,
        store: Arc<dyn SessionStore>,
        locations: Arc<dyn LocationProvider>,
        relay: Arc<dyn AlertRelay>,
        ui: Arc<dyn UiSurface>,
        user_id: impl Into<String>,
    ) -> Self {
        let (machine, snapshot_rx) = SessionStateMachine::new();
        let notifier = Notifier::new(relay, config.authorized_phone.clone());
        let gate = FixGate::new(&config);
        let cycle = SafetyCheckCycle::new(&config);
        Self {
            shared: Arc::new(TrackerShared {
                config,
                store,
                locations,
                notifier,
                ui,
                user_id: user_id.into(),
                snapshot_rx,
                inner: Mutex::new(TrackerInner {
                    machine,
                    gate,
                    sampling_task: None,
                    check_listener: None,
                    contacts_listener: None,
                    cycle,
                }),
            }),
        }
    }

    /// Watch channel the host UI renders lifecycle state from. Rendering
    /// must use [`SessionSnapshot::display_status`]; that is what keeps a
    /// silent panic off the user's screen.
    pub fn snapshot_rx(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot_rx.clone()
    }

    /// Starts a tracking session: initial fix, session record, observer
    /// link, best-effort contact notification, location stream, wellbeing
    /// cycle. Returns the observer link.
    ///
    /// A failed initial fix aborts the whole operation: no record is
    /// created, the machine stays idle, and the error is surfaced for retry.
    pub async fn start_tracking(&self) -> Result<String> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner.machine.snapshot().is_tracking() {
            bail!("tracking already in progress");
        }

        let options = FixOptions::new(shared.config.initial_fix_timeout());
        let initial = match shared.locations.current_position(options).await {
            Ok(fix) => fix,
            Err(e) => {
                shared
                    .ui
                    .show_message(&format!("Could not get your initial location: {}", e), true);
                return Err(e).context("initial position fix failed");
            }
        };

        let now = Utc::now();
        let record = SessionRecord::open(shared.user_id.clone(), initial.clone(), now);
        let session_id = match shared.store.create_session(record).await {
            Ok(id) => id,
            Err(e) => {
                shared
                    .ui
                    .show_message("Could not create the tracking session.", true);
                return Err(e).context("session record creation failed");
            }
        };

        inner.machine.apply(SessionCommand::StartTracking {
            session_id: session_id.clone(),
        })?;
        inner.gate.rearm(now, Some(initial));

        let link = share::tracking_link(&shared.config.tracking_link_base, &session_id);
        shared.ui.show_link_modal(&link);
        shared.ui.set_tracking_active(true);
        shared
            .ui
            .set_status_text("Tracking active. Share the link manually if needed.");

        // Fire-and-forget notification round; only the aggregate surfaces.
        match shared.store.contacts_for_user(&shared.user_id).await {
            Ok(contacts) => {
                let message = SharePayload::for_tracking_link(&link).text;
                let summary = shared.notifier.notify_contacts(&contacts, &message).await;
                let all_failed = summary.attempted > 0 && summary.delivered == 0;
                shared.ui.show_message(&summary.describe(), all_failed);
            }
            Err(e) => {
                tracing::warn!("could not load contacts for notification: {:#}", e);
            }
        }

        if let Err(e) = self.attach_check_listener(&mut inner, &session_id).await {
            tracing::warn!("check-request listener attach failed: {:#}", e);
        }
        self.start_sampling(&mut inner);
        inner
            .cycle
            .start(shared.ui.clone(), shared.snapshot_rx.clone());

        tracing::info!(session = %session_id, "tracking session started");
        Ok(link)
    }

    /// Ends tracking voluntarily. Safe to call when nothing is running.
    pub async fn cancel_tracking(&self) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if !inner.machine.snapshot().is_tracking() {
            return Ok(());
        }

        Self::unwind_tasks(&mut inner);
        let session_id = inner.machine.session_id().cloned();
        inner.machine.apply(SessionCommand::CancelTracking)?;

        if let Some(session_id) = session_id {
            let patch = SessionPatch {
                status: Some(SessionStatus::Cancelled),
                end_time: Some(Utc::now()),
                ..SessionPatch::default()
            };
            match shared.store.patch_session(&session_id, patch).await {
                Ok(()) => shared.ui.show_message("Journey tracking ended.", false),
                Err(e) => {
                    tracing::warn!("failed to mark session cancelled: {:#}", e);
                    shared.ui.show_message(
                        "Tracking ended locally, but the shared session could not be updated; observers may still see it as active.",
                        true,
                    );
                }
            }
            tracing::info!(session = %session_id, "tracking session cancelled");
        }

        shared.ui.set_tracking_active(false);
        shared.ui.set_status_text("Tracking ended.");
        Ok(())
    }

    /// Fail-safe the host must invoke when the runtime is about to unload.
    /// Best effort: updates only `status`/`lastEventTimestamp` (never erases
    /// the record) and unwinds every task and listener. Idempotent.
    pub async fn on_teardown(&self) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;

        let sampling = inner.sampling_task.is_some();
        if sampling && inner.machine.status() == MachineStatus::Active {
            if let Some(session_id) = inner.machine.session_id().cloned() {
                if inner
                    .machine
                    .apply(SessionCommand::MarkConnectionLost)
                    .is_ok()
                {
                    let patch = SessionPatch {
                        status: Some(SessionStatus::ConnectionLost),
                        last_event_timestamp: Some(Utc::now()),
                        ..SessionPatch::default()
                    };
                    if let Err(e) = shared.store.patch_session(&session_id, patch).await {
                        tracing::warn!("connection-lost fail-safe write failed: {:#}", e);
                    }
                    tracing::warn!(session = %session_id, "runtime unloading; session marked connection_lost");
                }
            }
        }

        Self::unwind_tasks(&mut inner);
        if let Some(task) = inner.contacts_listener.take() {
            task.abort();
        }
    }

    /// Queries the store for this user's unfinished sessions and rehydrates
    /// the most recent one. Returns whether anything was resumed.
    ///
    /// Call after successful authentication, before starting anything new.
    pub async fn resume_active_session(&self) -> Result<bool> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner.machine.snapshot().is_tracking() {
            bail!("cannot resume while a session is in progress");
        }

        let sessions = match shared.store.sessions_for_user(&shared.user_id).await {
            Ok(sessions) => sessions,
            Err(e) => {
                shared
                    .ui
                    .show_message("Could not check for previous sessions.", true);
                return Err(e).context("resume query failed");
            }
        };

        let mut candidates: Vec<_> = sessions
            .into_iter()
            .filter(|(_, record)| record.status.is_resumable())
            .collect();
        if candidates.is_empty() {
            return Ok(false);
        }
        if candidates.len() > 1 {
            // Data-integrity anomaly: the protocol expects at most one.
            tracing::warn!(
                count = candidates.len(),
                "multiple unfinished sessions found; resuming the most recent"
            );
        }
        candidates.sort_by_key(|(_, record)| record.start_time);
        let Some((session_id, record)) = candidates.pop() else {
            return Ok(false);
        };

        let panic_active = record.status == SessionStatus::PanicTriggeredByUser;
        let silent_mode = record.silent_mode.unwrap_or(panic_active);
        inner.machine.apply(SessionCommand::ResumeSession {
            session_id: session_id.clone(),
            status: record.status,
            silent_mode,
        })?;

        let now = Utc::now();
        inner
            .gate
            .rearm(now, Some(record.last_known_location().clone()));

        shared.ui.set_tracking_active(true);
        shared.ui.set_status_text("Tracking (resumed) active.");

        if let Err(e) = self.attach_check_listener(&mut inner, &session_id).await {
            tracing::warn!("check-request listener attach failed: {:#}", e);
        }
        self.start_sampling(&mut inner);
        if !panic_active {
            inner
                .cycle
                .start(shared.ui.clone(), shared.snapshot_rx.clone());
        }

        if record.status == SessionStatus::ConnectionLost {
            inner.machine.apply(SessionCommand::RestoreConnection)?;
            let patch = SessionPatch {
                status: Some(SessionStatus::Active),
                last_event_timestamp: Some(now),
                ..SessionPatch::default()
            };
            if let Err(e) = shared.store.patch_session(&session_id, patch).await {
                tracing::warn!("failed to restore session to active: {:#}", e);
                shared
                    .ui
                    .show_message("Previous session could not be updated; state may be inconsistent.", true);
            }
        }

        tracing::info!(session = %session_id, "resumed unfinished session");
        Ok(true)
    }

    /// Asks the observer for an out-of-band confirmation. Single-slot: a
    /// new request overwrites any outstanding one.
    pub async fn request_observer_check(&self) -> Result<()> {
        let session_id = {
            let inner = self.shared.inner.lock().await;
            match inner.machine.session_id() {
                Some(id) => id.clone(),
                None => bail!("start tracking before requesting a check"),
            }
        };

        let request = CheckRequest::pending(Utc::now());
        match self
            .shared
            .store
            .write_check_request(&session_id, request)
            .await
        {
            Ok(()) => {
                self.shared
                    .ui
                    .show_message("Check sent to your contact. Awaiting their answer...", false);
                Ok(())
            }
            Err(e) => {
                self.shared
                    .ui
                    .show_message("Could not send the check to your contact.", true);
                Err(e).context("check request write failed")
            }
        }
    }

    /// Affirmative answer to the wellbeing prompt: dismisses it and records
    /// the confirmation in the shared record.
    pub async fn confirm_safety(&self) -> Result<()> {
        let session_id = {
            let inner = self.shared.inner.lock().await;
            inner.cycle.acknowledge();
            match inner.machine.session_id() {
                Some(id) => id.clone(),
                None => return Ok(()),
            }
        };

        let patch = SessionPatch {
            user_safety_confirmation: Some(Utc::now()),
            ..SessionPatch::default()
        };
        if let Err(e) = self.shared.store.patch_session(&session_id, patch).await {
            tracing::warn!("safety confirmation write failed: {:#}", e);
            self.shared.ui.show_message(
                "Your answer could not be saved; state may be inconsistent.",
                true,
            );
        }
        Ok(())
    }

    /// Negative answer to the wellbeing prompt: engages the discreet panic.
    pub async fn deny_safety(&self) -> Result<()> {
        self.trigger_panic(PanicSource::WellbeingDenied).await
    }

    /// Engages the silent panic: the shared record changes, the wellbeing
    /// cycle stops, and NOTHING is rendered locally. The screen keeps
    /// looking like normal tracking.
    pub async fn trigger_panic(&self, source: PanicSource) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        let session_id = match inner.machine.session_id() {
            Some(id) => id.clone(),
            None => bail!("no session to raise a panic for"),
        };

        inner
            .machine
            .apply(SessionCommand::TriggerSilentPanic { source })?;
        inner.cycle.stop();

        let patch = SessionPatch {
            status: Some(SessionStatus::PanicTriggeredByUser),
            silent_mode: Some(true),
            last_event_timestamp: Some(Utc::now()),
            ..SessionPatch::default()
        };
        if let Err(e) = shared.store.patch_session(&session_id, patch).await {
            // Even the failure stays off the screen; logging only.
            tracing::warn!("silent panic write failed: {:#}", e);
        }
        tracing::info!(session = %session_id, "silent panic engaged; local surface unchanged");
        Ok(())
    }

    /// The user explicitly stands down an active panic; tracking and the
    /// wellbeing cycle continue.
    pub async fn cancel_panic(&self) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        let session_id = match inner.machine.session_id() {
            Some(id) => id.clone(),
            None => bail!("no session to cancel a panic for"),
        };

        inner.machine.apply(SessionCommand::CancelPanic)?;

        let patch = SessionPatch {
            status: Some(SessionStatus::Active),
            silent_mode: Some(false),
            last_event_timestamp: Some(Utc::now()),
            ..SessionPatch::default()
        };
        match shared.store.patch_session(&session_id, patch).await {
            Ok(()) => {
                shared
                    .ui
                    .show_message("Alert cancelled. Tracking continues.", false);
                inner
                    .cycle
                    .start(shared.ui.clone(), shared.snapshot_rx.clone());
                Ok(())
            }
            Err(e) => {
                tracing::warn!("panic cancellation write failed: {:#}", e);
                shared.ui.show_message(
                    "Could not cancel the alert on the server; tracking may be inconsistent.",
                    true,
                );
                Err(e).context("panic cancellation write failed")
            }
        }
    }

    /// Share payload for the current session's observer link, if any.
    pub async fn share_payload(&self) -> Option<SharePayload> {
        let inner = self.shared.inner.lock().await;
        let session_id = inner.machine.session_id()?;
        let link = share::tracking_link(&self.shared.config.tracking_link_base, session_id);
        Some(SharePayload::for_tracking_link(&link))
    }

    /// Validates and stores a trusted contact.
    pub async fn add_contact(&self, name: &str, detail: &str) -> Result<ContactId> {
        let contact = TrustedContact::new(name, detail)?;
        let id = self
            .shared
            .store
            .add_contact(&self.shared.user_id, contact)
            .await?;
        self.shared.ui.show_message("Contact added.", false);
        Ok(id)
    }

    pub async fn remove_contact(&self, contact_id: &str) -> Result<()> {
        self.shared
            .store
            .remove_contact(&self.shared.user_id, contact_id)
            .await?;
        self.shared.ui.show_message("Contact removed.", false);
        Ok(())
    }

    /// Keeps the rendered contact list live. Re-attaching always detaches
    /// the previous listener first; duplicated listeners are a defined
    /// failure mode to avoid.
    pub async fn watch_contacts(&self) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if let Some(task) = inner.contacts_listener.take() {
            task.abort();
        }

        let mut rx = shared.store.subscribe_contacts(&shared.user_id).await?;
        let tracker = self.clone();
        inner.contacts_listener = Some(tokio::spawn(async move {
            loop {
                let contacts = rx.borrow_and_update().clone();
                tracker.shared.ui.render_contacts(&contacts);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    /// Consumes the continuous fix stream: throttle decision, durable
    /// writes, anomaly flagging. Sampling keeps running through
    /// `connection_lost` and panic; only cancellation stops it.
    async fn handle_fix(&self, fix: LocationFix) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if !inner.machine.snapshot().is_tracking() {
            return;
        }
        let Some(session_id) = inner.machine.session_id().cloned() else {
            return;
        };

        let now = Utc::now();
        let decision = inner.gate.accept(&fix, now);
        if !decision.write {
            return;
        }

        let patch = SessionPatch {
            live_location: Some(fix.clone()),
            heartbeat: Some(now),
            ..SessionPatch::default()
        };
        if let Err(e) = shared.store.patch_session(&session_id, patch).await {
            tracing::warn!("live location write failed: {:#}", e);
            shared.ui.show_message(
                "Could not update your shared location; the link may be stale.",
                true,
            );
        }
        if let Err(e) = shared.store.append_path_fix(&session_id, fix).await {
            tracing::warn!("path append failed: {:#}", e);
        }

        if let Some(report) = decision.anomaly {
            tracing::warn!(
                speed_mps = report.speed_mps,
                distance_m = report.distance_m,
                "implausible movement detected; flagging session"
            );
            let patch = SessionPatch {
                anomaly_detected: Some(true),
                last_event_timestamp: Some(now),
                ..SessionPatch::default()
            };
            if let Err(e) = shared.store.patch_session(&session_id, patch).await {
                tracing::warn!("anomaly flag write failed: {:#}", e);
            }
        }
    }

    fn start_sampling(&self, inner: &mut TrackerInner) {
        if let Some(task) = inner.sampling_task.take() {
            task.abort();
        }

        let tracker = self.clone();
        inner.sampling_task = Some(tokio::spawn(async move {
            let options = FixOptions::new(tracker.shared.config.watch_fix_timeout());
            let mut stream = match tracker.shared.locations.watch_position(options).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("could not start location watch: {}", e);
                    tracker
                        .shared
                        .ui
                        .set_status_text(&format!("Tracking error: {}", e));
                    return;
                }
            };
            while let Some(item) = stream.next().await {
                match item {
                    Ok(fix) => tracker.handle_fix(fix).await,
                    Err(e) => {
                        // Mid-session errors are non-fatal; the sampler
                        // keeps going.
                        tracing::warn!("location sampling error: {}", e);
                        tracker
                            .shared
                            .ui
                            .set_status_text(&format!("Tracking error: {}", e));
                    }
                }
            }
        }));
    }

    async fn attach_check_listener(
        &self,
        inner: &mut TrackerInner,
        session_id: &str,
    ) -> Result<()> {
        if let Some(task) = inner.check_listener.take() {
            task.abort();
        }

        let mut rx = self.shared.store.subscribe_check_request(session_id).await?;
        let tracker = self.clone();
        let session_id = session_id.to_string();
        inner.check_listener = Some(tokio::spawn(async move {
            let mut first = true;
            loop {
                if !first && rx.changed().await.is_err() {
                    break;
                }
                first = false;

                let observed = rx.borrow_and_update().clone();
                let Some(request) = observed else {
                    continue;
                };
                if request.status == CheckStatus::Pending {
                    continue;
                }

                tracker.shared.ui.show_check_response(request.status);
                // Consumption is destructive: later observer writes are
                // no-ops until a new request exists.
                if let Err(e) = tracker
                    .shared
                    .store
                    .delete_check_request(&session_id)
                    .await
                {
                    tracing::warn!("failed to clear consumed check request: {:#}", e);
                }
            }
        }));
        Ok(())
    }

    fn unwind_tasks(inner: &mut TrackerInner) {
        if let Some(task) = inner.sampling_task.take() {
            task.abort();
        }
        if let Some(task) = inner.check_listener.take() {
            task.abort();
        }
        inner.cycle.stop();
    }
}
