//! Periodic "are you ok?" prompt cycle.
//!
//! A single cooperative task: prompt visible for a fixed window, hidden for
//! another, on a fixed grid. The cycle only shows the prompt while the
//! lifecycle snapshot allows it (tracking active, no panic) and no other
//! modal is open. Resolutions arrive from outside: the tracker acknowledges
//! affirmative answers here and handles negative answers itself by stopping
//! the cycle and engaging the panic transition.

use crate::config::TrackerConfig;
use crate::state_machine::SessionSnapshot;
use crate::ui::UiSurface;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Handle to the wellbeing prompt cycle. `start` is idempotent
/// (stop-then-start); `stop` is a safe no-op when nothing runs.
pub struct SafetyCheckCycle {
    visible: Duration,
    hidden: Duration,
    task: Option<JoinHandle<()>>,
    ack_tx: Option<mpsc::Sender<()>>,
    ui: Option<Arc<dyn UiSurface>>,
}

impl SafetyCheckCycle {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            visible: config.check_visible(),
            hidden: config.check_hidden(),
            task: None,
            ack_tx: None,
            ui: None,
        }
    }

    /// Starts the cycle, tearing down any previous one first. The first
    /// prompt shows immediately; later ones follow the fixed
    /// visible+hidden grid regardless of how fast the user answered.
    pub fn start(
        &mut self,
        ui: Arc<dyn UiSurface>,
        snapshot_rx: watch::Receiver<SessionSnapshot>,
    ) {
        self.stop();

        let (ack_tx, mut ack_rx) = mpsc::channel::<()>(1);
        let visible = self.visible;
        let hidden = self.hidden;
        let task_ui = ui.clone();

        let task = tokio::spawn(async move {
            loop {
                let tick_start = Instant::now();
                let allowed = snapshot_rx.borrow().allows_wellbeing_prompt();
                if allowed && !task_ui.is_modal_open() {
                    // A stale ack from a previous tick must not dismiss the
                    // fresh prompt instantly.
                    while ack_rx.try_recv().is_ok() {}

                    task_ui.show_safety_prompt();
                    tokio::select! {
                        _ = tokio::time::sleep(visible) => {
                            task_ui.hide_safety_prompt();
                        }
                        Some(()) = ack_rx.recv() => {
                            task_ui.hide_safety_prompt();
                        }
                    }
                }
                tokio::time::sleep_until(tick_start + visible + hidden).await;
            }
        });

        self.task = Some(task);
        self.ack_tx = Some(ack_tx);
        self.ui = Some(ui);
    }

    /// Signals an affirmative answer: cancels the pending auto-hide and
    /// dismisses the prompt immediately. No-op while stopped.
    pub fn acknowledge(&self) {
        if let Some(tx) = &self.ack_tx {
            let _ = tx.try_send(());
        }
    }

    /// Fully stops the cycle: the task, any pending auto-hide, and the
    /// prompt itself. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.ack_tx = None;
        if let Some(ui) = self.ui.take() {
            ui.hide_safety_prompt();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for SafetyCheckCycle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::{ContactId, TrustedContact};
    use crate::session::CheckStatus;
    use crate::state_machine::{SessionCommand, SessionStateMachine};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingUi {
        shows: AtomicUsize,
        hides: AtomicUsize,
        modal_open: AtomicBool,
    }

    impl UiSurface for CountingUi {
        fn set_tracking_active(&self, _active: bool) {}
        fn set_status_text(&self, _text: &str) {}
        fn show_message(&self, _text: &str, _is_error: bool) {}
        fn show_link_modal(&self, _link: &str) {}
        fn show_check_response(&self, _status: CheckStatus) {}
        fn show_safety_prompt(&self) {
            self.shows.fetch_add(1, Ordering::SeqCst);
        }
        fn hide_safety_prompt(&self) {
            self.hides.fetch_add(1, Ordering::SeqCst);
        }
        fn is_modal_open(&self) -> bool {
            self.modal_open.load(Ordering::SeqCst)
        }
        fn render_contacts(&self, _contacts: &[(ContactId, TrustedContact)]) {}
    }

    fn active_snapshot() -> watch::Receiver<SessionSnapshot> {
        let (mut machine, rx) = SessionStateMachine::new();
        machine
            .apply(SessionCommand::StartTracking {
                session_id: "session-1".to_string(),
            })
            .expect("start");
        // Keep the sender side alive for the duration of the test.
        std::mem::forget(machine);
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_follows_fixed_grid() {
        let ui = Arc::new(CountingUi::default());
        let mut cycle = SafetyCheckCycle::new(&TrackerConfig::default());
        cycle.start(ui.clone(), active_snapshot());

        // t=0: shown. t=15: auto-hidden. t=30: shown again.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(ui.shows.load(Ordering::SeqCst), 2);
        assert_eq!(ui.hides.load(Ordering::SeqCst), 1);

        cycle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_hides_immediately_without_breaking_grid() {
        let ui = Arc::new(CountingUi::default());
        let mut cycle = SafetyCheckCycle::new(&TrackerConfig::default());
        cycle.start(ui.clone(), active_snapshot());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ui.shows.load(Ordering::SeqCst), 1);

        cycle.acknowledge();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ui.hides.load(Ordering::SeqCst), 1, "ack hides at once");

        // Next prompt still lands on the 30 s grid, not 30 s after the ack.
        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(ui.shows.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ui.shows.load(Ordering::SeqCst), 2);

        cycle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_skipped_while_other_modal_open() {
        let ui = Arc::new(CountingUi::default());
        ui.modal_open.store(true, Ordering::SeqCst);
        let mut cycle = SafetyCheckCycle::new(&TrackerConfig::default());
        cycle.start(ui.clone(), active_snapshot());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(ui.shows.load(Ordering::SeqCst), 0);

        // Modal closes; the next tick prompts again.
        ui.modal_open.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ui.shows.load(Ordering::SeqCst), 1);

        cycle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_stop_repeats_safely() {
        let ui = Arc::new(CountingUi::default());
        let mut cycle = SafetyCheckCycle::new(&TrackerConfig::default());
        let rx = active_snapshot();

        cycle.start(ui.clone(), rx.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ui.shows.load(Ordering::SeqCst), 1);

        // Restart: the old task dies, its prompt is dismissed, a fresh one
        // shows. No doubled prompts later.
        cycle.start(ui.clone(), rx.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ui.shows.load(Ordering::SeqCst), 2);
        assert!(cycle.is_running());

        cycle.stop();
        cycle.stop();
        assert!(!cycle.is_running());

        let hides_after_stop = ui.hides.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ui.shows.load(Ordering::SeqCst), 2, "stopped cycle is silent");
        assert_eq!(ui.hides.load(Ordering::SeqCst), hides_after_stop);
    }
}
