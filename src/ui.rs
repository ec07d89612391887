//! Host UI seam.
//!
//! The core never renders; it calls these hooks and the host wires them to
//! whatever surface it has (a web page, a native shell, a test double).
//! Hooks must be cheap and non-blocking; they are invoked from async tasks.
//!
//! The discreet-panic contract is enforced by omission: the panic path
//! simply never calls any of these.

use crate::contacts::{ContactId, TrustedContact};
use crate::session::CheckStatus;

/// Rendering hooks the session core drives.
pub trait UiSurface: Send + Sync {
    /// Flip the tracking toggle representation (start/stop button state).
    fn set_tracking_active(&self, active: bool);

    /// One-line status text under the toggle.
    fn set_status_text(&self, text: &str);

    /// Transient user-facing message (toast/snackbar).
    fn show_message(&self, text: &str, is_error: bool);

    /// Present the observer link right after a session starts.
    fn show_link_modal(&self, link: &str);

    /// Present the observer's answer to a check request.
    fn show_check_response(&self, status: CheckStatus);

    /// Show the periodic "are you ok?" prompt.
    fn show_safety_prompt(&self);

    /// Dismiss the prompt (answered or timed out).
    fn hide_safety_prompt(&self);

    /// Whether some other modal surface is currently open; the wellbeing
    /// prompt yields to it.
    fn is_modal_open(&self) -> bool;

    /// Re-render the trusted-contact list.
    fn render_contacts(&self, contacts: &[(ContactId, TrustedContact)]);
}
