//! Safewalk: the session core of a personal-safety live-tracking app.
//!
//! A user starts a tracked journey, shares an observer link with trusted
//! contacts, and the core keeps a shared session record fresh: throttled
//! location fixes, a periodic wellbeing prompt, a discreet panic path, an
//! observer-driven check protocol, and crash-safe resume of unfinished
//! sessions. Storage, geolocation, and rendering stay behind traits so the
//! host decides the backend.
//!
//! [`tracker::SessionTracker`] is the entry point; everything else supports
//! it.

pub mod config;
pub mod contacts;
pub mod geo;
pub mod notifier;
pub mod safety_cycle;
pub mod session;
pub mod share;
pub mod state_machine;
pub mod store;
pub mod throttle;
pub mod tracker;
pub mod ui;

pub use config::{AuthorizedPhone, TrackerConfig};
pub use contacts::{ContactId, ContactKind, TrustedContact};
pub use geo::{FixOptions, GeoError, LocationProvider, PositionStream};
pub use notifier::{AlertRelay, CallMeBotRelay, Notifier, NotifySummary};
pub use session::{
    CheckRequest, CheckStatus, LocationFix, SessionId, SessionPatch, SessionRecord, SessionStatus,
};
pub use state_machine::{
    MachineStatus, PanicSource, SessionCommand, SessionEvent, SessionSnapshot,
};
pub use store::{MemoryStore, SessionStore};
pub use tracker::SessionTracker;
pub use ui::UiSurface;
