//! Geolocation seam and great-circle distance math.
//!
//! The host environment implements [`LocationProvider`]; the core consumes
//! one-shot fixes at session start and a continuous stream while tracking.

use crate::session::LocationFix;
use async_trait::async_trait;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tokio::sync::mpsc;

/// Mean Earth radius in meters (WGS-84-ish sphere).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two fixes in meters.
///
/// Haversine everywhere: it is numerically stabler than the spherical law of
/// cosines for near-identical points, which is exactly the regime a slow
/// pedestrian produces.
pub fn haversine_distance_m(from: &LocationFix, to: &LocationFix) -> f64 {
    let phi1 = from.latitude.to_radians();
    let phi2 = to.latitude.to_radians();
    let d_phi = (to.latitude - from.latitude).to_radians();
    let d_lambda = (to.longitude - from.longitude).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Errors surfaced by a geolocation provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoError {
    /// The user denied the location permission.
    PermissionDenied,
    /// No fix could be produced (no GPS, no network location).
    PositionUnavailable,
    /// Fix acquisition exceeded the configured timeout.
    Timeout,
    /// Provider-specific failure.
    Other(String),
}

impl Display for GeoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "location permission denied"),
            Self::PositionUnavailable => write!(f, "position unavailable"),
            Self::Timeout => write!(f, "timed out acquiring a position fix"),
            Self::Other(message) => write!(f, "geolocation error: {}", message),
        }
    }
}

impl std::error::Error for GeoError {}

/// Acquisition options, mirroring the browser geolocation knobs: high
/// accuracy, a fix-acquisition timeout, and no caching of stale fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Maximum acceptable age of a cached fix. Zero means never serve stale.
    pub maximum_age: Duration,
}

impl FixOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            high_accuracy: true,
            timeout,
            maximum_age: Duration::ZERO,
        }
    }
}

/// Continuous position stream handed out by [`LocationProvider::watch_position`].
///
/// Dropping the stream is the stop signal: the provider observes its sender
/// closing and stops sampling. Mid-stream errors are items, not termination;
/// the sampler keeps retrying and the session continues.
pub struct PositionStream {
    rx: mpsc::Receiver<Result<LocationFix, GeoError>>,
}

impl PositionStream {
    /// Creates a stream plus the sender half the provider feeds.
    pub fn channel(buffer: usize) -> (mpsc::Sender<Result<LocationFix, GeoError>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }

    /// Next sample, or `None` once the provider shut down.
    pub async fn next(&mut self) -> Option<Result<LocationFix, GeoError>> {
        self.rx.recv().await
    }
}

/// Host-implemented geolocation source.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// One-shot fix, used at session start.
    async fn current_position(&self, options: FixOptions) -> Result<LocationFix, GeoError>;

    /// Continuous sampling, used while tracking.
    async fn watch_position(&self, options: FixOptions) -> Result<PositionStream, GeoError>;
}
