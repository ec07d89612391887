//! Throttle and anomaly decisions for incoming fixes.
//!
//! The gate is the ONLY place that decides which raw fixes become durable
//! writes. Its state is strictly sequential: every accepted write updates
//! `last_write_time`/`last_fix` before the next fix is considered, and there
//! are never concurrent writers.

use crate::config::TrackerConfig;
use crate::geo::haversine_distance_m;
use crate::session::LocationFix;
use chrono::{DateTime, Utc};

/// Outcome of feeding one fix through the gate.
#[derive(Debug, Clone, PartialEq)]
pub struct Acceptance {
    /// Whether the fix becomes a durable write (live location, path entry,
    /// heartbeat refresh).
    pub write: bool,
    /// Present when the accepted fix implies implausible movement. Anomaly
    /// math runs only on accepted fixes, on the same cadence as writes.
    pub anomaly: Option<AnomalyReport>,
}

impl Acceptance {
    fn dropped() -> Self {
        Self {
            write: false,
            anomaly: None,
        }
    }
}

/// Details of an implausible-movement observation, for logging and the
/// store-side flag.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyReport {
    pub speed_mps: f64,
    pub distance_m: f64,
    pub elapsed_secs: f64,
}

/// Decides which fixes are written and flags implausible movement.
#[derive(Debug)]
pub struct FixGate {
    min_interval: chrono::Duration,
    min_distance_m: f64,
    anomaly_speed_mps: f64,
    last_write_time: Option<DateTime<Utc>>,
    last_fix: Option<LocationFix>,
}

impl FixGate {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            min_interval: config.min_write_interval(),
            min_distance_m: config.min_write_distance_m,
            anomaly_speed_mps: config.anomaly_speed_mps,
            last_write_time: None,
            last_fix: None,
        }
    }

    /// Re-arms the gate at session start or resume: a fresh throttle timer
    /// and, when resuming, the last fix known to the store so the distance
    /// rule stays continuous across reloads.
    pub fn rearm(&mut self, now: DateTime<Utc>, last_fix: Option<LocationFix>) {
        self.last_write_time = Some(now);
        self.last_fix = last_fix;
    }

    /// Feeds one fix through the throttle and, when accepted, the anomaly
    /// check.
    ///
    /// A fix is written iff more than the minimum interval elapsed since the
    /// last write OR it moved more than the minimum distance from the last
    /// written fix. The very first fix always writes and skips anomaly math
    /// (no predecessor); zero or negative elapsed time between fix timestamps
    /// also skips the anomaly check rather than divide by zero.
    pub fn accept(&mut self, fix: &LocationFix, now: DateTime<Utc>) -> Acceptance {
        let due_by_time = match self.last_write_time {
            Some(last) => now - last > self.min_interval,
            None => true,
        };
        let due_by_distance = match &self.last_fix {
            Some(last) => haversine_distance_m(last, fix) > self.min_distance_m,
            None => true,
        };
        if !due_by_time && !due_by_distance {
            return Acceptance::dropped();
        }

        let anomaly = self.last_fix.as_ref().and_then(|last| {
            let distance_m = haversine_distance_m(last, fix);
            let elapsed = fix.timestamp - last.timestamp;
            let elapsed_secs = elapsed.num_milliseconds() as f64 / 1000.0;
            if elapsed_secs <= 0.0 {
                return None;
            }
            let speed_mps = distance_m / elapsed_secs;
            (speed_mps > self.anomaly_speed_mps).then_some(AnomalyReport {
                speed_mps,
                distance_m,
                elapsed_secs,
            })
        });

        self.last_write_time = Some(now);
        self.last_fix = Some(fix.clone());

        Acceptance {
            write: true,
            anomaly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn config() -> TrackerConfig {
        TrackerConfig::default()
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn fix_at(lat: f64, lon: f64, at: DateTime<Utc>) -> LocationFix {
        LocationFix {
            latitude: lat,
            longitude: lon,
            accuracy: 5.0,
            heading: None,
            speed: None,
            timestamp: at,
        }
    }

    #[test]
    fn test_first_fix_always_writes_without_anomaly() {
        let mut gate = FixGate::new(&config());
        let t0 = base_time();
        let decision = gate.accept(&fix_at(0.0, 0.0, t0), t0);
        assert!(decision.write);
        assert!(decision.anomaly.is_none());
    }

    #[test]
    fn test_nearby_fix_within_interval_is_dropped() {
        let mut gate = FixGate::new(&config());
        let t0 = base_time();
        gate.accept(&fix_at(0.0, 0.0, t0), t0);

        // 5 s later, ~11 m away: neither rule fires.
        let t1 = t0 + chrono::Duration::seconds(5);
        let decision = gate.accept(&fix_at(0.0, 0.0001, t1), t1);
        assert!(!decision.write);
    }

    #[test]
    fn test_elapsed_time_alone_triggers_write() {
        let mut gate = FixGate::new(&config());
        let t0 = base_time();
        gate.accept(&fix_at(0.0, 0.0, t0), t0);

        let t1 = t0 + chrono::Duration::seconds(11);
        let decision = gate.accept(&fix_at(0.0, 0.0, t1), t1);
        assert!(decision.write);
        assert!(decision.anomaly.is_none(), "zero movement is not anomalous");
    }

    #[test]
    fn test_distance_alone_triggers_write_reference_example() {
        // The documented reference case: 0.00025 deg of longitude at the
        // equator (~27.8 m) after only 5 s. Distance rule fires; implied
        // speed ~5.6 m/s stays far below the anomaly threshold.
        let mut gate = FixGate::new(&config());
        let t0 = base_time();
        gate.accept(&fix_at(0.0, 0.0, t0), t0);

        let t1 = t0 + chrono::Duration::seconds(5);
        let decision = gate.accept(&fix_at(0.0, 0.00025, t1), t1);
        assert!(decision.write);
        assert!(decision.anomaly.is_none());
    }

    #[test]
    fn test_implausible_speed_is_flagged() {
        let mut gate = FixGate::new(&config());
        let t0 = base_time();
        gate.accept(&fix_at(0.0, 0.0, t0), t0);

        // ~1.1 km in 5 s: ~222 m/s, far above the 50 m/s threshold.
        let t1 = t0 + chrono::Duration::seconds(5);
        let decision = gate.accept(&fix_at(0.01, 0.0, t1), t1);
        assert!(decision.write);
        let report = decision.anomaly.expect("anomaly expected");
        assert!(report.speed_mps > 50.0);
        assert!((report.elapsed_secs - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_elapsed_time_skips_anomaly_math() {
        let mut gate = FixGate::new(&config());
        let t0 = base_time();
        gate.accept(&fix_at(0.0, 0.0, t0), t0);

        // Same fix timestamp, large jump: write happens (distance rule) but
        // the speed computation is skipped instead of dividing by zero.
        let t1 = t0 + chrono::Duration::seconds(12);
        let decision = gate.accept(&fix_at(0.01, 0.0, t0), t1);
        assert!(decision.write);
        assert!(decision.anomaly.is_none());
    }

    #[test]
    fn test_rearm_restores_throttle_continuity_across_resume() {
        let cfg = config();
        let mut gate = FixGate::new(&cfg);
        let t0 = base_time();
        let stored = fix_at(0.0, 0.0, t0);

        // Resume: timer is fresh, last fix comes from the store.
        gate.rearm(t0, Some(stored));

        // 3 s after resume and only ~11 m away: dropped, exactly as if the
        // reload never happened.
        let t1 = t0 + chrono::Duration::seconds(3);
        assert!(!gate.accept(&fix_at(0.0, 0.0001, t1), t1).write);

        // But real movement still punches through.
        let t2 = t0 + chrono::Duration::seconds(4);
        assert!(gate.accept(&fix_at(0.0, 0.0004, t2), t2).write);
    }

    proptest! {
        /// The write predicate holds for arbitrary fix sequences: a fix is
        /// written iff elapsed time since the last write exceeds the interval
        /// OR distance from the last written fix exceeds the threshold.
        #[test]
        fn prop_write_iff_time_or_distance(
            steps in prop::collection::vec((0u64..30_000, -40i64..40, -40i64..40), 1..40)
        ) {
            let cfg = config();
            let mut gate = FixGate::new(&cfg);
            let mut now = base_time();
            let mut lat = 0.0f64;
            let mut lon = 0.0f64;

            // Oracle state, maintained independently of the gate.
            let mut last_write: Option<(DateTime<Utc>, LocationFix)> = None;

            for (dt_ms, dlat_steps, dlon_steps) in steps {
                now += chrono::Duration::milliseconds(dt_ms as i64);
                // Steps of 0.00005 deg (~5.5 m) keep distances in the
                // interesting range around the 20 m threshold.
                lat += dlat_steps as f64 * 0.00005;
                lon += dlon_steps as f64 * 0.00005;
                let fix = fix_at(lat, lon, now);

                let expected = match &last_write {
                    None => true,
                    Some((wt, wf)) => {
                        now - *wt > cfg.min_write_interval()
                            || haversine_distance_m(wf, &fix) > cfg.min_write_distance_m
                    }
                };

                let decision = gate.accept(&fix, now);
                prop_assert_eq!(decision.write, expected);
                if decision.write {
                    last_write = Some((now, fix));
                }
            }
        }
    }
}
