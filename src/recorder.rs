//! Gated path accumulation.
//!
//! [`PathRecorder`] turns a stream of location fixes into an ordered path and
//! keeps the travelled distance up to date in O(1) per accepted fix. Fixes that
//! are malformed, or that arrive too soon or too close to the previous accepted
//! fix, are rejected. No smoothing is applied beyond this gate.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{distance_km, path_length_km};
use crate::{Coordinate, GateConfig, LocationFix, Result, TrackerError};

/// An ordered path with its haversine length.
///
/// Recorded, imported and hand-drawn paths all share this shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoutePath {
    pub points: Vec<Coordinate>,
    pub distance_km: f64,
}

impl RoutePath {
    /// Build a path from points, computing its length.
    pub fn from_points(points: Vec<Coordinate>) -> Self {
        let distance_km = path_length_km(&points);
        Self {
            points,
            distance_km,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Accumulates accepted fixes into a path.
#[derive(Debug, Clone)]
pub struct PathRecorder {
    gate: GateConfig,
    points: Vec<Coordinate>,
    distance_km: f64,
    last_fix: Option<LocationFix>,
    recording: bool,
}

impl PathRecorder {
    pub fn new(gate: GateConfig) -> Self {
        Self {
            gate,
            points: Vec::new(),
            distance_km: 0.0,
            last_fix: None,
            recording: false,
        }
    }

    /// Mark a recording as in progress. Resets are refused until [`finish`](Self::finish).
    pub fn begin(&mut self) {
        self.recording = true;
    }

    /// Mark the recording as finished.
    pub fn finish(&mut self) {
        self.recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Offer a fix to the recorder. Returns whether it was appended.
    ///
    /// The first valid fix is always accepted. Later fixes must be at least
    /// `min_interval_secs` after and `min_distance_m` away from the last
    /// accepted fix.
    pub fn accept(&mut self, fix: &LocationFix) -> bool {
        if !fix.coordinate.is_valid() {
            debug!(
                "[PathRecorder] Rejected invalid fix ({}, {})",
                fix.coordinate.latitude, fix.coordinate.longitude
            );
            return false;
        }

        let step_km = match &self.last_fix {
            None => 0.0,
            Some(last) => {
                let elapsed_secs =
                    (fix.timestamp - last.timestamp).num_milliseconds() as f64 / 1000.0;
                let step_km = distance_km(&last.coordinate, &fix.coordinate);
                if elapsed_secs < self.gate.min_interval_secs
                    || step_km * 1000.0 < self.gate.min_distance_m
                {
                    trace!(
                        "[PathRecorder] Gated fix: {:.1}s, {:.1}m since last",
                        elapsed_secs,
                        step_km * 1000.0
                    );
                    return false;
                }
                step_km
            }
        };

        self.distance_km += step_km;
        self.points.push(fix.coordinate);
        self.last_fix = Some(*fix);
        true
    }

    /// Clear the path and distance. Refused while a recording is in progress.
    pub fn reset(&mut self) -> Result<()> {
        if self.recording {
            return Err(TrackerError::recording_state(true, "reset the path"));
        }
        self.points.clear();
        self.distance_km = 0.0;
        self.last_fix = None;
        Ok(())
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_km
    }

    pub fn last_fix(&self) -> Option<&LocationFix> {
        self.last_fix.as_ref()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn gate(&self) -> &GateConfig {
        &self.gate
    }

    /// Snapshot of the recorded path.
    pub fn to_path(&self) -> RoutePath {
        RoutePath {
            points: self.points.clone(),
            distance_km: self.distance_km,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StateKind;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap()
    }

    fn fix(lat: f64, lng: f64, secs: i64) -> LocationFix {
        LocationFix::new(lat, lng, t0() + Duration::seconds(secs))
    }

    #[test]
    fn test_first_fix_always_accepted() {
        let mut recorder = PathRecorder::new(GateConfig::tracking());
        assert!(recorder.accept(&fix(21.0, -89.0, 0)));
        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.distance_km(), 0.0);
    }

    #[test]
    fn test_invalid_fix_rejected() {
        let mut recorder = PathRecorder::new(GateConfig::tracking());
        assert!(!recorder.accept(&fix(f64::NAN, -89.0, 0)));
        assert!(!recorder.accept(&fix(95.0, -89.0, 0)));
        assert!(recorder.is_empty());

        assert!(recorder.accept(&fix(21.0, -89.0, 0)));
        assert!(!recorder.accept(&fix(21.01, 200.0, 10)));
        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.distance_km(), 0.0);
    }

    #[test]
    fn test_gate_rejects_too_soon() {
        let mut recorder = PathRecorder::new(GateConfig::tracking());
        recorder.accept(&fix(21.0, -89.0, 0));
        // ~110m away but only one second later
        assert!(!recorder.accept(&fix(21.001, -89.0, 1)));
        assert!(recorder.accept(&fix(21.001, -89.0, 2)));
    }

    #[test]
    fn test_gate_rejects_jitter() {
        let mut recorder = PathRecorder::new(GateConfig::tracking());
        recorder.accept(&fix(21.0, -89.0, 0));
        // ~1m away, long after
        assert!(!recorder.accept(&fix(21.00001, -89.0, 30)));
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn test_incremental_distance_matches_recomputed() {
        let mut recorder = PathRecorder::new(GateConfig::tracking());
        let mut secs = 0;
        for i in 0..50 {
            // Zig-zag track with some points inside the gate
            let lat = 21.0 + i as f64 * 0.0003;
            let lng = -89.0 + if i % 2 == 0 { 0.0 } else { 0.0002 };
            recorder.accept(&fix(lat, lng, secs));
            secs += if i % 3 == 0 { 1 } else { 3 };
        }

        let recomputed = path_length_km(recorder.points());
        assert!(recorder.len() > 10);
        assert!((recorder.distance_km() - recomputed).abs() < 1e-9);
        assert_eq!(recorder.to_path().distance_km, recorder.distance_km());
    }

    #[test]
    fn test_reset_refused_while_recording() {
        let mut recorder = PathRecorder::new(GateConfig::tracking());
        recorder.begin();
        recorder.accept(&fix(21.0, -89.0, 0));
        assert!(matches!(
            recorder.reset(),
            Err(TrackerError::InvalidState {
                state: StateKind::Recording,
                ..
            })
        ));
        assert_eq!(recorder.len(), 1);

        recorder.finish();
        recorder.reset().unwrap();
        assert!(recorder.is_empty());
        assert_eq!(recorder.distance_km(), 0.0);
        assert!(recorder.last_fix().is_none());

        // After a reset the next fix is treated as the first one again
        assert!(recorder.accept(&fix(21.0, -89.0, 1)));
    }

    #[test]
    fn test_route_path_from_points() {
        let path = RoutePath::from_points(vec![
            Coordinate::new(20.9673, -89.5925),
            Coordinate::new(20.9773, -89.5925),
        ]);
        assert_eq!(path.len(), 2);
        assert!((path.distance_km - 1.11).abs() < 0.02);
    }
}
