//! Route authoring.
//!
//! A draft's points come from one of two capture modes: manual entry (add,
//! undo, clear) or GPS recording through a gated [`PathRecorder`]. An imported
//! GPX path lands in manual mode so it can be edited. Modes can only be
//! switched while nothing is being recorded.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::geo_utils::path_length_km;
use crate::{
    Coordinate, GateConfig, ImportedTrack, LocationFix, PathRecorder, Result, TrackerError,
};

/// How the draft's points are captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    #[default]
    Manual,
    Recorded,
}

/// Published difficulty of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum Difficulty {
    Easy,
    #[default]
    Moderate,
    Hard,
    Expert,
}

impl Difficulty {
    /// Average riding speed used for duration estimates.
    pub fn average_speed_kmh(&self) -> f64 {
        match self {
            Difficulty::Easy => 18.0,
            Difficulty::Moderate => 15.0,
            Difficulty::Hard => 12.0,
            Difficulty::Expert => 10.0,
        }
    }
}

/// Kind of point of interest a waypoint marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoiCategory {
    Viewpoint,
    Water,
    Food,
    Rest,
    BikeShop,
    Landmark,
    Caution,
    Other,
}

/// A named point of interest on a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub name: String,
    pub category: PoiCategory,
    pub coordinate: Coordinate,
}

/// A finished draft, ready to be published by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDraft {
    pub points: Vec<Coordinate>,
    pub waypoints: Vec<Waypoint>,
    pub difficulty: Difficulty,
    pub derived_distance_km: f64,
    pub derived_duration_min: u32,
}

/// Builds a [`RouteDraft`] from manual points, a GPS recording or an import.
#[derive(Debug, Clone)]
pub struct RouteDraftBuilder {
    mode: CaptureMode,
    manual_points: Vec<Coordinate>,
    recorder: PathRecorder,
    waypoints: Vec<Waypoint>,
    difficulty: Difficulty,
}

impl Default for RouteDraftBuilder {
    fn default() -> Self {
        Self::new(GateConfig::recording())
    }
}

impl RouteDraftBuilder {
    /// Create an empty builder in manual mode using `gate` for recordings.
    pub fn new(gate: GateConfig) -> Self {
        Self {
            mode: CaptureMode::Manual,
            manual_points: Vec::new(),
            recorder: PathRecorder::new(gate),
            waypoints: Vec::new(),
            difficulty: Difficulty::default(),
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Switch capture mode. Refused while recording.
    pub fn set_mode(&mut self, mode: CaptureMode) -> Result<()> {
        self.ensure_not_recording("switch capture mode")?;
        self.mode = mode;
        Ok(())
    }

    pub fn set_difficulty(&mut self, difficulty: Difficulty) {
        self.difficulty = difficulty;
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    // ========================================================================
    // Manual mode
    // ========================================================================

    /// Append a point. Manual mode only; invalid coordinates are rejected.
    pub fn add_point(&mut self, coordinate: Coordinate) -> Result<()> {
        self.ensure_mode(CaptureMode::Manual, "add a point")?;
        self.manual_points.push(coordinate.validated()?);
        Ok(())
    }

    /// Remove and return the last manual point.
    pub fn undo_last(&mut self) -> Result<Option<Coordinate>> {
        self.ensure_mode(CaptureMode::Manual, "undo a point")?;
        Ok(self.manual_points.pop())
    }

    /// Remove every point, manual or recorded. Waypoints are kept.
    pub fn clear_all(&mut self) -> Result<()> {
        self.ensure_not_recording("clear points")?;
        self.manual_points.clear();
        self.recorder.reset()?;
        debug!("[RouteDraft] Cleared points");
        Ok(())
    }

    /// Replace the manual points with an imported path and switch to manual mode.
    pub fn load_imported(&mut self, track: ImportedTrack) -> Result<()> {
        self.ensure_not_recording("load an imported path")?;
        info!(
            "[RouteDraft] Loaded {} imported points from {:?}",
            track.path.len(),
            track.source
        );
        self.mode = CaptureMode::Manual;
        self.manual_points = track.path.points;
        Ok(())
    }

    // ========================================================================
    // Recorded mode
    // ========================================================================

    /// Begin a fresh GPS recording. Recorded mode only.
    pub fn start_recording(&mut self) -> Result<()> {
        self.ensure_mode(CaptureMode::Recorded, "start recording")?;
        self.ensure_not_recording("start recording")?;
        self.recorder.reset()?;
        self.recorder.begin();
        info!("[RouteDraft] Recording started");
        Ok(())
    }

    /// Offer a fix to the recording. Returns whether it was appended.
    pub fn record_fix(&mut self, fix: &LocationFix) -> Result<bool> {
        if !self.recorder.is_recording() {
            return Err(TrackerError::recording_state(false, "record a fix"));
        }
        Ok(self.recorder.accept(fix))
    }

    pub fn stop_recording(&mut self) -> Result<()> {
        if !self.recorder.is_recording() {
            return Err(TrackerError::recording_state(false, "stop recording"));
        }
        self.recorder.finish();
        info!(
            "[RouteDraft] Recording stopped ({} points, {:.2} km)",
            self.recorder.len(),
            self.recorder.distance_km()
        );
        Ok(())
    }

    // ========================================================================
    // Waypoints
    // ========================================================================

    /// Attach a named point of interest. The name must not be blank.
    pub fn add_waypoint(
        &mut self,
        name: &str,
        category: PoiCategory,
        coordinate: Coordinate,
    ) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TrackerError::validation("waypoint name must not be empty"));
        }
        let coordinate = coordinate.validated()?;
        self.waypoints.push(Waypoint {
            name: name.to_string(),
            category,
            coordinate,
        });
        Ok(())
    }

    pub fn remove_waypoint(&mut self, index: usize) -> Option<Waypoint> {
        if index < self.waypoints.len() {
            Some(self.waypoints.remove(index))
        } else {
            None
        }
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    // ========================================================================
    // Derived figures
    // ========================================================================

    /// Points of the current capture mode.
    pub fn points(&self) -> &[Coordinate] {
        match self.mode {
            CaptureMode::Manual => &self.manual_points,
            CaptureMode::Recorded => self.recorder.points(),
        }
    }

    pub fn derived_distance_km(&self) -> f64 {
        match self.mode {
            CaptureMode::Manual => path_length_km(&self.manual_points),
            CaptureMode::Recorded => self.recorder.distance_km(),
        }
    }

    /// Estimated riding time at the difficulty's average speed, in whole minutes.
    pub fn derived_duration_min(&self) -> u32 {
        estimate_duration_min(self.derived_distance_km(), self.difficulty)
    }

    /// Produce the draft. Needs at least two points and no recording in progress.
    pub fn build(&self) -> Result<RouteDraft> {
        self.ensure_not_recording("build the draft")?;
        let points = self.points();
        if points.len() < 2 {
            return Err(TrackerError::InsufficientPoints {
                point_count: points.len(),
                minimum_required: 2,
            });
        }
        Ok(RouteDraft {
            points: points.to_vec(),
            waypoints: self.waypoints.clone(),
            difficulty: self.difficulty,
            derived_distance_km: self.derived_distance_km(),
            derived_duration_min: self.derived_duration_min(),
        })
    }

    fn ensure_not_recording(&self, action: &'static str) -> Result<()> {
        if self.recorder.is_recording() {
            return Err(TrackerError::recording_state(true, action));
        }
        Ok(())
    }

    fn ensure_mode(&self, mode: CaptureMode, action: &'static str) -> Result<()> {
        if self.mode != mode {
            return Err(TrackerError::validation(format!(
                "cannot {} in {:?} mode",
                action, self.mode
            )));
        }
        Ok(())
    }
}

/// `round(distance / speed * 60)` for the difficulty's average speed.
pub fn estimate_duration_min(distance_km: f64, difficulty: Difficulty) -> u32 {
    (distance_km / difficulty.average_speed_kmh() * 60.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PointSource, RoutePath, StateKind};
    use chrono::{Duration, TimeZone, Utc};

    fn fix(lat: f64, secs: i64) -> LocationFix {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();
        LocationFix::new(lat, -89.0, t0 + Duration::seconds(secs))
    }

    #[test]
    fn test_manual_points() {
        let mut builder = RouteDraftBuilder::default();
        builder.add_point(Coordinate::new(20.9673, -89.5925)).unwrap();
        builder.add_point(Coordinate::new(20.9773, -89.5925)).unwrap();
        builder.add_point(Coordinate::new(20.9873, -89.5925)).unwrap();
        assert_eq!(builder.points().len(), 3);

        assert_eq!(
            builder.undo_last().unwrap(),
            Some(Coordinate::new(20.9873, -89.5925))
        );
        assert!((builder.derived_distance_km() - 1.11).abs() < 0.02);

        builder.clear_all().unwrap();
        assert!(builder.points().is_empty());
        assert_eq!(builder.undo_last().unwrap(), None);
    }

    #[test]
    fn test_manual_points_not_gated() {
        let mut builder = RouteDraftBuilder::default();
        builder.add_point(Coordinate::new(21.0, -89.0)).unwrap();
        builder.add_point(Coordinate::new(21.0, -89.0)).unwrap();
        assert_eq!(builder.points().len(), 2);
    }

    #[test]
    fn test_invalid_point_rejected() {
        let mut builder = RouteDraftBuilder::default();
        assert!(matches!(
            builder.add_point(Coordinate::new(21.0, -189.0)),
            Err(TrackerError::InvalidCoordinates { .. })
        ));
        assert!(builder.points().is_empty());
    }

    #[test]
    fn test_recording_uses_gate() {
        let mut builder = RouteDraftBuilder::default();
        builder.set_mode(CaptureMode::Recorded).unwrap();
        builder.start_recording().unwrap();

        assert!(builder.record_fix(&fix(21.0, 0)).unwrap());
        // 2s later: inside the 3s recording gate
        assert!(!builder.record_fix(&fix(21.001, 2)).unwrap());
        assert!(builder.record_fix(&fix(21.001, 4)).unwrap());
        assert!(builder.record_fix(&fix(21.002, 8)).unwrap());
        builder.stop_recording().unwrap();

        assert_eq!(builder.points().len(), 3);
        let expected = path_length_km(builder.points());
        assert!((builder.derived_distance_km() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_restart_recording_starts_fresh() {
        let mut builder = RouteDraftBuilder::default();
        builder.set_mode(CaptureMode::Recorded).unwrap();
        builder.start_recording().unwrap();
        builder.record_fix(&fix(21.0, 0)).unwrap();
        assert!(!builder.record_fix(&fix(21.0, 30)).unwrap());
        builder.stop_recording().unwrap();
        assert_eq!(builder.points().len(), 1);

        builder.start_recording().unwrap();
        assert!(builder.points().is_empty());
        assert!(builder.record_fix(&fix(21.5, 60)).unwrap());
        assert!(builder.is_recording());
    }

    #[test]
    fn test_modes_locked_while_recording() {
        let mut builder = RouteDraftBuilder::default();
        assert!(builder.start_recording().is_err());

        builder.set_mode(CaptureMode::Recorded).unwrap();
        builder.start_recording().unwrap();
        let recording = |r: Result<()>| {
            matches!(
                r,
                Err(TrackerError::InvalidState {
                    state: StateKind::Recording,
                    ..
                })
            )
        };
        assert!(recording(builder.set_mode(CaptureMode::Manual)));
        assert!(recording(builder.clear_all()));
        assert!(builder.add_point(Coordinate::new(21.0, -89.0)).is_err());
        let err = builder.build().unwrap_err();
        assert_eq!(err.to_string(), "Cannot build the draft while recording");

        builder.stop_recording().unwrap();
        builder.set_mode(CaptureMode::Manual).unwrap();
        assert!(builder.record_fix(&fix(21.0, 0)).is_err());
    }

    #[test]
    fn test_recording_actions_need_a_recording() {
        let mut builder = RouteDraftBuilder::default();
        builder.set_mode(CaptureMode::Recorded).unwrap();

        let not_recording = |err: TrackerError| {
            matches!(
                err,
                TrackerError::InvalidState {
                    state: StateKind::NotRecording,
                    ..
                }
            )
        };
        assert!(not_recording(builder.record_fix(&fix(21.0, 0)).unwrap_err()));
        assert!(not_recording(builder.stop_recording().unwrap_err()));

        builder.start_recording().unwrap();
        builder.stop_recording().unwrap();
        assert!(not_recording(builder.stop_recording().unwrap_err()));
    }

    #[test]
    fn test_waypoint_requires_name() {
        let mut builder = RouteDraftBuilder::default();
        let c = Coordinate::new(21.0, -89.0);

        assert!(matches!(
            builder.add_waypoint("", PoiCategory::Water, c),
            Err(TrackerError::Validation { .. })
        ));
        assert!(matches!(
            builder.add_waypoint("   ", PoiCategory::Water, c),
            Err(TrackerError::Validation { .. })
        ));
        assert!(builder.waypoints().is_empty());

        builder.add_waypoint(" Cenote ", PoiCategory::Viewpoint, c).unwrap();
        assert_eq!(builder.waypoints()[0].name, "Cenote");
        assert!(builder.remove_waypoint(3).is_none());
        assert_eq!(builder.remove_waypoint(0).unwrap().category, PoiCategory::Viewpoint);
    }

    #[test]
    fn test_duration_by_difficulty() {
        assert_eq!(estimate_duration_min(30.0, Difficulty::Easy), 100);
        assert_eq!(estimate_duration_min(30.0, Difficulty::Moderate), 120);
        assert_eq!(estimate_duration_min(30.0, Difficulty::Hard), 150);
        assert_eq!(estimate_duration_min(30.0, Difficulty::Expert), 180);
        assert_eq!(estimate_duration_min(0.0, Difficulty::Easy), 0);
        // 1.11 km at 15 km/h = 4.44 min
        assert_eq!(estimate_duration_min(1.11, Difficulty::Moderate), 4);
    }

    #[test]
    fn test_load_imported_and_build() {
        let mut builder = RouteDraftBuilder::default();
        builder.set_mode(CaptureMode::Recorded).unwrap();

        let track = ImportedTrack {
            path: RoutePath::from_points(vec![
                Coordinate::new(21.0, -89.0),
                Coordinate::new(21.0, -88.95),
            ]),
            source: PointSource::TrackPoints,
            name: None,
        };
        builder.load_imported(track).unwrap();
        assert_eq!(builder.mode(), CaptureMode::Manual);
        builder.set_difficulty(Difficulty::Easy);
        builder
            .add_waypoint("Start", PoiCategory::Landmark, Coordinate::new(21.0, -89.0))
            .unwrap();

        let draft = builder.build().unwrap();
        assert_eq!(draft.points.len(), 2);
        assert_eq!(draft.waypoints.len(), 1);
        assert!((draft.derived_distance_km - 5.19).abs() < 0.02);
        // 5.19 km at 18 km/h
        assert_eq!(draft.derived_duration_min, 17);
    }

    #[test]
    fn test_build_requires_two_points() {
        let mut builder = RouteDraftBuilder::default();
        builder.add_point(Coordinate::new(21.0, -89.0)).unwrap();
        assert!(matches!(
            builder.build(),
            Err(TrackerError::InsufficientPoints { point_count: 1, .. })
        ));
    }
}
