//! # Route Tracker
//!
//! GPS route tracking and recording engine for cycling routes.
//!
//! This library provides:
//! - Haversine geometry over WGS84 coordinates
//! - Gated path recording with incremental distance
//! - Progress, speed and ETA metrics against a planned route
//! - A tracking session state machine with arrival detection
//! - GPX import and a route-authoring draft builder
//!
//! ## Features
//!
//! - **`persistence`** - SQLite-backed completion store
//! - **`http`** - Remote completion store over HTTP
//! - **`ffi`** - FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use route_tracker::{Coordinate, PlannedRoute, RouteTracker, Status, TrackerConfig};
//! use route_tracker::tracker::ManualProvider;
//!
//! let route = PlannedRoute::from_points(
//!     "loop-1",
//!     "Centro loop",
//!     vec![Coordinate::new(21.0, -89.0), Coordinate::new(21.0, -88.95)],
//! )
//! .unwrap();
//!
//! let mut tracker =
//!     RouteTracker::new(TrackerConfig::default(), ManualProvider::granted()).unwrap();
//! tracker.route_loaded(route).unwrap();
//! tracker.start().unwrap();
//! assert_eq!(tracker.status(), Status::Active);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, StateKind, TrackerError};

// Geographic utilities (haversine distance, bounds)
pub mod geo_utils;

// Engine configuration (gating, arrival, provider accuracy)
pub mod config;
pub use config::{AccuracyTier, GateConfig, ProviderConfig, TrackerConfig};

// Gated path accumulation
pub mod recorder;
pub use recorder::{PathRecorder, RoutePath};

// Planned routes and backend row mapping
pub mod route;
pub use route::{CoordinateRow, PlannedRoute, RouteRow, RouteSummary};

// Derived progress metrics
pub mod metrics;
pub use metrics::RouteMetrics;

// Completion records and the background recorder
pub mod completion;
pub use completion::{
    CompletionRecord, CompletionRecorder, CompletionSink, CompletionStore, MemoryCompletionStore,
    SessionOutcome,
};

// Tracking session state machine
pub mod tracker;
pub use tracker::{
    FixOutcome, LocationProvider, RouteTracker, SessionSnapshot, Status, SubscriptionId,
    TrackerCommand, TrackerUpdate, TrackingSession,
};

// Threaded session actor
pub mod actor;
pub use actor::{SessionActor, SessionHandle};

// GPX import
pub mod importer;
pub use importer::{import_gpx, ImportedTrack, PointSource};

// Route authoring
pub mod draft;
pub use draft::{CaptureMode, Difficulty, PoiCategory, RouteDraft, RouteDraftBuilder, Waypoint};

// Process-wide init/teardown
pub mod lifecycle;

// SQLite completion store
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteCompletionStore;

// Remote completion store
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::RemoteCompletionStore;

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android
#[cfg(target_os = "android")]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RouteTrackerRust"),
    );
}

#[cfg(not(target_os = "android"))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 coordinate in degrees.
///
/// # Example
/// ```
/// use route_tracker::Coordinate;
/// let merida = Coordinate::new(20.9673, -89.5925);
/// assert!(merida.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Create a new coordinate.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the coordinate is finite and within latitude/longitude ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Return the coordinate if valid, otherwise an `InvalidCoordinates` error.
    pub fn validated(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(TrackerError::InvalidCoordinates {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

/// A single location report from the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub coordinate: Coordinate,
    /// Reported ground speed in m/s, if the provider has one
    pub speed_mps: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinate: Coordinate::new(latitude, longitude),
            speed_mps: None,
            timestamp,
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    /// Reported speed converted to km/h. Missing, negative or non-finite speeds give 0.
    pub fn speed_kmh(&self) -> f64 {
        match self.speed_mps {
            Some(mps) if mps.is_finite() && mps > 0.0 => mps * 3.6,
            _ => 0.0,
        }
    }
}

/// Bounding box of a path, used to fit the map to a route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Bounding box of a set of points, or None if empty.
    pub fn from_points(points: &[Coordinate]) -> Option<Self> {
        geo_utils::compute_bounds(points)
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_validation() {
        assert!(Coordinate::new(20.9673, -89.5925).is_valid());
        assert!(Coordinate::new(90.0, 180.0).is_valid());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, 181.0).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, f64::INFINITY).is_valid());
    }

    #[test]
    fn test_validated_reports_values() {
        let err = Coordinate::new(95.0, 10.0).validated().unwrap_err();
        assert!(matches!(
            err,
            TrackerError::InvalidCoordinates { latitude, .. } if latitude == 95.0
        ));
    }

    #[test]
    fn test_fix_speed_conversion() {
        let now = Utc::now();
        assert_eq!(LocationFix::new(21.0, -89.0, now).speed_kmh(), 0.0);
        let fix = LocationFix::new(21.0, -89.0, now).with_speed(5.0);
        assert!((fix.speed_kmh() - 18.0).abs() < 1e-9);
        // iOS reports -1 when speed is unknown
        assert_eq!(LocationFix::new(21.0, -89.0, now).with_speed(-1.0).speed_kmh(), 0.0);
    }

    #[test]
    fn test_bounds_from_points() {
        assert!(Bounds::from_points(&[]).is_none());
        let bounds = Bounds::from_points(&[
            Coordinate::new(20.9, -89.6),
            Coordinate::new(21.1, -89.4),
        ])
        .unwrap();
        let center = bounds.center();
        assert!((center.latitude - 21.0).abs() < 1e-9);
        assert!((center.longitude + 89.5).abs() < 1e-9);
    }
}
