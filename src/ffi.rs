//! FFI bindings for mobile platforms (iOS/Android).
//!
//! The host app owns the GPS hardware and the backend client. It implements
//! [`LocationBridge`] and [`CompletionBridge`] in Kotlin/Swift; the tracker
//! itself lives in a process-wide slot so calls don't pass state across the
//! FFI boundary. All FFI functions are prefixed with `ffi_`.

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

use chrono::DateTime;
use log::{debug, info, warn};
use once_cell::sync::Lazy;

use crate::draft::estimate_duration_min;
use crate::geo_utils;
use crate::{
    init_logging, lifecycle, CompletionRecord, CompletionStore, Coordinate, Difficulty,
    FixOutcome, LocationFix, LocationProvider, PlannedRoute, ProviderConfig, Result, RouteRow,
    RouteSummary, RouteTracker, Status, SubscriptionId, TrackerConfig, TrackerError,
};

// ============================================================================
// Callback Interfaces
// ============================================================================

/// Platform location service. Implement in Kotlin/Swift.
///
/// These methods run while the tracker is locked. Calls back into `ffi_tracker_*`
/// from inside them are refused; deliver fixes after `subscribe` has returned.
#[uniffi::export(callback_interface)]
pub trait LocationBridge: Send + Sync {
    /// Prompt for (or check) location permission.
    fn request_permission(&self) -> bool;

    /// Start location updates. Returns a subscription id, or None on failure.
    fn subscribe(&self, config: ProviderConfig) -> Option<u64>;

    /// Stop location updates for a subscription.
    fn unsubscribe(&self, subscription_id: u64);
}

/// Backend for session records. Implement in Kotlin/Swift.
#[uniffi::export(callback_interface)]
pub trait CompletionBridge: Send + Sync {
    /// Create a session row. Returns its id, or None on failure.
    fn create_session(&self, route: RouteSummary) -> Option<String>;

    /// Finalize a session row. `record_json` is a serialized completion record.
    fn finalize_session(&self, session_id: String, record_json: String) -> bool;
}

/// [`LocationProvider`] backed by a host [`LocationBridge`].
pub struct BridgeProvider {
    bridge: Box<dyn LocationBridge>,
}

impl LocationProvider for BridgeProvider {
    fn request_permission(&mut self) -> bool {
        self.bridge.request_permission()
    }

    fn subscribe(&mut self, config: &ProviderConfig) -> Result<SubscriptionId> {
        self.bridge
            .subscribe(*config)
            .map(SubscriptionId)
            .ok_or_else(|| TrackerError::Provider {
                message: "host refused the location subscription".to_string(),
            })
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.bridge.unsubscribe(id.0);
    }
}

/// [`CompletionStore`] backed by a host [`CompletionBridge`].
struct BridgeStore {
    bridge: Box<dyn CompletionBridge>,
}

impl CompletionStore for BridgeStore {
    fn create_session(&mut self, route: &RouteSummary) -> Result<String> {
        self.bridge
            .create_session(route.clone())
            .ok_or_else(|| TrackerError::Persistence {
                message: format!("host failed to create session for {}", route.route_id),
            })
    }

    fn finalize_session(&mut self, session_id: &str, record: &CompletionRecord) -> Result<()> {
        let record_json = serde_json::to_string(record).map_err(|e| TrackerError::Persistence {
            message: e.to_string(),
        })?;
        if self
            .bridge
            .finalize_session(session_id.to_string(), record_json)
        {
            Ok(())
        } else {
            Err(TrackerError::Persistence {
                message: format!("host failed to finalize session {}", session_id),
            })
        }
    }
}

// ============================================================================
// Result Records
// ============================================================================

/// Outcome of a tracker call, for Kotlin/Swift.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct FfiTrackerResult {
    pub success: bool,
    /// Status after the call, or None if no tracker exists
    pub status: Option<Status>,
    /// Set by `ffi_tracker_push_fix`
    pub fix_outcome: Option<FixOutcome>,
    pub error: Option<String>,
}

/// Parsed GPX document.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct FfiImportResult {
    /// GPS coordinates as flat array [lat1, lng1, lat2, lng2, ...]
    pub latlngs: Vec<f64>,
    pub distance_km: f64,
    pub name: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

// ============================================================================
// Global Tracker
// ============================================================================

static TRACKER: Lazy<Mutex<Option<RouteTracker<BridgeProvider>>>> =
    Lazy::new(|| Mutex::new(None));

thread_local! {
    // Set while this thread holds the tracker lock
    static HOLDS_TRACKER: Cell<bool> = const { Cell::new(false) };
}

/// Locked tracker slot. Clears the re-entry flag when dropped.
struct TrackerSlot {
    guard: MutexGuard<'static, Option<RouteTracker<BridgeProvider>>>,
}

impl Deref for TrackerSlot {
    type Target = Option<RouteTracker<BridgeProvider>>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for TrackerSlot {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for TrackerSlot {
    fn drop(&mut self) {
        HOLDS_TRACKER.with(|held| held.set(false));
    }
}

/// Lock the tracker slot. Returns None when called from a bridge callback
/// on the thread that already holds it.
fn lock_tracker() -> Option<TrackerSlot> {
    if HOLDS_TRACKER.with(Cell::get) {
        warn!("[RouteTrackerRust] Re-entrant call from a bridge callback refused");
        return None;
    }
    let guard = TRACKER.lock().unwrap_or_else(|p| p.into_inner());
    HOLDS_TRACKER.with(|held| held.set(true));
    Some(TrackerSlot { guard })
}

/// Run `f` against the global tracker and fold the outcome into a result record.
fn with_tracker<F>(action: &str, f: F) -> FfiTrackerResult
where
    F: FnOnce(&mut RouteTracker<BridgeProvider>) -> Result<Option<FixOutcome>>,
{
    let Some(mut slot) = lock_tracker() else {
        return FfiTrackerResult {
            success: false,
            status: None,
            fix_outcome: None,
            error: Some(format!("{} called from inside a bridge callback", action)),
        };
    };
    let Some(tracker) = slot.as_mut() else {
        warn!("[RouteTrackerRust] {} called without a tracker", action);
        return FfiTrackerResult {
            success: false,
            status: None,
            fix_outcome: None,
            error: Some("no tracker created".to_string()),
        };
    };

    match f(tracker) {
        Ok(fix_outcome) => FfiTrackerResult {
            success: true,
            status: Some(tracker.status()),
            fix_outcome,
            error: None,
        },
        Err(e) => {
            debug!("[RouteTrackerRust] {} failed: {}", action, e);
            FfiTrackerResult {
                success: false,
                status: Some(tracker.status()),
                fix_outcome: None,
                error: Some(e.to_string()),
            }
        }
    }
}

fn read_tracker<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&RouteTracker<BridgeProvider>) -> R,
{
    lock_tracker()?.as_ref().map(f)
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Install logging and start the completion recorder (call once at app startup).
#[uniffi::export]
pub fn ffi_init(completion: Box<dyn CompletionBridge>) -> bool {
    match lifecycle::init(BridgeStore { bridge: completion }) {
        Ok(()) => true,
        Err(e) => {
            info!("[RouteTrackerRust] Init skipped: {}", e);
            false
        }
    }
}

/// Drop the tracker and flush pending completion writes.
#[uniffi::export]
pub fn ffi_shutdown() {
    let Some(tracker) = lock_tracker().map(|mut slot| slot.take()) else {
        return;
    };
    drop(tracker);
    lifecycle::shutdown();
    info!("[RouteTrackerRust] Shut down");
}

// ============================================================================
// Tracking Session
// ============================================================================

/// Create a tracker in the Loading state, replacing any previous one.
#[uniffi::export]
pub fn ffi_tracker_create(config: TrackerConfig, location: Box<dyn LocationBridge>) -> bool {
    init_logging();
    let mut tracker = match RouteTracker::new(config, BridgeProvider { bridge: location }) {
        Ok(tracker) => tracker,
        Err(e) => {
            warn!("[RouteTrackerRust] Rejected tracker config: {}", e);
            return false;
        }
    };
    if let Some(sink) = lifecycle::completion_sink() {
        tracker = tracker.with_completion(sink);
    } else {
        warn!("[RouteTrackerRust] Tracker created before ffi_init; outcomes will not be stored");
    }

    let Some(previous) = lock_tracker().map(|mut slot| slot.replace(tracker)) else {
        return false;
    };
    if previous.is_some() {
        info!("[RouteTrackerRust] Replaced existing tracker");
    }
    true
}

/// Load the planned route from a backend row (JSON).
///
/// A row that fails to map is reported as a load failure; the host should
/// then drop the tracker.
#[uniffi::export]
pub fn ffi_tracker_load_route_json(row_json: String) -> FfiTrackerResult {
    let route = RouteRow::from_json(&row_json).and_then(PlannedRoute::try_from);
    with_tracker("load_route", |tracker| match route {
        Ok(route) => {
            info!(
                "[RouteTrackerRust] Loading route {} ({:.2} km)",
                route.id, route.total_distance_km
            );
            tracker.route_loaded(route).map(|_| None)
        }
        Err(e) => {
            tracker.route_load_failed(&e.to_string())?;
            Err(TrackerError::RouteLoad {
                message: e.to_string(),
            })
        }
    })
}

/// Report that the host could not fetch the route.
#[uniffi::export]
pub fn ffi_tracker_load_failed(message: String) -> FfiTrackerResult {
    with_tracker("load_failed", |tracker| {
        tracker.route_load_failed(&message).map(|_| None)
    })
}

#[uniffi::export]
pub fn ffi_tracker_start() -> FfiTrackerResult {
    with_tracker("start", |tracker| tracker.start().map(|_| None))
}

/// Deliver a location fix. `timestamp_ms` is Unix epoch milliseconds.
#[uniffi::export]
pub fn ffi_tracker_push_fix(
    latitude: f64,
    longitude: f64,
    speed_mps: Option<f64>,
    timestamp_ms: i64,
) -> FfiTrackerResult {
    with_tracker("push_fix", |tracker| {
        let timestamp = DateTime::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
            TrackerError::Validation {
                message: format!("timestamp {} out of range", timestamp_ms),
            }
        })?;
        let fix = LocationFix {
            coordinate: Coordinate::new(latitude, longitude),
            speed_mps,
            timestamp,
        };
        tracker.on_fix(&fix).map(Some)
    })
}

/// One-second timer tick. Returns whether elapsed time advanced.
#[uniffi::export]
pub fn ffi_tracker_tick() -> bool {
    let Some(mut slot) = lock_tracker() else {
        return false;
    };
    slot.as_mut()
        .map(|tracker| tracker.tick().unwrap_or(false))
        .unwrap_or(false)
}

#[uniffi::export]
pub fn ffi_tracker_pause() -> FfiTrackerResult {
    with_tracker("pause", |tracker| tracker.pause().map(|_| None))
}

#[uniffi::export]
pub fn ffi_tracker_resume() -> FfiTrackerResult {
    with_tracker("resume", |tracker| tracker.resume().map(|_| None))
}

/// Stop without arriving. The record is available from
/// [`ffi_tracker_completion_json`] afterwards.
#[uniffi::export]
pub fn ffi_tracker_stop(notes: Option<String>) -> FfiTrackerResult {
    with_tracker("stop", |tracker| tracker.abandon(notes).map(|_| None))
}

/// Clear the recorded path while Ready.
#[uniffi::export]
pub fn ffi_tracker_reset_path() -> FfiTrackerResult {
    with_tracker("reset_path", |tracker| tracker.reset_path().map(|_| None))
}

/// Release the subscription and timer. Safe to call repeatedly.
#[uniffi::export]
pub fn ffi_tracker_teardown() {
    with_tracker("teardown", |tracker| {
        tracker.teardown();
        Ok(None)
    });
}

/// Current status, or None if no tracker exists.
#[uniffi::export]
pub fn ffi_tracker_status() -> Option<Status> {
    read_tracker(|tracker| tracker.status())
}

/// Session snapshot as JSON (`{}` before a route is loaded).
#[uniffi::export]
pub fn ffi_tracker_snapshot_json() -> String {
    read_tracker(|tracker| tracker.snapshot())
        .flatten()
        .and_then(|s| serde_json::to_string(&s).ok())
        .unwrap_or_else(|| "{}".to_string())
}

/// Completion record as JSON once the session is Completed.
#[uniffi::export]
pub fn ffi_tracker_completion_json() -> Option<String> {
    read_tracker(|tracker| tracker.completion_record().cloned())
        .flatten()
        .and_then(|r| serde_json::to_string(&r).ok())
}

/// Recorded path as flat array [lat1, lng1, lat2, lng2, ...].
#[uniffi::export]
pub fn ffi_tracker_recorded_path() -> Vec<f64> {
    read_tracker(|tracker| {
        tracker
            .session()
            .map(|s| flatten(s.recorded_path()))
            .unwrap_or_default()
    })
    .unwrap_or_default()
}

// ============================================================================
// Import and Geometry
// ============================================================================

fn flatten(points: &[Coordinate]) -> Vec<f64> {
    points
        .iter()
        .flat_map(|c| [c.latitude, c.longitude])
        .collect()
}

/// Parse a GPX document.
#[uniffi::export]
pub fn ffi_import_gpx(content: String) -> FfiImportResult {
    init_logging();
    match crate::import_gpx(&content) {
        Ok(track) => {
            info!(
                "[RouteTrackerRust] import_gpx: {} points from {:?}",
                track.path.len(),
                track.source
            );
            FfiImportResult {
                latlngs: flatten(&track.path.points),
                distance_km: track.path.distance_km,
                name: track.name,
                success: true,
                error: None,
            }
        }
        Err(e) => {
            info!("[RouteTrackerRust] import_gpx failed: {}", e);
            FfiImportResult {
                latlngs: Vec::new(),
                distance_km: 0.0,
                name: None,
                success: false,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Haversine distance between two coordinates, in km.
#[uniffi::export]
pub fn ffi_distance_km(a: Coordinate, b: Coordinate) -> f64 {
    geo_utils::distance_km(&a, &b)
}

/// Total length of a path, in km.
#[uniffi::export]
pub fn ffi_path_length_km(points: Vec<Coordinate>) -> f64 {
    geo_utils::path_length_km(&points)
}

/// Estimated riding time in minutes for a distance at a difficulty.
#[uniffi::export]
pub fn ffi_estimate_duration_min(distance_km: f64, difficulty: Difficulty) -> u32 {
    estimate_duration_min(distance_km, difficulty)
}
