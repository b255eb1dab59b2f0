//! # Route Tracker
//!
//! Session state machine for following a planned route.
//!
//! ## Lifecycle
//!
//! ```text
//! Loading --route loaded--> Ready --start--> Active <--pause/resume--> Paused
//!                                               |                        |
//!                                               +--arrive/stop--> Completed <--stop--+
//! ```
//!
//! All events (fixes, timer ticks, user actions) go through `&mut self`, so
//! they are applied one at a time in arrival order. [`crate::SessionActor`]
//! runs a tracker on its own thread for hosts that deliver events from
//! several sources.
//!
//! Completed is terminal: any further mutation fails with
//! [`TrackerError::InvalidState`]. Hosts observe changes through
//! [`RouteTracker::subscribe_updates`] rather than reading internal state.

use std::sync::mpsc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::completion::SessionKey;
use crate::geo_utils::distance_km;
use crate::{
    CompletionRecord, CompletionSink, Coordinate, LocationFix, PathRecorder, PlannedRoute,
    ProviderConfig, Result, RouteMetrics, SessionOutcome, TrackerConfig, TrackerError,
};

// ============================================================================
// Status and transitions
// ============================================================================

/// Tracking session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum Status {
    Loading,
    Ready,
    Active,
    Paused,
    Completed,
}

/// Status-changing actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RouteLoaded,
    Start,
    Pause,
    Resume,
    Stop,
    Arrive,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::RouteLoaded => "load a route",
            Action::Start => "start",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Stop => "stop",
            Action::Arrive => "arrive",
        }
    }
}

impl Status {
    /// Pure transition table.
    ///
    /// Pausing an already paused session is a no-op rather than an error.
    pub fn transition(self, action: Action) -> Result<Status> {
        use Action::*;
        use Status::*;

        match (self, action) {
            (Loading, RouteLoaded) => Ok(Ready),
            (Ready, Start) => Ok(Active),
            (Active, Pause) | (Paused, Pause) => Ok(Paused),
            (Paused, Resume) => Ok(Active),
            (Active, Stop) | (Paused, Stop) => Ok(Completed),
            (Active, Arrive) => Ok(Completed),
            (status, action) => Err(TrackerError::invalid_state(status, action.name())),
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Status::Completed
    }
}

// ============================================================================
// Location provider
// ============================================================================

/// Handle for a live fix subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Source of location fixes (hardware GPS, simulator, replay).
///
/// Fixes themselves are delivered to the tracker as [`TrackerCommand::Fix`]
/// (or [`RouteTracker::on_fix`]); the provider only manages permission and
/// the subscription.
pub trait LocationProvider {
    /// Ask for location permission. Returns whether it was granted.
    fn request_permission(&mut self) -> bool;

    /// Start delivering fixes with the given parameters.
    fn subscribe(&mut self, config: &ProviderConfig) -> Result<SubscriptionId>;

    /// Stop delivering fixes. Unknown ids are ignored.
    fn unsubscribe(&mut self, id: SubscriptionId);
}

/// Provider for hosts that push fixes themselves, e.g. replaying a file.
///
/// Also records subscription activity, which makes it useful in tests.
#[derive(Debug, Clone, Default)]
pub struct ManualProvider {
    permission_granted: bool,
    next_id: u64,
    active: Vec<SubscriptionId>,
    subscribe_count: usize,
    last_config: Option<ProviderConfig>,
}

impl ManualProvider {
    pub fn granted() -> Self {
        Self {
            permission_granted: true,
            ..Self::default()
        }
    }

    pub fn denied() -> Self {
        Self::default()
    }

    pub fn set_permission(&mut self, granted: bool) {
        self.permission_granted = granted;
    }

    /// Number of subscriptions currently open.
    pub fn active_subscriptions(&self) -> usize {
        self.active.len()
    }

    /// Number of subscribe calls ever made.
    pub fn subscribe_count(&self) -> usize {
        self.subscribe_count
    }

    pub fn last_config(&self) -> Option<&ProviderConfig> {
        self.last_config.as_ref()
    }
}

impl LocationProvider for ManualProvider {
    fn request_permission(&mut self) -> bool {
        self.permission_granted
    }

    fn subscribe(&mut self, config: &ProviderConfig) -> Result<SubscriptionId> {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.active.push(id);
        self.subscribe_count += 1;
        self.last_config = Some(*config);
        Ok(id)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.active.retain(|a| *a != id);
    }
}

// ============================================================================
// Session
// ============================================================================

/// State of one tracking session. Owned by the tracker and only changed
/// through its transitions.
#[derive(Debug, Clone)]
pub struct TrackingSession {
    status: Status,
    recorder: PathRecorder,
    started_at: Option<DateTime<Utc>>,
    elapsed_seconds: u64,
    current_speed_kmh: f64,
    planned_route: PlannedRoute,
}

impl TrackingSession {
    fn new(planned_route: PlannedRoute, config: &TrackerConfig) -> Self {
        Self {
            status: Status::Ready,
            recorder: PathRecorder::new(config.tracking_gate),
            started_at: None,
            elapsed_seconds: 0,
            current_speed_kmh: 0.0,
            planned_route,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn recorded_path(&self) -> &[Coordinate] {
        self.recorder.points()
    }

    pub fn distance_traveled_km(&self) -> f64 {
        self.recorder.distance_km()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn current_speed_kmh(&self) -> f64 {
        self.current_speed_kmh
    }

    pub fn planned_route(&self) -> &PlannedRoute {
        &self.planned_route
    }

    /// Position of the last recorded fix.
    pub fn last_position(&self) -> Option<Coordinate> {
        self.recorder.last_fix().map(|f| f.coordinate)
    }

    pub fn metrics(&self) -> RouteMetrics {
        RouteMetrics::from_session(self)
    }
}

/// Serializable view of a session for hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: Status,
    pub route_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
    pub point_count: usize,
    pub metrics: RouteMetrics,
    pub outcome: Option<SessionOutcome>,
}

// ============================================================================
// Events
// ============================================================================

/// Every input the tracker accepts, for hosts that queue events.
#[derive(Debug, Clone)]
pub enum TrackerCommand {
    RouteLoaded(PlannedRoute),
    LoadFailed(String),
    Start,
    Fix(LocationFix),
    Tick,
    Pause,
    Resume,
    Stop { notes: Option<String> },
    Teardown,
}

/// Change notifications sent to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerUpdate {
    StatusChanged { from: Status, to: Status },
    Progress(SessionSnapshot),
    Finished(CompletionRecord),
    LoadFailed { message: String },
}

/// What happened to a delivered fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum FixOutcome {
    /// Appended to the recorded path
    Accepted,
    /// Malformed or inside the gate
    Rejected,
    /// No live subscription (not active); discarded
    Dropped,
    /// Within the arrival threshold; session completed
    Arrived,
}

// ============================================================================
// Tracker
// ============================================================================

/// Drives one tracking session.
pub struct RouteTracker<P: LocationProvider> {
    config: TrackerConfig,
    provider: P,
    session: Option<TrackingSession>,

    // Exclusively owned; at most one at a time
    subscription: Option<SubscriptionId>,
    timer_running: bool,

    completion: Option<CompletionSink>,
    completion_key: Option<SessionKey>,
    outcome: Option<SessionOutcome>,
    finalized: Option<CompletionRecord>,

    listeners: Vec<mpsc::Sender<TrackerUpdate>>,
}

impl<P: LocationProvider> RouteTracker<P> {
    /// Create a tracker in the Loading state.
    ///
    /// Fails with a `Config` error if any threshold in `config` is unusable.
    pub fn new(config: TrackerConfig, provider: P) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            provider,
            session: None,
            subscription: None,
            timer_running: false,
            completion: None,
            completion_key: None,
            outcome: None,
            finalized: None,
            listeners: Vec::new(),
        })
    }

    /// Send session outcomes to a completion recorder.
    pub fn with_completion(mut self, sink: CompletionSink) -> Self {
        self.completion = Some(sink);
        self
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn status(&self) -> Status {
        self.session
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(Status::Loading)
    }

    pub fn session(&self) -> Option<&TrackingSession> {
        self.session.as_ref()
    }

    pub fn metrics(&self) -> Option<RouteMetrics> {
        self.session.as_ref().map(RouteMetrics::from_session)
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.session.as_ref().map(|s| SessionSnapshot {
            status: s.status,
            route_id: s.planned_route.id.clone(),
            started_at: s.started_at,
            elapsed_seconds: s.elapsed_seconds,
            point_count: s.recorder.len(),
            metrics: s.metrics(),
            outcome: self.outcome,
        })
    }

    /// Active and at least one fix recorded.
    pub fn is_live(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.status == Status::Active && !s.recorder.is_empty())
            .unwrap_or(false)
    }

    pub fn timer_running(&self) -> bool {
        self.timer_running
    }

    pub fn has_subscription(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome
    }

    /// Record emitted on entry to Completed.
    pub fn completion_record(&self) -> Option<&CompletionRecord> {
        self.finalized.as_ref()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Receive change notifications. Dropped receivers are pruned on the next send.
    pub fn subscribe_updates(&mut self) -> mpsc::Receiver<TrackerUpdate> {
        let (tx, rx) = mpsc::channel();
        self.listeners.push(tx);
        rx
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Apply a queued command.
    pub fn apply(&mut self, command: TrackerCommand) -> Result<()> {
        match command {
            TrackerCommand::RouteLoaded(route) => self.route_loaded(route),
            TrackerCommand::LoadFailed(message) => self.route_load_failed(&message),
            TrackerCommand::Start => self.start(),
            TrackerCommand::Fix(fix) => self.on_fix(&fix).map(|_| ()),
            TrackerCommand::Tick => self.tick().map(|_| ()),
            TrackerCommand::Pause => self.pause(),
            TrackerCommand::Resume => self.resume(),
            TrackerCommand::Stop { notes } => self.abandon(notes).map(|_| ()),
            TrackerCommand::Teardown => {
                self.teardown();
                Ok(())
            }
        }
    }

    /// Loading -> Ready once the planned route is available.
    pub fn route_loaded(&mut self, route: PlannedRoute) -> Result<()> {
        let next = self.status().transition(Action::RouteLoaded)?;

        if let Some(bounds) = route.bounds() {
            let center = bounds.center();
            debug!(
                "[RouteTracker] Route '{}' bounds centered at ({:.5}, {:.5})",
                route.id, center.latitude, center.longitude
            );
        }
        info!(
            "[RouteTracker] Route '{}' loaded ({} points, {:.2} km)",
            route.id,
            route.path.len(),
            route.total_distance_km
        );

        let mut session = TrackingSession::new(route, &self.config);
        session.status = next;
        self.session = Some(session);
        self.notify(TrackerUpdate::StatusChanged {
            from: Status::Loading,
            to: next,
        });
        Ok(())
    }

    /// The route could not be loaded. Nothing is kept; the host should drop the tracker.
    pub fn route_load_failed(&mut self, message: &str) -> Result<()> {
        let status = self.status();
        if status != Status::Loading {
            return Err(TrackerError::invalid_state(status, "fail loading"));
        }
        warn!("[RouteTracker] Route load failed: {}", message);
        self.notify(TrackerUpdate::LoadFailed {
            message: message.to_string(),
        });
        Ok(())
    }

    /// Ready -> Active. Requires location permission.
    pub fn start(&mut self) -> Result<()> {
        let from = self.status();
        let next = from.transition(Action::Start)?;

        if !self.provider.request_permission() {
            warn!("[RouteTracker] Location permission denied");
            return Err(TrackerError::PermissionDenied);
        }
        self.open_subscription()?;

        let summary = match self.session.as_mut() {
            Some(session) => {
                session.started_at = Some(Utc::now());
                session.recorder.begin();
                session.status = next;
                session.planned_route.summary()
            }
            None => return Err(TrackerError::invalid_state(from, Action::Start.name())),
        };
        self.timer_running = true;

        if let Some(sink) = &self.completion {
            self.completion_key = Some(sink.create(summary));
        }

        info!("[RouteTracker] Session started");
        self.notify(TrackerUpdate::StatusChanged { from, to: next });
        Ok(())
    }

    /// Process a location fix.
    ///
    /// Fixes outside Active are dropped. A valid fix within the arrival
    /// threshold of the planned end point completes the session.
    pub fn on_fix(&mut self, fix: &LocationFix) -> Result<FixOutcome> {
        let threshold = self.config.arrival_threshold_km;
        let session = match self.session.as_mut() {
            Some(s) if s.status == Status::Active => s,
            Some(s) if s.status == Status::Completed => {
                return Err(TrackerError::invalid_state(Status::Completed, "record a fix"));
            }
            _ => {
                debug!("[RouteTracker] Dropped fix, no live subscription");
                return Ok(FixOutcome::Dropped);
            }
        };

        let accepted = session.recorder.accept(fix);
        if accepted {
            session.current_speed_kmh = fix.speed_kmh();
        }

        if fix.coordinate.is_valid() {
            let to_end = distance_km(&fix.coordinate, &session.planned_route.end_point);
            if to_end < threshold {
                info!(
                    "[RouteTracker] Arrived ({:.0} m from end point)",
                    to_end * 1000.0
                );
                self.finish(Action::Arrive, SessionOutcome::Completed, None)?;
                return Ok(FixOutcome::Arrived);
            }
        }

        if accepted {
            self.notify_progress();
            Ok(FixOutcome::Accepted)
        } else {
            Ok(FixOutcome::Rejected)
        }
    }

    /// One-second timer tick. Returns whether elapsed time advanced.
    pub fn tick(&mut self) -> Result<bool> {
        let timer_running = self.timer_running;
        match self.session.as_mut() {
            Some(s) if s.status == Status::Completed => {
                Err(TrackerError::invalid_state(Status::Completed, "tick"))
            }
            Some(s) if s.status == Status::Active && timer_running => {
                s.elapsed_seconds += 1;
                self.notify_progress();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Active -> Paused. Pausing twice is a no-op.
    pub fn pause(&mut self) -> Result<()> {
        let from = self.status();
        let next = from.transition(Action::Pause)?;

        self.close_subscription();
        self.timer_running = false;
        self.set_status(next);

        if from != next {
            info!("[RouteTracker] Session paused");
            self.notify(TrackerUpdate::StatusChanged { from, to: next });
        }
        Ok(())
    }

    /// Paused -> Active, continuing the elapsed time.
    pub fn resume(&mut self) -> Result<()> {
        let from = self.status();
        let next = from.transition(Action::Resume)?;

        self.open_subscription()?;
        self.timer_running = true;
        self.set_status(next);

        info!("[RouteTracker] Session resumed");
        self.notify(TrackerUpdate::StatusChanged { from, to: next });
        Ok(())
    }

    /// Stop without arriving. Same as [`abandon`](Self::abandon) without notes.
    pub fn stop(&mut self) -> Result<CompletionRecord> {
        self.abandon(None)
    }

    /// Active/Paused -> Completed with outcome "abandoned".
    pub fn abandon(&mut self, notes: Option<String>) -> Result<CompletionRecord> {
        self.finish(Action::Stop, SessionOutcome::Abandoned, notes)
    }

    /// Clear the recorded path before starting. Only legal while Ready.
    pub fn reset_path(&mut self) -> Result<()> {
        let status = self.status();
        match self.session.as_mut() {
            Some(s) if s.status == Status::Ready => s.recorder.reset(),
            _ => Err(TrackerError::invalid_state(status, "reset the path")),
        }
    }

    /// Release the subscription and timer, e.g. when the host screen goes away.
    ///
    /// An active session is paused so elapsed time stays consistent. Safe to
    /// call any number of times and in any state.
    pub fn teardown(&mut self) {
        self.close_subscription();
        self.timer_running = false;

        if self.status() == Status::Active {
            self.set_status(Status::Paused);
            debug!("[RouteTracker] Teardown paused active session");
            self.notify(TrackerUpdate::StatusChanged {
                from: Status::Active,
                to: Status::Paused,
            });
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn finish(
        &mut self,
        action: Action,
        outcome: SessionOutcome,
        notes: Option<String>,
    ) -> Result<CompletionRecord> {
        let from = self.status();
        let next = from.transition(action)?;

        self.close_subscription();
        self.timer_running = false;

        let record = match self.session.as_mut() {
            Some(session) => {
                session.recorder.finish();
                session.status = next;
                CompletionRecord {
                    duration_minutes: session.elapsed_seconds / 60,
                    distance_km: session.recorder.distance_km(),
                    status: outcome,
                    notes,
                    path: session.recorder.points().to_vec(),
                }
            }
            None => return Err(TrackerError::invalid_state(from, action.name())),
        };

        if let (Some(sink), Some(key)) = (&self.completion, self.completion_key) {
            sink.finalize(key, record.clone());
        }

        info!(
            "[RouteTracker] Session {} after {} min, {:.2} km",
            outcome.as_str(),
            record.duration_minutes,
            record.distance_km
        );

        self.outcome = Some(outcome);
        self.finalized = Some(record.clone());
        self.notify(TrackerUpdate::StatusChanged { from, to: next });
        self.notify(TrackerUpdate::Finished(record.clone()));
        Ok(record)
    }

    fn set_status(&mut self, status: Status) {
        if let Some(session) = self.session.as_mut() {
            session.status = status;
        }
    }

    /// Subscribe, releasing any stale subscription first.
    fn open_subscription(&mut self) -> Result<()> {
        self.close_subscription();
        let id = self.provider.subscribe(&self.config.provider_config())?;
        debug!("[RouteTracker] Subscribed to fixes ({:?})", id);
        self.subscription = Some(id);
        Ok(())
    }

    fn close_subscription(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.provider.unsubscribe(id);
            debug!("[RouteTracker] Unsubscribed from fixes ({:?})", id);
        }
    }

    fn notify_progress(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        if let Some(snapshot) = self.snapshot() {
            self.notify(TrackerUpdate::Progress(snapshot));
        }
    }

    fn notify(&mut self, update: TrackerUpdate) {
        self.listeners.retain(|tx| tx.send(update.clone()).is_ok());
    }
}

impl<P: LocationProvider> Drop for RouteTracker<P> {
    fn drop(&mut self) {
        self.close_subscription();
    }
}

// ============================================================================
// Tests
// ============================================================================
