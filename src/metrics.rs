//! Derived progress metrics.
//!
//! Everything here is a pure function of a session snapshot and is evaluated
//! on demand, so there is no cached state to go stale.

use serde::{Deserialize, Serialize};

use crate::geo_utils::distance_km;
use crate::{Coordinate, TrackingSession};

/// Figures shown to the rider while following a route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteMetrics {
    pub distance_traveled_km: f64,
    pub distance_remaining_km: f64,
    /// 0-100
    pub progress_percent: f64,
    pub current_speed_kmh: f64,
    pub average_speed_kmh: f64,
    /// None when not moving; hosts show a placeholder
    pub eta_seconds: Option<f64>,
    /// None until the first fix is recorded
    pub distance_to_end_km: Option<f64>,
}

impl RouteMetrics {
    /// Compute all metrics for a session.
    pub fn from_session(session: &TrackingSession) -> Self {
        let planned = session.planned_route();
        let traveled = session.distance_traveled_km();
        let remaining = distance_remaining_km(planned.total_distance_km, traveled);
        let speed = session.current_speed_kmh();

        Self {
            distance_traveled_km: traveled,
            distance_remaining_km: remaining,
            progress_percent: progress_percent(planned.total_distance_km, traveled),
            current_speed_kmh: speed,
            average_speed_kmh: average_speed_kmh(traveled, session.elapsed_seconds()),
            eta_seconds: eta_seconds(remaining, speed),
            distance_to_end_km: session
                .last_position()
                .map(|last| distance_to_end_km(&last, &planned.end_point)),
        }
    }
}

/// Distance left to ride, never negative.
pub fn distance_remaining_km(total_km: f64, traveled_km: f64) -> f64 {
    (total_km - traveled_km).max(0.0)
}

/// Share of the planned distance covered, capped at 100. Zero-length routes report 0.
pub fn progress_percent(total_km: f64, traveled_km: f64) -> f64 {
    if total_km <= 0.0 {
        return 0.0;
    }
    (100.0 * traveled_km / total_km).min(100.0)
}

/// Time to finish at the current speed, in seconds.
pub fn eta_seconds(remaining_km: f64, speed_kmh: f64) -> Option<f64> {
    if speed_kmh > 0.0 {
        Some(remaining_km / speed_kmh * 3600.0)
    } else {
        None
    }
}

/// Average moving speed over the elapsed session time.
pub fn average_speed_kmh(traveled_km: f64, elapsed_seconds: u64) -> f64 {
    if elapsed_seconds == 0 {
        return 0.0;
    }
    traveled_km / (elapsed_seconds as f64 / 3600.0)
}

/// Straight-line distance from the rider to the planned end point.
pub fn distance_to_end_km(position: &Coordinate, end_point: &Coordinate) -> f64 {
    distance_km(position, end_point)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_never_negative() {
        assert_eq!(distance_remaining_km(5.0, 2.0), 3.0);
        assert_eq!(distance_remaining_km(5.0, 6.5), 0.0);
    }

    #[test]
    fn test_progress_capped() {
        assert_eq!(progress_percent(10.0, 2.5), 25.0);
        assert_eq!(progress_percent(10.0, 12.0), 100.0);
        assert_eq!(progress_percent(0.0, 3.0), 0.0);
    }

    #[test]
    fn test_eta() {
        assert_eq!(eta_seconds(3.0, 18.0), Some(600.0));
        assert_eq!(eta_seconds(3.0, 0.0), None);
    }

    #[test]
    fn test_average_speed() {
        assert_eq!(average_speed_kmh(5.0, 0), 0.0);
        assert!((average_speed_kmh(5.0, 1200) - 15.0).abs() < 1e-9);
    }
}
