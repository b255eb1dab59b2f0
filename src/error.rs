//! Unified error handling for the route-tracker library.
//!
//! Every fallible engine operation returns [`TrackerError`]. Collaborator
//! failures (completion store, remote backend) are logged and swallowed by the
//! engine and never surface through this type during tracking.

use std::fmt;

use thiserror::Error;

use crate::tracker::Status;

/// What an action was refused against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// A tracking session in this status
    Session(Status),
    /// A path recording is in progress
    Recording,
    /// No path recording is in progress
    NotRecording,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKind::Session(status) => write!(f, "{:?}", status),
            StateKind::Recording => f.write_str("recording"),
            StateKind::NotRecording => f.write_str("not recording"),
        }
    }
}

/// Unified error type for route-tracker operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackerError {
    /// The location permission was refused before tracking could start
    #[error("Location permission denied")]
    PermissionDenied,

    /// The requested action is not legal in the current status
    #[error("Cannot {action} while {state}")]
    InvalidState {
        state: StateKind,
        action: &'static str,
    },

    /// A path has too few usable points
    #[error("Path has {point_count} points, minimum {minimum_required} required")]
    InsufficientPoints {
        point_count: usize,
        minimum_required: usize,
    },

    /// Coordinates are non-finite or out of range
    #[error("Invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    /// Input rejected at an API boundary before any mutation
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// A backend row could not be mapped into a domain object
    #[error("Mapping failed for field '{field}': {message}")]
    Mapping { field: String, message: String },

    /// A structured document could not be parsed
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// The planned route failed to load
    #[error("Route load failed: {message}")]
    RouteLoad { message: String },

    /// Persistence/storage error
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Location provider error
    #[error("Location provider error: {message}")]
    Provider { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl TrackerError {
    pub(crate) fn invalid_state(status: Status, action: &'static str) -> Self {
        TrackerError::InvalidState {
            state: StateKind::Session(status),
            action,
        }
    }

    /// Refusal of a path recording action.
    pub(crate) fn recording_state(recording: bool, action: &'static str) -> Self {
        let state = if recording {
            StateKind::Recording
        } else {
            StateKind::NotRecording
        };
        TrackerError::InvalidState { state, action }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        TrackerError::Validation {
            message: message.into(),
        }
    }
}

/// Result type alias for route-tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Extension trait for converting Option to TrackerError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a mapping error for a missing field.
    fn ok_or_mapping(self, field: &str) -> Result<T>;

    /// Convert Option to Result with an insufficient points error.
    fn ok_or_insufficient_points(self, point_count: usize, minimum: usize) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_mapping(self, field: &str) -> Result<T> {
        self.ok_or_else(|| TrackerError::Mapping {
            field: field.to_string(),
            message: "missing".to_string(),
        })
    }

    fn ok_or_insufficient_points(self, point_count: usize, minimum: usize) -> Result<T> {
        self.ok_or(TrackerError::InsufficientPoints {
            point_count,
            minimum_required: minimum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackerError::InsufficientPoints {
            point_count: 1,
            minimum_required: 2,
        };
        assert!(err.to_string().contains("1 points"));

        let err = TrackerError::invalid_state(Status::Completed, "pause");
        assert_eq!(err.to_string(), "Cannot pause while Completed");

        let err = TrackerError::recording_state(true, "reset the path");
        assert_eq!(err.to_string(), "Cannot reset the path while recording");
        let err = TrackerError::recording_state(false, "stop recording");
        assert_eq!(err.to_string(), "Cannot stop recording while not recording");
    }

    #[test]
    fn test_option_ext() {
        let none: Option<f64> = None;
        let result = none.ok_or_mapping("distance_km");
        assert!(matches!(
            result,
            Err(TrackerError::Mapping { ref field, .. }) if field == "distance_km"
        ));

        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_insufficient_points(0, 2),
            Err(TrackerError::InsufficientPoints { .. })
        ));
    }
}
