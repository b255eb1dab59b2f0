//! Engine configuration.
//!
//! The gating and arrival thresholds are tunable rather than hardcoded; the
//! defaults match the values the mobile app ships with.

use serde::{Deserialize, Serialize};

use crate::{Result, TrackerError};

/// Accuracy tier requested from the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum AccuracyTier {
    Balanced,
    High,
    #[default]
    BestForNavigation,
}

/// Thresholds a fix must clear, relative to the last accepted fix, to be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GateConfig {
    /// Minimum time since the last accepted fix.
    /// Default: 2.0 seconds for live tracking
    pub min_interval_secs: f64,

    /// Minimum displacement from the last accepted fix.
    /// Default: 5.0 meters for live tracking (GPS jitter is typically 3-5m)
    pub min_distance_m: f64,
}

impl GateConfig {
    /// Gate used while following a planned route.
    pub fn tracking() -> Self {
        Self {
            min_interval_secs: 2.0,
            min_distance_m: 5.0,
        }
    }

    /// Gate used while recording a new route; sparser to keep drafts small.
    pub fn recording() -> Self {
        Self {
            min_interval_secs: 3.0,
            min_distance_m: 10.0,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.min_interval_secs.is_finite() || self.min_interval_secs < 0.0 {
            return Err(TrackerError::Config {
                message: format!("{}.min_interval_secs must be a non-negative number", name),
            });
        }
        if !self.min_distance_m.is_finite() || self.min_distance_m < 0.0 {
            return Err(TrackerError::Config {
                message: format!("{}.min_distance_m must be a non-negative number", name),
            });
        }
        Ok(())
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::tracking()
    }
}

/// Subscription parameters handed to the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct ProviderConfig {
    pub accuracy: AccuracyTier,
    pub min_interval_ms: u64,
    pub min_distance_m: f64,
}

/// Configuration for tracking sessions and route authoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct TrackerConfig {
    /// Fix gate for live tracking.
    pub tracking_gate: GateConfig,

    /// Fix gate for GPS recording in the route builder.
    pub recording_gate: GateConfig,

    /// Distance to the planned end point that completes a session.
    /// Default: 0.05 km (50 m)
    pub arrival_threshold_km: f64,

    /// Accuracy tier requested from the provider.
    /// Default: best-for-navigation
    pub accuracy: AccuracyTier,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracking_gate: GateConfig::tracking(),
            recording_gate: GateConfig::recording(),
            arrival_threshold_km: 0.05,
            accuracy: AccuracyTier::default(),
        }
    }
}

impl TrackerConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackerConfig =
            serde_json::from_str(json).map_err(|e| TrackerError::Config {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every threshold is finite and usable.
    pub fn validate(&self) -> Result<()> {
        self.tracking_gate.validate("tracking_gate")?;
        self.recording_gate.validate("recording_gate")?;
        if !self.arrival_threshold_km.is_finite() || self.arrival_threshold_km <= 0.0 {
            return Err(TrackerError::Config {
                message: "arrival_threshold_km must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Provider subscription parameters for live tracking.
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            accuracy: self.accuracy,
            min_interval_ms: (self.tracking_gate.min_interval_secs * 1000.0).round() as u64,
            min_distance_m: self.tracking_gate.min_distance_m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.arrival_threshold_km, 0.05);
        assert_eq!(config.tracking_gate.min_interval_secs, 2.0);
        assert_eq!(config.recording_gate.min_distance_m, 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = TrackerConfig::from_json(r#"{"arrival_threshold_km": 0.1}"#).unwrap();
        assert_eq!(config.arrival_threshold_km, 0.1);
        assert_eq!(config.tracking_gate, GateConfig::tracking());
        assert_eq!(config.accuracy, AccuracyTier::BestForNavigation);
    }

    #[test]
    fn test_from_json_accuracy() {
        let config = TrackerConfig::from_json(r#"{"accuracy": "balanced"}"#).unwrap();
        assert_eq!(config.accuracy, AccuracyTier::Balanced);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            TrackerConfig::from_json(r#"{"arrival_threshold_km": 0.0}"#),
            Err(TrackerError::Config { .. })
        ));
        assert!(matches!(
            TrackerConfig::from_json(
                r#"{"tracking_gate": {"min_interval_secs": -1.0, "min_distance_m": 5.0}}"#
            ),
            Err(TrackerError::Config { .. })
        ));
        assert!(matches!(
            TrackerConfig::from_json("not json"),
            Err(TrackerError::Config { .. })
        ));
    }

    #[test]
    fn test_provider_config() {
        let provider = TrackerConfig::default().provider_config();
        assert_eq!(provider.min_interval_ms, 2000);
        assert_eq!(provider.min_distance_m, 5.0);
    }
}
