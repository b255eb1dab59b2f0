//! Planned routes and the mapping of backend rows into them.
//!
//! Backend rows arrive as loosely-shaped JSON. They are deserialized into
//! [`RouteRow`] and then validated field by field; anything missing or out of
//! range fails with [`TrackerError::Mapping`] instead of defaulting silently.

use serde::{Deserialize, Serialize};

use crate::geo_utils::{compute_bounds, path_length_km};
use crate::{Bounds, Coordinate, OptionExt, Result, RoutePath, TrackerError};

/// A route the rider follows during a tracking session. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub id: String,
    pub name: String,
    pub path: Vec<Coordinate>,
    pub start_point: Coordinate,
    pub end_point: Coordinate,
    pub total_distance_km: f64,
}

impl PlannedRoute {
    /// Create a planned route, measuring its distance from the geometry.
    pub fn from_points(id: &str, name: &str, points: Vec<Coordinate>) -> Result<Self> {
        let distance = path_length_km(&points);
        Self::with_distance(id, name, points, distance)
    }

    /// Create a planned route with a published distance.
    ///
    /// The published figure may differ from the geometry (e.g. when the
    /// path is simplified); progress is measured against it.
    pub fn with_distance(
        id: &str,
        name: &str,
        points: Vec<Coordinate>,
        total_distance_km: f64,
    ) -> Result<Self> {
        if points.len() < 2 {
            return Err(TrackerError::InsufficientPoints {
                point_count: points.len(),
                minimum_required: 2,
            });
        }
        for p in &points {
            p.validated()?;
        }
        if !total_distance_km.is_finite() || total_distance_km < 0.0 {
            return Err(TrackerError::validation(format!(
                "route distance must be a non-negative number, got {}",
                total_distance_km
            )));
        }

        let start_point = points[0];
        let end_point = points[points.len() - 1];
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            path: points,
            start_point,
            end_point,
            total_distance_km,
        })
    }

    /// Build a planned route from an imported or recorded path.
    pub fn from_path(id: &str, name: &str, path: RoutePath) -> Result<Self> {
        Self::with_distance(id, name, path.points, path.distance_km)
    }

    /// Bounding box used to fit the map to the route.
    pub fn bounds(&self) -> Option<Bounds> {
        compute_bounds(&self.path)
    }

    pub fn summary(&self) -> RouteSummary {
        RouteSummary {
            route_id: self.id.clone(),
            name: self.name.clone(),
            total_distance_km: self.total_distance_km,
        }
    }
}

/// The part of a route the completion store needs to open a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct RouteSummary {
    pub route_id: String,
    pub name: String,
    pub total_distance_km: f64,
}

// ============================================================================
// Backend DTOs
// ============================================================================

/// A route row as returned by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteRow {
    pub id: Option<String>,
    pub name: Option<String>,
    pub distance_km: Option<f64>,
    pub coordinates: Option<Vec<CoordinateRow>>,
}

/// A coordinate as stored in a backend row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinateRow {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl CoordinateRow {
    fn map(&self, index: usize) -> Result<Coordinate> {
        let latitude = self
            .latitude
            .ok_or_mapping(&format!("coordinates[{}].latitude", index))?;
        let longitude = self
            .longitude
            .ok_or_mapping(&format!("coordinates[{}].longitude", index))?;
        Coordinate::new(latitude, longitude)
            .validated()
            .map_err(|e| TrackerError::Mapping {
                field: format!("coordinates[{}]", index),
                message: e.to_string(),
            })
    }
}

impl RouteRow {
    /// Parse a backend row from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TrackerError::Mapping {
            field: "<row>".to_string(),
            message: e.to_string(),
        })
    }
}

impl TryFrom<RouteRow> for PlannedRoute {
    type Error = TrackerError;

    fn try_from(row: RouteRow) -> Result<Self> {
        let id = row.id.filter(|id| !id.is_empty()).ok_or_mapping("id")?;
        let name = row.name.ok_or_mapping("name")?;
        let rows = row.coordinates.ok_or_mapping("coordinates")?;

        let points = rows
            .iter()
            .enumerate()
            .map(|(i, c)| c.map(i))
            .collect::<Result<Vec<_>>>()?;

        match row.distance_km {
            Some(distance) if !distance.is_finite() || distance < 0.0 => {
                Err(TrackerError::Mapping {
                    field: "distance_km".to_string(),
                    message: format!("invalid distance {}", distance),
                })
            }
            Some(distance) => PlannedRoute::with_distance(&id, &name, points, distance),
            None => PlannedRoute::from_points(&id, &name, points),
        }
    }
}
