//! GPX import.
//!
//! Point lists are tried in priority order: track points, then route points,
//! then waypoints. The first kind with any points is used on its own; lower
//! priority kinds are never merged in. Document order is preserved.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{Coordinate, Result, RoutePath, TrackerError};

/// Minimum number of points for a usable path.
pub const MIN_IMPORT_POINTS: usize = 2;

/// Which point list of the document produced the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointSource {
    TrackPoints,
    RoutePoints,
    Waypoints,
}

/// A path read from a GPX document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedTrack {
    pub path: RoutePath,
    pub source: PointSource,
    /// Track name, route name or metadata name, in that order
    pub name: Option<String>,
}

/// Parse GPX bytes. Fails on invalid UTF-8.
pub fn import_gpx_bytes(content: &[u8]) -> Result<ImportedTrack> {
    let text = std::str::from_utf8(content).map_err(|e| TrackerError::Parse {
        message: format!("Invalid UTF-8: {}", e),
    })?;
    import_gpx(text)
}

/// Parse a GPX document into a path.
///
/// # Example
///
/// ```rust
/// use route_tracker::{import_gpx, PointSource};
///
/// let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
/// <gpx version="1.1" creator="test">
///   <rte>
///     <rtept lat="20.9673" lon="-89.5925"></rtept>
///     <rtept lat="20.9773" lon="-89.5925"></rtept>
///   </rte>
/// </gpx>"#;
///
/// let track = import_gpx(doc).unwrap();
/// assert_eq!(track.source, PointSource::RoutePoints);
/// assert!((track.path.distance_km - 1.11).abs() < 0.02);
/// ```
pub fn import_gpx(document: &str) -> Result<ImportedTrack> {
    let gpx_data: gpx::Gpx = gpx::read(document.as_bytes()).map_err(|e| TrackerError::Parse {
        message: format!("GPX parse error: {}", e),
    })?;

    let to_coordinate = |wp: &gpx::Waypoint| {
        let p = wp.point();
        Coordinate::new(p.y(), p.x())
    };

    let track_points: Vec<Coordinate> = gpx_data
        .tracks
        .iter()
        .flat_map(|t| t.segments.iter())
        .flat_map(|s| s.points.iter())
        .map(to_coordinate)
        .collect();

    let (points, source) = if !track_points.is_empty() {
        (track_points, PointSource::TrackPoints)
    } else {
        let route_points: Vec<Coordinate> = gpx_data
            .routes
            .iter()
            .flat_map(|r| r.points.iter())
            .map(to_coordinate)
            .collect();
        if !route_points.is_empty() {
            (route_points, PointSource::RoutePoints)
        } else {
            let waypoints = gpx_data.waypoints.iter().map(to_coordinate).collect();
            (waypoints, PointSource::Waypoints)
        }
    };

    debug!("[Importer] {} points from {:?}", points.len(), source);

    if points.len() < MIN_IMPORT_POINTS {
        return Err(TrackerError::InsufficientPoints {
            point_count: points.len(),
            minimum_required: MIN_IMPORT_POINTS,
        });
    }
    for p in &points {
        p.validated()?;
    }

    let name = gpx_data
        .tracks
        .first()
        .and_then(|t| t.name.clone())
        .or_else(|| gpx_data.routes.first().and_then(|r| r.name.clone()))
        .or_else(|| gpx_data.metadata.as_ref().and_then(|m| m.name.clone()));

    let path = RoutePath::from_points(points);
    info!(
        "[Importer] Imported {} points ({:.2} km)",
        path.len(),
        path.distance_km
    );

    Ok(ImportedTrack { path, source, name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::path_length_km;

    const TRACK_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test">
  <trk>
    <name>Test Route</name>
    <trkseg>
      <trkpt lat="20.9673" lon="-89.5925"><ele>10</ele></trkpt>
      <trkpt lat="20.9773" lon="-89.5925"><ele>12</ele></trkpt>
      <trkpt lat="20.9873" lon="-89.5900"><ele>11</ele></trkpt>
    </trkseg>
  </trk>
  <rte>
    <rtept lat="21.5" lon="-88.0"></rtept>
    <rtept lat="21.6" lon="-88.0"></rtept>
  </rte>
</gpx>"#;

    #[test]
    fn test_track_points_win() {
        let track = import_gpx(TRACK_GPX).unwrap();
        assert_eq!(track.source, PointSource::TrackPoints);
        assert_eq!(track.path.len(), 3);
        assert_eq!(track.path.points[0], Coordinate::new(20.9673, -89.5925));
        assert_eq!(track.path.points[2], Coordinate::new(20.9873, -89.59));
        assert_eq!(track.name.as_deref(), Some("Test Route"));
        assert!((track.path.distance_km - path_length_km(&track.path.points)).abs() < 1e-12);
    }

    #[test]
    fn test_multiple_segments_in_order() {
        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test">
  <trk>
    <trkseg>
      <trkpt lat="21.0" lon="-89.0"></trkpt>
    </trkseg>
    <trkseg>
      <trkpt lat="21.1" lon="-89.0"></trkpt>
      <trkpt lat="21.2" lon="-89.0"></trkpt>
    </trkseg>
  </trk>
</gpx>"#;
        let track = import_gpx(doc).unwrap();
        let lats: Vec<f64> = track.path.points.iter().map(|p| p.latitude).collect();
        assert_eq!(lats, vec![21.0, 21.1, 21.2]);
    }

    #[test]
    fn test_waypoints_fallback() {
        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test">
  <metadata><name>Cenotes</name></metadata>
  <wpt lat="20.70" lon="-89.30"><name>Start</name></wpt>
  <wpt lat="20.72" lon="-89.28"><name>Cenote</name></wpt>
</gpx>"#;
        let track = import_gpx(doc).unwrap();
        assert_eq!(track.source, PointSource::Waypoints);
        assert_eq!(track.path.len(), 2);
        assert_eq!(track.name.as_deref(), Some("Cenotes"));
    }

    #[test]
    fn test_higher_priority_not_merged() {
        // A single track point wins over a full route, and is then too short
        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test">
  <trk><trkseg><trkpt lat="21.0" lon="-89.0"></trkpt></trkseg></trk>
  <rte>
    <rtept lat="21.5" lon="-88.0"></rtept>
    <rtept lat="21.6" lon="-88.0"></rtept>
  </rte>
</gpx>"#;
        assert!(matches!(
            import_gpx(doc),
            Err(TrackerError::InsufficientPoints { point_count: 1, .. })
        ));
    }

    #[test]
    fn test_empty_document() {
        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test">
</gpx>"#;
        assert!(matches!(
            import_gpx(doc),
            Err(TrackerError::InsufficientPoints { point_count: 0, .. })
        ));
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            import_gpx("this is not gpx"),
            Err(TrackerError::Parse { .. })
        ));

        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test">
  <trk><trkseg>
    <trkpt lat="north" lon="-89.0"></trkpt>
    <trkpt lat="21.1" lon="-89.0"></trkpt>
  </trkseg></trk>
</gpx>"#;
        assert!(matches!(import_gpx(doc), Err(TrackerError::Parse { .. })));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test">
  <trk><trkseg>
    <trkpt lat="21.0" lon="-89.0"></trkpt>
    <trkpt lat="121.0" lon="-89.0"></trkpt>
  </trkseg></trk>
</gpx>"#;
        assert!(matches!(
            import_gpx(doc),
            Err(TrackerError::InvalidCoordinates { .. }) | Err(TrackerError::Parse { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(matches!(
            import_gpx_bytes(&[0xff, 0xfe, 0x00]),
            Err(TrackerError::Parse { .. })
        ));
        assert!(import_gpx_bytes(TRACK_GPX.as_bytes()).is_ok());
    }
}
