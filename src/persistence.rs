//! # SQLite Completion Store
//!
//! Durable [`CompletionStore`] backed by a single SQLite table. Recorded paths
//! are stored as MessagePack blobs next to the session figures, so a host can
//! list past rides for a route without a network round-trip.

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    CompletionRecord, CompletionStore, Coordinate, Result, RouteSummary, SessionOutcome,
    TrackerError,
};

impl From<rusqlite::Error> for TrackerError {
    fn from(e: rusqlite::Error) -> Self {
        TrackerError::Persistence {
            message: e.to_string(),
        }
    }
}

/// A session row read back from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCompletion {
    pub id: String,
    pub route_id: String,
    pub route_name: String,
    pub created_at: DateTime<Utc>,
    /// `None` until the session is finalized
    pub record: Option<CompletionRecord>,
}

/// Completion store persisted in SQLite.
pub struct SqliteCompletionStore {
    db: Connection,
    db_path: String,
}

impl SqliteCompletionStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("[SqliteStore] Opened {}", db_path);
        Ok(Self {
            db,
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ride_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                route_id TEXT NOT NULL,
                route_name TEXT NOT NULL,
                planned_distance_km REAL NOT NULL,
                created_at INTEGER NOT NULL,
                -- Filled in on finalize
                status TEXT,
                duration_minutes INTEGER,
                distance_km REAL,
                notes TEXT,
                path BLOB
            );

            CREATE INDEX IF NOT EXISTS idx_ride_sessions_route
                ON ride_sessions(route_id);
            "#,
        )
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Load one session by id.
    pub fn load_session(&self, session_id: &str) -> Result<Option<StoredCompletion>> {
        let Ok(rowid) = session_id.parse::<i64>() else {
            return Ok(None);
        };
        let mut stmt = self.db.prepare(
            "SELECT id, route_id, route_name, created_at, status, duration_minutes,
                    distance_km, notes, path
             FROM ride_sessions WHERE id = ?",
        )?;
        let row = stmt
            .query_row(params![rowid], Self::read_row)
            .optional()?;
        row.map(RawSession::into_stored).transpose()
    }

    /// All sessions for a route, oldest first.
    pub fn sessions_for_route(&self, route_id: &str) -> Result<Vec<StoredCompletion>> {
        let mut stmt = self.db.prepare(
            "SELECT id, route_id, route_name, created_at, status, duration_minutes,
                    distance_km, notes, path
             FROM ride_sessions WHERE route_id = ? ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![route_id], Self::read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawSession::into_stored).collect()
    }

    /// Number of finalized sessions that reached the route's end.
    pub fn completed_count(&self, route_id: &str) -> Result<u32> {
        let count: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM ride_sessions WHERE route_id = ? AND status = ?",
            params![route_id, SessionOutcome::Completed.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSession> {
        Ok(RawSession {
            id: row.get(0)?,
            route_id: row.get(1)?,
            route_name: row.get(2)?,
            created_at: row.get(3)?,
            status: row.get(4)?,
            duration_minutes: row.get(5)?,
            distance_km: row.get(6)?,
            notes: row.get(7)?,
            path: row.get(8)?,
        })
    }
}

impl CompletionStore for SqliteCompletionStore {
    fn create_session(&mut self, route: &RouteSummary) -> Result<String> {
        self.db.execute(
            "INSERT INTO ride_sessions (route_id, route_name, planned_distance_km, created_at)
             VALUES (?, ?, ?, ?)",
            params![
                route.route_id,
                route.name,
                route.total_distance_km,
                Utc::now().timestamp()
            ],
        )?;
        let id = self.db.last_insert_rowid().to_string();
        debug!("[SqliteStore] Created session {} for {}", id, route.route_id);
        Ok(id)
    }

    fn finalize_session(&mut self, session_id: &str, record: &CompletionRecord) -> Result<()> {
        let rowid: i64 = session_id.parse().map_err(|_| TrackerError::Persistence {
            message: format!("invalid session id {}", session_id),
        })?;
        let path_blob = rmp_serde::to_vec(&record.path).map_err(|e| TrackerError::Persistence {
            message: format!("path encoding failed: {}", e),
        })?;

        let updated = self.db.execute(
            "UPDATE ride_sessions
             SET status = ?, duration_minutes = ?, distance_km = ?, notes = ?, path = ?
             WHERE id = ?",
            params![
                record.status.as_str(),
                record.duration_minutes as i64,
                record.distance_km,
                record.notes,
                path_blob,
                rowid
            ],
        )?;
        if updated == 0 {
            return Err(TrackerError::Persistence {
                message: format!("unknown session {}", session_id),
            });
        }
        debug!("[SqliteStore] Finalized session {}", session_id);
        Ok(())
    }
}

struct RawSession {
    id: i64,
    route_id: String,
    route_name: String,
    created_at: i64,
    status: Option<String>,
    duration_minutes: Option<i64>,
    distance_km: Option<f64>,
    notes: Option<String>,
    path: Option<Vec<u8>>,
}

impl RawSession {
    fn into_stored(self) -> Result<StoredCompletion> {
        let record = match self.status.as_deref() {
            None => None,
            Some(status) => {
                let status = match status {
                    "completed" => SessionOutcome::Completed,
                    "abandoned" => SessionOutcome::Abandoned,
                    other => {
                        return Err(TrackerError::Persistence {
                            message: format!("unknown session status '{}'", other),
                        })
                    }
                };
                let path: Vec<Coordinate> = match &self.path {
                    Some(blob) => {
                        rmp_serde::from_slice(blob).map_err(|e| TrackerError::Persistence {
                            message: format!("path decoding failed: {}", e),
                        })?
                    }
                    None => Vec::new(),
                };
                Some(CompletionRecord {
                    duration_minutes: self.duration_minutes.unwrap_or(0).max(0) as u64,
                    distance_km: self.distance_km.unwrap_or(0.0),
                    status,
                    notes: self.notes,
                    path,
                })
            }
        };

        Ok(StoredCompletion {
            id: self.id.to_string(),
            route_id: self.route_id,
            route_name: self.route_name,
            created_at: DateTime::from_timestamp(self.created_at, 0).unwrap_or_default(),
            record,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompletionRecorder;
    use tempfile::tempdir;

    fn route() -> RouteSummary {
        RouteSummary {
            route_id: "r-1".to_string(),
            name: "Coast".to_string(),
            total_distance_km: 5.19,
        }
    }

    fn record(status: SessionOutcome) -> CompletionRecord {
        CompletionRecord {
            duration_minutes: 18,
            distance_km: 5.2,
            status,
            notes: Some("windy".to_string()),
            path: vec![Coordinate::new(21.0, -89.0), Coordinate::new(21.0, -88.95)],
        }
    }

    #[test]
    fn test_create_and_finalize() {
        let mut store = SqliteCompletionStore::in_memory().unwrap();
        let id = store.create_session(&route()).unwrap();

        let open = store.load_session(&id).unwrap().unwrap();
        assert_eq!(open.route_id, "r-1");
        assert!(open.record.is_none());

        store
            .finalize_session(&id, &record(SessionOutcome::Completed))
            .unwrap();
        let done = store.load_session(&id).unwrap().unwrap();
        assert_eq!(done.record, Some(record(SessionOutcome::Completed)));
        assert_eq!(store.completed_count("r-1").unwrap(), 1);
    }

    #[test]
    fn test_unknown_session() {
        let mut store = SqliteCompletionStore::in_memory().unwrap();
        assert!(store.load_session("42").unwrap().is_none());
        assert!(store.load_session("not-a-number").unwrap().is_none());
        assert!(matches!(
            store.finalize_session("42", &record(SessionOutcome::Abandoned)),
            Err(TrackerError::Persistence { .. })
        ));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rides.db");
        let path = path.to_str().unwrap();

        {
            let mut store = SqliteCompletionStore::open(path).unwrap();
            let a = store.create_session(&route()).unwrap();
            let b = store.create_session(&route()).unwrap();
            store
                .finalize_session(&a, &record(SessionOutcome::Completed))
                .unwrap();
            store
                .finalize_session(&b, &record(SessionOutcome::Abandoned))
                .unwrap();
        }

        let store = SqliteCompletionStore::open(path).unwrap();
        let sessions = store.sessions_for_route("r-1").unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(
            sessions[1].record.as_ref().map(|r| r.status),
            Some(SessionOutcome::Abandoned)
        );
        assert_eq!(store.completed_count("r-1").unwrap(), 1);
        assert!(store.sessions_for_route("other").unwrap().is_empty());
    }

    #[test]
    fn test_behind_recorder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rides.db");
        let path = path.to_str().unwrap();

        let recorder = CompletionRecorder::spawn(SqliteCompletionStore::open(path).unwrap());
        let sink = recorder.sink();
        let key = sink.create(route());
        sink.finalize(key, record(SessionOutcome::Completed));
        recorder.shutdown();

        let store = SqliteCompletionStore::open(path).unwrap();
        assert_eq!(store.completed_count("r-1").unwrap(), 1);
    }
}
