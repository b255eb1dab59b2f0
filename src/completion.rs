//! Completion records and the background recorder that delivers them.
//!
//! The tracker never talks to storage directly. It sends commands through a
//! [`CompletionSink`]; a [`CompletionRecorder`] worker thread hands them to a
//! [`CompletionStore`] in order. Store failures are logged and swallowed, so the
//! engine's own session remains the source of truth.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{Coordinate, Result, RouteSummary};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum SessionOutcome {
    /// The rider reached the planned end point
    Completed,
    /// The rider stopped before arriving
    Abandoned,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::Abandoned => "abandoned",
        }
    }
}

/// Finalized session figures handed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub duration_minutes: u64,
    pub distance_km: f64,
    pub status: SessionOutcome,
    pub notes: Option<String>,
    pub path: Vec<Coordinate>,
}

/// Storage for session outcomes, typically a remote backend.
pub trait CompletionStore: Send {
    /// Open a session record and return its id.
    fn create_session(&mut self, route: &RouteSummary) -> Result<String>;

    /// Seal a session record with its outcome.
    fn finalize_session(&mut self, session_id: &str, record: &CompletionRecord) -> Result<()>;
}

/// Local key for a session, assigned before the store has returned an id.
pub type SessionKey = u64;

static NEXT_SESSION_KEY: AtomicU64 = AtomicU64::new(1);

enum CompletionCommand {
    Create {
        key: SessionKey,
        route: RouteSummary,
    },
    Finalize {
        key: SessionKey,
        record: CompletionRecord,
    },
    Shutdown,
}

/// Non-blocking handle used by trackers to queue completion work.
#[derive(Clone)]
pub struct CompletionSink {
    sender: mpsc::Sender<CompletionCommand>,
}

impl CompletionSink {
    /// Queue creation of a session record. Returns the local key for finalizing it.
    pub fn create(&self, route: RouteSummary) -> SessionKey {
        let key = NEXT_SESSION_KEY.fetch_add(1, Ordering::Relaxed);
        if self
            .sender
            .send(CompletionCommand::Create { key, route })
            .is_err()
        {
            warn!("[Completion] Recorder is gone, session {} will not be stored", key);
        }
        key
    }

    /// Queue finalization of a session record.
    pub fn finalize(&self, key: SessionKey, record: CompletionRecord) {
        if self
            .sender
            .send(CompletionCommand::Finalize { key, record })
            .is_err()
        {
            warn!("[Completion] Recorder is gone, session {} not finalized", key);
        }
    }
}

/// Background worker that owns a completion store.
pub struct CompletionRecorder {
    sender: mpsc::Sender<CompletionCommand>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CompletionRecorder {
    /// Start the worker thread.
    pub fn spawn<S: CompletionStore + 'static>(mut store: S) -> Self {
        let (tx, rx) = mpsc::channel::<CompletionCommand>();

        let worker = thread::spawn(move || {
            // Local keys whose create call succeeded
            let mut remote_ids: HashMap<SessionKey, String> = HashMap::new();

            for command in rx {
                match command {
                    CompletionCommand::Create { key, route } => {
                        match store.create_session(&route) {
                            Ok(id) => {
                                debug!("[Completion] Session {} created as {}", key, id);
                                remote_ids.insert(key, id);
                            }
                            Err(e) => {
                                warn!("[Completion] Failed to create session {}: {}", key, e)
                            }
                        }
                    }
                    CompletionCommand::Finalize { key, record } => {
                        let Some(id) = remote_ids.remove(&key) else {
                            warn!("[Completion] No stored session for {}, skipping finalize", key);
                            continue;
                        };
                        match store.finalize_session(&id, &record) {
                            Ok(()) => info!(
                                "[Completion] Session {} finalized ({}, {} min)",
                                id,
                                record.status.as_str(),
                                record.duration_minutes
                            ),
                            Err(e) => warn!("[Completion] Failed to finalize {}: {}", id, e),
                        }
                    }
                    CompletionCommand::Shutdown => break,
                }
            }
        });

        Self {
            sender: tx,
            worker: Some(worker),
        }
    }

    pub fn sink(&self) -> CompletionSink {
        CompletionSink {
            sender: self.sender.clone(),
        }
    }

    /// Process everything queued so far, then stop the worker.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.sender.send(CompletionCommand::Shutdown).ok();
            if worker.join().is_err() {
                warn!("[Completion] Worker thread panicked");
            }
        }
    }
}

impl Drop for CompletionRecorder {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// A stored session as seen by [`MemoryCompletionStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub id: String,
    pub route: RouteSummary,
    pub record: Option<CompletionRecord>,
}

/// Completion store kept in memory. Clones share the same sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryCompletionStore {
    sessions: Arc<Mutex<Vec<StoredSession>>>,
}

impl MemoryCompletionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<StoredSession> {
        let sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions.clone()
    }
}

impl CompletionStore for MemoryCompletionStore {
    fn create_session(&mut self, route: &RouteSummary) -> Result<String> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let id = format!("session-{}", sessions.len() + 1);
        sessions.push(StoredSession {
            id: id.clone(),
            route: route.clone(),
            record: None,
        });
        Ok(id)
    }

    fn finalize_session(&mut self, session_id: &str, record: &CompletionRecord) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| crate::TrackerError::Persistence {
                message: format!("unknown session {}", session_id),
            })?;
        session.record = Some(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackerError;

    fn route() -> RouteSummary {
        RouteSummary {
            route_id: "r-1".to_string(),
            name: "Test".to_string(),
            total_distance_km: 5.0,
        }
    }

    fn record() -> CompletionRecord {
        CompletionRecord {
            duration_minutes: 12,
            distance_km: 4.2,
            status: SessionOutcome::Abandoned,
            notes: Some("flat tyre".to_string()),
            path: vec![Coordinate::new(21.0, -89.0)],
        }
    }

    struct FailingStore;

    impl CompletionStore for FailingStore {
        fn create_session(&mut self, _route: &RouteSummary) -> Result<String> {
            Err(TrackerError::Persistence {
                message: "offline".to_string(),
            })
        }

        fn finalize_session(&mut self, _id: &str, _record: &CompletionRecord) -> Result<()> {
            Err(TrackerError::Persistence {
                message: "offline".to_string(),
            })
        }
    }

    #[test]
    fn test_create_then_finalize() {
        let store = MemoryCompletionStore::new();
        let recorder = CompletionRecorder::spawn(store.clone());
        let sink = recorder.sink();

        let key = sink.create(route());
        sink.finalize(key, record());
        recorder.shutdown();

        let sessions = store.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].route.route_id, "r-1");
        assert_eq!(sessions[0].record, Some(record()));
    }

    #[test]
    fn test_finalize_without_create_is_skipped() {
        let store = MemoryCompletionStore::new();
        let recorder = CompletionRecorder::spawn(store.clone());
        recorder.sink().finalize(9_999_999, record());
        recorder.shutdown();
        assert!(store.sessions().is_empty());
    }

    #[test]
    fn test_failing_store_is_swallowed() {
        let recorder = CompletionRecorder::spawn(FailingStore);
        let sink = recorder.sink();
        let key = sink.create(route());
        sink.finalize(key, record());
        // Completes without panicking
        recorder.shutdown();
    }

    #[test]
    fn test_sink_outlives_recorder() {
        let recorder = CompletionRecorder::spawn(MemoryCompletionStore::new());
        let sink = recorder.sink();
        drop(recorder);
        // Sending after shutdown is logged, not fatal
        let key = sink.create(route());
        sink.finalize(key, record());
    }

    #[test]
    fn test_outcome_strings() {
        assert_eq!(SessionOutcome::Completed.as_str(), "completed");
        assert_eq!(SessionOutcome::Abandoned.as_str(), "abandoned");
    }
}
