//! Process-wide setup and teardown.
//!
//! Hosts call [`init`] once at startup to install logging and start the shared
//! completion recorder, then hand [`completion_sink`] to each tracker they
//! create. [`shutdown`] drains pending completion work and stops the worker.

use std::sync::Mutex;

use log::info;
use once_cell::sync::Lazy;

use crate::{CompletionRecorder, CompletionSink, CompletionStore, Result, TrackerError};

/// Shared completion recorder, present between [`init`] and [`shutdown`].
static RECORDER: Lazy<Mutex<Option<CompletionRecorder>>> = Lazy::new(|| Mutex::new(None));

/// Serializes tests that touch the shared recorder.
#[cfg(test)]
pub(crate) static TEST_LOCK: Mutex<()> = Mutex::new(());

fn with_recorder<F, R>(f: F) -> R
where
    F: FnOnce(&mut Option<CompletionRecorder>) -> R,
{
    let mut guard = RECORDER.lock().unwrap_or_else(|p| p.into_inner());
    f(&mut guard)
}

/// Install logging and start the completion recorder over `store`.
///
/// Fails with a `Config` error if already initialized.
pub fn init<S: CompletionStore + 'static>(store: S) -> Result<()> {
    crate::init_logging();
    with_recorder(|slot| {
        if slot.is_some() {
            return Err(TrackerError::Config {
                message: "already initialized".to_string(),
            });
        }
        *slot = Some(CompletionRecorder::spawn(store));
        info!("[Lifecycle] Initialized");
        Ok(())
    })
}

pub fn is_initialized() -> bool {
    with_recorder(|slot| slot.is_some())
}

/// Sink for the shared recorder, if initialized.
pub fn completion_sink() -> Option<CompletionSink> {
    with_recorder(|slot| slot.as_ref().map(CompletionRecorder::sink))
}

/// Flush queued completion work and stop the recorder. Safe to call twice.
pub fn shutdown() {
    let recorder = with_recorder(Option::take);
    if let Some(recorder) = recorder {
        recorder.shutdown();
        info!("[Lifecycle] Shut down");
    }
}
