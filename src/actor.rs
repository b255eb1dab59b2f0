//! Threaded session actor.
//!
//! Runs a [`RouteTracker`] on its own thread and feeds it commands from a
//! channel, so fixes from the provider callback, timer ticks and user actions
//! are applied strictly in the order they were sent.

use std::sync::mpsc;
use std::thread;

use log::{debug, warn};

use crate::{LocationFix, LocationProvider, RouteTracker, TrackerCommand, TrackerError};

enum Envelope {
    Command(TrackerCommand),
    Close,
}

/// Cloneable sender for event sources such as a provider callback or a timer.
#[derive(Clone)]
pub struct CommandSender {
    sender: mpsc::Sender<Envelope>,
}

impl CommandSender {
    /// Queue a command. Returns false once the actor has stopped.
    pub fn send(&self, command: TrackerCommand) -> bool {
        self.sender.send(Envelope::Command(command)).is_ok()
    }

    pub fn push_fix(&self, fix: LocationFix) -> bool {
        self.send(TrackerCommand::Fix(fix))
    }
}

/// The event loop that owns a tracker.
pub struct SessionActor<P: LocationProvider> {
    tracker: RouteTracker<P>,
    inbox: mpsc::Receiver<Envelope>,
    errors: mpsc::Sender<TrackerError>,
}

impl<P: LocationProvider + Send + 'static> SessionActor<P> {
    /// Move the tracker onto a new thread and return a handle to it.
    pub fn spawn(tracker: RouteTracker<P>) -> SessionHandle<P> {
        let (tx, rx) = mpsc::channel();
        let (err_tx, err_rx) = mpsc::channel();

        let actor = SessionActor {
            tracker,
            inbox: rx,
            errors: err_tx,
        };
        let worker = thread::spawn(move || actor.run());

        SessionHandle {
            sender: tx,
            errors: err_rx,
            worker: Some(worker),
        }
    }

    fn run(mut self) -> RouteTracker<P> {
        for envelope in self.inbox.iter() {
            match envelope {
                Envelope::Command(command) => {
                    // Fixes and ticks keep arriving until the provider and timer
                    // are released; their rejections are only logged.
                    let from_user =
                        !matches!(command, TrackerCommand::Fix(_) | TrackerCommand::Tick);
                    if let Err(e) = self.tracker.apply(command) {
                        debug!("[SessionActor] Command rejected: {}", e);
                        if from_user {
                            self.errors.send(e).ok();
                        }
                    }
                }
                Envelope::Close => break,
            }
        }
        self.tracker.teardown();
        self.tracker
    }
}

/// Handle to a running [`SessionActor`].
pub struct SessionHandle<P: LocationProvider> {
    sender: mpsc::Sender<Envelope>,
    errors: mpsc::Receiver<TrackerError>,
    worker: Option<thread::JoinHandle<RouteTracker<P>>>,
}

impl<P: LocationProvider> SessionHandle<P> {
    /// Queue a command for the actor.
    pub fn send(&self, command: TrackerCommand) -> bool {
        self.sender.send(Envelope::Command(command)).is_ok()
    }

    /// Sender for additional event sources.
    pub fn command_sender(&self) -> CommandSender {
        CommandSender {
            sender: self.sender.clone(),
        }
    }

    /// Errors returned by rejected user actions, in order.
    ///
    /// Rejected fixes and ticks are not reported here.
    pub fn errors(&self) -> &mpsc::Receiver<TrackerError> {
        &self.errors
    }

    /// Drain queued commands, stop the actor and take the tracker back.
    pub fn close(mut self) -> Option<RouteTracker<P>> {
        self.join()
    }

    fn join(&mut self) -> Option<RouteTracker<P>> {
        let worker = self.worker.take()?;
        self.sender.send(Envelope::Close).ok();
        match worker.join() {
            Ok(tracker) => Some(tracker),
            Err(_) => {
                warn!("[SessionActor] Actor thread panicked");
                None
            }
        }
    }
}

impl<P: LocationProvider> Drop for SessionHandle<P> {
    fn drop(&mut self) {
        self.join();
    }
}
