//! Session driver
//!
//! Runs one [`StreamSession`] on its own task: signals arrive over an mpsc
//! channel, the task sleeps until the session's next deadline, and every
//! observable change is published on a `watch` channel for rendering.
//!
//! Signals for the session are processed strictly in arrival order by this
//! single task. Dropping every [`SessionHandle`] tears the session down.

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::session::{StreamSession, StreamSignal, StreamSnapshot, StreamingConfig};

/// Default signal channel capacity
pub const DEFAULT_SIGNAL_CAPACITY: usize = 256;

/// The driver task has stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session driver stopped")]
pub struct DriverClosed;

/// Cloneable handle to a running driver
#[derive(Clone, Debug)]
pub struct SessionHandle {
    signals: mpsc::Sender<StreamSignal>,
    snapshots: watch::Receiver<StreamSnapshot>,
}

impl SessionHandle {
    /// Deliver a signal to the session
    ///
    /// # Errors
    ///
    /// [`DriverClosed`] if the driver task is gone.
    pub async fn send(&self, signal: StreamSignal) -> Result<(), DriverClosed> {
        self.signals.send(signal).await.map_err(|_| DriverClosed)
    }

    /// Latest published snapshot
    #[must_use]
    pub fn snapshot(&self) -> StreamSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver notified on every change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot> {
        self.snapshots.clone()
    }
}

/// Task owning one streaming session
pub struct SessionDriver {
    session: StreamSession,
    signals: mpsc::Receiver<StreamSignal>,
    snapshots: watch::Sender<StreamSnapshot>,
}

impl SessionDriver {
    /// Create a driver and its handle
    #[must_use]
    pub fn new(config: StreamingConfig) -> (Self, SessionHandle) {
        Self::with_capacity(config, DEFAULT_SIGNAL_CAPACITY)
    }

    /// Create a driver with a specific signal capacity
    #[must_use]
    pub fn with_capacity(config: StreamingConfig, capacity: usize) -> (Self, SessionHandle) {
        let session = StreamSession::new(config);
        let (signal_tx, signal_rx) = mpsc::channel(capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        (
            Self {
                session,
                signals: signal_rx,
                snapshots: snapshot_tx,
            },
            SessionHandle {
                signals: signal_tx,
                snapshots: snapshot_rx,
            },
        )
    }

    /// Spawn the driver on the current runtime
    #[must_use]
    pub fn spawn(config: StreamingConfig) -> (SessionHandle, JoinHandle<()>) {
        let (driver, handle) = Self::new(config);
        (handle, tokio::spawn(driver.run()))
    }

    /// Process signals and timers until every handle is dropped
    pub async fn run(mut self) {
        loop {
            let deadline = self.session.next_deadline();
            tokio::select! {
                biased;

                signal = self.signals.recv() => match signal {
                    Some(signal) => {
                        let now = Instant::now();
                        // Timers already due fire before the new signal.
                        let fired = self.session.tick(now);
                        if self.session.apply(signal, now) || fired {
                            self.publish();
                        }
                    }
                    None => break,
                },

                () = wait_for(deadline) => {
                    if self.session.tick(Instant::now()) {
                        self.publish();
                    }
                }
            }
        }

        // Teardown cancels whatever timer was armed.
        if self.session.reset() {
            self.publish();
        }
        debug!("Session driver stopped");
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
