//! Per-request execution context: deadline and upstream shutdown.
//!
//! Cancellation is cooperative. The runner checks the context between
//! phases; it never interrupts a running handler. A handler that wants to
//! stop early awaits [`Context::done`] alongside its own work.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

use crate::error::Error;

/// Upstream shutdown signal shared by every request of a process.
///
/// Cloning is cheap. Obtain one with [`Shutdown::channel`] or, when nothing
/// upstream ever cancels, [`Shutdown::never`].
#[derive(Clone, Debug)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Trigger side of [`Shutdown`].
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Shutdown {
        Shutdown::channel().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires. Pends forever if the trigger is
    /// dropped without firing.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|fired| *fired).await.is_err() {
            pending::<()>().await;
        }
    }
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Deadline-bound scope for one request, handed to the handler.
#[derive(Clone, Debug)]
pub struct Context {
    request_id: String,
    action: Arc<str>,
    deadline: Instant,
    shutdown: Shutdown,
}

impl Context {
    pub(crate) fn new(request_id: &str, action: Arc<str>, timeout: Duration, shutdown: &Shutdown) -> Self {
        Self {
            request_id: request_id.to_owned(),
            action,
            deadline: Instant::now() + timeout,
            shutdown: shutdown.clone(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Name of the route action being executed.
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Resolves when the deadline passes or upstream shutdown fires.
    pub async fn done(&self) {
        tokio::select! {
            () = sleep_until(self.deadline) => {}
            () = self.shutdown.triggered() => {}
        }
    }

    /// Checkpoint used between pipeline phases.
    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else if self.is_expired() {
            Err(Error::Timeout)
        } else {
            Ok(())
        }
    }
}
