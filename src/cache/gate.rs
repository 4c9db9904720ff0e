//! Per-option wait gates.
//!
//! A gate is an epoch counter on a `watch` channel. Waiters take a ticket while
//! holding the cache mutex, release the mutex, then wait for the epoch to move
//! past the one they saw. Signals are issued under the same mutex, so a waiter
//! can never miss the signal for the attempt it decided to wait on.

use std::time::Duration;
use tokio::sync::watch;

/// Why a wait ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateWake {
    /// The producer signalled
    Signalled,
    /// The gate was dropped (its scene left the cache)
    Closed,
}

/// Create-once, signal-many synchronization point for one option
#[derive(Debug)]
pub struct WaitGate {
    epoch: watch::Sender<u64>,
}

impl WaitGate {
    pub fn new() -> Self {
        let (epoch, _) = watch::channel(0);
        Self { epoch }
    }

    /// Register interest in the next signal.
    pub fn ticket(&self) -> GateTicket {
        GateTicket {
            rx: self.epoch.subscribe(),
        }
    }

    /// Wake every current ticket holder.
    pub fn signal(&self) {
        self.epoch.send_modify(|epoch| *epoch += 1);
    }

    /// Number of signals issued so far
    pub fn epoch(&self) -> u64 {
        *self.epoch.borrow()
    }
}

impl Default for WaitGate {
    fn default() -> Self {
        Self::new()
    }
}

/// A pending wait on a gate; see [`WaitGate::ticket`]
#[derive(Debug)]
pub struct GateTicket {
    rx: watch::Receiver<u64>,
}

impl GateTicket {
    /// Block until the gate is signalled or closed, or `timeout` elapses
    /// (returns `None`).
    pub async fn wait(mut self, timeout: Duration) -> Option<GateWake> {
        match tokio::time::timeout(timeout, self.rx.changed()).await {
            Ok(Ok(())) => Some(GateWake::Signalled),
            Ok(Err(_)) => Some(GateWake::Closed),
            Err(_) => None,
        }
    }
}
