// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide cooperative stop flag.
//!
//! Every blocking wait in the agent (child exit, rotation timer, scheduler
//! period, heartbeat poll) selects on [`StopFlag::cancelled`] so a stop
//! request unwinds the whole pipeline within one kill grace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    stopped: AtomicBool,
    notify: Notify,
}

/// Cheaply cloneable stop signal.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    inner: Arc<Inner>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent; wakes every current and future waiter.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolve once a stop has been requested.
    pub async fn cancelled(&self) {
        loop {
            if self.is_stopped() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after registering, so a stop() between the first
            // check and registration cannot be missed.
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[path = "stop_tests.rs"]
mod tests;
