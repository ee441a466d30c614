//! A one-shot readiness latch.
//!
//! [`channel`] returns a [`Signal`], held by whatever initializes the
//! injector, and a [`Ready`] handle that may be cloned and awaited by any
//! number of probes. The signal is consumed when it fires, so it can fire at
//! most once.

use std::future;
use thiserror::Error;
use tokio::{sync::watch, time};

/// Fires the readiness latch.
#[derive(Debug)]
#[must_use = "the latch only opens when `Signal::ready` is called"]
pub struct Signal(watch::Sender<bool>);

/// Waits for the readiness latch to fire.
#[derive(Clone, Debug)]
pub struct Ready(watch::Receiver<bool>);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotReady {
    #[error("timed out waiting for the injector to become ready after {0:?}")]
    Timeout(time::Duration),
}

pub fn channel() -> (Signal, Ready) {
    let (tx, rx) = watch::channel(false);
    (Signal(tx), Ready(rx))
}

// === impl Signal ===

impl Signal {
    /// Marks the latch as ready, waking all waiters.
    pub fn ready(self) {
        // Waiters may all have been dropped; that's fine.
        self.0.send_replace(true);
        tracing::debug!("Ready");
    }
}

// === impl Ready ===

impl Ready {
    pub fn is_ready(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until the latch has fired or `timeout` elapses.
    ///
    /// If the [`Signal`] is dropped without firing, the latch can never open
    /// and the wait ends with a timeout.
    pub async fn wait(&self, timeout: time::Duration) -> Result<(), NotReady> {
        let mut rx = self.0.clone();
        let ready = async move {
            if rx.wait_for(|ready| *ready).await.is_err() {
                future::pending::<()>().await;
            }
        };
        time::timeout(timeout, ready)
            .await
            .map_err(|_| NotReady::Timeout(timeout))
    }
}
