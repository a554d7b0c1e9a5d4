//! Progress reporting from a running scan to the streaming boundary.
//!
//! Scanners push human-readable progress lines into a channel; the API
//! layer turns each one into a `progress` message on the wire. A null
//! sink lets the same scan code run without a listener (tests, warmup).

use std::fmt;

use tokio::sync::mpsc;

#[derive(Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<String>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops everything.
    pub fn null() -> Self {
        Self { tx: None }
    }

    /// Report progress. Send failures mean the listener went away; the
    /// scan keeps running and the cancellation token handles teardown.
    pub async fn send(&self, message: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(message.into()).await;
        }
    }
}

/// Marker error for a scan stopped by its cancellation token. The
/// boundary closes the stream silently instead of emitting an error.
#[derive(Debug)]
pub struct ScanCancelled;

impl fmt::Display for ScanCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan cancelled")
    }
}

impl std::error::Error for ScanCancelled {}
