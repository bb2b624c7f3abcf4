//! Registry reachability gate and user notices.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{BazaarError, Result};
use crate::transport::RegistryTransport;

/// Message shown when the registry cannot be reached.
pub const OFFLINE_MESSAGE: &str =
    "Marketplace is unreachable, please check your network connection";

/// Surface for short-lived user notices.
pub trait Notifier: Send + Sync {
    /// Show an error notice for `duration`.
    fn notify_error(&self, message: &str, duration: Duration);
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_error(&self, message: &str, duration: Duration) {
        warn!("{} (shown for {:?})", message, duration);
    }
}

/// Notifier that remembers every notice; useful for hosts that poll.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(String, Duration)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<(String, Duration)> {
        self.notices.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_error(&self, message: &str, duration: Duration) {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((message.to_string(), duration));
    }
}

/// Probes the registry before listing work.
///
/// A successful probe does not guarantee later requests succeed.
pub struct ConnectivityGate {
    transport: Arc<dyn RegistryTransport>,
    notifier: Arc<dyn Notifier>,
    probe_url: String,
    probe_timeout: Duration,
    notice_duration: Duration,
}

impl ConnectivityGate {
    pub fn new(
        transport: Arc<dyn RegistryTransport>,
        notifier: Arc<dyn Notifier>,
        probe_url: impl Into<String>,
        probe_timeout: Duration,
        notice_duration: Duration,
    ) -> Self {
        Self {
            transport,
            notifier,
            probe_url: probe_url.into(),
            probe_timeout,
            notice_duration,
        }
    }

    /// Fail with [`BazaarError::Offline`] and notify the user when the
    /// registry does not answer.
    pub async fn ensure_online(&self) -> Result<()> {
        if self
            .transport
            .probe(&self.probe_url, self.probe_timeout)
            .await
        {
            return Ok(());
        }

        info!("Registry {} is unreachable", self.probe_url);
        self.notifier
            .notify_error(OFFLINE_MESSAGE, self.notice_duration);
        Err(BazaarError::Offline)
    }
}
