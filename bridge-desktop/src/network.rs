//! Connectivity detection by TCP probe.

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{ConnectivityEvent, ConnectivitySource, ConnectivityStream},
};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

const DEFAULT_PROBE_ADDR: &str = "8.8.8.8:53";
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Desktop connectivity source.
///
/// Desktop platforms have no portable reachability API, so this opens a TCP
/// connection to a well-known host and polls for changes. Platform-specific
/// watchers (netlink, SystemConfiguration, NLM) would react faster.
#[derive(Debug, Clone)]
pub struct DesktopConnectivitySource {
    probe_addr: String,
    probe_timeout: Duration,
    poll_interval: Duration,
}

impl DesktopConnectivitySource {
    pub fn new() -> Self {
        Self {
            probe_addr: DEFAULT_PROBE_ADDR.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Probe `addr` (`host:port`) instead of the public DNS resolver.
    pub fn with_probe_addr(mut self, addr: impl Into<String>) -> Self {
        self.probe_addr = addr.into();
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn probe(&self) -> ConnectivityEvent {
        let reachable = matches!(
            tokio::time::timeout(self.probe_timeout, TcpStream::connect(&self.probe_addr)).await,
            Ok(Ok(_))
        );
        debug!(addr = %self.probe_addr, reachable, "Connectivity probe finished");

        if reachable {
            ConnectivityEvent::online()
        } else {
            ConnectivityEvent::offline()
        }
    }
}

impl Default for DesktopConnectivitySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectivitySource for DesktopConnectivitySource {
    async fn current(&self) -> Result<ConnectivityEvent> {
        Ok(self.probe().await)
    }

    async fn subscribe(&self) -> Result<Box<dyn ConnectivityStream>> {
        Ok(Box::new(PollingStream {
            source: self.clone(),
            last: None,
        }))
    }
}

/// Yields only when the probe result differs from the previous one.
struct PollingStream {
    source: DesktopConnectivitySource,
    last: Option<ConnectivityEvent>,
}

#[async_trait]
impl ConnectivityStream for PollingStream {
    async fn next(&mut self) -> Option<ConnectivityEvent> {
        loop {
            tokio::time::sleep(self.source.poll_interval).await;

            let event = self.source.probe().await;
            if self.last != Some(event) {
                self.last = Some(event);
                return Some(event);
            }
        }
    }
}
