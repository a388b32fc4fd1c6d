//! Readiness Gate
//!
//! Polls a service endpoint until it accepts a connection or the budget runs
//! out. This is the only place the pipeline waits on something outside its
//! control.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tierflow_core::{Protocol, ReadinessPolicy, ServiceEndpoint};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Endpoint plus its wait budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessTarget {
    pub endpoint: ServiceEndpoint,
    pub policy: ReadinessPolicy,
}

impl ReadinessTarget {
    pub fn new(endpoint: ServiceEndpoint, policy: ReadinessPolicy) -> Self {
        Self { endpoint, policy }
    }
}

/// One reachability attempt against an endpoint
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, endpoint: &ServiceEndpoint) -> std::io::Result<()>;
}

/// TCP connect check
pub struct TcpProbe {
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, endpoint: &ServiceEndpoint) -> std::io::Result<()> {
        if endpoint.protocol == Protocol::Udp {
            // UDP has no handshake to observe
            warn!(endpoint = %endpoint, "UDP endpoints cannot be probed; assuming ready");
            return Ok(());
        }

        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(endpoint.address()))
            .await
        {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {} timed out", endpoint.address()),
            )),
        }
    }
}

/// Result of waiting on an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { elapsed: Duration },
    TimedOut { elapsed: Duration },
    /// The run was cancelled while waiting
    Cancelled,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

pub struct ReadinessGate {
    probe: Arc<dyn Probe>,
    cancel: CancellationToken,
}

impl ReadinessGate {
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self {
            probe,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn tcp() -> Self {
        Self::new(Arc::new(TcpProbe::default()))
    }

    /// Poll `endpoint` every `interval` until it answers or `timeout` elapses
    ///
    /// Returns `Ready` as soon as a probe succeeds. `TimedOut` is returned at
    /// the timeout boundary: the last sleep is clipped to the deadline and a
    /// probe still in flight is abandoned there.
    pub async fn wait(
        &self,
        endpoint: &ServiceEndpoint,
        interval: Duration,
        timeout: Duration,
    ) -> Readiness {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => return Readiness::Cancelled,
                result = tokio::time::timeout(remaining, self.probe.probe(endpoint)) => result,
            };

            match attempt {
                Ok(Ok(())) => {
                    let elapsed = start.elapsed();
                    debug!(endpoint = %endpoint, attempts, ?elapsed, "Endpoint ready");
                    return Readiness::Ready { elapsed };
                }
                Ok(Err(e)) => debug!(endpoint = %endpoint, attempts, error = %e, "Not ready yet"),
                Err(_) => debug!(endpoint = %endpoint, attempts, "Probe cut off at deadline"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Readiness::TimedOut {
                    elapsed: start.elapsed(),
                };
            }

            let next = (now + interval).min(deadline);
            tokio::select! {
                _ = self.cancel.cancelled() => return Readiness::Cancelled,
                _ = tokio::time::sleep_until(next) => {}
            }
        }
    }

    /// Wait using the target's own policy
    pub async fn wait_for(&self, target: &ReadinessTarget) -> Readiness {
        self.wait(&target.endpoint, target.policy.interval, target.policy.timeout)
            .await
    }

    /// Single probe without retries
    pub async fn check_once(&self, endpoint: &ServiceEndpoint) -> std::io::Result<()> {
        self.probe.probe(endpoint).await
    }
}
