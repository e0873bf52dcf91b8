//! Connectivity probing.
//!
//! A probe answers one question: is the monitored endpoint reachable
//! right now? It holds no state and applies no smoothing; the
//! availability monitor layers hysteresis on top.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::config::MonitorConfig;

/// A single reachability attempt against the monitored endpoint.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> bool;
}

/// TCP connect probe.
///
/// A completed handshake counts as reachable; refused connections,
/// unreachable networks and timeouts all count as a failed attempt.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            addr: format!("{}:{}", config.host, config.port),
            timeout: Duration::from_secs(config.probe_timeout_secs),
        }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!("probe to {} failed: {}", self.addr, e);
                false
            }
            Err(_) => {
                tracing::debug!("probe to {} timed out after {:?}", self.addr, self.timeout);
                false
            }
        }
    }
}

/// Mock probe for testing with a scripted result sequence.
///
/// Results are consumed front to back; once the script is exhausted the
/// last value repeats.
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    results: Arc<Mutex<VecDeque<bool>>>,
    calls: Arc<AtomicUsize>,
}

impl MockProbe {
    pub fn new(results: impl IntoIterator<Item = bool>) -> Self {
        Self {
            results: Arc::new(Mutex::new(results.into_iter().collect())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of probe attempts made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for MockProbe {
    async fn check(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut results = self.results.lock().unwrap();
        if results.len() > 1 {
            results.pop_front().unwrap()
        } else {
            results.front().copied().unwrap_or(false)
        }
    }
}
