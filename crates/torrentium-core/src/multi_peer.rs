//! Multi-peer chunk assignment
//!
//! A download spreads its chunk requests over every provider it found. Chunk
//! `i` goes to provider `i mod n` on the first attempt, and each retry shifts
//! to the next provider so a single bad peer cannot exhaust a chunk's
//! attempts on its own. Providers that keep failing are skipped while a
//! healthier one remains.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use torrentium_discovery::{NodeId, PeerHandle};

/// Failures a provider may accumulate before it is considered unhealthy
const MIN_FAILURES_FOR_EVICTION: usize = 3;

/// Failure rate above which a provider is skipped
const MAX_FAILURE_RATE: f64 = 0.5;

/// Peer performance metrics
#[derive(Debug, Clone)]
pub struct PeerPerformance {
    /// Provider handle
    pub peer: PeerHandle,

    /// Average throughput in bytes per second
    pub throughput_bps: u64,

    /// Number of chunks successfully received
    pub chunks_succeeded: usize,

    /// Number of chunk attempts that failed
    pub chunks_failed: usize,

    /// Last activity timestamp
    pub last_active: Instant,
}

impl PeerPerformance {
    /// Create new peer performance tracker
    #[must_use]
    pub fn new(peer: PeerHandle) -> Self {
        Self {
            peer,
            throughput_bps: 1_000_000, // Initial estimate: 1 MB/s
            chunks_succeeded: 0,
            chunks_failed: 0,
            last_active: Instant::now(),
        }
    }

    /// Calculate failure rate
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.chunks_succeeded + self.chunks_failed;
        if total == 0 {
            0.0
        } else {
            self.chunks_failed as f64 / total as f64
        }
    }

    /// Whether the provider is still worth asking
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.chunks_failed < MIN_FAILURES_FOR_EVICTION || self.failure_rate() <= MAX_FAILURE_RATE
    }

    /// Update throughput measurement
    pub fn update_throughput(&mut self, bytes: u64, duration: Duration) {
        let secs = duration.as_secs_f64().max(1e-6);
        let bps = (bytes as f64 / secs) as u64;

        // Exponential moving average
        let alpha = 0.25;
        self.throughput_bps =
            ((1.0 - alpha) * self.throughput_bps as f64 + alpha * bps as f64) as u64;
    }

    fn record_success(&mut self, bytes: u64, duration: Duration) {
        self.chunks_succeeded += 1;
        self.last_active = Instant::now();
        self.update_throughput(bytes, duration);
    }

    fn record_failure(&mut self) {
        self.chunks_failed += 1;
        self.last_active = Instant::now();
    }
}

/// Provider selection for one download
#[derive(Debug, Clone)]
pub struct ProviderRotation {
    providers: Vec<PeerHandle>,
    performance: HashMap<NodeId, PeerPerformance>,
}

impl ProviderRotation {
    /// Rotation over `providers`, in the order given
    #[must_use]
    pub fn new(providers: Vec<PeerHandle>) -> Self {
        let performance = providers
            .iter()
            .map(|p| (p.id, PeerPerformance::new(*p)))
            .collect();
        Self {
            providers,
            performance,
        }
    }

    /// Number of providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether there are no providers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Providers in rotation order
    #[must_use]
    pub fn providers(&self) -> &[PeerHandle] {
        &self.providers
    }

    /// Provider to ask for chunk `index` on attempt `attempt` (0-based)
    ///
    /// Returns `None` only if there are no providers at all.
    #[must_use]
    pub fn provider_for(&self, index: u64, attempt: u32) -> Option<PeerHandle> {
        let n = self.providers.len();
        if n == 0 {
            return None;
        }

        let start = ((index % n as u64) as usize + attempt as usize) % n;
        let healthy = (0..n)
            .map(|offset| self.providers[(start + offset) % n])
            .find(|p| self.performance.get(&p.id).is_none_or(PeerPerformance::is_healthy));

        Some(healthy.unwrap_or(self.providers[start]))
    }

    /// Note a verified chunk from `peer`
    pub fn record_success(&mut self, peer: &NodeId, bytes: u64, elapsed: Duration) {
        if let Some(perf) = self.performance.get_mut(peer) {
            perf.record_success(bytes, elapsed);
        }
    }

    /// Note a failed attempt against `peer`
    pub fn record_failure(&mut self, peer: &NodeId) {
        if let Some(perf) = self.performance.get_mut(peer) {
            perf.record_failure();
            if !perf.is_healthy() {
                tracing::debug!(peer = %perf.peer, failures = perf.chunks_failed, "provider marked unhealthy");
            }
        }
    }

    /// Performance record for `peer`
    #[must_use]
    pub fn performance(&self, peer: &NodeId) -> Option<&PeerPerformance> {
        self.performance.get(peer)
    }
}
