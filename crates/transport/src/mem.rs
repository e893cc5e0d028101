//! In-process transport and rendezvous for tests and local harnesses.
//!
//! [`MemHub`] plays the role the RDMA fabric plays in a real deployment: it
//! knows every participant's arena and services one-sided writes by copying
//! bytes between them. Channels resolve their peer's arena lazily, so tables
//! can be constructed in any order within a process. Failure injection via
//! [`MemHub::fail`] is terminal, like a crashed peer.
//!
//! Latency is optional and deterministic: a base delay plus jitter sampled
//! from a ChaCha8 generator seeded per channel.

use crate::{
    Channel, ChannelConfig, Rendezvous, RendezvousError, Transport, TransportError,
};
use parking_lot::{Condvar, Mutex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rowsync_types::{ParticipantId, SchemaFingerprint, SharedBytes};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for an in-process hub.
#[derive(Debug, Clone)]
pub struct MemHubConfig {
    /// Base per-write latency. Zero disables latency simulation entirely.
    pub base_latency: Duration,
    /// Jitter as a fraction of base latency (0.0 - 1.0).
    pub jitter_fraction: f64,
    /// Seed for per-channel jitter generators.
    pub seed: u64,
    /// How long a channel waits for its peer's arena to appear before
    /// reporting the peer unavailable.
    pub attach_timeout: Duration,
}

impl Default for MemHubConfig {
    fn default() -> Self {
        Self {
            base_latency: Duration::ZERO,
            jitter_fraction: 0.1,
            seed: 42,
            attach_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct HubInner {
    /// Arenas attached by each participant's table.
    regions: HashMap<ParticipantId, SharedBytes>,
    /// Failure flags, created on demand so a participant can be failed before
    /// or after its table attaches.
    failed: HashMap<ParticipantId, Arc<AtomicBool>>,
}

struct HubState {
    inner: Mutex<HubInner>,
    attached: Condvar,
}

/// In-process transport hub connecting participants within one process.
///
/// Each participant's table attaches its arena when it opens its first
/// channel; writes from peers copy directly between arenas.
pub struct MemHub {
    config: MemHubConfig,
    state: Arc<HubState>,
}

impl MemHub {
    /// Create a hub with default configuration (no simulated latency).
    pub fn new() -> Self {
        Self::with_config(MemHubConfig::default())
    }

    /// Create a hub with explicit configuration.
    pub fn with_config(config: MemHubConfig) -> Self {
        Self {
            config,
            state: Arc::new(HubState {
                inner: Mutex::new(HubInner::default()),
                attached: Condvar::new(),
            }),
        }
    }

    /// Mark a participant as failed.
    ///
    /// Terminal: every channel targeting the participant reports failure from
    /// now on and further writes to it are rejected. There is no heal.
    pub fn fail(&self, id: ParticipantId) {
        let mut inner = self.state.inner.lock();
        failed_flag(&mut inner, id).store(true, Ordering::Relaxed);
        warn!(participant = %id, "injected failure for participant");
        // Wake channels blocked waiting for this participant to attach.
        self.state.attached.notify_all();
    }

    /// Whether a participant has been marked failed.
    pub fn is_failed(&self, id: ParticipantId) -> bool {
        let inner = self.state.inner.lock();
        inner
            .failed
            .get(&id)
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl Default for MemHub {
    fn default() -> Self {
        Self::new()
    }
}

fn failed_flag(inner: &mut HubInner, id: ParticipantId) -> Arc<AtomicBool> {
    inner.failed.entry(id).or_default().clone()
}

impl Transport for MemHub {
    fn open_channel(&self, config: ChannelConfig) -> Result<Box<dyn Channel>, TransportError> {
        let mut inner = self.state.inner.lock();

        // Attaching on first open makes the local arena visible to peers.
        // Re-attaching (a new table for a new epoch) replaces the old arena.
        inner
            .regions
            .insert(config.local, config.source.clone());
        let peer_failed = failed_flag(&mut inner, config.peer);
        drop(inner);
        self.state.attached.notify_all();

        debug!(local = %config.local, peer = %config.peer, span = config.span,
            "opened in-process channel");

        let latency = if self.config.base_latency.is_zero() {
            None
        } else {
            // Per-channel seed so jitter is stable regardless of which other
            // channels exist or the order writes are issued in.
            let pair = ((config.local.0 as u64) << 32) | config.peer.0 as u64;
            Some(LatencyState {
                base: self.config.base_latency,
                jitter_fraction: self.config.jitter_fraction,
                rng: Mutex::new(ChaCha8Rng::seed_from_u64(self.config.seed ^ pair)),
            })
        };

        Ok(Box::new(MemChannel {
            hub: self.state.clone(),
            attach_timeout: self.config.attach_timeout,
            peer: config.peer,
            source: config.source,
            source_base: config.source_base,
            remote_base: config.remote_base,
            span: config.span,
            peer_failed,
            remote: Mutex::new(None),
            latency,
        }))
    }
}

struct LatencyState {
    base: Duration,
    jitter_fraction: f64,
    rng: Mutex<ChaCha8Rng>,
}

impl LatencyState {
    fn sample(&self) -> Duration {
        let base = self.base.as_secs_f64();
        let jitter_range = base * self.jitter_fraction;
        let jitter = if jitter_range > 0.0 {
            self.rng.lock().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).max(0.0))
    }
}

/// A channel that copies bytes between two participants' arenas.
struct MemChannel {
    hub: Arc<HubState>,
    attach_timeout: Duration,
    peer: ParticipantId,
    source: SharedBytes,
    source_base: usize,
    remote_base: usize,
    span: usize,
    peer_failed: Arc<AtomicBool>,
    /// The peer's arena, resolved on first use.
    remote: Mutex<Option<SharedBytes>>,
    latency: Option<LatencyState>,
}

impl MemChannel {
    fn resolve_remote(&self) -> Result<SharedBytes, TransportError> {
        let mut cached = self.remote.lock();
        if let Some(region) = cached.as_ref() {
            return Ok(region.clone());
        }

        let mut inner = self.hub.inner.lock();
        loop {
            if let Some(region) = inner.regions.get(&self.peer) {
                let region = region.clone();
                *cached = Some(region.clone());
                return Ok(region);
            }
            if self.peer_failed.load(Ordering::Relaxed) {
                return Err(TransportError::PeerUnavailable(self.peer));
            }
            if self
                .hub
                .attached
                .wait_for(&mut inner, self.attach_timeout)
                .timed_out()
            {
                return Err(TransportError::PeerUnavailable(self.peer));
            }
        }
    }

    fn copy(&self, offset: usize, len: usize) -> Result<(), TransportError> {
        if offset.checked_add(len).is_none_or(|end| end > self.span) {
            return Err(TransportError::OutOfRange {
                offset,
                len,
                span: self.span,
            });
        }
        if self.peer_failed.load(Ordering::Relaxed) {
            return Err(TransportError::ChannelFailed(self.peer));
        }
        let remote = self.resolve_remote()?;
        if let Some(latency) = &self.latency {
            std::thread::sleep(latency.sample());
        }
        self.source
            .copy_into(self.source_base + offset, &remote, self.remote_base + offset, len);
        Ok(())
    }
}

impl Channel for MemChannel {
    fn write(&self, offset: usize, len: usize) -> Result<(), TransportError> {
        self.copy(offset, len)
    }

    fn write_with_completion(&self, offset: usize, len: usize) -> Result<(), TransportError> {
        // In-process copies are visible as soon as they complete, so the
        // acknowledged variant is the same copy.
        self.copy(offset, len)
    }

    fn is_failed(&self) -> bool {
        self.peer_failed.load(Ordering::Relaxed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Local rendezvous
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct BarrierState {
    generation: u64,
    arrived: usize,
    fingerprint: Option<SchemaFingerprint>,
    mismatch: bool,
    /// Completed generation -> (failed, waiters yet to read the outcome).
    outcomes: HashMap<u64, (bool, usize)>,
}

#[derive(Default)]
struct RendezvousInner {
    barriers: HashMap<Vec<ParticipantId>, BarrierState>,
}

/// In-process barrier implementing [`Rendezvous`].
///
/// Barriers are keyed by the sorted participant set, so concurrent barriers
/// over different subsets do not interfere. Fingerprints presented by the
/// participants of one barrier generation are compared pairwise; if any two
/// differ, every caller of that generation gets a mismatch error.
#[derive(Default)]
pub struct LocalRendezvous {
    inner: Mutex<RendezvousInner>,
    released: Condvar,
}

impl LocalRendezvous {
    /// Create a rendezvous shared by the participants of one process.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Rendezvous for LocalRendezvous {
    fn sync(
        &self,
        local: ParticipantId,
        peers: &[ParticipantId],
        fingerprint: SchemaFingerprint,
    ) -> Result<(), RendezvousError> {
        let mut parties: Vec<ParticipantId> = peers.iter().copied().collect();
        parties.push(local);
        parties.sort();
        parties.dedup();
        let n = parties.len();
        if n == 1 {
            return Ok(());
        }

        let mut inner = self.inner.lock();
        let barrier = inner.barriers.entry(parties.clone()).or_default();
        let generation = barrier.generation;

        match barrier.fingerprint {
            None => barrier.fingerprint = Some(fingerprint),
            Some(first) if first != fingerprint => barrier.mismatch = true,
            Some(_) => {}
        }
        barrier.arrived += 1;

        if barrier.arrived == n {
            let failed = barrier.mismatch;
            barrier.generation += 1;
            barrier.arrived = 0;
            barrier.fingerprint = None;
            barrier.mismatch = false;
            barrier.outcomes.insert(generation, (failed, n - 1));
            self.released.notify_all();
            if failed {
                return Err(RendezvousError::SchemaMismatch);
            }
            return Ok(());
        }

        loop {
            self.released.wait(&mut inner);
            let barrier = inner
                .barriers
                .get_mut(&parties)
                .expect("barrier state disappeared while waiting");
            if let Some((failed, readers_left)) = barrier.outcomes.get_mut(&generation) {
                let failed = *failed;
                *readers_left -= 1;
                if *readers_left == 0 {
                    barrier.outcomes.remove(&generation);
                }
                if failed {
                    return Err(RendezvousError::SchemaMismatch);
                }
                return Ok(());
            }
        }
    }
}
