//! Simulation context implementing WorkerContext for deterministic runs.

use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use worldsync_env::WorkerContext;

/// Simulation context backed by deterministic time and RNG.
///
/// This implements `WorkerContext` using:
/// - A virtual clock that only moves when a worker sleeps
/// - A seed from which per-worker RNG streams are derived
///
/// Every worker gets its own context, so clocks advance independently.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        if let Ok(mut time) = self.virtual_time_ns.lock() {
            let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
            *time = time.saturating_add(nanos);
        }
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        self.virtual_time_ns.lock().map(|t| *t).unwrap_or(0)
    }

    /// Derives an independent RNG stream (one per worker or behavior).
    ///
    /// Same seed + stream = same sequence.
    pub fn derive_rng(&self, stream: u64) -> ChaCha8Rng {
        let combined_seed = self.seed.wrapping_mul(0x517cc1b727220a95) ^ stream;
        ChaCha8Rng::seed_from_u64(combined_seed)
    }
}

#[async_trait]
impl WorkerContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // Sleeping advances virtual time
        self.advance_time(duration);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
