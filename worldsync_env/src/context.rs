//! Core environment context trait for WorldSync workers.

use async_trait::async_trait;
use std::time::{Duration, SystemTime};

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the engine can run against
/// both a production clock (tokio) and a virtual one (simulation).
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` - virtual clock advanced by `sleep`
#[async_trait]
pub trait WorkerContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Request deadlines are measured on this clock.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
