//! WorldSync deterministic simulation harness
//!
//! This crate runs real [`WorkerEngine`](worldsync_core::WorkerEngine)s
//! against an in-memory coordinator, with every source of non-determinism
//! under control:
//! - **Time**: each worker has a virtual clock that only moves when it sleeps
//! - **Coordinator**: entity ids, authority and the entity stream are computed
//!   in-process; faults are injected through a [`FaultPlan`]
//! - **Randomness**: all entropy derives from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌──────────────┐                      ┌──────────────┐     │
//! │  │ WorkerEngine │                      │ WorkerEngine │     │
//! │  │ Managed      │                      │ myWorker     │     │
//! │  └──────┬───────┘                      └──────┬───────┘     │
//! │         │ SimConnection          SimConnection │             │
//! │  ┌──────▼──────────────────────────────────────▼───────┐    │
//! │  │                   SimCoordinator                    │    │
//! │  │   ids · entities · authority · interest · commands  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use worldsync_sim::{ScenarioRunner, ScenarioId};
//!
//! let runner = ScenarioRunner::new(42).with_deer(10);
//! let result = runner.run(ScenarioId::Reference).await;
//! assert!(result.passed);
//! ```

mod context;
mod coordinator;
mod runner;

pub mod behaviors;
pub mod scenarios;
pub mod schema;

pub use behaviors::{handle_got_shot, register_deer_handlers, HuntStats, HunterBehavior, ManagedBehavior};
pub use context::SimContext;
pub use coordinator::{
    CommandHandler, CommandOutput, CoordinatorStats, FaultPlan, SimConnection, SimConnector, SimCoordinator,
};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, SimError};
pub use scenarios::ScenarioId;
