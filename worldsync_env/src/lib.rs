//! WorldSync Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" boundary that lets the WorldSync engine
//! run against a production coordinator or an in-memory simulation.
//!
//! # Core Concept: Injected Transport
//!
//! The engine never constructs its own I/O. Everything that crosses the
//! process boundary goes through two injected collaborators:
//! - Time (`now()`, `sleep()`) via [`WorkerContext`]
//! - The coordinator link (`send_*`, `poll()`) via [`Connection`]
//!
//! All asynchronous operations are fire-and-forget requests whose
//! completions come back as [`WorkerEvent`]s on the same polled stream.
//!
//! # Example
//!
//! ```ignore
//! use worldsync_env::{Connection, WorkerContext};
//!
//! async fn worker_loop<Ctx: WorkerContext, Conn: Connection>(ctx: &Ctx, conn: &Conn) {
//!     while conn.is_connected() {
//!         let batch = conn.poll(Duration::from_millis(100)).await?;
//!         handle_batch(batch);
//!         ctx.sleep(Duration::from_secs(5)).await;
//!     }
//! }
//! ```

mod context;
mod connection;
mod error;
mod events;
mod params;
mod tokio_impl;
mod types;

pub use context::WorkerContext;
pub use connection::{Connection, Connector};
pub use error::EnvError;
pub use events::{Authority, EventBatch, LogLevel, StatusCode, WorkerEvent};
pub use params::{generate_worker_id, ConnectionParams, WORKER_ID_CHARSET, WORKER_ID_SUFFIX_LEN};
pub use tokio_impl::TokioContext;
pub use types::{
    CommandKind, CommandRequest, ComponentData, ComponentKind, ComponentUpdate, EntityId,
    EntityTemplate, RequestId,
};
