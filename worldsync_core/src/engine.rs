//! Worker Engine - the poll → ingest → publish → sleep loop.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerEngine                         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │  Context: WorkerContext      Connection: injected    │   │
//! │  │  • now() → request deadlines • poll() → EventBatch   │   │
//! │  │  • sleep() → tick rate       • send_*() → RequestId  │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                              │                              │
//! │  ┌────────────┐ ┌───────────┐ ┌──────────┐ ┌────────────┐   │
//! │  │ Reconciler │ │ LocalView │ │ Factory  │ │ Correlator │   │
//! │  └────────────┘ └───────────┘ └──────────┘ └────────────┘   │
//! │                              │                              │
//! │                 SyncBehavior::plan → Intents                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Tick
//!
//! 1. Poll one batch (bounded by `poll_timeout`), fold it into the view,
//!    route responses to the factory and correlator, expire deadlines.
//! 2. Let the behavior read the view and queue [`Intents`].
//! 3. Publish: updates are checked against local authority first, commands
//!    go through the correlator, creations through the factory.
//! 4. Sleep for `tick_interval`.
//!
//! Ticks never overlap. Only transport failures end the loop; authority and
//! configuration errors are reported in the [`TickReport`] and never sent.
//!
//! # Usage
//!
//! ```ignore
//! let ctx = TokioContext::shared();
//! let conn = Arc::new(connector.connect(&params, config.attributes.clone()).await?);
//! let mut engine = WorkerEngine::new(ctx, conn, config, MyBehavior::default())?;
//! let summary = engine.run(None).await?;
//! ```

use crate::config::WorkerConfig;
use crate::correlator::{CommandCorrelator, CommandResolution, RequestHandle};
use crate::error::{ConfigurationError, WorkerError};
use crate::factory::{CreationHandle, CreationOutcome, EntityFactory};
use crate::reconciler::{Reconciler, ViewChange};
use crate::template::CreationRequest;
use crate::view::LocalView;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use worldsync_env::{
    CommandRequest, ComponentKind, ComponentUpdate, Connection, EntityId, EnvError, LogLevel, WorkerContext,
    WorkerEvent,
};

/// Something the behavior wants done this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Update {
        entity_id: EntityId,
        component: ComponentKind,
        update: ComponentUpdate,
    },
    Command {
        entity_id: EntityId,
        command: CommandRequest,
        /// `None` uses the configured command timeout
        timeout: Option<Duration>,
    },
    Create(CreationRequest),
    Log {
        level: LogLevel,
        message: String,
    },
}

/// Intents queued during one tick, published in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Intents {
    items: Vec<Intent>,
}

impl Intents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, entity_id: EntityId, component: ComponentKind, update: ComponentUpdate) {
        self.items.push(Intent::Update {
            entity_id,
            component,
            update,
        });
    }

    pub fn command(&mut self, entity_id: EntityId, command: CommandRequest, timeout: Option<Duration>) {
        self.items.push(Intent::Command {
            entity_id,
            command,
            timeout,
        });
    }

    pub fn create(&mut self, request: CreationRequest) {
        self.items.push(Intent::Create(request));
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.items.push(Intent::Log {
            level,
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Intent> {
        self.items.iter()
    }
}

impl IntoIterator for Intents {
    type Item = Intent;
    type IntoIter = std::vec::IntoIter<Intent>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// What a behavior sees on each tick.
#[derive(Debug, Clone, Copy)]
pub struct TickInput<'a> {
    pub tick: u64,
    pub now: Duration,
    pub view: &'a LocalView,
    pub changes: &'a [ViewChange],
    pub creations: &'a [CreationOutcome],
    pub commands: &'a [CommandResolution],
}

/// Worker-specific logic plugged into the engine.
pub trait SyncBehavior {
    /// Queues this tick's work. Runs after the batch has been ingested.
    fn plan(&mut self, input: &TickInput<'_>, intents: &mut Intents);

    /// Called once before the first tick.
    fn on_start(&mut self, _intents: &mut Intents) {}

    /// Called when the coordinator ends the session.
    fn on_disconnect(&mut self, _reason: &str) {}
}

/// Result of one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,

    /// Events received in the polled batch
    pub events: usize,

    pub changes: Vec<ViewChange>,
    pub creations: Vec<CreationOutcome>,
    pub commands: Vec<CommandResolution>,

    pub updates_sent: usize,
    pub commands_sent: Vec<RequestHandle>,
    pub creations_started: Vec<CreationHandle>,

    /// Intents rejected locally (authority, configuration)
    pub rejected: Vec<WorkerError>,

    /// Set when the coordinator disconnected this worker
    pub disconnected: Option<String>,
}

impl TickReport {
    fn new(tick: u64) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }
}

/// Totals over a whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub ticks: u64,
    pub updates_sent: usize,
    pub commands_sent: usize,
    pub entities_created: usize,
    pub creation_failures: usize,
    pub command_successes: usize,
    pub command_timeouts: usize,
    pub command_rejections: usize,
    pub rejected: usize,
    pub disconnect_reason: Option<String>,
}

impl RunSummary {
    /// Folds one tick's report into the totals.
    pub fn absorb(&mut self, report: &TickReport) {
        self.updates_sent += report.updates_sent;
        self.commands_sent += report.commands_sent.len();
        self.rejected += report.rejected.len();
        for outcome in &report.creations {
            match outcome.result {
                Ok(_) => self.entities_created += 1,
                Err(_) => self.creation_failures += 1,
            }
        }
        for resolution in &report.commands {
            match &resolution.result {
                Ok(_) => self.command_successes += 1,
                Err(e) if e.is_timeout() => self.command_timeouts += 1,
                Err(_) => self.command_rejections += 1,
            }
        }
        if report.disconnected.is_some() {
            self.disconnect_reason = report.disconnected.clone();
        }
    }
}

/// Drives one worker.
///
/// Generic over the context and connection implementations, so the same
/// engine runs against a production coordinator or the in-memory one.
pub struct WorkerEngine<Ctx, Conn, B>
where
    Ctx: WorkerContext,
    Conn: Connection,
    B: SyncBehavior,
{
    context: Arc<Ctx>,
    connection: Arc<Conn>,
    behavior: B,
    config: WorkerConfig,

    view: LocalView,
    reconciler: Reconciler,
    factory: EntityFactory,
    correlator: CommandCorrelator,

    tick_count: u64,
    started: bool,
    disconnected: Option<String>,
}

impl<Ctx, Conn, B> WorkerEngine<Ctx, Conn, B>
where
    Ctx: WorkerContext,
    Conn: Connection,
    B: SyncBehavior,
{
    /// Creates an engine over an established connection.
    ///
    /// # Errors
    /// The config failed validation.
    pub fn new(context: Arc<Ctx>, connection: Arc<Conn>, config: WorkerConfig, behavior: B) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            reconciler: Reconciler::new(config.registry()),
            factory: EntityFactory::new(config.reservation_timeout(), config.creation_timeout()),
            correlator: CommandCorrelator::new(),
            view: LocalView::new(),
            context,
            connection,
            behavior,
            config,
            tick_count: 0,
            started: false,
            disconnected: None,
        })
    }

    pub fn view(&self) -> &LocalView {
        &self.view
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    pub fn behavior_mut(&mut self) -> &mut B {
        &mut self.behavior
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<Conn> {
        &self.connection
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn factory(&self) -> &EntityFactory {
        &self.factory
    }

    pub fn correlator(&self) -> &CommandCorrelator {
        &self.correlator
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Starts creating one entity.
    pub fn create_entity(&mut self, request: CreationRequest) -> Result<CreationHandle, WorkerError> {
        self.factory
            .begin(self.connection.as_ref(), self.context.now(), request)
    }

    /// Starts creating every entity listed in the config's `spawn` section.
    pub fn spawn_configured(&mut self) -> Result<Vec<CreationHandle>, WorkerError> {
        let mut requests = Vec::new();
        for spawn in &self.config.spawn {
            let archetype = self
                .config
                .archetype(&spawn.archetype)
                .ok_or_else(|| ConfigurationError::UnknownArchetype(spawn.archetype.clone()))?;
            let request = archetype.creation_request()?;
            for _ in 0..spawn.count {
                requests.push(request.clone());
            }
        }

        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            handles.push(self.create_entity(request)?);
        }
        if !handles.is_empty() {
            info!("Spawning {} configured entities", handles.len());
        }
        Ok(handles)
    }

    /// Sends an update, after checking local write authority.
    ///
    /// # Errors
    /// * `Authority` - this worker does not hold authority; nothing is sent
    /// * `Transport` - the send failed
    pub fn publish_update(
        &self,
        entity_id: EntityId,
        component: ComponentKind,
        update: ComponentUpdate,
    ) -> Result<(), WorkerError> {
        if !self.view.has_authority(entity_id, component) {
            return Err(WorkerError::Authority { entity_id, component });
        }
        self.connection
            .send_component_update(entity_id, component, update)?;
        Ok(())
    }

    /// Sends a command through the correlator.
    pub fn send_command(
        &mut self,
        entity_id: EntityId,
        command: CommandRequest,
        timeout: Option<Duration>,
    ) -> Result<RequestHandle, WorkerError> {
        let timeout = timeout.unwrap_or_else(|| self.config.command_timeout());
        self.correlator.send_command(
            self.connection.as_ref(),
            self.context.now(),
            entity_id,
            command,
            timeout,
        )
    }

    /// Spawns configured entities and publishes the behavior's startup intents.
    pub fn start(&mut self) -> Result<TickReport, WorkerError> {
        let mut report = TickReport::new(0);
        if self.started {
            return Ok(report);
        }
        self.started = true;

        info!(
            "Worker {} starting (attributes {:?})",
            self.connection.worker_id(),
            self.connection.attributes()
        );
        report.creations_started = self.spawn_configured()?;

        let mut intents = Intents::new();
        self.behavior.on_start(&mut intents);
        self.publish(intents, &mut report)?;
        Ok(report)
    }

    /// Runs one tick.
    ///
    /// # Errors
    /// * `Transport` - poll or send failed, or the coordinator sent a fatal log
    pub async fn tick(&mut self) -> Result<TickReport, WorkerError> {
        self.tick_count += 1;
        let mut report = TickReport::new(self.tick_count);

        // 1. Ingest
        let batch = self.connection.poll(self.config.poll_timeout()).await?;
        report.events = batch.len();
        let ingested = self.reconciler.ingest(&mut self.view, batch);
        report.changes = ingested.changes;

        let now = self.context.now();
        for event in ingested.forwarded {
            self.dispatch(now, event, &mut report)?;
        }

        self.factory.expire(self.connection.as_ref(), now);
        self.correlator.expire(now);
        report.creations = self.factory.drain_outcomes();
        report.commands = self.correlator.drain_resolutions();

        if let Some(reason) = &report.disconnected {
            self.behavior.on_disconnect(reason);
            return Ok(report);
        }

        // 2. Plan
        let mut intents = Intents::new();
        let input = TickInput {
            tick: self.tick_count,
            now,
            view: &self.view,
            changes: &report.changes,
            creations: &report.creations,
            commands: &report.commands,
        };
        self.behavior.plan(&input, &mut intents);

        // 3. Publish
        self.publish(intents, &mut report)?;

        debug!(
            "Tick {}: {} events, {} changes, {} updates, {} commands",
            report.tick,
            report.events,
            report.changes.len(),
            report.updates_sent,
            report.commands_sent.len()
        );

        // 4. Sleep
        self.context.sleep(self.config.tick_interval()).await;
        Ok(report)
    }

    /// Ticks until disconnected, or for at most `max_ticks`.
    ///
    /// # Errors
    /// The first transport failure; the loop stops there.
    pub async fn run(&mut self, max_ticks: Option<u64>) -> Result<RunSummary, WorkerError> {
        let mut summary = RunSummary::default();
        let startup = self.start()?;
        summary.absorb(&startup);

        while self.connection.is_connected() && self.disconnected.is_none() {
            if max_ticks.map(|max| summary.ticks >= max).unwrap_or(false) {
                break;
            }
            let report = self.tick().await?;
            summary.ticks += 1;
            summary.absorb(&report);
        }

        if let Some(reason) = &self.disconnected {
            info!("Disconnected after {} ticks: {}", summary.ticks, reason);
        }
        Ok(summary)
    }

    fn dispatch(&mut self, now: Duration, event: WorkerEvent, report: &mut TickReport) -> Result<(), WorkerError> {
        let conn = self.connection.as_ref();
        match event {
            WorkerEvent::ReserveEntityIdsResponse {
                request_id,
                status,
                message,
                first_entity_id,
                ..
            } => {
                self.factory
                    .on_reserve_response(conn, now, request_id, status, &message, first_entity_id)?;
            }
            WorkerEvent::CreateEntityResponse {
                request_id,
                status,
                message,
                entity_id,
            } => {
                self.factory
                    .on_create_response(conn, request_id, status, &message, entity_id);
            }
            WorkerEvent::CommandResponse {
                request_id,
                status,
                message,
                response,
                ..
            } => {
                self.correlator.on_response(request_id, status, &message, response);
            }
            WorkerEvent::LogMessage { level, message } => match level {
                LogLevel::Debug => debug!("[remote] {}", message),
                LogLevel::Info => info!("[remote] {}", message),
                LogLevel::Warn => warn!("[remote] {}", message),
                LogLevel::Error => error!("[remote] {}", message),
                LogLevel::Fatal => {
                    error!("[remote] fatal: {}", message);
                    return Err(EnvError::Fatal(message).into());
                }
            },
            WorkerEvent::Disconnect { reason } => {
                warn!("Coordinator disconnected worker: {}", reason);
                self.disconnected = Some(reason.clone());
                report.disconnected = Some(reason);
            }
            other => debug!("Unhandled event {:?}", other),
        }
        Ok(())
    }

    fn publish(&mut self, intents: Intents, report: &mut TickReport) -> Result<(), WorkerError> {
        for intent in intents {
            match intent {
                Intent::Update {
                    entity_id,
                    component,
                    update,
                } => {
                    let result = self.publish_update(entity_id, component, update);
                    if absorb(result, report)?.is_some() {
                        report.updates_sent += 1;
                    }
                }
                Intent::Command {
                    entity_id,
                    command,
                    timeout,
                } => {
                    let result = self.send_command(entity_id, command, timeout);
                    if let Some(handle) = absorb(result, report)? {
                        report.commands_sent.push(handle);
                    }
                }
                Intent::Create(request) => {
                    let result = self.create_entity(request);
                    if let Some(handle) = absorb(result, report)? {
                        report.creations_started.push(handle);
                    }
                }
                Intent::Log { level, message } => {
                    self.connection
                        .send_log_message(level, &self.config.worker_type, &message);
                }
            }
        }
        Ok(())
    }
}

/// Keeps local rejections in the report; only loop-fatal errors propagate.
fn absorb<T>(result: Result<T, WorkerError>, report: &mut TickReport) -> Result<Option<T>, WorkerError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal_to_loop() => Err(e),
        Err(e) => {
            warn!("Rejected locally: {}", e);
            report.rejected.push(e);
            Ok(None)
        }
    }
}
