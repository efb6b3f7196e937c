//! Scenario runner - drives simulated workers against one coordinator.
//!
//! Every worker has its own virtual clock. The runner always ticks the
//! worker whose clock is furthest behind, so ticks of different workers
//! interleave in virtual-time order until every clock passes the horizon.

use crate::behaviors::{register_deer_handlers, HunterBehavior, ManagedBehavior};
use crate::context::SimContext;
use crate::coordinator::{CoordinatorStats, FaultPlan, SimConnection, SimConnector, SimCoordinator};
use crate::scenarios::ScenarioId;
use crate::schema::{hunter_config, managed_config, DeerHealth, HunterName};

use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};
use worldsync_core::{
    Component, ConfigurationError, Intents, RunSummary, SyncBehavior, TickInput, WorkerConfig, WorkerEngine,
    WorkerError,
};
use worldsync_env::{
    ComponentUpdate, Connection, ConnectionParams, Connector, EntityId, EnvError, LogLevel, WorkerContext,
};

/// Errors that abort a scenario before it can be judged.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("transport error: {0}")]
    Transport(#[from] EnvError),

    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed, over all workers
    pub total_ticks: u64,

    /// Latest worker clock at the end, in seconds
    pub final_time_secs: f64,

    /// Entities held by the coordinator at the end
    pub final_entity_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub entities_created: usize,
    pub creation_failures: usize,
    pub updates_sent: usize,
    pub commands_sent: usize,
    pub command_successes: usize,
    pub command_timeouts: usize,
    pub command_rejections: usize,

    /// Intents refused before reaching the coordinator
    pub local_rejections: usize,

    pub coordinator: CoordinatorStats,
}

impl ScenarioMetrics {
    fn add(&mut self, summary: &RunSummary) {
        self.entities_created += summary.entities_created;
        self.creation_failures += summary.creation_failures;
        self.updates_sent += summary.updates_sent;
        self.commands_sent += summary.commands_sent;
        self.command_successes += summary.command_successes;
        self.command_timeouts += summary.command_timeouts;
        self.command_rejections += summary.command_rejections;
        self.local_rejections += summary.rejected;
    }
}

/// Collects failed expectations.
#[derive(Default)]
struct Checks {
    failures: Vec<String>,
}

impl Checks {
    fn require(&mut self, ok: bool, what: impl Into<String>) {
        if !ok {
            self.failures.push(what.into());
        }
    }

    fn failure_reason(&self) -> Option<String> {
        if self.failures.is_empty() {
            None
        } else {
            Some(self.failures.join("; "))
        }
    }
}

/// One engine on its own virtual clock.
struct SimWorker<B: SyncBehavior> {
    context: Arc<SimContext>,
    engine: WorkerEngine<SimContext, SimConnection, B>,
    summary: RunSummary,
    rejected: Vec<WorkerError>,
    error: Option<WorkerError>,
}

impl<B: SyncBehavior> SimWorker<B> {
    async fn connect(
        coordinator: &Arc<SimCoordinator>,
        context: Arc<SimContext>,
        params: &ConnectionParams,
        config: WorkerConfig,
        behavior: B,
    ) -> Result<Self, SimError> {
        let connector = SimConnector::new(Arc::clone(coordinator));
        let connection = Arc::new(connector.connect(params, config.attributes.clone()).await?);
        let mut engine = WorkerEngine::new(Arc::clone(&context), connection, config, behavior)?;

        let mut summary = RunSummary::default();
        let startup = engine.start()?;
        summary.absorb(&startup);

        Ok(Self {
            context,
            engine,
            summary,
            rejected: startup.rejected,
            error: None,
        })
    }

    fn worker_id(&self) -> String {
        self.engine.connection().worker_id().to_string()
    }

    fn now(&self) -> Duration {
        self.context.now()
    }

    fn is_active(&self) -> bool {
        self.error.is_none() && self.summary.disconnect_reason.is_none() && self.engine.connection().is_connected()
    }

    /// Time of the next tick, if the worker still has one before `horizon`.
    fn due(&self, horizon: Duration) -> Option<Duration> {
        (self.is_active() && self.now() < horizon).then(|| self.now())
    }

    async fn step(&mut self) {
        match self.engine.tick().await {
            Ok(report) => {
                self.summary.ticks += 1;
                self.summary.absorb(&report);
                self.rejected.extend(report.rejected);
            }
            Err(e) => {
                error!("Worker {} stopped: {}", self.worker_id(), e);
                self.error = Some(e);
            }
        }
    }
}

async fn drive_one<A: SyncBehavior>(worker: &mut SimWorker<A>, horizon: Duration) {
    while worker.due(horizon).is_some() {
        worker.step().await;
    }
}

async fn drive<A: SyncBehavior, B: SyncBehavior>(first: &mut SimWorker<A>, second: &mut SimWorker<B>, horizon: Duration) {
    loop {
        match (first.due(horizon), second.due(horizon)) {
            (None, None) => break,
            (Some(_), None) => first.step().await,
            (None, Some(_)) => second.step().await,
            (Some(a), Some(b)) => {
                if a <= b {
                    first.step().await
                } else {
                    second.step().await
                }
            }
        }
    }
}

/// Writes deer health on every visible deer regardless of authority.
struct Trespasser;

impl SyncBehavior for Trespasser {
    fn plan(&mut self, input: &TickInput<'_>, intents: &mut Intents) {
        for (entity_id, state) in input.view.iter() {
            if state.has_component(DeerHealth::KIND) {
                intents.update(entity_id, DeerHealth::KIND, ComponentUpdate::new().with_field("remaining_health", 0));
            }
        }
    }
}

/// Runs scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Deer spawned by the managed worker
    deer: u32,

    /// Managed-worker ticks; sets the virtual-time horizon
    ticks: u32,

    /// Replaces the reference managed config
    managed_config: Option<WorkerConfig>,

    /// Connection parameters of the managed worker
    managed_params: Option<ConnectionParams>,
}

impl ScenarioRunner {
    /// Creates a runner for the reference deployment size.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            deer: 1000,
            ticks: 6,
            managed_config: None,
            managed_params: None,
        }
    }

    pub fn with_deer(mut self, deer: u32) -> Self {
        self.deer = deer;
        self
    }

    pub fn with_ticks(mut self, ticks: u32) -> Self {
        self.ticks = ticks;
        self
    }

    pub fn with_managed_config(mut self, config: WorkerConfig) -> Self {
        self.managed_config = Some(config);
        self
    }

    pub fn with_managed_params(mut self, params: ConnectionParams) -> Self {
        self.managed_params = Some(params);
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("{}", scenario.description());

        let outcome = match scenario {
            ScenarioId::Reference => self.run_reference().await,
            ScenarioId::AuthorityRejection => self.run_authority_rejection().await,
            ScenarioId::CommandTimeout => self.run_command_timeout().await,
            ScenarioId::CreationFailure => self.run_creation_failure().await,
            ScenarioId::Handover => self.run_handover().await,
            ScenarioId::FatalLog => self.run_fatal_log().await,
        };

        outcome.unwrap_or_else(|e| ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_entity_count: 0,
            failure_reason: Some(e.to_string()),
            metrics: ScenarioMetrics::default(),
        })
    }

    fn coordinator(&self, faults: FaultPlan) -> Arc<SimCoordinator> {
        let coordinator = SimCoordinator::shared(faults);
        register_deer_handlers(&coordinator);
        coordinator
    }

    fn managed_config(&self) -> Result<WorkerConfig, ConfigurationError> {
        match &self.managed_config {
            Some(config) => Ok(config.clone()),
            None => managed_config(self.deer),
        }
    }

    fn horizon(&self, config: &WorkerConfig) -> Duration {
        config.tick_interval() * self.ticks
    }

    /// Context of the `stream`-th worker of a scenario.
    fn context(&self, stream: u64) -> Arc<SimContext> {
        SimContext::shared(self.seed.wrapping_add(stream))
    }

    fn params(&self, worker_type: &str, rng: &mut ChaCha8Rng) -> Result<ConnectionParams, EnvError> {
        ConnectionParams::from_args(&[], worker_type, rng)
    }

    async fn managed(
        &self,
        coordinator: &Arc<SimCoordinator>,
        config: WorkerConfig,
        stream: u64,
    ) -> Result<SimWorker<ManagedBehavior>, SimError> {
        let context = self.context(stream);
        let mut rng = context.derive_rng(stream);
        let params = match (&self.managed_params, stream) {
            (Some(params), 0) => params.clone(),
            _ => self.params(&config.worker_type, &mut rng)?,
        };
        let behavior = ManagedBehavior::new(rng);
        SimWorker::connect(coordinator, context, &params, config, behavior).await
    }

    async fn hunter(&self, coordinator: &Arc<SimCoordinator>, stream: u64) -> Result<SimWorker<HunterBehavior>, SimError> {
        let config = hunter_config()?;
        let context = self.context(stream);
        let mut rng = context.derive_rng(stream);
        let params = self.params(&config.worker_type, &mut rng)?;
        let behavior = HunterBehavior::new(rng);
        SimWorker::connect(coordinator, context, &params, config, behavior).await
    }

    fn result(
        &self,
        scenario: ScenarioId,
        coordinator: &SimCoordinator,
        workers: &[(&RunSummary, Duration)],
        checks: Checks,
    ) -> ScenarioResult {
        let mut metrics = ScenarioMetrics {
            coordinator: coordinator.stats(),
            ..ScenarioMetrics::default()
        };
        for (summary, _) in workers {
            metrics.add(summary);
        }
        let final_time = workers.iter().map(|(_, now)| *now).max().unwrap_or_default();

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: checks.failures.is_empty(),
            total_ticks: workers.iter().map(|(summary, _)| summary.ticks).sum(),
            final_time_secs: final_time.as_secs_f64(),
            final_entity_count: coordinator.entity_count(),
            failure_reason: checks.failure_reason(),
            metrics,
        }
    }

    /// SYNC-001: the reference deployment.
    ///
    /// **Assertion**: every configured entity is created, the hunter sees the
    /// deer through its interest, and its shots land.
    async fn run_reference(&self) -> Result<ScenarioResult, SimError> {
        let coordinator = self.coordinator(FaultPlan::none());
        let config = self.managed_config()?;
        let expected: usize = config.spawn.iter().map(|s| s.count as usize).sum();
        let horizon = self.horizon(&config);

        let mut managed = self.managed(&coordinator, config, 0).await?;
        let mut hunter = self.hunter(&coordinator, 1).await?;
        drive(&mut managed, &mut hunter, horizon).await;

        let hunter_id = hunter.worker_id();
        let hunt = hunter.engine.behavior().stats();
        let renamed = coordinator
            .entity_ids()
            .into_iter()
            .filter_map(|id| coordinator.entity(id))
            .filter_map(|components| components.get(&HunterName::KIND).and_then(|d| HunterName::from_data(d).ok()))
            .all(|name| name.first_name != "Joshie");

        let mut checks = Checks::default();
        checks.require(managed.error.is_none() && hunter.error.is_none(), "a worker stopped with an error");
        checks.require(
            managed.summary.entities_created == expected,
            format!("created {} of {} entities", managed.summary.entities_created, expected),
        );
        checks.require(coordinator.entity_count() == expected, "coordinator entity count mismatch");
        checks.require(
            coordinator.visible_to(&hunter_id).len() == expected,
            format!("hunter sees {} of {} entities", coordinator.visible_to(&hunter_id).len(), expected),
        );
        checks.require(hunt.hits > 0, "no shot landed");
        checks.require(hunt.dialogue_events > 0, "no deer said anything");
        checks.require(managed.engine.behavior().health_updates() > 0, "no deer health published");
        checks.require(hunt.renames > 0 && renamed, "hunter was never renamed");
        checks.require(coordinator.stats().updates_rejected == 0, "coordinator rejected an update");

        Ok(self.result(
            ScenarioId::Reference,
            &coordinator,
            &[(&managed.summary, managed.now()), (&hunter.summary, hunter.now())],
            checks,
        ))
    }

    /// SYNC-002: a worker writes components it does not own.
    ///
    /// **Assertion**: the engine refuses every such update locally; a raw
    /// update that bypasses the engine is refused by the coordinator.
    async fn run_authority_rejection(&self) -> Result<ScenarioResult, SimError> {
        let coordinator = self.coordinator(FaultPlan::none());
        let config = self.managed_config()?;
        let horizon = self.horizon(&config);

        let mut managed = self.managed(&coordinator, config, 0).await?;
        let context = self.context(1);
        let mut rng = context.derive_rng(1);
        let trespasser_config = hunter_config()?;
        let params = self.params(&trespasser_config.worker_type, &mut rng)?;
        let mut trespasser = SimWorker::connect(&coordinator, context, &params, trespasser_config, Trespasser).await?;

        drive(&mut managed, &mut trespasser, horizon / 2).await;
        let locally_sent = trespasser.summary.updates_sent;

        let deer = coordinator
            .entity_ids()
            .into_iter()
            .find(|id| coordinator.entity(*id).map(|c| c.contains_key(&DeerHealth::KIND)).unwrap_or(false));
        if let Some(deer) = deer {
            trespasser.engine.connection().send_component_update(
                deer,
                DeerHealth::KIND,
                ComponentUpdate::new().with_field("remaining_health", 0),
            )?;
        }
        drive(&mut managed, &mut trespasser, horizon).await;

        let mut checks = Checks::default();
        checks.require(deer.is_some(), "no deer was created");
        checks.require(!trespasser.rejected.is_empty(), "no update was rejected locally");
        checks.require(
            trespasser
                .rejected
                .iter()
                .all(|e| matches!(e, WorkerError::Authority { .. })),
            "a local rejection was not an authority error",
        );
        checks.require(locally_sent == 0, "an unauthorized update reached the transport");
        checks.require(
            coordinator.stats().updates_rejected == 1,
            format!("coordinator rejected {} updates", coordinator.stats().updates_rejected),
        );
        checks.require(trespasser.error.is_none(), "the rejected worker stopped");

        Ok(self.result(
            ScenarioId::AuthorityRejection,
            &coordinator,
            &[(&managed.summary, managed.now()), (&trespasser.summary, trespasser.now())],
            checks,
        ))
    }

    /// SYNC-003: command responses are dropped.
    ///
    /// **Assertion**: every resolved shot is a timeout.
    async fn run_command_timeout(&self) -> Result<ScenarioResult, SimError> {
        let coordinator = self.coordinator(FaultPlan::none().with_dropped_command_responses());
        let config = self.managed_config()?;
        let horizon = self.horizon(&config);

        let mut managed = self.managed(&coordinator, config, 0).await?;
        let mut hunter = self.hunter(&coordinator, 1).await?;
        drive(&mut managed, &mut hunter, horizon).await;

        let hunt = hunter.engine.behavior().stats();
        let mut checks = Checks::default();
        checks.require(hunt.shots_fired > 0, "no shot fired");
        checks.require(hunt.timeouts > 0, "no command timed out");
        checks.require(hunt.hits == 0 && hunt.rejected == 0, "a dropped command got a response");
        checks.require(hunter.error.is_none(), "timeouts stopped the worker");

        Ok(self.result(
            ScenarioId::CommandTimeout,
            &coordinator,
            &[(&managed.summary, managed.now()), (&hunter.summary, hunter.now())],
            checks,
        ))
    }

    /// SYNC-004: the coordinator rejects every creation.
    ///
    /// **Assertion**: one failure per configured entity, nothing created, no retries.
    async fn run_creation_failure(&self) -> Result<ScenarioResult, SimError> {
        let coordinator = self.coordinator(FaultPlan::none().with_rejected_creations());
        let config = self.managed_config()?;
        let expected: usize = config.spawn.iter().map(|s| s.count as usize).sum();
        let horizon = self.horizon(&config);

        let mut managed = self.managed(&coordinator, config, 0).await?;
        drive_one(&mut managed, horizon).await;

        let mut checks = Checks::default();
        checks.require(
            managed.summary.creation_failures == expected,
            format!("{} of {} creations failed", managed.summary.creation_failures, expected),
        );
        checks.require(managed.summary.entities_created == 0, "an entity was created");
        checks.require(coordinator.entity_count() == 0, "coordinator holds entities");
        checks.require(managed.engine.factory().in_flight() == 0, "a creation is still in flight");
        checks.require(managed.error.is_none(), "creation failures stopped the worker");

        Ok(self.result(
            ScenarioId::CreationFailure,
            &coordinator,
            &[(&managed.summary, managed.now())],
            checks,
        ))
    }

    /// SYNC-005: the deer owner disconnects halfway.
    ///
    /// **Assertion**: the second managed worker ends up authoritative over
    /// every deer and keeps publishing their health.
    async fn run_handover(&self) -> Result<ScenarioResult, SimError> {
        let coordinator = self.coordinator(FaultPlan::none());
        let config = self.managed_config()?;
        let horizon = self.horizon(&config);
        let mut standby_config = config.clone();
        standby_config.spawn.clear();

        let mut primary = self.managed(&coordinator, config, 0).await?;
        let mut standby = self.managed(&coordinator, standby_config, 1).await?;
        drive(&mut primary, &mut standby, horizon / 2).await;

        let before = standby.engine.behavior().health_updates();
        coordinator.disconnect(&primary.worker_id(), "handover");
        drive(&mut primary, &mut standby, horizon).await;

        let standby_id = standby.worker_id();
        let deer: Vec<EntityId> = coordinator
            .entity_ids()
            .into_iter()
            .filter(|id| coordinator.entity(*id).map(|c| c.contains_key(&DeerHealth::KIND)).unwrap_or(false))
            .collect();

        let mut checks = Checks::default();
        checks.require(!deer.is_empty(), "no deer was created");
        checks.require(
            primary.summary.disconnect_reason.as_deref() == Some("handover"),
            "primary did not see its disconnect",
        );
        checks.require(
            deer.iter()
                .all(|id| coordinator.authority_of(*id, DeerHealth::KIND).as_deref() == Some(standby_id.as_str())),
            "deer authority did not move to the standby worker",
        );
        checks.require(
            standby.engine.behavior().health_updates() > before,
            "standby never published deer health",
        );
        checks.require(standby.error.is_none(), "standby stopped with an error");

        Ok(self.result(
            ScenarioId::Handover,
            &coordinator,
            &[(&primary.summary, primary.now()), (&standby.summary, standby.now())],
            checks,
        ))
    }

    /// SYNC-006: the coordinator sends the hunter a fatal log.
    ///
    /// **Assertion**: the hunter loop ends with a transport error; the
    /// managed worker is unaffected.
    async fn run_fatal_log(&self) -> Result<ScenarioResult, SimError> {
        let coordinator = self.coordinator(FaultPlan::none());
        let config = self.managed_config()?;
        let horizon = self.horizon(&config);

        let mut managed = self.managed(&coordinator, config, 0).await?;
        let mut hunter = self.hunter(&coordinator, 1).await?;
        drive(&mut managed, &mut hunter, horizon / 2).await;

        coordinator.send_log(&hunter.worker_id(), LogLevel::Fatal, "worker misbehaved");
        drive(&mut managed, &mut hunter, horizon).await;

        let mut checks = Checks::default();
        checks.require(
            matches!(hunter.error, Some(WorkerError::Transport(EnvError::Fatal(_)))),
            "hunter did not stop on the fatal log",
        );
        checks.require(managed.error.is_none(), "managed worker stopped");
        checks.require(managed.now() >= horizon, "managed worker did not reach the horizon");

        Ok(self.result(
            ScenarioId::FatalLog,
            &coordinator,
            &[(&managed.summary, managed.now()), (&hunter.summary, hunter.now())],
            checks,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(42).with_deer(5).with_ticks(4)
    }

    #[tokio::test]
    async fn test_all_scenarios_pass() {
        let runner = runner();
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario).await;
            assert!(result.passed, "{} failed: {:?}", scenario, result.failure_reason);
        }
    }

    #[tokio::test]
    async fn test_reference_metrics() {
        let result = runner().run(ScenarioId::Reference).await;

        assert_eq!(result.final_entity_count, 6);
        assert_eq!(result.metrics.entities_created, 6);
        assert!(result.metrics.command_successes > 0);
        assert_eq!(result.metrics.command_timeouts, 0);
        // Managed runs 4 ticks of 5 s, the hunter 7 of 3 s
        assert_eq!(result.total_ticks, 11);
        assert!(result.final_time_secs >= 20.0);
    }

    #[tokio::test]
    async fn test_same_seed_same_result() {
        let a = runner().run(ScenarioId::Reference).await;
        let b = runner().run(ScenarioId::Reference).await;

        assert_eq!(a.total_ticks, b.total_ticks);
        assert_eq!(a.metrics.updates_sent, b.metrics.updates_sent);
        assert_eq!(a.metrics.coordinator, b.metrics.coordinator);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_scenario() {
        let mut config = managed_config(1).unwrap();
        config.spawn[0].archetype = "unicorn".to_string();

        let result = runner().with_managed_config(config).run(ScenarioId::Reference).await;

        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("unicorn"));
    }

    #[tokio::test]
    async fn test_managed_params_name_the_worker() {
        let params = ConnectionParams::from_args(
            &["receptionist".to_string(), "localhost".to_string(), "7777".to_string(), "Managed_test".to_string()],
            "Managed",
            &mut ChaCha8Rng::seed_from_u64(0),
        )
        .unwrap();
        let runner = runner().with_managed_params(params);
        let coordinator = runner.coordinator(FaultPlan::none());

        let managed = runner
            .managed(&coordinator, runner.managed_config().unwrap(), 0)
            .await
            .unwrap();

        assert_eq!(managed.worker_id(), "Managed_test");
        assert_eq!(coordinator.worker_ids(), vec!["Managed_test".to_string()]);
    }
}
