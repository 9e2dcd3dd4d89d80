//! Module lifecycle orchestration.
//!
//! The orchestrator owns the module registry and drives every module
//! through configure → start → (reconfigure)* → stop. Updates, pushed
//! health, and the stop signal all arrive on one command channel, so
//! every mutation of module state is serialized through a single task
//! and no lock is visible to modules.
//!
//! ```text
//!             config.update ─┐
//!     status.module.health ──┤
//!        OrchestratorHandle ─┴─▶ command loop ──▶ lifecycle calls
//!                                    │                │
//!                        health/summary/drill ticks   ▼
//!                                    │           modules (via
//!                                    ▼           TrackingLink)
//!                       status.health.summary,
//!                       config.snapshot / rollback,
//!                       status.shutdown.progress
//! ```
//!
//! # Staged Shutdown
//!
//! Phases run in data-flow order (input, process, event, output,
//! storage, dashboard, core); one `ShutdownProgress` frame is
//! published per phase. Modules that miss the stop deadline are marked
//! failed and their leaked subscriptions force-released.

mod error;
mod health;
mod registry;
mod shutdown;

pub use error::OrchestratorError;
pub use registry::{FactoryRegistry, ModuleFactory};

use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use vigil_bus::{Bus, SubscriptionHandle};
use vigil_contracts::{
    handler, topics, ConfigRejected, ConfigRollbackPayload, ConfigUpdate, HealthReport,
    HealthSummary, ModuleLink, Payload, ShutdownProgress, SubscribeOptions,
};
use vigil_types::{HealthState, LifecycleState, ShutdownPhase};

use crate::config::{ConfigService, SystemSettings};
use registry::{ModuleRecord, TrackingLink};

/// Deadlines and cadences, derived from `[system]` configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub health_interval: Duration,
    pub summary_interval: Duration,
    pub health_poll_deadline: Duration,
    pub lifecycle_deadline: Duration,
    /// `None` disables rollback drills.
    pub drill_interval: Option<Duration>,
}

impl OrchestratorSettings {
    /// Derives settings from the system section.
    #[must_use]
    pub fn from_system(system: &SystemSettings) -> Self {
        Self {
            health_interval: Duration::from_secs_f64(system.health_interval_secs),
            summary_interval: Duration::from_secs_f64(system.summary_interval_secs),
            health_poll_deadline: Duration::from_secs_f64(system.health_poll_deadline_secs),
            lifecycle_deadline: Duration::from_secs_f64(system.lifecycle_deadline_secs),
            drill_interval: system
                .drill_interval_hours
                .map(|hours| Duration::from_secs_f64(hours * 3600.0)),
        }
    }
}

enum Command {
    Update(ConfigUpdate),
    PushedHealth(HealthReport),
    Stop,
}

/// Cloneable handle for feeding the orchestrator from outside its
/// loop: signal handlers, tests, embedding applications.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl OrchestratorHandle {
    /// Requests staged shutdown.
    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }

    /// Submits a configuration update as if it arrived on
    /// `config.update`.
    pub fn submit_update(&self, update: ConfigUpdate) {
        let _ = self.tx.send(Command::Update(update));
    }
}

/// The lifecycle coordinator.
pub struct Orchestrator {
    bus: Bus,
    config: ConfigService,
    registry: FactoryRegistry,
    settings: OrchestratorSettings,
    records: Vec<ModuleRecord>,
    command_tx: mpsc::UnboundedSender<Command>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    own_subscriptions: Vec<SubscriptionHandle>,
    pushed_health: HashMap<String, HealthReport>,
    latest_reports: BTreeMap<String, HealthReport>,
    drill_cursor: usize,
}

impl Orchestrator {
    /// Creates an orchestrator with settings derived from the loaded
    /// configuration.
    #[must_use]
    pub fn new(bus: Bus, config: ConfigService, registry: FactoryRegistry) -> Self {
        let settings = OrchestratorSettings::from_system(&config.snapshot().system);
        Self::with_settings(bus, config, registry, settings)
    }

    /// Creates an orchestrator with explicit settings (tests shorten
    /// the intervals).
    #[must_use]
    pub fn with_settings(
        bus: Bus,
        config: ConfigService,
        registry: FactoryRegistry,
        settings: OrchestratorSettings,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            bus,
            config,
            registry,
            settings,
            records: Vec::new(),
            command_tx,
            command_rx,
            own_subscriptions: Vec::new(),
            pushed_health: HashMap::new(),
            latest_reports: BTreeMap::new(),
            drill_cursor: 0,
        }
    }

    /// Handle for stop requests and injected updates.
    #[must_use]
    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            tx: self.command_tx.clone(),
        }
    }

    /// The shared bus.
    #[must_use]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The configuration service.
    #[must_use]
    pub fn config(&self) -> &ConfigService {
        &self.config
    }

    /// Current lifecycle state per module, in startup order.
    #[must_use]
    pub fn module_states(&self) -> Vec<(String, LifecycleState)> {
        self.records
            .iter()
            .map(|r| (r.id.clone(), r.state))
            .collect()
    }

    /// Last polled health for a module, if any poll has run.
    #[must_use]
    pub fn module_health(&self, id: &str) -> Option<&HealthReport> {
        self.records
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.last_health.as_ref())
    }

    /// Instantiates, configures, and starts every enabled module from
    /// the current snapshot, then wires the orchestrator's own
    /// subscriptions and broadcasts the boot snapshot.
    ///
    /// Individual module failures are not fatal: the module is marked
    /// failed and boot continues. An unknown fragment type is fatal,
    /// as is a bus failure.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::FactoryMissing`] and
    /// [`OrchestratorError::Bus`].
    pub async fn boot(&mut self) -> Result<(), OrchestratorError> {
        self.bus.start();
        let deadline = self.settings.lifecycle_deadline;

        let fragments: Vec<_> = self
            .config
            .snapshot()
            .fragments()
            .into_iter()
            .filter(|f| f.enabled)
            .collect();
        info!(modules = fragments.len(), "booting modules");

        for fragment in fragments {
            let module = self.registry.create(&fragment.kind, &fragment.id, &fragment.value)?;
            let link = TrackingLink::new(self.bus.clone());
            let mut record = ModuleRecord {
                id: fragment.id,
                category: fragment.category,
                module,
                fragment: fragment.value,
                state: LifecycleState::Created,
                quarantined: false,
                last_health: None,
                link,
            };

            match timeout(deadline, record.module.configure(&record.fragment)).await {
                Ok(Ok(())) => record.state = LifecycleState::Configured,
                Ok(Err(err)) => {
                    warn!(module = %record.id, error = %err, "configure failed at boot");
                    record.state = LifecycleState::Failed;
                }
                Err(_) => {
                    warn!(module = %record.id, "configure deadline exceeded at boot");
                    record.state = LifecycleState::Failed;
                }
            }

            if record.state == LifecycleState::Configured {
                let link = record.link.clone() as Arc<dyn ModuleLink>;
                match timeout(deadline, record.module.start(link)).await {
                    Ok(Ok(())) => {
                        record.state = LifecycleState::Running;
                        info!(module = %record.id, "module running");
                    }
                    Ok(Err(err)) => {
                        warn!(module = %record.id, error = %err, "start failed");
                        record.state = LifecycleState::Failed;
                        record.link.release_all();
                    }
                    Err(_) => {
                        warn!(module = %record.id, "start deadline exceeded");
                        record.state = LifecycleState::Failed;
                        record.link.release_all();
                    }
                }
            }
            self.records.push(record);
        }

        self.subscribe_own().await?;
        publish_best_effort(
            &self.bus,
            topics::CONFIG_SNAPSHOT,
            Payload::ConfigSnapshot(self.config.snapshot_payload()),
        )
        .await;
        Ok(())
    }

    async fn subscribe_own(&mut self) -> Result<(), OrchestratorError> {
        let tx = self.command_tx.clone();
        let updates = self
            .bus
            .subscribe(
                "orchestrator",
                topics::CONFIG_UPDATE,
                SubscribeOptions::default(),
                handler(move |envelope| {
                    let tx = tx.clone();
                    async move {
                        if let Payload::ConfigUpdate(update) = &envelope.payload {
                            let _ = tx.send(Command::Update(update.clone()));
                        }
                        Ok(())
                    }
                }),
            )
            .map_err(|e| OrchestratorError::Bus(e.to_string()))?;
        self.own_subscriptions.push(updates);

        let tx = self.command_tx.clone();
        let pushed = self
            .bus
            .subscribe(
                "orchestrator",
                topics::STATUS_MODULE_HEALTH,
                SubscribeOptions::default(),
                handler(move |envelope| {
                    let tx = tx.clone();
                    async move {
                        if let Payload::Health(report) = &envelope.payload {
                            let _ = tx.send(Command::PushedHealth(report.clone()));
                        }
                        Ok(())
                    }
                }),
            )
            .map_err(|e| OrchestratorError::Bus(e.to_string()))?;
        self.own_subscriptions.push(pushed);
        Ok(())
    }

    /// Runs the command loop until a stop arrives, then performs the
    /// staged shutdown.
    pub async fn run(&mut self) {
        let mut health_tick = interval(self.settings.health_interval);
        let mut summary_tick = interval(self.settings.summary_interval);
        // Effectively never fires when drills are disabled.
        let drill_period = self
            .settings
            .drill_interval
            .unwrap_or(Duration::from_secs(3600 * 24 * 365));
        let mut drill_tick = interval(drill_period);
        for tick in [&mut health_tick, &mut summary_tick, &mut drill_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tick.reset();
        }

        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => match command {
                    Command::Update(update) => self.handle_update(update).await,
                    Command::PushedHealth(report) => {
                        self.pushed_health.insert(report.module.clone(), report);
                    }
                    Command::Stop => break,
                },
                _ = health_tick.tick() => self.poll_health().await,
                _ = summary_tick.tick() => self.publish_summary().await,
                _ = drill_tick.tick(), if self.settings.drill_interval.is_some() => {
                    self.run_drill().await;
                }
            }
        }

        self.staged_shutdown().await;
    }

    /// Applies one update: commit-and-broadcast, or reject with
    /// diagnostics on `status.contract`. The new snapshot is on the
    /// bus before any module sees a reconfigure callback.
    async fn handle_update(&mut self, update: ConfigUpdate) {
        let requester = update.requester.clone();
        let path = update.path.clone();
        match self.config.apply_changes(std::slice::from_ref(&update)) {
            Ok(Some(snapshot)) => {
                info!(version = snapshot.version, requester = %requester, "configuration updated");
                publish_best_effort(
                    &self.bus,
                    topics::CONFIG_SNAPSHOT,
                    Payload::ConfigSnapshot(snapshot),
                )
                .await;
                self.reconfigure_modules().await;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(requester = %requester, path = %path, error = %err, "configuration rejected");
                publish_best_effort(
                    &self.bus,
                    topics::STATUS_CONTRACT,
                    Payload::ConfigRejected(ConfigRejected {
                        requester,
                        path,
                        version: self.config.version(),
                        diagnostics: err.diagnostics(),
                    }),
                )
                .await;
            }
        }
    }

    /// Pushes changed fragments into running modules. A failed
    /// configure reverts the module to its prior fragment, marks it
    /// quarantined, and broadcasts a module-scoped rollback; modules
    /// that declare restart-on-failure are bounced with the prior
    /// fragment.
    async fn reconfigure_modules(&mut self) {
        let deadline = self.settings.lifecycle_deadline;
        let bus = self.bus.clone();
        let version = self.config.version();

        for index in 0..self.records.len() {
            let (id, current_state) = {
                let record = &self.records[index];
                (record.id.clone(), record.state)
            };
            if !matches!(
                current_state,
                LifecycleState::Running | LifecycleState::Configured
            ) {
                continue;
            }
            let Some(new_fragment) = self.config.snapshot().fragment_for(&id) else {
                continue;
            };
            if new_fragment.value == self.records[index].fragment {
                continue;
            }

            let record = &mut self.records[index];
            let failure = match timeout(deadline, record.module.configure(&new_fragment.value)).await
            {
                Ok(Ok(())) => {
                    debug!(module = %id, "fragment applied");
                    record.fragment = new_fragment.value;
                    record.quarantined = false;
                    continue;
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => "configure deadline exceeded".to_string(),
            };

            warn!(module = %id, error = %failure, "reconfigure failed; reverting");
            let _ = timeout(deadline, record.module.configure(&record.fragment)).await;
            record.quarantined = true;
            let restart = record.module.capability().restart_on_config_failure;

            if restart {
                let _ = timeout(deadline, record.module.stop()).await;
                record.link.release_all();
                let _ = timeout(deadline, record.module.configure(&record.fragment)).await;
                let link = TrackingLink::new(bus.clone());
                record.link = link.clone();
                record.state =
                    match timeout(deadline, record.module.start(link as Arc<dyn ModuleLink>)).await
                    {
                        Ok(Ok(())) => LifecycleState::Running,
                        _ => {
                            record.link.release_all();
                            LifecycleState::Failed
                        }
                    };
            }

            let mut diagnostics = BTreeMap::new();
            diagnostics.insert("error".to_string(), Value::String(failure));
            publish_best_effort(
                &bus,
                topics::CONFIG_ROLLBACK,
                Payload::ConfigRollback(ConfigRollbackPayload {
                    previous_version: version.saturating_sub(1),
                    current_version: version,
                    reason: "module_configure_failed".into(),
                    module: Some(id),
                    fingerprint_before: None,
                    fingerprint_after: None,
                    diagnostics,
                }),
            )
            .await;
        }
    }

    async fn poll_health(&mut self) {
        let poll_deadline = self.settings.health_poll_deadline;
        let mut polled = BTreeMap::new();

        for record in &mut self.records {
            let fqn = record.module.capability().id.fqn();
            let report = match record.state {
                LifecycleState::Running => {
                    match timeout(poll_deadline, record.module.health()).await {
                        Ok(mut report) => {
                            if record.quarantined {
                                report.state = report.state.worst(HealthState::Degraded);
                            }
                            report
                        }
                        Err(_) => {
                            warn!(module = %record.id, "health poll deadline exceeded");
                            synthetic_report(&fqn, HealthState::Degraded, "health poll timed out")
                        }
                    }
                }
                LifecycleState::Created | LifecycleState::Configured => {
                    synthetic_report(&fqn, HealthState::Starting, "not started")
                }
                LifecycleState::Stopped => {
                    synthetic_report(&fqn, HealthState::Stopped, "stopped")
                }
                LifecycleState::Failed => synthetic_report(&fqn, HealthState::Error, "failed"),
            };
            record.last_health = Some(report.clone());
            polled.insert(fqn, report);
        }

        self.latest_reports = health::merge_reports(polled, &self.pushed_health);
    }

    async fn publish_summary(&mut self) {
        if self.latest_reports.is_empty() {
            self.poll_health().await;
        }
        let summary = HealthSummary::aggregate(self.latest_reports.clone(), Utc::now());
        debug!(overall = %summary.overall, modules = summary.modules.len(), "health summary");
        publish_best_effort(
            &self.bus,
            topics::STATUS_HEALTH_SUMMARY,
            Payload::HealthSummary(summary),
        )
        .await;
    }

    /// Scheduled rollback drill: restart one module round-robin with
    /// its current fragment, run a no-op apply cycle, and publish the
    /// before/after fingerprints for recovery KPIs.
    async fn run_drill(&mut self) {
        let deadline = self.settings.lifecycle_deadline;
        let bus = self.bus.clone();
        let fingerprint_before = self.config.fingerprint();

        let running: Vec<usize> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.state == LifecycleState::Running)
            .map(|(i, _)| i)
            .collect();

        let mut diagnostics = BTreeMap::new();
        if !running.is_empty() {
            let index = running[self.drill_cursor % running.len()];
            self.drill_cursor += 1;
            let record = &mut self.records[index];
            info!(module = %record.id, "rollback drill restarting module");

            let _ = timeout(deadline, record.module.stop()).await;
            record.link.release_all();
            let _ = timeout(deadline, record.module.configure(&record.fragment)).await;
            let link = TrackingLink::new(bus.clone());
            record.link = link.clone();
            let success =
                match timeout(deadline, record.module.start(link as Arc<dyn ModuleLink>)).await {
                    Ok(Ok(())) => {
                        record.state = LifecycleState::Running;
                        true
                    }
                    _ => {
                        record.link.release_all();
                        record.state = LifecycleState::Failed;
                        false
                    }
                };
            diagnostics.insert("restarted".to_string(), Value::String(record.id.clone()));
            diagnostics.insert("success".to_string(), Value::Bool(success));
        }

        // No-op apply cycle: must not move the version.
        let _ = self.config.apply_changes(&[]);
        let version = self.config.version();

        publish_best_effort(
            &bus,
            topics::CONFIG_ROLLBACK,
            Payload::ConfigRollback(ConfigRollbackPayload {
                previous_version: version,
                current_version: version,
                reason: "scheduled_drill".into(),
                module: None,
                fingerprint_before: Some(fingerprint_before),
                fingerprint_after: Some(self.config.fingerprint()),
                diagnostics,
            }),
        )
        .await;
    }

    async fn staged_shutdown(&mut self) {
        info!("staged shutdown starting");
        let started = Instant::now();
        let deadline = self.settings.lifecycle_deadline;
        let bus = self.bus.clone();

        // New updates are ignored from here on.
        for handle in self.own_subscriptions.drain(..) {
            let _ = self.bus.unsubscribe(&handle);
        }

        for phase in ShutdownPhase::ALL {
            let mut stopped = Vec::new();
            let mut failed = Vec::new();

            for index in shutdown::phase_indices(&self.records, phase) {
                let record = &mut self.records[index];
                let fqn = record.module.capability().id.fqn();
                if record.state != LifecycleState::Running {
                    // Never-started modules have nothing to release.
                    record.state = LifecycleState::Stopped;
                    stopped.push(fqn);
                    continue;
                }
                match timeout(deadline, record.module.stop()).await {
                    Ok(Ok(())) => {
                        record.state = LifecycleState::Stopped;
                        stopped.push(fqn);
                    }
                    Ok(Err(err)) => {
                        warn!(module = %record.id, error = %err, "stop failed");
                        record.state = LifecycleState::Failed;
                        record.link.release_all();
                        failed.push(fqn);
                    }
                    Err(_) => {
                        let leaked = record.link.release_all();
                        warn!(
                            module = %record.id,
                            leaked_subscriptions = leaked,
                            "stop deadline exceeded; abandoning module"
                        );
                        record.state = LifecycleState::Failed;
                        failed.push(fqn);
                    }
                }
            }

            let modules_remaining = self
                .records
                .iter()
                .filter(|r| !r.state.is_terminal())
                .count();
            publish_best_effort(
                &bus,
                topics::STATUS_SHUTDOWN_PROGRESS,
                Payload::ShutdownProgress(ShutdownProgress {
                    phase,
                    modules_remaining,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    stopped,
                    failed,
                }),
            )
            .await;
        }

        // Final summary: every module terminal.
        let mut reports = BTreeMap::new();
        for record in &self.records {
            let fqn = record.module.capability().id.fqn();
            let state = match record.state {
                LifecycleState::Failed => HealthState::Error,
                _ => HealthState::Stopped,
            };
            reports.insert(fqn.clone(), synthetic_report(&fqn, state, "shutdown"));
        }
        publish_best_effort(
            &bus,
            topics::STATUS_HEALTH_SUMMARY,
            Payload::HealthSummary(HealthSummary::aggregate(reports, Utc::now())),
        )
        .await;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "staged shutdown complete"
        );
    }
}

fn synthetic_report(module: &str, state: HealthState, note: &str) -> HealthReport {
    let mut detail = BTreeMap::new();
    detail.insert("note".to_string(), Value::String(note.to_string()));
    HealthReport {
        module: module.to_string(),
        state,
        detail,
        last_seen: Utc::now(),
    }
}

async fn publish_best_effort(bus: &Bus, topic: &str, payload: Payload) {
    if let Err(err) = bus.publish(topic, payload).await {
        debug!(topic, error = %err, "core publication failed");
    }
}
