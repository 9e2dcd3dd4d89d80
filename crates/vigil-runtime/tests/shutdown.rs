//! Staged shutdown and rollback drills.

mod common;

use common::{fast_settings, pipeline_config, test_bus, Collector};
use std::time::Duration;

use vigil_contracts::{topics, Payload};
use vigil_runtime::{ConfigService, FactoryRegistry, Orchestrator};
use vigil_types::{HealthState, ShutdownPhase};

#[tokio::test]
async fn staged_shutdown_visits_phases_in_order() {
    let bus = test_bus();
    let frames = Collector::attach(&bus, "camera.cam-a.frame");
    let progress = Collector::attach(&bus, topics::STATUS_SHUTDOWN_PROGRESS);
    let summaries = Collector::attach(&bus, topics::STATUS_HEALTH_SUMMARY);

    let mut config = pipeline_config(&["cam-a"], 25);
    config.resilience.enabled = true;

    let service = ConfigService::in_memory(config).unwrap();
    let registry = FactoryRegistry::with_builtins(&bus);
    let mut orchestrator =
        Orchestrator::with_settings(bus.clone(), service, registry, fast_settings());
    orchestrator.boot().await.unwrap();
    let handle = orchestrator.handle();
    let run = tokio::spawn(async move {
        orchestrator.run().await;
        orchestrator
    });

    // Steady traffic before the stop signal.
    frames.wait_len("frames", 3, Duration::from_secs(5)).await;

    handle.stop();
    let orchestrator = run.await.unwrap();

    progress
        .wait_len("progress frames", ShutdownPhase::ALL.len(), Duration::from_secs(5))
        .await;
    let phases: Vec<ShutdownPhase> = progress
        .envelopes()
        .iter()
        .filter_map(|e| match &e.payload {
            Payload::ShutdownProgress(p) => Some(p.phase),
            _ => None,
        })
        .collect();
    assert_eq!(phases, ShutdownPhase::ALL.to_vec());

    // Inputs stop first: no new frames once shutdown finished.
    let frames_at_stop = frames.len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(frames.len(), frames_at_stop, "camera kept publishing");

    // The remaining count reaches zero by the final phase.
    let last = progress.envelopes().into_iter().last().unwrap();
    match last.payload {
        Payload::ShutdownProgress(ref p) => assert_eq!(p.modules_remaining, 0),
        _ => unreachable!(),
    }

    // Terminal summary reports everything stopped.
    summaries
        .wait_until("final summary", Duration::from_secs(5), |envelopes| {
            envelopes.iter().any(|e| {
                matches!(
                    &e.payload,
                    Payload::HealthSummary(s) if s.overall == HealthState::Stopped
                )
            })
        })
        .await;

    assert!(orchestrator
        .module_states()
        .iter()
        .all(|(_, state)| state.is_terminal()));
    bus.shutdown().await;
}

#[tokio::test]
async fn rollback_drill_captures_fingerprints() {
    let bus = test_bus();
    let rollbacks = Collector::attach(&bus, topics::CONFIG_ROLLBACK);

    let config = pipeline_config(&["cam-a"], 25);
    let service = ConfigService::in_memory(config).unwrap();
    let registry = FactoryRegistry::with_builtins(&bus);
    let mut settings = fast_settings();
    settings.drill_interval = Some(Duration::from_millis(100));
    let mut orchestrator = Orchestrator::with_settings(bus.clone(), service, registry, settings);
    orchestrator.boot().await.unwrap();
    let handle = orchestrator.handle();
    let run = tokio::spawn(async move {
        orchestrator.run().await;
        orchestrator
    });

    rollbacks
        .wait_until("drill report", Duration::from_secs(5), |envelopes| {
            envelopes.iter().any(|e| {
                matches!(
                    &e.payload,
                    Payload::ConfigRollback(r) if r.reason == "scheduled_drill"
                )
            })
        })
        .await;

    let drill = rollbacks
        .envelopes()
        .into_iter()
        .find_map(|e| match e.payload {
            Payload::ConfigRollback(r) if r.reason == "scheduled_drill" => Some(r),
            _ => None,
        })
        .unwrap();
    // The no-op apply cycle must not change the tree.
    assert_eq!(drill.fingerprint_before, drill.fingerprint_after);
    assert_eq!(drill.previous_version, drill.current_version);
    assert!(drill.diagnostics.contains_key("restarted"));
    assert_eq!(drill.diagnostics.get("success"), Some(&serde_json::json!(true)));

    handle.stop();
    let orchestrator = run.await.unwrap();
    assert_eq!(
        orchestrator.config().version(),
        1,
        "no-op drill must not bump the version"
    );
    bus.shutdown().await;
}
