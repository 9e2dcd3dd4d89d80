//! Chaos injection through the resilience stage.

mod common;

use common::{fast_settings, pipeline_config, test_bus, Collector};
use std::time::Duration;

use vigil_bus::Scenario;
use vigil_contracts::{topics, ControlCommand, Payload, ResilienceAction};
use vigil_runtime::{ConfigService, FactoryRegistry, Orchestrator};

#[tokio::test]
async fn blackout_scenario_drops_frames_until_cleared() {
    let bus = test_bus();
    let frames = Collector::attach(&bus, "camera.cam-a.frame");
    let events = Collector::attach(&bus, topics::STATUS_RESILIENCE_EVENT);

    let mut config = pipeline_config(&["cam-a"], 25);
    config.resilience.enabled = true;
    config.resilience.scenarios.push(Scenario {
        scenario_id: "blackout".into(),
        topic: "camera.cam-a.frame".into(),
        latency_ms: 0,
        drop_probability: 1.0,
        enabled: true,
    });

    let service = ConfigService::in_memory(config).unwrap();
    let registry = FactoryRegistry::with_builtins(&bus);
    let mut orchestrator =
        Orchestrator::with_settings(bus.clone(), service, registry, fast_settings());
    orchestrator.boot().await.unwrap();
    let handle = orchestrator.handle();
    let run = tokio::spawn(async move { orchestrator.run().await });

    // Certain drop: nothing reaches subscribers.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(frames.len(), 0, "blackout must drop every frame");

    // Clear the scenario from the dashboard command topic.
    let mut arguments = std::collections::BTreeMap::new();
    arguments.insert("scenario_id".to_string(), serde_json::json!("blackout"));
    arguments.insert("enabled".to_string(), serde_json::json!(false));
    bus.publish(
        topics::DASHBOARD_CONTROL_COMMAND,
        Payload::Control(ControlCommand {
            command: "resilience.toggle".into(),
            target: None,
            arguments,
        }),
    )
    .await
    .unwrap();

    events
        .wait_until("cleared event", Duration::from_secs(5), |envelopes| {
            envelopes.iter().any(|e| {
                matches!(
                    &e.payload,
                    Payload::Resilience(r)
                        if r.scenario_id == "blackout" && r.action == ResilienceAction::Cleared
                )
            })
        })
        .await;

    // Frames flow again.
    frames.wait_len("frames after clear", 2, Duration::from_secs(5)).await;

    handle.stop();
    run.await.unwrap();
    bus.shutdown().await;
}

#[tokio::test]
async fn unknown_scenario_is_created_from_params() {
    let bus = test_bus();
    let events = Collector::attach(&bus, topics::STATUS_RESILIENCE_EVENT);

    let mut config = pipeline_config(&["cam-a"], 10_000);
    config.resilience.enabled = true;

    let service = ConfigService::in_memory(config).unwrap();
    let registry = FactoryRegistry::with_builtins(&bus);
    let mut orchestrator =
        Orchestrator::with_settings(bus.clone(), service, registry, fast_settings());
    orchestrator.boot().await.unwrap();
    let handle = orchestrator.handle();
    let run = tokio::spawn(async move { orchestrator.run().await });

    let mut arguments = std::collections::BTreeMap::new();
    arguments.insert("scenario_id".to_string(), serde_json::json!("lag"));
    arguments.insert("enabled".to_string(), serde_json::json!(true));
    arguments.insert(
        "params".to_string(),
        serde_json::json!({"topic": "process.*", "latency_ms": 20}),
    );
    bus.publish(
        topics::DASHBOARD_CONTROL_COMMAND,
        Payload::Control(ControlCommand {
            command: "resilience.toggle".into(),
            target: None,
            arguments,
        }),
    )
    .await
    .unwrap();

    events
        .wait_until("injected event", Duration::from_secs(5), |envelopes| {
            envelopes.iter().any(|e| {
                matches!(
                    &e.payload,
                    Payload::Resilience(r)
                        if r.scenario_id == "lag"
                            && r.action == ResilienceAction::Injected
                            && r.topic == "process.*"
                )
            })
        })
        .await;

    handle.stop();
    run.await.unwrap();
    bus.shutdown().await;
}
