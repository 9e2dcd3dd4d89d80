//! Periodic `status.bus` sampler.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use vigil_contracts::{topics, Payload};

use crate::bus::Bus;
use crate::error::BusError;

/// Spawns the sampler task. It snapshots every subscription at the
/// configured cadence and publishes a `BusStatus` frame; it winds down
/// on bus shutdown.
pub(crate) fn spawn_sampler(bus: Bus, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(bus.settings().telemetry_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the initial
        // frame reflects a full sampling window.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let status = bus.status_snapshot();
                    match bus.publish(topics::STATUS_BUS, Payload::BusStatus(status)).await {
                        Ok(_) => {}
                        Err(BusError::Stopped) => break,
                        Err(err) => {
                            debug!(error = %err, "bus telemetry publish failed");
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use crate::{Bus, BusSettings};
    use std::time::Duration;
    use vigil_contracts::{handler, topics, Payload, SubscribeOptions};

    #[tokio::test]
    async fn sampler_emits_bus_status() {
        let bus = Bus::new(BusSettings {
            telemetry_interval: Duration::from_millis(20),
            telemetry_enabled: true,
            ..BusSettings::default()
        });
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        bus.subscribe(
            "probe",
            topics::STATUS_BUS,
            SubscribeOptions::default(),
            handler(move |env| {
                let tx = tx.clone();
                async move {
                    if let Payload::BusStatus(status) = &env.payload {
                        tx.send(status.clone()).ok();
                    }
                    Ok(())
                }
            }),
        )
        .unwrap();
        bus.start();

        let status = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("sampler frame")
            .expect("channel open");
        assert_eq!(status.subscriptions.len(), 1);
        assert_eq!(status.subscriptions[0].subscriber, "probe");
        bus.shutdown().await;
    }
}
