//! Detection de-duplication stage.
//!
//! Suppresses detections whose key (configurable attributes, default
//! `camera_id`, `kind`, `label`) was already seen within the
//! suppression window. The clock is the envelope timestamp, not wall
//! time, so replays behave deterministically. Re-publication of an
//! identical envelope (same sequence number) is always suppressed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use vigil_contracts::{
    handler, Capability, HealthReport, Module, ModuleError, ModuleLink, SubscribeOptions,
};
use vigil_types::{HealthState, ModuleCategory, SubscriptionId};

use crate::config::DedupeSettings;

/// Remembered key with lazy-deletion LRU bookkeeping.
struct KeyRecord {
    last_timestamp: DateTime<Utc>,
    last_sequence: u64,
    generation: u64,
}

/// Bounded LRU of suppression keys.
struct DedupeIndex {
    entries: HashMap<String, KeyRecord>,
    /// Access order with lazy deletion: stale generations are skipped
    /// at eviction time.
    order: VecDeque<(String, u64)>,
    next_generation: u64,
    max_entries: usize,
}

impl DedupeIndex {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_generation: 0,
            max_entries,
        }
    }

    fn get(&self, key: &str) -> Option<(&DateTime<Utc>, u64)> {
        self.entries
            .get(key)
            .map(|r| (&r.last_timestamp, r.last_sequence))
    }

    fn touch(&mut self, key: String, timestamp: DateTime<Utc>, sequence: u64) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.order.push_back((key.clone(), generation));
        self.entries.insert(
            key,
            KeyRecord {
                last_timestamp: timestamp,
                last_sequence: sequence,
                generation,
            },
        );
        while self.entries.len() > self.max_entries {
            match self.order.pop_front() {
                Some((stale_key, stale_generation)) => {
                    let current = self.entries.get(&stale_key).map(|r| r.generation);
                    if current == Some(stale_generation) {
                        self.entries.remove(&stale_key);
                    }
                }
                None => break,
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The dedupe stage module.
pub struct DedupeStage {
    capability: Capability,
    settings: Arc<RwLock<DedupeSettings>>,
    index: Arc<Mutex<DedupeIndex>>,
    suppressed: Arc<AtomicU64>,
    passed: Arc<AtomicU64>,
    link: Option<Arc<dyn ModuleLink>>,
    subscription: Option<SubscriptionId>,
}

impl DedupeStage {
    #[must_use]
    pub fn new() -> Self {
        let settings = DedupeSettings::default();
        let capability = Capability::new(ModuleCategory::Event, "dedupe")
            .subscribes(settings.input_topic.clone())
            .publishes(settings.output_topic.clone())
            .config_path("event.dedupe");
        Self {
            capability,
            index: Arc::new(Mutex::new(DedupeIndex::new(settings.max_entries))),
            settings: Arc::new(RwLock::new(settings)),
            suppressed: Arc::new(AtomicU64::new(0)),
            passed: Arc::new(AtomicU64::new(0)),
            link: None,
            subscription: None,
        }
    }

    async fn resubscribe(&mut self) -> Result<(), ModuleError> {
        let Some(link) = self.link.clone() else {
            return Ok(());
        };
        if let Some(id) = self.subscription.take() {
            link.unsubscribe(id).await?;
        }

        let settings = self.settings.clone();
        let index = self.index.clone();
        let suppressed = self.suppressed.clone();
        let passed = self.passed.clone();
        let handler_link = link.clone();

        let input_topic = self.settings.read().input_topic.clone();
        let id = link
            .subscribe(
                "event::dedupe",
                &input_topic,
                SubscribeOptions::default(),
                handler(move |envelope| {
                    let settings = settings.clone();
                    let index = index.clone();
                    let suppressed = suppressed.clone();
                    let passed = passed.clone();
                    let link = handler_link.clone();
                    async move {
                        if envelope.payload.as_detection().is_none() {
                            debug!(sequence = envelope.sequence, "ignoring non-detection payload");
                            return Ok(());
                        }

                        let (key_fields, window_ms, output_topic) = {
                            let s = settings.read();
                            (
                                s.key_fields.clone(),
                                (s.window_seconds * 1000.0) as i64,
                                s.output_topic.clone(),
                            )
                        };

                        let key: String = key_fields
                            .iter()
                            .map(|field| {
                                envelope
                                    .payload
                                    .attribute(field)
                                    .unwrap_or_else(|| "-".into())
                            })
                            .collect::<Vec<_>>()
                            .join("|");

                        // Decide under the lock, publish outside it.
                        let pass = {
                            let mut index = index.lock();
                            let decision = match index.get(&key) {
                                Some((_, last_sequence))
                                    if last_sequence == envelope.sequence =>
                                {
                                    false
                                }
                                Some((last_timestamp, _)) => {
                                    let elapsed_ms = (envelope.timestamp - *last_timestamp)
                                        .num_milliseconds();
                                    elapsed_ms >= window_ms
                                }
                                None => true,
                            };
                            if decision {
                                index.touch(key.clone(), envelope.timestamp, envelope.sequence);
                            }
                            decision
                        };

                        if pass {
                            passed.fetch_add(1, Ordering::Relaxed);
                            match envelope.correlation_id {
                                Some(correlation) => {
                                    link.publish_correlated(
                                        &output_topic,
                                        envelope.payload.clone(),
                                        correlation,
                                    )
                                    .await?;
                                }
                                None => {
                                    link.publish(&output_topic, envelope.payload.clone()).await?;
                                }
                            }
                        } else {
                            suppressed.fetch_add(1, Ordering::Relaxed);
                            debug!(key = %key, "detection suppressed");
                        }
                        Ok(())
                    }
                }),
            )
            .await?;
        self.subscription = Some(id);
        Ok(())
    }
}

impl Default for DedupeStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for DedupeStage {
    fn capability(&self) -> &Capability {
        &self.capability
    }

    async fn configure(&mut self, fragment: &Value) -> Result<(), ModuleError> {
        let new: DedupeSettings = serde_json::from_value(fragment.clone())
            .map_err(|e| ModuleError::ConfigInvalid(e.to_string()))?;
        if new.window_seconds < 0.0 {
            return Err(ModuleError::ConfigInvalid(
                "window_seconds must not be negative".into(),
            ));
        }
        if new.key_fields.is_empty() {
            return Err(ModuleError::ConfigInvalid(
                "key_fields must not be empty".into(),
            ));
        }

        let input_changed = {
            let mut settings = self.settings.write();
            let changed = settings.input_topic != new.input_topic;
            if settings.max_entries != new.max_entries {
                *self.index.lock() = DedupeIndex::new(new.max_entries);
            }
            *settings = new;
            changed
        };
        // A running stage follows an input-topic change by moving its
        // subscription; window and key changes apply in place.
        if input_changed && self.link.is_some() {
            self.resubscribe().await?;
        }
        Ok(())
    }

    async fn start(&mut self, link: Arc<dyn ModuleLink>) -> Result<(), ModuleError> {
        self.link = Some(link);
        self.resubscribe().await?;
        let settings = self.settings.read();
        info!(
            input = %settings.input_topic,
            output = %settings.output_topic,
            window_seconds = settings.window_seconds,
            "dedupe stage started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ModuleError> {
        if let (Some(link), Some(id)) = (self.link.take(), self.subscription.take()) {
            link.unsubscribe(id).await?;
        }
        Ok(())
    }

    async fn health(&self) -> HealthReport {
        let mut detail = BTreeMap::new();
        detail.insert(
            "suppressed".into(),
            Value::from(self.suppressed.load(Ordering::Relaxed)),
        );
        detail.insert(
            "passed".into(),
            Value::from(self.passed.load(Ordering::Relaxed)),
        );
        detail.insert("tracked_keys".into(), Value::from(self.index.lock().len()));
        HealthReport {
            module: self.capability.id.fqn(),
            state: if self.subscription.is_some() {
                HealthState::Healthy
            } else {
                HealthState::Stopped
            },
            detail,
            last_seen: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn index() -> DedupeIndex {
        DedupeIndex::new(3)
    }

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn index_bounded_by_max_entries() {
        let mut idx = index();
        for i in 0..10 {
            idx.touch(format!("key-{i}"), ts(i), i as u64);
        }
        assert_eq!(idx.len(), 3);
        assert!(idx.get("key-9").is_some());
        assert!(idx.get("key-0").is_none());
    }

    #[test]
    fn touch_refreshes_eviction_order() {
        let mut idx = index();
        idx.touch("a".into(), ts(0), 1);
        idx.touch("b".into(), ts(1), 2);
        idx.touch("c".into(), ts(2), 3);
        // Refresh "a"; "b" is now the oldest and must be evicted next.
        idx.touch("a".into(), ts(3), 4);
        idx.touch("d".into(), ts(4), 5);
        assert!(idx.get("a").is_some());
        assert!(idx.get("b").is_none());
    }

    #[test]
    fn index_records_latest_sequence() {
        let mut idx = index();
        idx.touch("k".into(), ts(0), 7);
        let (stamp, sequence) = idx.get("k").unwrap();
        assert_eq!(*stamp, ts(0));
        assert_eq!(sequence, 7);
    }

    #[tokio::test]
    async fn configure_rejects_negative_window() {
        let mut stage = DedupeStage::new();
        let fragment = serde_json::json!({"window_seconds": -2.0});
        assert!(matches!(
            stage.configure(&fragment).await,
            Err(ModuleError::ConfigInvalid(_))
        ));
    }

    #[tokio::test]
    async fn configure_is_idempotent() {
        let mut stage = DedupeStage::new();
        let fragment = serde_json::to_value(DedupeSettings::default()).unwrap();
        stage.configure(&fragment).await.unwrap();
        stage.configure(&fragment).await.unwrap();
        assert_eq!(stage.settings.read().window_seconds, 30.0);
    }

    #[tokio::test]
    async fn health_reports_stopped_before_start() {
        let stage = DedupeStage::new();
        assert_eq!(stage.health().await.state, HealthState::Stopped);
    }
}
