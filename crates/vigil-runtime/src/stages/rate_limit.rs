//! Per-key token-bucket rate limiting for artifact fan-out.
//!
//! Buckets are keyed by a payload attribute (default `camera_id`),
//! created lazily, and evicted after an idle window. Refill is
//! computed from envelope timestamp deltas, the same clock the dedupe
//! stage uses, so replays and tests are deterministic. Drops increment
//! a per-key counter reported on `status.rate_limit`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use vigil_contracts::{
    handler, topics, Capability, HealthReport, Module, ModuleError, ModuleLink, Payload,
    RateLimitStatus, SubscribeOptions,
};
use vigil_types::{HealthState, ModuleCategory, SubscriptionId};

use crate::config::RateLimitSettings;

struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

#[derive(Default)]
struct Buckets {
    by_key: HashMap<String, Bucket>,
    dropped_by_key: BTreeMap<String, u64>,
}

impl Buckets {
    /// Takes one token for `key` at envelope time `now`. Returns
    /// `true` when the event may pass.
    fn try_take(&mut self, key: &str, now: DateTime<Utc>, capacity: u32, refill: f64) -> bool {
        let bucket = self.by_key.entry(key.to_string()).or_insert(Bucket {
            tokens: f64::from(capacity),
            last_refill: now,
            last_used: now,
        });
        let elapsed = (now - bucket.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        bucket.tokens = (bucket.tokens + elapsed * refill).min(f64::from(capacity));
        // An out-of-order envelope must not rewind the clocks: a later
        // envelope would see the already-accounted span again and
        // over-credit the bucket.
        bucket.last_refill = bucket.last_refill.max(now);
        bucket.last_used = bucket.last_used.max(now);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            *self.dropped_by_key.entry(key.to_string()).or_insert(0) += 1;
            false
        }
    }

    fn evict_idle(&mut self, now: DateTime<Utc>, idle_seconds: f64) {
        let idle_ms = (idle_seconds * 1000.0) as i64;
        self.by_key
            .retain(|_, bucket| (now - bucket.last_used).num_milliseconds() <= idle_ms);
    }
}

/// The rate-limit stage module.
pub struct RateLimitStage {
    capability: Capability,
    settings: Arc<RwLock<RateLimitSettings>>,
    buckets: Arc<Mutex<Buckets>>,
    link: Option<Arc<dyn ModuleLink>>,
    subscription: Option<SubscriptionId>,
}

impl RateLimitStage {
    #[must_use]
    pub fn new() -> Self {
        let settings = RateLimitSettings::default();
        let capability = Capability::new(ModuleCategory::Output, "rate_limit")
            .subscribes(settings.input_topic.clone())
            .publishes(settings.output_topic.clone())
            .publishes(topics::STATUS_RATE_LIMIT)
            .config_path("outputs.rate_limit");
        Self {
            capability,
            settings: Arc::new(RwLock::new(settings)),
            buckets: Arc::new(Mutex::new(Buckets::default())),
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
        let buckets = self.buckets.clone();
        let handler_link = link.clone();

        let input_topic = self.settings.read().input_topic.clone();
        let id = link
            .subscribe(
                "output::rate_limit",
                &input_topic,
                SubscribeOptions::default(),
                handler(move |envelope| {
                    let settings = settings.clone();
                    let buckets = buckets.clone();
                    let link = handler_link.clone();
                    async move {
                        let (key_field, capacity, refill, idle, output_topic) = {
                            let s = settings.read();
                            (
                                s.key_field.clone(),
                                s.capacity,
                                s.refill_per_second,
                                s.idle_eviction_seconds,
                                s.output_topic.clone(),
                            )
                        };
                        let key = envelope
                            .payload
                            .attribute(&key_field)
                            .unwrap_or_else(|| "default".into());

                        // Decide under the lock, publish outside it.
                        let (allowed, drop_report) = {
                            let mut buckets = buckets.lock();
                            buckets.evict_idle(envelope.timestamp, idle);
                            let allowed =
                                buckets.try_take(&key, envelope.timestamp, capacity, refill);
                            let report = if allowed {
                                None
                            } else {
                                Some(buckets.dropped_by_key.clone())
                            };
                            (allowed, report)
                        };

                        if allowed {
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
                        } else if let Some(dropped_by_key) = drop_report {
                            debug!(key = %key, "rate limit drop");
                            link.publish(
                                topics::STATUS_RATE_LIMIT,
                                Payload::RateLimit(RateLimitStatus {
                                    topic: output_topic,
                                    dropped_by_key,
                                }),
                            )
                            .await?;
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

impl Default for RateLimitStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for RateLimitStage {
    fn capability(&self) -> &Capability {
        &self.capability
    }

    async fn configure(&mut self, fragment: &Value) -> Result<(), ModuleError> {
        let new: RateLimitSettings = serde_json::from_value(fragment.clone())
            .map_err(|e| ModuleError::ConfigInvalid(e.to_string()))?;
        if new.capacity == 0 {
            return Err(ModuleError::ConfigInvalid("capacity must be positive".into()));
        }
        if new.refill_per_second < 0.0 {
            return Err(ModuleError::ConfigInvalid(
                "refill_per_second must not be negative".into(),
            ));
        }

        let input_changed = {
            let mut settings = self.settings.write();
            let changed = settings.input_topic != new.input_topic;
            *settings = new;
            changed
        };
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
            capacity = settings.capacity,
            refill_per_second = settings.refill_per_second,
            "rate-limit stage started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ModuleError> {
        if let (Some(link), Some(id)) = (self.link.take(), self.subscription.take()) {
            link.unsubscribe(id).await?;
        }
        self.buckets.lock().by_key.clear();
        Ok(())
    }

    async fn health(&self) -> HealthReport {
        let buckets = self.buckets.lock();
        let mut detail = BTreeMap::new();
        detail.insert("active_keys".into(), Value::from(buckets.by_key.len()));
        detail.insert(
            "dropped_total".into(),
            Value::from(buckets.dropped_by_key.values().sum::<u64>()),
        );
        drop(buckets);
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

    fn ts(seconds: f64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + (seconds * 1000.0) as i64)
            .unwrap()
    }

    #[test]
    fn bucket_starts_full() {
        let mut buckets = Buckets::default();
        for _ in 0..3 {
            assert!(buckets.try_take("cam", ts(0.0), 3, 0.0));
        }
        assert!(!buckets.try_take("cam", ts(0.0), 3, 0.0));
        assert_eq!(buckets.dropped_by_key["cam"], 1);
    }

    #[test]
    fn refill_over_envelope_time() {
        let mut buckets = Buckets::default();
        assert!(buckets.try_take("cam", ts(0.0), 1, 0.1));
        assert!(!buckets.try_take("cam", ts(1.0), 1, 0.1));
        // After ten seconds of envelope time a full token accrued.
        assert!(buckets.try_take("cam", ts(11.0), 1, 0.1));
    }

    #[test]
    fn keys_are_independent() {
        let mut buckets = Buckets::default();
        assert!(buckets.try_take("a", ts(0.0), 1, 0.0));
        assert!(buckets.try_take("b", ts(0.0), 1, 0.0));
        assert!(!buckets.try_take("a", ts(0.0), 1, 0.0));
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let mut buckets = Buckets::default();
        assert!(buckets.try_take("cam", ts(0.0), 2, 1.0));
        // A long quiet period must not bank more than `capacity`.
        for _ in 0..2 {
            assert!(buckets.try_take("cam", ts(1000.0), 2, 1.0));
        }
        assert!(!buckets.try_take("cam", ts(1000.0), 2, 1.0));
    }

    #[test]
    fn out_of_order_envelopes_do_not_refill() {
        let mut buckets = Buckets::default();
        assert!(buckets.try_take("cam", ts(10.0), 1, 1.0));
        assert!(!buckets.try_take("cam", ts(5.0), 1, 1.0));
    }

    #[test]
    fn rewound_clock_does_not_inflate_refill() {
        let mut buckets = Buckets::default();
        assert!(buckets.try_take("cam", ts(10.0), 1, 1.0));
        // The t=5 straggler must not rewind the refill baseline...
        assert!(!buckets.try_take("cam", ts(5.0), 1, 1.0));
        // ...or t=8 would refill from a span already accounted for.
        assert!(!buckets.try_take("cam", ts(8.0), 1, 1.0));
        // Time genuinely past the baseline still refills.
        assert!(buckets.try_take("cam", ts(11.5), 1, 1.0));
    }

    #[test]
    fn idle_buckets_evicted() {
        let mut buckets = Buckets::default();
        buckets.try_take("cam", ts(0.0), 1, 0.0);
        buckets.evict_idle(ts(301.0), 300.0);
        assert!(buckets.by_key.is_empty());
        // Drop counters survive eviction.
        buckets.try_take("cam", ts(301.0), 1, 0.0);
        assert!(buckets.by_key.contains_key("cam"));
    }

    #[tokio::test]
    async fn configure_rejects_zero_capacity() {
        let mut stage = RateLimitStage::new();
        let fragment = serde_json::json!({"capacity": 0});
        assert!(matches!(
            stage.configure(&fragment).await,
            Err(ModuleError::ConfigInvalid(_))
        ));
    }
}
