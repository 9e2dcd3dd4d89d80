//! Health report merging.
//!
//! The health loop polls `module.health()` and merges the results with
//! reports modules pushed on `status.module.health` between polls. The
//! fresher report (by `last_seen`) wins per module; pushed reports for
//! unknown modules are carried through so external shims appear in the
//! summary.

use std::collections::{BTreeMap, HashMap};

use vigil_contracts::HealthReport;

/// Merges polled and pushed reports into the summary map.
pub(crate) fn merge_reports(
    polled: BTreeMap<String, HealthReport>,
    pushed: &HashMap<String, HealthReport>,
) -> BTreeMap<String, HealthReport> {
    let mut merged = polled;
    for (module, pushed_report) in pushed {
        match merged.get(module) {
            Some(existing) if existing.last_seen >= pushed_report.last_seen => {}
            _ => {
                merged.insert(module.clone(), pushed_report.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use vigil_types::HealthState;

    fn report(module: &str, state: HealthState, age_secs: i64) -> HealthReport {
        HealthReport {
            module: module.into(),
            state,
            detail: BTreeMap::new(),
            last_seen: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn fresher_pushed_report_wins() {
        let mut polled = BTreeMap::new();
        polled.insert("a".to_string(), report("a", HealthState::Healthy, 10));
        let mut pushed = HashMap::new();
        pushed.insert("a".to_string(), report("a", HealthState::Degraded, 0));

        let merged = merge_reports(polled, &pushed);
        assert_eq!(merged["a"].state, HealthState::Degraded);
    }

    #[test]
    fn stale_pushed_report_ignored() {
        let mut polled = BTreeMap::new();
        polled.insert("a".to_string(), report("a", HealthState::Healthy, 0));
        let mut pushed = HashMap::new();
        pushed.insert("a".to_string(), report("a", HealthState::Error, 60));

        let merged = merge_reports(polled, &pushed);
        assert_eq!(merged["a"].state, HealthState::Healthy);
    }

    #[test]
    fn unknown_pushed_modules_carried_through() {
        let mut pushed = HashMap::new();
        pushed.insert("shim".to_string(), report("shim", HealthState::Healthy, 0));

        let merged = merge_reports(BTreeMap::new(), &pushed);
        assert!(merged.contains_key("shim"));
    }
}
