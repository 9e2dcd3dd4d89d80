//! Shutdown phase grouping.

use vigil_types::ShutdownPhase;

use super::registry::ModuleRecord;

/// Indices of the records stopping in `phase`, in reverse startup
/// order so dependents stop before their upstreams within a phase.
pub(crate) fn phase_indices(records: &[ModuleRecord], phase: ShutdownPhase) -> Vec<usize> {
    (0..records.len())
        .rev()
        .filter(|&i| records[i].category.shutdown_phase() == phase && !records[i].state.is_terminal())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::registry::{ModuleRecord, TrackingLink};
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;
    use vigil_bus::{Bus, BusSettings};
    use vigil_contracts::{Capability, Module, ModuleError, ModuleLink};
    use vigil_types::{LifecycleState, ModuleCategory};

    struct Inert {
        capability: Capability,
    }

    #[async_trait]
    impl Module for Inert {
        fn capability(&self) -> &Capability {
            &self.capability
        }
        async fn configure(&mut self, _fragment: &Value) -> Result<(), ModuleError> {
            Ok(())
        }
        async fn start(&mut self, _link: Arc<dyn ModuleLink>) -> Result<(), ModuleError> {
            Ok(())
        }
        async fn stop(&mut self) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    fn record(id: &str, category: ModuleCategory, state: LifecycleState) -> ModuleRecord {
        let bus = Bus::new(BusSettings {
            telemetry_enabled: false,
            ..BusSettings::default()
        });
        ModuleRecord {
            id: id.into(),
            category,
            module: Box::new(Inert {
                capability: Capability::new(category, id),
            }),
            fragment: Value::Null,
            state,
            quarantined: false,
            last_health: None,
            link: TrackingLink::new(bus),
        }
    }

    #[test]
    fn reverse_startup_order_within_phase() {
        let records = vec![
            record("cam-a", ModuleCategory::Input, LifecycleState::Running),
            record("cam-b", ModuleCategory::Input, LifecycleState::Running),
            record("motion", ModuleCategory::Process, LifecycleState::Running),
        ];
        assert_eq!(phase_indices(&records, ShutdownPhase::Input), vec![1, 0]);
        assert_eq!(phase_indices(&records, ShutdownPhase::Process), vec![2]);
        assert!(phase_indices(&records, ShutdownPhase::Event).is_empty());
    }

    #[test]
    fn terminal_records_are_skipped() {
        let records = vec![
            record("cam-a", ModuleCategory::Input, LifecycleState::Stopped),
            record("cam-b", ModuleCategory::Input, LifecycleState::Failed),
            record("cam-c", ModuleCategory::Input, LifecycleState::Running),
        ];
        assert_eq!(phase_indices(&records, ShutdownPhase::Input), vec![2]);
    }

    #[test]
    fn analytics_grouped_with_storage() {
        let records = vec![
            record("db", ModuleCategory::Analytics, LifecycleState::Running),
            record("s3", ModuleCategory::Storage, LifecycleState::Running),
        ];
        assert_eq!(phase_indices(&records, ShutdownPhase::Storage), vec![1, 0]);
    }
}
