//! Identifier types for Vigil.
//!
//! All identifiers are UUID-based. Built-in modules use deterministic
//! UUID v5 so the same configuration produces the same ids across
//! restarts; subscription and interceptor handles use random v4.

use crate::ModuleCategory;
use serde::{Deserialize, Serialize};
use uuid::{uuid, Uuid};

/// Vigil namespace UUID for deterministic UUID v5 generation.
const VIGIL_NAMESPACE: Uuid = uuid!("7c9e4d1a-52b8-4f3e-9d0c-2a6f81b5c4e7");

/// Identifier for a module managed by the orchestrator.
///
/// A module id pairs a [`ModuleCategory`] with a stable name taken from
/// the configuration fragment. Two ids with the same category and name
/// refer to the same logical module.
///
/// # UUID Strategy
///
/// - **Built-in modules**: UUID v5, deterministic from `category.name`
/// - **Dynamic instances**: UUID v4, unique per instantiation
///
/// # Example
///
/// ```
/// use vigil_types::{ModuleCategory, ModuleId};
///
/// let a = ModuleId::builtin(ModuleCategory::Event, "dedupe");
/// let b = ModuleId::builtin(ModuleCategory::Event, "dedupe");
/// assert_eq!(a, b);
/// assert_eq!(a.fqn(), "event::dedupe");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId {
    /// Globally unique identifier.
    pub uuid: Uuid,
    /// Functional category, also the configuration section.
    pub category: ModuleCategory,
    /// Module name within its category.
    pub name: String,
}

impl ModuleId {
    /// Creates a module id with a deterministic UUID v5.
    ///
    /// Use this for modules declared in configuration: the id survives
    /// restarts and reconfiguration.
    #[must_use]
    pub fn builtin(category: ModuleCategory, name: impl Into<String>) -> Self {
        let name = name.into();
        let seed = format!("{category}.{name}");
        Self {
            uuid: Uuid::new_v5(&VIGIL_NAMESPACE, seed.as_bytes()),
            category,
            name,
        }
    }

    /// Creates a module id with a random UUID v4.
    ///
    /// Use this for dynamically spawned instances that must not collide
    /// with a configured module of the same name.
    #[must_use]
    pub fn dynamic(category: ModuleCategory, name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            category,
            name: name.into(),
        }
    }

    /// Returns the fully qualified name in `category::name` format.
    #[must_use]
    pub fn fqn(&self) -> String {
        format!("{}::{}", self.category, self.name)
    }

    /// Compares by category and name only, ignoring UUID.
    #[must_use]
    pub fn fqn_eq(&self, other: &Self) -> bool {
        self.category == other.category && self.name == other.name
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.category, self.name)
    }
}

/// Opaque handle identity for a bus subscription.
///
/// Returned by `subscribe` and required by `unsubscribe`. The bus owns
/// the subscription record; the id is only a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

#[allow(clippy::new_without_default)] // generated internally by Bus::subscribe
impl SubscriptionId {
    /// Creates a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// Opaque handle identity for an installed interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterceptorId(pub Uuid);

#[allow(clippy::new_without_default)] // generated internally by Bus::intercept
impl InterceptorId {
    /// Creates a new random interceptor id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for InterceptorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "icpt:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ids_are_deterministic() {
        let a = ModuleId::builtin(ModuleCategory::Input, "cam-front");
        let b = ModuleId::builtin(ModuleCategory::Input, "cam-front");
        assert_eq!(a.uuid, b.uuid);
    }

    #[test]
    fn builtin_ids_differ_by_name_and_category() {
        let a = ModuleId::builtin(ModuleCategory::Input, "cam-front");
        let b = ModuleId::builtin(ModuleCategory::Input, "cam-back");
        let c = ModuleId::builtin(ModuleCategory::Process, "cam-front");
        assert_ne!(a.uuid, b.uuid);
        assert_ne!(a.uuid, c.uuid);
    }

    #[test]
    fn dynamic_ids_are_unique() {
        let a = ModuleId::dynamic(ModuleCategory::Process, "motion");
        let b = ModuleId::dynamic(ModuleCategory::Process, "motion");
        assert_ne!(a, b);
        assert!(a.fqn_eq(&b));
    }

    #[test]
    fn fqn_format() {
        let id = ModuleId::builtin(ModuleCategory::Event, "dedupe");
        assert_eq!(id.fqn(), "event::dedupe");
        assert_eq!(id.to_string(), "event::dedupe");
    }

    #[test]
    fn handle_ids_are_unique() {
        assert_ne!(SubscriptionId::new(), SubscriptionId::new());
        assert_ne!(InterceptorId::new(), InterceptorId::new());
    }
}
