//! Module capability descriptors.
//!
//! A capability is the static half of a module: what it is, which
//! topics it touches, and which configuration fragment it owns. The
//! runtime binding (subscription handles, bus clone) exists only
//! between `start` and `stop`, so capability and binding never form a
//! reference cycle.

use serde::{Deserialize, Serialize};
use vigil_types::{ModuleCategory, ModuleId};

/// Static descriptor advertised by every module.
///
/// # Example
///
/// ```
/// use vigil_contracts::{Capability, ModuleCategory};
///
/// let cap = Capability::new(ModuleCategory::Event, "dedupe")
///     .subscribes("process.motion.detected")
///     .publishes("process.motion.unique")
///     .config_path("event.dedupe");
///
/// assert_eq!(cap.id.fqn(), "event::dedupe");
/// assert_eq!(cap.config_path, "event.dedupe");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: ModuleId,
    pub category: ModuleCategory,
    /// Topics this module publishes to.
    pub publishes: Vec<String>,
    /// Topics this module subscribes to.
    pub subscribes: Vec<String>,
    /// Dotted path of the configuration fragment this module owns.
    pub config_path: String,
    /// When true, a failed reconfigure stops the module and restarts it
    /// with the prior fragment instead of leaving it running degraded.
    pub restart_on_config_failure: bool,
}

impl Capability {
    /// Creates a descriptor with no declared topics.
    ///
    /// The config path defaults to `<section>.<name>`.
    #[must_use]
    pub fn new(category: ModuleCategory, name: impl Into<String>) -> Self {
        let name = name.into();
        let id = ModuleId::builtin(category, name.clone());
        let config_path = format!("{}.{}", category.section(), name);
        Self {
            id,
            category,
            publishes: Vec::new(),
            subscribes: Vec::new(),
            config_path,
            restart_on_config_failure: false,
        }
    }

    /// Declares a published topic.
    #[must_use]
    pub fn publishes(mut self, topic: impl Into<String>) -> Self {
        self.publishes.push(topic.into());
        self
    }

    /// Declares a subscribed topic.
    #[must_use]
    pub fn subscribes(mut self, topic: impl Into<String>) -> Self {
        self.subscribes.push(topic.into());
        self
    }

    /// Overrides the owned configuration fragment path.
    #[must_use]
    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = path.into();
        self
    }

    /// Requests restart-with-prior-fragment on reconfigure failure.
    #[must_use]
    pub fn restart_on_config_failure(mut self) -> Self {
        self.restart_on_config_failure = true;
        self
    }
}
