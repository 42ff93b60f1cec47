//! Plugin registry (ambient component 4.L).
//!
//! `spec.md` puts real dynamic-library discovery out of scope, but the
//! core still dispatches to "plugins" at context/group init. We model
//! a plugin as an `Arc<dyn PlanCPlugin>` trait object, registered
//! explicitly at process start rather than through `ctor`/`inventory`
//! magic (`spec.md` §9's design note).

use crate::error::UcgResult;
use crate::plan::{CollType, MemType, PlanList};
use crate::topology::Vgroup;
use std::collections::HashMap;
use std::sync::Arc;

/// A loaded algorithm/transport implementation. Each built-in plugin
/// stands in for what would otherwise be a `.so` discovered on
/// `PLANC_PATH`.
pub trait PlanCPlugin: Send + Sync {
    /// The name matched against `PLANC`'s comma-separated list.
    fn name(&self) -> &'static str;

    /// Whether this plugin's own state tolerates concurrent access
    /// from multiple threads without the core's context lock. `false`
    /// forces the context into locked mode regardless of
    /// `USE_MT_MUTEX`'s setting of which lock kind (`spec.md` §4.G
    /// step 5 / §5).
    fn is_thread_safe(&self) -> bool {
        true
    }

    /// `context_init`: one-time per-context setup.
    fn context_init(&self) -> UcgResult<()> {
        Ok(())
    }

    /// `context_query`: this process's local address block for this
    /// plugin, exchanged through the process-info OOB allgather.
    fn context_query(&self) -> Vec<u8> {
        Vec::new()
    }

    fn context_cleanup(&self) {}

    /// `group_create`: build whatever per-plugin subgroup handle this
    /// plugin needs for `vgroup`.
    fn group_create(&self, vgroup: &Vgroup) -> UcgResult<()> {
        let _ = vgroup;
        Ok(())
    }

    fn group_destroy(&self) {}

    /// `get_plans`: the plugin's default plan catalog contribution,
    /// one [`PlanList`] per `(collective, memory type)` it implements.
    fn get_plans(&self) -> HashMap<(CollType, MemType), PlanList>;
}

/// The set of plugins known to this process, keyed by name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn PlanCPlugin>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn PlanCPlugin>) {
        self.plugins.push(plugin);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn PlanCPlugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }
}

/// Registers the plugins this crate ships with. Called once from
/// global init, per `spec.md` §9's "explicit registration" guidance.
#[must_use]
pub fn register_builtin_plugins() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    #[cfg(feature = "planc-ucx")]
    registry.register(Arc::new(crate::algorithms::UcxPlugin::new()));
    registry
}
