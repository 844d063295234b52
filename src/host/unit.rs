// Unit definition: the host-side registration of one module type
//
// Plugin load wires the host callbacks into the registry, resolves the module
// through the process-wide resolver and keeps the result. Every unit the host
// constructs afterwards shares that resolution.

use crate::host::adapter::{HostAdapter, UnitContext};
use crate::host::callbacks::{HostEnvironment, install_host_callbacks};
use crate::host::config::HostConfig;
use crate::module::abi::{BufferInterface, Sample};
use crate::module::registry;
use crate::module::search;
use crate::module::{DylibLoader, ModuleLoader, ModuleResolver, ResolvedModule};
use std::sync::Arc;

pub struct UnitDefinition {
    name: String,
    module: Option<Arc<ResolvedModule>>,
    block_size: usize,
    sample_rate: f64,
}

impl UnitDefinition {
    /// Plugin-load entry point for a module library
    ///
    /// Never fails: a module that cannot be loaded is reported once through
    /// the registry's print callback and every unit built from this
    /// definition outputs silence.
    pub fn load(config: &HostConfig, module_name: &str) -> Self {
        HostEnvironment::set(config.sample_rate, config.block_size);

        if let Err(err) = install_host_callbacks(registry::global()) {
            tracing::warn!("Host callbacks not installed: {}", err);
        }

        if search::install_dir().is_none() {
            tracing::warn!("Module install dir unknown, relying on configured search paths");
        }

        let resolver = ModuleResolver::init_global(DylibLoader::new(
            config.resolved_search_paths(),
            config.max_search_depth,
        ));

        Self::with_resolver(resolver, module_name, config)
    }

    /// Resolve `module_name` through an explicit resolver
    pub fn with_resolver<L: ModuleLoader>(
        resolver: &ModuleResolver<L>,
        module_name: &str,
        config: &HostConfig,
    ) -> Self {
        let module = resolver.resolve(module_name);

        Self {
            name: module_name.to_string(),
            module,
            block_size: config.block_size,
            sample_rate: config.sample_rate,
        }
    }

    /// Construct a unit generator with the host's buffers for this precision
    pub fn construct<S: Sample>(&self, inputs: &[&[S]], num_outputs: usize) -> HostAdapter<S> {
        self.construct_with(inputs, num_outputs, BufferInterface::NONE)
    }

    /// Like [`construct`](Self::construct), passing the host's buffer
    /// interface through to the module's initialize
    pub fn construct_with<S: Sample>(
        &self,
        inputs: &[&[S]],
        num_outputs: usize,
        buffer_interface: BufferInterface,
    ) -> HostAdapter<S> {
        HostAdapter::new(
            self.module.as_ref(),
            UnitContext {
                inputs,
                num_outputs,
                block_size: self.block_size,
                sample_rate: self.sample_rate,
                buffer_interface,
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> Option<&Arc<ResolvedModule>> {
        self.module.as_ref()
    }

    pub fn is_available(&self) -> bool {
        self.module.is_some()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::registry::CallbackRegistry;
    use crate::module::{LifecycleState, ModuleTable, StaticLoader};
    use crate::sdk::sine::Sine;

    fn resolver() -> ModuleResolver<StaticLoader> {
        let loader = StaticLoader::new().with_module("sine", ModuleTable::of::<Sine>());
        ModuleResolver::with_registry(loader, Box::leak(Box::new(CallbackRegistry::new())))
    }

    #[test]
    fn test_units_share_one_resolution() {
        let resolver = resolver();
        let config = HostConfig::default().with_block_size(32);
        let definition = UnitDefinition::with_resolver(&resolver, "sine", &config);

        assert!(definition.is_available());
        assert_eq!(definition.block_size(), 32);

        let freq = [0.0f32; 32];
        let inputs: [&[f32]; 1] = [&freq];
        let first = definition.construct::<f32>(&inputs, 1);
        let second = definition.construct::<f32>(&inputs, 1);

        assert!(!first.is_degraded());
        assert!(!second.is_degraded());
        assert_eq!(definition.module().unwrap().live_instances(), 2);
        assert_eq!(resolver.load_count(), 1);
    }

    #[test]
    fn test_unknown_module_builds_silent_units() {
        let resolver = resolver();
        let definition = UnitDefinition::with_resolver(&resolver, "saw", &HostConfig::default());

        assert!(!definition.is_available());
        assert_eq!(definition.name(), "saw");

        let inputs: [&[f64]; 0] = [];
        let mut unit = definition.construct::<f64>(&inputs, 1);
        assert_eq!(unit.state(), LifecycleState::Unresolved);

        let mut out = [0.5f64; 16];
        let mut outputs: [&mut [f64]; 1] = [&mut out];
        unit.process(&inputs, &mut outputs, 16);
        assert_eq!(out, [0.0; 16]);
    }
}
