// ugen_bridge - host/module bridge for separately compiled DSP unit generators

pub mod host;
pub mod module;
pub mod sdk;

// Re-export commonly used types for convenience
pub use host::{HostAdapter, HostConfig, HostEnvironment, UnitContext, UnitDefinition};
pub use module::abi::{BufferInterface, Sample};
pub use module::registry::CallbackRegistry;
pub use module::{
    DylibLoader, LifecycleState, ModuleDescriptor, ModuleError, ModuleInstance, ModuleLoader,
    ModuleResolver, ModuleResult, ModuleTable, Precision, ResolvedModule, StaticLoader,
};
pub use sdk::{Channels, ChannelsMut, DspModule, InitContext};
