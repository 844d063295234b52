//! Host adapter: one unit generator driving one module instance
//!
//! Construction allocates and initializes the instance against the resolved
//! module table. Every block either runs the module's perform or, when there
//! is no usable instance, writes silence. Dropping the adapter frees the
//! instance exactly once. Failures never panic or propagate out of the
//! adapter; they leave it in degraded (silent) mode with the reason kept for
//! diagnostics.

use crate::host::channels::{ChannelPointers, silence, silence_range};
use crate::module::abi::{BufferInterface, Sample};
use crate::module::{
    LifecycleState, ModuleDescriptor, ModuleError, ModuleInstance, ModuleResult, ResolvedModule,
};
use std::sync::Arc;

/// What the host hands an adapter at construction
pub struct UnitContext<'a, S> {
    /// Current input buffers, one per host input
    pub inputs: &'a [&'a [S]],
    /// Output channels the host allocated for this unit
    pub num_outputs: usize,
    pub block_size: usize,
    pub sample_rate: f64,
    pub buffer_interface: BufferInterface,
}

pub struct HostAdapter<S: Sample> {
    module: Option<Arc<ResolvedModule>>,
    instance: Option<ModuleInstance>,
    pointers: ChannelPointers<S>,
    /// Adapter-level state while there is no live instance
    fallback_state: LifecycleState,
    failure: Option<ModuleError>,
}

impl<S: Sample> HostAdapter<S> {
    /// Construct the unit; never fails, degrades to silence instead
    pub fn new(module: Option<&Arc<ResolvedModule>>, ctx: UnitContext<'_, S>) -> Self {
        let Some(module) = module else {
            // The resolver already reported the missing library once
            return Self::degraded(None, LifecycleState::Unresolved, None);
        };

        let descriptor = module.descriptor();
        let mut pointers = ChannelPointers::new(descriptor.num_inputs(), descriptor.num_outputs());

        match Self::start(module, &mut pointers, &ctx) {
            Ok(instance) => {
                tracing::debug!(
                    "Adapter for '{}' running at {} ({} live)",
                    module.name(),
                    S::PRECISION,
                    module.live_instances()
                );
                Self {
                    module: Some(Arc::clone(module)),
                    instance: Some(instance),
                    pointers,
                    fallback_state: LifecycleState::Resolved,
                    failure: None,
                }
            }
            Err((state, err)) => {
                module.registry().print_str(&format!(
                    "ERROR: {}: {}, output will be silent\n",
                    module.name(),
                    err
                ));
                Self::degraded(Some(Arc::clone(module)), state, Some(err))
            }
        }
    }

    fn degraded(
        module: Option<Arc<ResolvedModule>>,
        state: LifecycleState,
        failure: Option<ModuleError>,
    ) -> Self {
        Self {
            module,
            instance: None,
            pointers: ChannelPointers::new(0, 0),
            fallback_state: state,
            failure,
        }
    }

    /// allocate + initialize; on error, the state the adapter ends up in
    fn start(
        module: &Arc<ResolvedModule>,
        pointers: &mut ChannelPointers<S>,
        ctx: &UnitContext<'_, S>,
    ) -> Result<ModuleInstance, (LifecycleState, ModuleError)> {
        let declared_outputs = pointers.output_channels();
        if ctx.num_outputs < declared_outputs {
            return Err((
                LifecycleState::Resolved,
                ModuleError::ChannelMismatch {
                    direction: "outputs",
                    declared: declared_outputs,
                    provided: ctx.num_outputs,
                },
            ));
        }

        let ins = pointers.prepare_inputs(ctx.inputs).ok_or((
            LifecycleState::Resolved,
            ModuleError::ChannelMismatch {
                direction: "inputs",
                declared: pointers.input_channels(),
                provided: ctx.inputs.len(),
            },
        ))?;

        let mut instance =
            ModuleInstance::allocate(module).map_err(|err| (LifecycleState::Resolved, err))?;

        let initialized: ModuleResult<()> = unsafe {
            instance.initialize(ins, ctx.block_size, ctx.sample_rate, ctx.buffer_interface)
        };

        match initialized {
            Ok(()) => Ok(instance),
            // Dropping the instance frees it
            Err(err) => Err((LifecycleState::Freed, err)),
        }
    }

    /// Per-block entry point
    ///
    /// Runs the module over `block` samples, or writes zeros to every output
    /// channel when there is no usable instance. Allocation-free.
    pub fn process(&mut self, inputs: &[&[S]], outputs: &mut [&mut [S]], block: usize) {
        if let Some(instance) = self.instance.as_mut() {
            let usable = self.pointers.usable_block(inputs, outputs, block);

            if let Some((ins, outs)) = self.pointers.prepare(inputs, outputs) {
                let performed = unsafe { instance.perform(ins, outs, usable) };
                if performed.is_ok() {
                    let declared = self.pointers.output_channels();
                    // Samples past a short channel, and channels the module
                    // doesn't declare, still get defined output
                    silence_range(&mut outputs[..declared], usable, block);
                    silence(&mut outputs[declared..], block);
                    return;
                }
            }
        }

        silence(outputs, block);
    }

    pub fn state(&self) -> LifecycleState {
        self.instance
            .as_ref()
            .map_or(self.fallback_state, ModuleInstance::state)
    }

    /// Whether blocks are silence instead of module output
    pub fn is_degraded(&self) -> bool {
        self.instance.is_none()
    }

    /// Why the adapter degraded, if it tried and failed
    pub fn failure(&self) -> Option<&ModuleError> {
        self.failure.as_ref()
    }

    pub fn descriptor(&self) -> Option<&ModuleDescriptor> {
        self.module.as_deref().map(ResolvedModule::descriptor)
    }

    /// Tear down now; equivalent to dropping
    pub fn destroy(self) {
        drop(self)
    }
}
