use crate::module::abi::{BufferInterface, INIT_OK, Sample};
use crate::module::lifecycle::LifecycleState;
use crate::module::resolver::ResolvedModule;
use crate::module::{HandleId, ModuleError, ModuleResult};
use std::os::raw::{c_int, c_void};
use std::ptr::NonNull;
use std::sync::Arc;

/// One live module instance, exclusively owned
///
/// Enforces the allocate -> initialize -> perform* -> free ordering. The
/// module's free entry point runs exactly once, when the instance is dropped
/// (or passed to [`ModuleInstance::free`]), whether or not initialize
/// succeeded.
pub struct ModuleInstance {
    module: Arc<ResolvedModule>,
    id: HandleId,
    ugen: NonNull<c_void>,
    state: LifecycleState,
}

// Safety: the handle is only ever touched through &mut self, one thread at a time
unsafe impl Send for ModuleInstance {}

impl ModuleInstance {
    /// Call the module's allocate entry point
    pub fn allocate(module: &Arc<ResolvedModule>) -> ModuleResult<Self> {
        let state = LifecycleState::Resolved.on_allocate()?;

        let raw = unsafe { (module.table().alloc)() };
        let ugen = NonNull::new(raw).ok_or(ModuleError::AllocationFailed)?;
        Self::track(module, ugen, state)
    }

    /// Allocate and initialize in one step
    ///
    /// Uses `Omni_UGenAllocInit32/64` when the module exports it, otherwise
    /// falls back to allocate followed by initialize. A failed combined call
    /// leaves nothing to free: the module releases its own memory.
    ///
    /// # Safety
    /// Same contract as [`ModuleInstance::initialize`].
    pub unsafe fn allocate_initialized<S: Sample>(
        module: &Arc<ResolvedModule>,
        ins: *mut *mut S,
        bufsize: usize,
        samplerate: f64,
        buffer_interface: BufferInterface,
    ) -> ModuleResult<Self> {
        let Some(alloc_init) = S::alloc_init_entry(module.table()) else {
            let mut instance = Self::allocate(module)?;
            unsafe { instance.initialize(ins, bufsize, samplerate, buffer_interface) }?;
            return Ok(instance);
        };

        let state = LifecycleState::Resolved
            .on_allocate()?
            .on_initialize(S::PRECISION)?;

        let raw = unsafe { alloc_init(ins, block_len(bufsize), samplerate, buffer_interface.0) };
        let ugen = NonNull::new(raw).ok_or(ModuleError::InitializationFailed(S::PRECISION))?;
        Self::track(module, ugen, state)
    }

    fn track(
        module: &Arc<ResolvedModule>,
        ugen: NonNull<c_void>,
        state: LifecycleState,
    ) -> ModuleResult<Self> {
        // A duplicate address is owned by the live instance it aliases, so it
        // is left alone here; freeing it would free that instance.
        let id = module.handles().acquire(ugen.as_ptr() as usize)?;

        Ok(Self {
            module: Arc::clone(module),
            id,
            ugen,
            state,
        })
    }

    /// Call `Omni_UGenInit32/64`, fixing the precision of this instance
    ///
    /// # Safety
    /// `ins` must point to one channel pointer per declared input, each valid
    /// for `bufsize` samples for the duration of the call.
    pub unsafe fn initialize<S: Sample>(
        &mut self,
        ins: *mut *mut S,
        bufsize: usize,
        samplerate: f64,
        buffer_interface: BufferInterface,
    ) -> ModuleResult<()> {
        let next = self.state.on_initialize(S::PRECISION)?;

        let result = unsafe {
            S::init(
                self.module.table(),
                self.ugen.as_ptr(),
                ins,
                block_len(bufsize),
                samplerate,
                buffer_interface.0,
            )
        };

        if result == INIT_OK {
            self.state = next;
            Ok(())
        } else {
            Err(ModuleError::InitializationFailed(S::PRECISION))
        }
    }

    /// Call `Omni_UGenPerform32/64`
    ///
    /// Refused (without calling into the module) when the instance is not
    /// initialized or was initialized for the other precision.
    ///
    /// # Safety
    /// `ins`/`outs` must point to one channel pointer per declared
    /// input/output, each valid for `bufsize` samples.
    pub unsafe fn perform<S: Sample>(
        &mut self,
        ins: *mut *mut S,
        outs: *mut *mut S,
        bufsize: usize,
    ) -> ModuleResult<()> {
        self.state = self.state.on_perform(S::PRECISION)?;

        unsafe {
            S::perform(
                self.module.table(),
                self.ugen.as_ptr(),
                ins,
                outs,
                block_len(bufsize),
            )
        };

        Ok(())
    }

    /// Release the instance now
    pub fn free(self) {
        drop(self)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn module(&self) -> &Arc<ResolvedModule> {
        &self.module
    }
}

impl Drop for ModuleInstance {
    fn drop(&mut self) {
        let Ok(freed) = self.state.on_free() else {
            return;
        };
        self.state = freed;

        let released = self.module.handles().release(self.id);
        match released {
            Ok(address) => {
                debug_assert_eq!(address, self.ugen.as_ptr() as usize);
                unsafe { (self.module.table().free)(self.ugen.as_ptr()) };
            }
            Err(err) => {
                self.module.registry().print_str(&format!(
                    "ERROR: {}: refusing to free instance: {err}\n",
                    self.module.name()
                ));
            }
        }
    }
}

fn block_len(bufsize: usize) -> c_int {
    c_int::try_from(bufsize).unwrap_or(c_int::MAX)
}
