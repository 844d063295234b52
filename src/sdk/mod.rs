//! Writing modules in Rust
//!
//! Implement [`DspModule`] and either build an in-process table with
//! [`ModuleTable::of`], or export the C entry points from a `cdylib` with
//! [`export_dsp_module!`](crate::export_dsp_module).
//!
//! Instance memory comes from the callback registry's allocator, so a module
//! built this way honours whatever allocator the host injected.

pub mod sine;

use crate::module::abi::*;
use crate::module::registry::{self, CallbackTable};
use std::ffi::CStr;
use std::marker::PhantomData;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

/// Largest alignment the C allocator contract guarantees
const MAX_ALIGN: usize = 16;

/// A DSP algorithm that can sit behind the module ABI
pub trait DspModule: Sized + Send + 'static {
    /// Input names joined by `,` (empty for none)
    const INPUT_NAMES: &'static CStr;
    /// Output names joined by `,`
    const OUTPUT_NAMES: &'static CStr;
    /// One default per input, in input order
    const DEFAULTS: &'static [f32];

    /// Fresh instance; must not do signal processing
    fn new() -> Self;

    /// Configure for a block size and sample rate; `false` reports failure
    fn init<S: Sample>(&mut self, ctx: InitContext<'_, S>) -> bool;

    /// Produce `bufsize` samples into every output channel
    ///
    /// Runs on the audio thread: no allocation, no blocking, no panics.
    fn perform<S: Sample>(&mut self, ins: Channels<'_, S>, outs: ChannelsMut<'_, S>, bufsize: usize);
}

/// Arguments of `Omni_UGenInit32/64`
pub struct InitContext<'a, S> {
    pub inputs: Channels<'a, S>,
    pub bufsize: usize,
    pub samplerate: f64,
    pub buffer_interface: BufferInterface,
}

/// Read-only view over a `S**` channel array
pub struct Channels<'a, S> {
    ptrs: *const *mut S,
    count: usize,
    len: usize,
    _marker: PhantomData<&'a [S]>,
}

impl<'a, S: Sample> Channels<'a, S> {
    /// # Safety
    /// `ptrs` must be null or point to `count` channel pointers, each null or
    /// valid for reading `len` samples for `'a`.
    pub unsafe fn from_raw(ptrs: *const *mut S, count: usize, len: usize) -> Self {
        Self {
            ptrs,
            count: if ptrs.is_null() { 0 } else { count },
            len,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn block_size(&self) -> usize {
        self.len
    }

    pub fn get(&self, channel: usize) -> Option<&'a [S]> {
        if channel >= self.count {
            return None;
        }
        let ptr = unsafe { *self.ptrs.add(channel) };
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { std::slice::from_raw_parts(ptr, self.len) })
        }
    }
}

/// Writable view over a `S**` channel array
pub struct ChannelsMut<'a, S> {
    ptrs: *const *mut S,
    count: usize,
    len: usize,
    _marker: PhantomData<&'a mut [S]>,
}

impl<'a, S: Sample> ChannelsMut<'a, S> {
    /// # Safety
    /// As [`Channels::from_raw`], with exclusive write access to every
    /// channel and no channel aliasing another.
    pub unsafe fn from_raw(ptrs: *const *mut S, count: usize, len: usize) -> Self {
        Self {
            ptrs,
            count: if ptrs.is_null() { 0 } else { count },
            len,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get_mut(&mut self, channel: usize) -> Option<&mut [S]> {
        if channel >= self.count {
            return None;
        }
        let ptr = unsafe { *self.ptrs.add(channel) };
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { std::slice::from_raw_parts_mut(ptr, self.len) })
        }
    }

    /// Write `value` into every sample of every channel
    pub fn fill(&mut self, value: S) {
        for channel in 0..self.count {
            if let Some(samples) = self.get_mut(channel) {
                samples.fill(value);
            }
        }
    }
}

/// Number of names in a separator-joined list, without allocating
fn name_count(names: &CStr) -> usize {
    let bytes = names.to_bytes();
    if bytes.iter().all(u8::is_ascii_whitespace) {
        0
    } else {
        bytes.iter().filter(|b| **b == NAME_SEPARATOR as u8).count() + 1
    }
}

pub extern "C" fn inputs_thunk<M: DspModule>() -> c_int {
    name_count(M::INPUT_NAMES) as c_int
}

pub extern "C" fn input_names_thunk<M: DspModule>() -> *const c_char {
    M::INPUT_NAMES.as_ptr()
}

pub extern "C" fn defaults_thunk<M: DspModule>() -> *const f32 {
    M::DEFAULTS.as_ptr()
}

pub extern "C" fn outputs_thunk<M: DspModule>() -> c_int {
    name_count(M::OUTPUT_NAMES) as c_int
}

pub extern "C" fn output_names_thunk<M: DspModule>() -> *const c_char {
    M::OUTPUT_NAMES.as_ptr()
}

pub unsafe extern "C" fn alloc_thunk<M: DspModule>() -> *mut c_void {
    if std::mem::align_of::<M>() > MAX_ALIGN {
        return ptr::null_mut();
    }

    let ugen = registry::global()
        .alloc(std::mem::size_of::<M>().max(1))
        .cast::<M>();
    if ugen.is_null() {
        return ptr::null_mut();
    }

    unsafe { ugen.write(M::new()) };
    ugen.cast()
}

pub unsafe extern "C" fn init_thunk<M: DspModule, S: Sample>(
    ugen: *mut c_void,
    ins: *mut *mut S,
    bufsize: c_int,
    samplerate: f64,
    buffer_interface: *mut c_void,
) -> c_int {
    let Some(module) = (unsafe { ugen.cast::<M>().as_mut() }) else {
        return 0;
    };
    let bufsize = usize::try_from(bufsize).unwrap_or(0);

    let ctx = InitContext {
        inputs: unsafe { Channels::from_raw(ins, name_count(M::INPUT_NAMES), bufsize) },
        bufsize,
        samplerate,
        buffer_interface: BufferInterface(buffer_interface),
    };

    if module.init(ctx) { INIT_OK } else { 0 }
}

/// Allocate + initialize in one call; NULL (and nothing left allocated) on failure
pub unsafe extern "C" fn alloc_init_thunk<M: DspModule, S: Sample>(
    ins: *mut *mut S,
    bufsize: c_int,
    samplerate: f64,
    buffer_interface: *mut c_void,
) -> *mut c_void {
    let ugen = unsafe { alloc_thunk::<M>() };
    if ugen.is_null() {
        return ptr::null_mut();
    }

    if unsafe { init_thunk::<M, S>(ugen, ins, bufsize, samplerate, buffer_interface) } != INIT_OK {
        unsafe { free_thunk::<M>(ugen) };
        return ptr::null_mut();
    }
    ugen
}

pub unsafe extern "C" fn perform_thunk<M: DspModule, S: Sample>(
    ugen: *mut c_void,
    ins: *mut *mut S,
    outs: *mut *mut S,
    bufsize: c_int,
) {
    let Some(module) = (unsafe { ugen.cast::<M>().as_mut() }) else {
        return;
    };
    let bufsize = usize::try_from(bufsize).unwrap_or(0);

    let (ins, outs) = unsafe {
        (
            Channels::from_raw(ins, name_count(M::INPUT_NAMES), bufsize),
            ChannelsMut::from_raw(outs, name_count(M::OUTPUT_NAMES), bufsize),
        )
    };
    module.perform(ins, outs, bufsize);
}

pub unsafe extern "C" fn free_thunk<M: DspModule>(ugen: *mut c_void) {
    if ugen.is_null() {
        return;
    }
    unsafe {
        ptr::drop_in_place(ugen.cast::<M>());
        registry::global().free(ugen);
    }
}

// Registry injection entry points, exported by `export_dsp_module!`

pub extern "C" fn init_global_thunk(
    alloc: AllocFunc,
    realloc: ReallocFunc,
    free: FreeFunc,
    print_debug: PrintDebugFunc,
    print_str: PrintStrFunc,
    print_float: PrintFloatFunc,
    print_int: PrintIntFunc,
    get_samplerate: GetSamplerateFunc,
    get_bufsize: GetBufsizeFunc,
) {
    let table = CallbackTable {
        alloc,
        realloc,
        free,
        print_debug,
        print_str,
        print_float,
        print_int,
        get_samplerate,
        get_bufsize,
    };
    if let Err(err) = registry::global().install(table) {
        registry::global().print_str(&format!("WARNING: Omni_InitGlobal: {err}\n"));
    }
}

pub extern "C" fn init_alloc_thunk(alloc: AllocFunc, realloc: ReallocFunc, free: FreeFunc) {
    if let Err(err) = registry::global().install_alloc(alloc, realloc, free) {
        registry::global().print_str(&format!("WARNING: Omni_InitAlloc: {err}\n"));
    }
}

pub extern "C" fn init_print_thunk(
    print_debug: PrintDebugFunc,
    print_str: PrintStrFunc,
    print_float: PrintFloatFunc,
    print_int: PrintIntFunc,
) {
    if let Err(err) = registry::global().install_print(print_debug, print_str, print_float, print_int)
    {
        registry::global().print_str(&format!("WARNING: Omni_InitPrint: {err}\n"));
    }
}

pub extern "C" fn init_utilities_thunk(get_samplerate: GetSamplerateFunc, get_bufsize: GetBufsizeFunc) {
    if let Err(err) = registry::global().install_utilities(get_samplerate, get_bufsize) {
        registry::global().print_str(&format!(
            "WARNING: Omni_InitGetSamplerateGetBufsize: {err}\n"
        ));
    }
}

pub extern "C" fn print_debug_func_thunk() -> PrintDebugFunc {
    registry::global().print_debug_func()
}

impl ModuleTable {
    /// Table for a module linked into this process
    ///
    /// Shares the host's registry directly, so no `Omni_InitGlobal` is set.
    pub fn of<M: DspModule>() -> Self {
        Self {
            inputs: inputs_thunk::<M>,
            input_names: input_names_thunk::<M>,
            defaults: defaults_thunk::<M>,
            outputs: outputs_thunk::<M>,
            output_names: output_names_thunk::<M>,
            alloc: alloc_thunk::<M>,
            init32: init_thunk::<M, f32>,
            init64: init_thunk::<M, f64>,
            perform32: perform_thunk::<M, f32>,
            perform64: perform_thunk::<M, f64>,
            alloc_init32: Some(alloc_init_thunk::<M, f32>),
            alloc_init64: Some(alloc_init_thunk::<M, f64>),
            free: free_thunk::<M>,
            init_global: None,
        }
    }
}

/// Export the module ABI for a [`DspModule`] from a `cdylib`
///
/// ```ignore
/// ugen_bridge::export_dsp_module!(ugen_bridge::sdk::sine::Sine);
/// ```
#[macro_export]
macro_rules! export_dsp_module {
    ($module:ty) => {
        #[allow(non_snake_case, unused_imports)]
        mod __ugen_bridge_exports {
            use super::*;
            use ::std::os::raw::{c_char, c_int, c_void};
            use $crate::module::abi::*;
            use $crate::sdk;

            #[unsafe(no_mangle)]
            pub extern "C" fn Omni_InitGlobal(
                alloc: AllocFunc,
                realloc: ReallocFunc,
                free: FreeFunc,
                print_debug: PrintDebugFunc,
                print_str: PrintStrFunc,
                print_float: PrintFloatFunc,
                print_int: PrintIntFunc,
                get_samplerate: GetSamplerateFunc,
                get_bufsize: GetBufsizeFunc,
            ) {
                sdk::init_global_thunk(
                    alloc,
                    realloc,
                    free,
                    print_debug,
                    print_str,
                    print_float,
                    print_int,
                    get_samplerate,
                    get_bufsize,
                )
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn Omni_InitAlloc(alloc: AllocFunc, realloc: ReallocFunc, free: FreeFunc) {
                sdk::init_alloc_thunk(alloc, realloc, free)
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn Omni_InitPrint(
                print_debug: PrintDebugFunc,
                print_str: PrintStrFunc,
                print_float: PrintFloatFunc,
                print_int: PrintIntFunc,
            ) {
                sdk::init_print_thunk(print_debug, print_str, print_float, print_int)
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn get_omni_print_debug_func() -> PrintDebugFunc {
                sdk::print_debug_func_thunk()
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn Omni_InitGetSamplerateGetBufsize(
                get_samplerate: GetSamplerateFunc,
                get_bufsize: GetBufsizeFunc,
            ) {
                sdk::init_utilities_thunk(get_samplerate, get_bufsize)
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn Omni_UGenInputs() -> c_int {
                sdk::inputs_thunk::<$module>()
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn Omni_UGenInputNames() -> *const c_char {
                sdk::input_names_thunk::<$module>()
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn Omni_UGenDefaults() -> *const f32 {
                sdk::defaults_thunk::<$module>()
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn Omni_UGenOutputs() -> c_int {
                sdk::outputs_thunk::<$module>()
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn Omni_UGenOutputNames() -> *const c_char {
                sdk::output_names_thunk::<$module>()
            }

            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn Omni_UGenAlloc() -> *mut c_void {
                unsafe { sdk::alloc_thunk::<$module>() }
            }

            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn Omni_UGenAllocInit32(
                ins: *mut *mut f32,
                bufsize: c_int,
                samplerate: f64,
                buffer_interface: *mut c_void,
            ) -> *mut c_void {
                unsafe {
                    sdk::alloc_init_thunk::<$module, f32>(ins, bufsize, samplerate, buffer_interface)
                }
            }

            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn Omni_UGenAllocInit64(
                ins: *mut *mut f64,
                bufsize: c_int,
                samplerate: f64,
                buffer_interface: *mut c_void,
            ) -> *mut c_void {
                unsafe {
                    sdk::alloc_init_thunk::<$module, f64>(ins, bufsize, samplerate, buffer_interface)
                }
            }

            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn Omni_UGenInit32(
                ugen: *mut c_void,
                ins: *mut *mut f32,
                bufsize: c_int,
                samplerate: f64,
                buffer_interface: *mut c_void,
            ) -> c_int {
                unsafe {
                    sdk::init_thunk::<$module, f32>(ugen, ins, bufsize, samplerate, buffer_interface)
                }
            }

            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn Omni_UGenInit64(
                ugen: *mut c_void,
                ins: *mut *mut f64,
                bufsize: c_int,
                samplerate: f64,
                buffer_interface: *mut c_void,
            ) -> c_int {
                unsafe {
                    sdk::init_thunk::<$module, f64>(ugen, ins, bufsize, samplerate, buffer_interface)
                }
            }

            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn Omni_UGenPerform32(
                ugen: *mut c_void,
                ins: *mut *mut f32,
                outs: *mut *mut f32,
                bufsize: c_int,
            ) {
                unsafe { sdk::perform_thunk::<$module, f32>(ugen, ins, outs, bufsize) }
            }

            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn Omni_UGenPerform64(
                ugen: *mut c_void,
                ins: *mut *mut f64,
                outs: *mut *mut f64,
                bufsize: c_int,
            ) {
                unsafe { sdk::perform_thunk::<$module, f64>(ugen, ins, outs, bufsize) }
            }

            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn Omni_UGenFree(ugen: *mut c_void) {
                unsafe { sdk::free_thunk::<$module>(ugen) }
            }
        }
    };
}
