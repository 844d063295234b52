// Module ABI - C entry points exported by every DSP module library
//
// Symbol names and signatures are the linkage contract between a host and a
// separately compiled module, so they must match bit-for-bit.

use crate::module::Precision;
use num_traits::Float;
use std::fmt;
use std::os::raw::{c_char, c_int, c_void};

// Callback registry function types (host -> module injection)
pub type AllocFunc = unsafe extern "C" fn(size: usize) -> *mut c_void;
pub type ReallocFunc = unsafe extern "C" fn(ptr: *mut c_void, size: usize) -> *mut c_void;
pub type FreeFunc = unsafe extern "C" fn(ptr: *mut c_void);
pub type PrintDebugFunc = unsafe extern "C" fn(format: *const c_char, value: usize);
pub type PrintStrFunc = unsafe extern "C" fn(text: *const c_char);
pub type PrintFloatFunc = unsafe extern "C" fn(value: f32);
pub type PrintIntFunc = unsafe extern "C" fn(value: c_int);
pub type GetSamplerateFunc = unsafe extern "C" fn() -> f64;
pub type GetBufsizeFunc = unsafe extern "C" fn() -> c_int;

/// `Omni_InitGlobal`: hands the whole callback table to the module in one call
pub type InitGlobalFn = unsafe extern "C" fn(
    alloc: AllocFunc,
    realloc: ReallocFunc,
    free: FreeFunc,
    print_debug: PrintDebugFunc,
    print_str: PrintStrFunc,
    print_float: PrintFloatFunc,
    print_int: PrintIntFunc,
    get_samplerate: GetSamplerateFunc,
    get_bufsize: GetBufsizeFunc,
);

// Module entry points
pub type CountFn = unsafe extern "C" fn() -> c_int;
pub type NamesFn = unsafe extern "C" fn() -> *const c_char;
pub type DefaultsFn = unsafe extern "C" fn() -> *const f32;
pub type UGenAllocFn = unsafe extern "C" fn() -> *mut c_void;
/// `Omni_UGenAllocInit32/64`: allocate + initialize, NULL on failure
pub type UGenAllocInitFn<S> = unsafe extern "C" fn(
    ins: *mut *mut S,
    bufsize: c_int,
    samplerate: f64,
    buffer_interface: *mut c_void,
) -> *mut c_void;
pub type UGenInitFn<S> = unsafe extern "C" fn(
    ugen: *mut c_void,
    ins: *mut *mut S,
    bufsize: c_int,
    samplerate: f64,
    buffer_interface: *mut c_void,
) -> c_int;
pub type UGenPerformFn<S> =
    unsafe extern "C" fn(ugen: *mut c_void, ins: *mut *mut S, outs: *mut *mut S, bufsize: c_int);
pub type UGenFreeFn = unsafe extern "C" fn(ugen: *mut c_void);

// Exported symbol names (NUL-terminated for libloading)
pub const SYM_INPUTS: &[u8] = b"Omni_UGenInputs\0";
pub const SYM_INPUT_NAMES: &[u8] = b"Omni_UGenInputNames\0";
pub const SYM_DEFAULTS: &[u8] = b"Omni_UGenDefaults\0";
pub const SYM_OUTPUTS: &[u8] = b"Omni_UGenOutputs\0";
pub const SYM_OUTPUT_NAMES: &[u8] = b"Omni_UGenOutputNames\0";
pub const SYM_ALLOC: &[u8] = b"Omni_UGenAlloc\0";
pub const SYM_ALLOC_INIT32: &[u8] = b"Omni_UGenAllocInit32\0";
pub const SYM_ALLOC_INIT64: &[u8] = b"Omni_UGenAllocInit64\0";
pub const SYM_INIT32: &[u8] = b"Omni_UGenInit32\0";
pub const SYM_INIT64: &[u8] = b"Omni_UGenInit64\0";
pub const SYM_PERFORM32: &[u8] = b"Omni_UGenPerform32\0";
pub const SYM_PERFORM64: &[u8] = b"Omni_UGenPerform64\0";
pub const SYM_FREE: &[u8] = b"Omni_UGenFree\0";
pub const SYM_INIT_GLOBAL: &[u8] = b"Omni_InitGlobal\0";

/// Separator between names in `Omni_UGenInputNames` / `Omni_UGenOutputNames`
pub const NAME_SEPARATOR: char = ',';

/// Return value of a successful `Omni_UGenInit32/64`
pub const INIT_OK: c_int = 1;

/// Function table exported by one module library
///
/// Resolved once per module type and shared read-only by every adapter.
#[derive(Clone, Copy)]
pub struct ModuleTable {
    pub inputs: CountFn,
    pub input_names: NamesFn,
    pub defaults: DefaultsFn,
    pub outputs: CountFn,
    pub output_names: NamesFn,
    pub alloc: UGenAllocFn,
    pub init32: UGenInitFn<f32>,
    pub init64: UGenInitFn<f64>,
    pub perform32: UGenPerformFn<f32>,
    pub perform64: UGenPerformFn<f64>,
    pub free: UGenFreeFn,
    /// Optional single-call allocate + initialize entry points
    pub alloc_init32: Option<UGenAllocInitFn<f32>>,
    pub alloc_init64: Option<UGenAllocInitFn<f64>>,
    /// Optional: modules built without registry injection don't export it
    pub init_global: Option<InitGlobalFn>,
}

impl fmt::Debug for ModuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleTable")
            .field("alloc", &(self.alloc as *const ()))
            .field("free", &(self.free as *const ()))
            .field("alloc_init32", &self.alloc_init32.is_some())
            .field("alloc_init64", &self.alloc_init64.is_some())
            .field("init_global", &self.init_global.is_some())
            .finish_non_exhaustive()
    }
}

/// Sample type a module can be driven with (32 or 64-bit float)
///
/// Dispatches to the matching precision-specific entry points of a table.
pub trait Sample: Float + Default + Send + Sync + fmt::Debug + 'static {
    const PRECISION: Precision;
    const ZERO: Self;

    /// `Omni_UGenAllocInit32/64` of `table`, when the module exports it
    fn alloc_init_entry(table: &ModuleTable) -> Option<UGenAllocInitFn<Self>>;

    /// Call `Omni_UGenInit32/64`
    ///
    /// # Safety
    /// `ugen` must be a live handle allocated through `table`, and `ins` must
    /// point to as many channel pointers as the module declares inputs.
    unsafe fn init(
        table: &ModuleTable,
        ugen: *mut c_void,
        ins: *mut *mut Self,
        bufsize: c_int,
        samplerate: f64,
        buffer_interface: *mut c_void,
    ) -> c_int;

    /// Call `Omni_UGenPerform32/64`
    ///
    /// # Safety
    /// Same as [`Sample::init`]; additionally every channel pointer must be
    /// valid for `bufsize` samples and `outs` must hold one pointer per
    /// declared output.
    unsafe fn perform(
        table: &ModuleTable,
        ugen: *mut c_void,
        ins: *mut *mut Self,
        outs: *mut *mut Self,
        bufsize: c_int,
    );
}

impl Sample for f32 {
    const PRECISION: Precision = Precision::Single;
    const ZERO: Self = 0.0;

    fn alloc_init_entry(table: &ModuleTable) -> Option<UGenAllocInitFn<Self>> {
        table.alloc_init32
    }

    unsafe fn init(
        table: &ModuleTable,
        ugen: *mut c_void,
        ins: *mut *mut Self,
        bufsize: c_int,
        samplerate: f64,
        buffer_interface: *mut c_void,
    ) -> c_int {
        unsafe { (table.init32)(ugen, ins, bufsize, samplerate, buffer_interface) }
    }

    unsafe fn perform(
        table: &ModuleTable,
        ugen: *mut c_void,
        ins: *mut *mut Self,
        outs: *mut *mut Self,
        bufsize: c_int,
    ) {
        unsafe { (table.perform32)(ugen, ins, outs, bufsize) }
    }
}

impl Sample for f64 {
    const PRECISION: Precision = Precision::Double;
    const ZERO: Self = 0.0;

    fn alloc_init_entry(table: &ModuleTable) -> Option<UGenAllocInitFn<Self>> {
        table.alloc_init64
    }

    unsafe fn init(
        table: &ModuleTable,
        ugen: *mut c_void,
        ins: *mut *mut Self,
        bufsize: c_int,
        samplerate: f64,
        buffer_interface: *mut c_void,
    ) -> c_int {
        unsafe { (table.init64)(ugen, ins, bufsize, samplerate, buffer_interface) }
    }

    unsafe fn perform(
        table: &ModuleTable,
        ugen: *mut c_void,
        ins: *mut *mut Self,
        outs: *mut *mut Self,
        bufsize: c_int,
    ) {
        unsafe { (table.perform64)(ugen, ins, outs, bufsize) }
    }
}

/// Opaque buffer-interface pointer handed to `Omni_UGenInit32/64`
///
/// Passed through uninterpreted; modules use it to reach host-managed buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInterface(pub *mut c_void);

impl BufferInterface {
    pub const NONE: Self = Self(std::ptr::null_mut());
}

impl Default for BufferInterface {
    fn default() -> Self {
        Self::NONE
    }
}

// Safety: the pointer is never dereferenced on the host side
unsafe impl Send for BufferInterface {}
unsafe impl Sync for BufferInterface {}
