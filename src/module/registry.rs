//! Process-wide callback registry
//!
//! Holds the allocation, print and environment callbacks every module goes
//! through. Each callback group is installed at most once; after the registry
//! is sealed (first module load) no group can be replaced. Reads are lock-free
//! so modules may consult the registry from the audio thread.

use crate::module::abi::*;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use thiserror::Error;

/// Tracing target used for everything modules print through the registry
pub const MODULE_LOG_TARGET: &str = "ugen_bridge::module";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{0} callbacks are already installed")]
    AlreadyInstalled(&'static str),

    #[error("registry is sealed, callbacks can no longer be installed")]
    Sealed,
}

/// Every callback a module may use, in `Omni_InitGlobal` order
#[derive(Clone, Copy)]
pub struct CallbackTable {
    pub alloc: AllocFunc,
    pub realloc: ReallocFunc,
    pub free: FreeFunc,
    pub print_debug: PrintDebugFunc,
    pub print_str: PrintStrFunc,
    pub print_float: PrintFloatFunc,
    pub print_int: PrintIntFunc,
    pub get_samplerate: GetSamplerateFunc,
    pub get_bufsize: GetBufsizeFunc,
}

impl CallbackTable {
    /// libc allocator, tracing-backed printing, unknown environment
    pub fn defaults() -> Self {
        let alloc = AllocCallbacks::default();
        let print = PrintCallbacks::default();
        let utility = UtilityCallbacks::default();
        Self::from_groups(alloc, print, utility)
    }

    fn from_groups(alloc: AllocCallbacks, print: PrintCallbacks, utility: UtilityCallbacks) -> Self {
        Self {
            alloc: alloc.alloc,
            realloc: alloc.realloc,
            free: alloc.free,
            print_debug: print.debug,
            print_str: print.str,
            print_float: print.float,
            print_int: print.int,
            get_samplerate: utility.get_samplerate,
            get_bufsize: utility.get_bufsize,
        }
    }

    /// Hand this table to a module through its `Omni_InitGlobal` export
    ///
    /// # Safety
    /// `init_global` must come from a loaded module library.
    pub unsafe fn inject(&self, init_global: InitGlobalFn) {
        unsafe {
            init_global(
                self.alloc,
                self.realloc,
                self.free,
                self.print_debug,
                self.print_str,
                self.print_float,
                self.print_int,
                self.get_samplerate,
                self.get_bufsize,
            )
        }
    }
}

#[derive(Clone, Copy)]
struct AllocCallbacks {
    alloc: AllocFunc,
    realloc: ReallocFunc,
    free: FreeFunc,
}

impl Default for AllocCallbacks {
    fn default() -> Self {
        Self {
            alloc: default_alloc,
            realloc: default_realloc,
            free: default_free,
        }
    }
}

#[derive(Clone, Copy)]
struct PrintCallbacks {
    debug: PrintDebugFunc,
    str: PrintStrFunc,
    float: PrintFloatFunc,
    int: PrintIntFunc,
}

impl Default for PrintCallbacks {
    fn default() -> Self {
        Self {
            debug: default_print_debug,
            str: default_print_str,
            float: default_print_float,
            int: default_print_int,
        }
    }
}

#[derive(Clone, Copy)]
struct UtilityCallbacks {
    get_samplerate: GetSamplerateFunc,
    get_bufsize: GetBufsizeFunc,
}

impl Default for UtilityCallbacks {
    fn default() -> Self {
        Self {
            get_samplerate: unknown_samplerate,
            get_bufsize: unknown_bufsize,
        }
    }
}

/// Set-once table of callbacks
pub struct CallbackRegistry {
    alloc: OnceLock<AllocCallbacks>,
    print: OnceLock<PrintCallbacks>,
    utility: OnceLock<UtilityCallbacks>,
    sealed: AtomicBool,
    install_guard: Mutex<()>,
}

impl CallbackRegistry {
    pub const fn new() -> Self {
        Self {
            alloc: OnceLock::new(),
            print: OnceLock::new(),
            utility: OnceLock::new(),
            sealed: AtomicBool::new(false),
            install_guard: Mutex::new(()),
        }
    }

    /// Install every callback in one call
    ///
    /// Fails without installing anything if any group is already set.
    pub fn install(&self, table: CallbackTable) -> Result<(), RegistryError> {
        let _guard = self.install_guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.check_open()?;

        if self.alloc.get().is_some() {
            return Err(RegistryError::AlreadyInstalled("alloc"));
        }
        if self.print.get().is_some() {
            return Err(RegistryError::AlreadyInstalled("print"));
        }
        if self.utility.get().is_some() {
            return Err(RegistryError::AlreadyInstalled("utility"));
        }

        let _ = self.alloc.set(AllocCallbacks {
            alloc: table.alloc,
            realloc: table.realloc,
            free: table.free,
        });
        let _ = self.print.set(PrintCallbacks {
            debug: table.print_debug,
            str: table.print_str,
            float: table.print_float,
            int: table.print_int,
        });
        let _ = self.utility.set(UtilityCallbacks {
            get_samplerate: table.get_samplerate,
            get_bufsize: table.get_bufsize,
        });

        Ok(())
    }

    pub fn install_alloc(
        &self,
        alloc: AllocFunc,
        realloc: ReallocFunc,
        free: FreeFunc,
    ) -> Result<(), RegistryError> {
        let _guard = self.install_guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.check_open()?;
        self.alloc
            .set(AllocCallbacks {
                alloc,
                realloc,
                free,
            })
            .map_err(|_| RegistryError::AlreadyInstalled("alloc"))
    }

    pub fn install_print(
        &self,
        debug: PrintDebugFunc,
        str: PrintStrFunc,
        float: PrintFloatFunc,
        int: PrintIntFunc,
    ) -> Result<(), RegistryError> {
        let _guard = self.install_guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.check_open()?;
        self.print
            .set(PrintCallbacks {
                debug,
                str,
                float,
                int,
            })
            .map_err(|_| RegistryError::AlreadyInstalled("print"))
    }

    pub fn install_utilities(
        &self,
        get_samplerate: GetSamplerateFunc,
        get_bufsize: GetBufsizeFunc,
    ) -> Result<(), RegistryError> {
        let _guard = self.install_guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.check_open()?;
        self.utility
            .set(UtilityCallbacks {
                get_samplerate,
                get_bufsize,
            })
            .map_err(|_| RegistryError::AlreadyInstalled("utility"))
    }

    /// Freeze the registry, filling uninstalled groups with defaults
    pub fn seal(&self) {
        let _guard = self.install_guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.alloc.get_or_init(AllocCallbacks::default);
        self.print.get_or_init(PrintCallbacks::default);
        self.utility.get_or_init(UtilityCallbacks::default);
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<(), RegistryError> {
        if self.is_sealed() {
            Err(RegistryError::Sealed)
        } else {
            Ok(())
        }
    }

    /// Currently effective callbacks (installed groups, defaults elsewhere)
    pub fn table(&self) -> CallbackTable {
        CallbackTable::from_groups(
            self.alloc.get().copied().unwrap_or_default(),
            self.print.get().copied().unwrap_or_default(),
            self.utility.get().copied().unwrap_or_default(),
        )
    }

    /// Installed debug print function (embedding / diagnostics accessor)
    pub fn print_debug_func(&self) -> PrintDebugFunc {
        self.print.get().copied().unwrap_or_default().debug
    }

    pub fn alloc(&self, size: usize) -> *mut c_void {
        let callbacks = self.alloc.get().copied().unwrap_or_default();
        unsafe { (callbacks.alloc)(size) }
    }

    /// # Safety
    /// `ptr` must be null or come from this registry's `alloc`/`realloc`.
    pub unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        let callbacks = self.alloc.get().copied().unwrap_or_default();
        unsafe { (callbacks.realloc)(ptr, size) }
    }

    /// # Safety
    /// `ptr` must be null or come from this registry's `alloc`/`realloc`.
    pub unsafe fn free(&self, ptr: *mut c_void) {
        let callbacks = self.alloc.get().copied().unwrap_or_default();
        unsafe { (callbacks.free)(ptr) }
    }

    pub fn print_str(&self, text: &str) {
        let callbacks = self.print.get().copied().unwrap_or_default();
        let text = to_c_string(text);
        unsafe { (callbacks.str)(text.as_ptr()) }
    }

    pub fn print_debug(&self, format: &str, value: usize) {
        let format = to_c_string(format);
        unsafe { (self.print_debug_func())(format.as_ptr(), value) }
    }

    pub fn print_float(&self, value: f32) {
        let callbacks = self.print.get().copied().unwrap_or_default();
        unsafe { (callbacks.float)(value) }
    }

    pub fn print_int(&self, value: i32) {
        let callbacks = self.print.get().copied().unwrap_or_default();
        unsafe { (callbacks.int)(value) }
    }

    pub fn samplerate(&self) -> f64 {
        let callbacks = self.utility.get().copied().unwrap_or_default();
        unsafe { (callbacks.get_samplerate)() }
    }

    pub fn bufsize(&self) -> usize {
        let callbacks = self.utility.get().copied().unwrap_or_default();
        usize::try_from(unsafe { (callbacks.get_bufsize)() }).unwrap_or(0)
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: CallbackRegistry = CallbackRegistry::new();

/// The process-wide registry
pub fn global() -> &'static CallbackRegistry {
    &GLOBAL
}

fn to_c_string(text: &str) -> CString {
    CString::new(text.replace('\0', "")).unwrap_or_default()
}

/// Substitute `value` for the first printf conversion in `format`
pub fn render_debug(format: &str, value: usize) -> String {
    let Some(start) = format.find('%') else {
        return format!("{format}{value}");
    };

    let rest = &format[start + 1..];
    if let Some(literal) = rest.strip_prefix('%') {
        return format!("{}%{}", &format[..start], render_debug(literal, value));
    }

    let conversion_end = rest
        .char_indices()
        .find(|(_, c)| c.is_ascii_alphabetic() && !matches!(c, 'l' | 'z' | 'h' | 'j' | 't'))
        .map(|(i, c)| i + c.len_utf8());

    match conversion_end {
        Some(end) => format!("{}{}{}", &format[..start], value, &rest[end..]),
        None => format!("{format}{value}"),
    }
}

/// # Safety
/// `text` must be null or a valid NUL-terminated string.
unsafe fn lossy(text: *const c_char) -> String {
    if text.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
}

unsafe extern "C" fn default_alloc(size: usize) -> *mut c_void {
    unsafe { libc::malloc(size) }
}

unsafe extern "C" fn default_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    unsafe { libc::realloc(ptr, size) }
}

unsafe extern "C" fn default_free(ptr: *mut c_void) {
    unsafe { libc::free(ptr) }
}

unsafe extern "C" fn default_print_debug(format: *const c_char, value: usize) {
    let format = unsafe { lossy(format) };
    tracing::debug!(target: MODULE_LOG_TARGET, "{}", render_debug(&format, value));
}

unsafe extern "C" fn default_print_str(text: *const c_char) {
    let text = unsafe { lossy(text) };
    tracing::info!(target: MODULE_LOG_TARGET, "{}", text.trim_end());
}

unsafe extern "C" fn default_print_float(value: f32) {
    tracing::info!(target: MODULE_LOG_TARGET, "{}", value);
}

unsafe extern "C" fn default_print_int(value: c_int) {
    tracing::info!(target: MODULE_LOG_TARGET, "{}", value);
}

unsafe extern "C" fn unknown_samplerate() -> f64 {
    0.0
}

unsafe extern "C" fn unknown_bufsize() -> c_int {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    static CUSTOM_ALLOCS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn counting_alloc(size: usize) -> *mut c_void {
        CUSTOM_ALLOCS.fetch_add(1, Ordering::SeqCst);
        unsafe { libc::malloc(size) }
    }

    unsafe extern "C" fn fixed_samplerate() -> f64 {
        96000.0
    }

    unsafe extern "C" fn fixed_bufsize() -> c_int {
        128
    }

    #[test]
    fn test_defaults_before_install() {
        let registry = CallbackRegistry::new();
        assert_eq!(registry.samplerate(), 0.0);
        assert_eq!(registry.bufsize(), 0);

        let ptr = registry.alloc(64);
        assert!(!ptr.is_null());
        unsafe { registry.free(ptr) };
    }

    #[test]
    fn test_focused_installs() {
        let registry = CallbackRegistry::new();
        registry
            .install_alloc(counting_alloc, default_realloc, default_free)
            .unwrap();
        registry
            .install_utilities(fixed_samplerate, fixed_bufsize)
            .unwrap();

        let before = CUSTOM_ALLOCS.load(Ordering::SeqCst);
        let ptr = registry.alloc(16);
        unsafe { registry.free(ptr) };
        assert_eq!(CUSTOM_ALLOCS.load(Ordering::SeqCst), before + 1);

        assert_eq!(registry.samplerate(), 96000.0);
        assert_eq!(registry.bufsize(), 128);
    }

    #[test]
    fn test_group_installs_only_once() {
        let registry = CallbackRegistry::new();
        registry
            .install_utilities(fixed_samplerate, fixed_bufsize)
            .unwrap();

        assert_eq!(
            registry.install_utilities(fixed_samplerate, fixed_bufsize),
            Err(RegistryError::AlreadyInstalled("utility"))
        );
        assert_eq!(
            registry.install(CallbackTable::defaults()),
            Err(RegistryError::AlreadyInstalled("utility"))
        );
    }

    #[test]
    fn test_failed_install_leaves_other_groups_untouched() {
        let registry = CallbackRegistry::new();
        registry
            .install_utilities(fixed_samplerate, fixed_bufsize)
            .unwrap();
        assert!(registry.install(CallbackTable::defaults()).is_err());

        // The alloc group was not consumed by the rejected aggregate install
        registry
            .install_alloc(counting_alloc, default_realloc, default_free)
            .unwrap();
    }

    #[test]
    fn test_sealed_registry_rejects_installs() {
        let registry = CallbackRegistry::new();
        registry.seal();

        assert!(registry.is_sealed());
        assert_eq!(
            registry.install(CallbackTable::defaults()),
            Err(RegistryError::Sealed)
        );
        assert_eq!(
            registry.install_print(
                default_print_debug,
                default_print_str,
                default_print_float,
                default_print_int
            ),
            Err(RegistryError::Sealed)
        );
    }

    #[test]
    fn test_print_debug_accessor_returns_installed_function() {
        unsafe extern "C" fn quiet_debug(_format: *const c_char, _value: usize) {}

        let registry = CallbackRegistry::new();
        registry
            .install_print(
                quiet_debug,
                default_print_str,
                default_print_float,
                default_print_int,
            )
            .unwrap();

        assert_eq!(
            registry.print_debug_func() as *const (),
            quiet_debug as PrintDebugFunc as *const ()
        );
    }

    #[test]
    fn test_render_debug() {
        assert_eq!(render_debug("alloc: %zu bytes", 64), "alloc: 64 bytes");
        assert_eq!(render_debug("value %d", 3), "value 3");
        assert_eq!(render_debug("100%% of %lu", 7), "100% of 7");
        assert_eq!(render_debug("no format ", 5), "no format 5");
    }
}
