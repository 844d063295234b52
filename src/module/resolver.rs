use crate::module::abi::*;
use crate::module::descriptor::ModuleDescriptor;
use crate::module::handle::HandleSlab;
use crate::module::registry::{self, CallbackRegistry};
use crate::module::search;
use crate::module::{ModuleError, ModuleResult};
use libloading::{Library, Symbol};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// A module type after resolution: its function table and metadata
///
/// Shared read-only by every adapter of this type. Keeps the library mapped
/// for as long as any instance holds a reference.
pub struct ResolvedModule {
    name: String,
    path: Option<PathBuf>,
    table: ModuleTable,
    descriptor: ModuleDescriptor,
    handles: Mutex<HandleSlab>,
    registry: &'static CallbackRegistry,
    // Dropped last so the table never outlives the code it points into
    _library: Option<Library>,
}

impl ResolvedModule {
    /// Build from a table whose entry points are linked into this process
    pub fn from_table(name: impl Into<String>, table: ModuleTable) -> ModuleResult<Self> {
        let name = name.into();
        let descriptor = unsafe { ModuleDescriptor::from_table(&name, &table) }?;

        Ok(Self {
            name,
            path: None,
            table,
            descriptor,
            handles: Mutex::new(HandleSlab::new()),
            registry: registry::global(),
            _library: None,
        })
    }

    /// Extract the ABI table from a loaded library
    ///
    /// # Safety
    /// The library must export the module ABI with the declared signatures.
    pub unsafe fn from_library(
        name: impl Into<String>,
        path: PathBuf,
        library: Library,
    ) -> ModuleResult<Self> {
        let name = name.into();

        let table = unsafe {
            ModuleTable {
                inputs: required(&library, &name, SYM_INPUTS)?,
                input_names: required(&library, &name, SYM_INPUT_NAMES)?,
                defaults: required(&library, &name, SYM_DEFAULTS)?,
                outputs: required(&library, &name, SYM_OUTPUTS)?,
                output_names: required(&library, &name, SYM_OUTPUT_NAMES)?,
                alloc: required(&library, &name, SYM_ALLOC)?,
                init32: required(&library, &name, SYM_INIT32)?,
                init64: required(&library, &name, SYM_INIT64)?,
                perform32: required(&library, &name, SYM_PERFORM32)?,
                perform64: required(&library, &name, SYM_PERFORM64)?,
                free: required(&library, &name, SYM_FREE)?,
                alloc_init32: optional(&library, SYM_ALLOC_INIT32),
                alloc_init64: optional(&library, SYM_ALLOC_INIT64),
                init_global: optional(&library, SYM_INIT_GLOBAL),
            }
        };

        let descriptor = unsafe { ModuleDescriptor::from_table(&name, &table) }?;

        Ok(Self {
            name,
            path: Some(path),
            table,
            descriptor,
            handles: Mutex::new(HandleSlab::new()),
            registry: registry::global(),
            _library: Some(library),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Library file, `None` for in-process modules
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn table(&self) -> &ModuleTable {
        &self.table
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Registry this module's diagnostics are printed through
    pub fn registry(&self) -> &'static CallbackRegistry {
        self.registry
    }

    /// Route diagnostics through `registry` instead of the process-wide one
    pub fn with_registry(mut self, registry: &'static CallbackRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Instances allocated and not yet freed
    pub fn live_instances(&self) -> usize {
        self.handles().live_count()
    }

    pub(crate) fn handles(&self) -> MutexGuard<'_, HandleSlab> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ResolvedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModule")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// # Safety
/// `T` must match the exported symbol's real type.
unsafe fn required<T: Copy>(library: &Library, module: &str, symbol: &'static [u8]) -> ModuleResult<T> {
    let loaded: Symbol<T> = unsafe { library.get(symbol) }.map_err(|source| {
        ModuleError::MissingSymbol {
            module: module.to_string(),
            symbol: symbol_name(symbol),
            source,
        }
    })?;
    Ok(*loaded)
}

/// # Safety
/// `T` must match the exported symbol's real type.
unsafe fn optional<T: Copy>(library: &Library, symbol: &'static [u8]) -> Option<T> {
    unsafe { library.get::<T>(symbol) }.ok().map(|loaded| *loaded)
}

fn symbol_name(symbol: &'static [u8]) -> &'static str {
    std::str::from_utf8(symbol.strip_suffix(b"\0").unwrap_or(symbol)).unwrap_or("<invalid symbol>")
}

/// Source of module tables for a resolver
pub trait ModuleLoader: Send + Sync {
    fn load(&self, name: &str) -> ModuleResult<ResolvedModule>;
}

/// Loads module shared libraries from disk
#[derive(Debug, Clone)]
pub struct DylibLoader {
    search_paths: Vec<PathBuf>,
    max_depth: usize,
}

impl DylibLoader {
    pub fn new(search_paths: Vec<PathBuf>, max_depth: usize) -> Self {
        Self {
            search_paths,
            max_depth,
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for DylibLoader {
    fn default() -> Self {
        Self::new(search::get_default_search_paths(), 3)
    }
}

impl ModuleLoader for DylibLoader {
    fn load(&self, name: &str) -> ModuleResult<ResolvedModule> {
        let path = search::find_library(name, &self.search_paths, self.max_depth).map_err(
            |searched| ModuleError::LibraryNotFound {
                name: name.to_string(),
                searched,
            },
        )?;

        tracing::debug!("Loading module '{}' from {}", name, path.display());

        let library = unsafe { Library::new(&path) }?;
        unsafe { ResolvedModule::from_library(name, path, library) }
    }
}

/// Module tables linked into the host binary, looked up by name
#[derive(Default)]
pub struct StaticLoader {
    modules: HashMap<String, ModuleTable>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, name: impl Into<String>, table: ModuleTable) -> Self {
        self.modules.insert(name.into(), table);
        self
    }
}

impl ModuleLoader for StaticLoader {
    fn load(&self, name: &str) -> ModuleResult<ResolvedModule> {
        let table = self
            .modules
            .get(name)
            .copied()
            .ok_or_else(|| ModuleError::LibraryNotFound {
                name: name.to_string(),
                searched: Vec::new(),
            })?;
        ResolvedModule::from_table(name, table)
    }
}

type ResolveSlot = Arc<OnceLock<Option<Arc<ResolvedModule>>>>;

/// Lazy, memoized name -> module resolution
///
/// The first `resolve` of a name loads it; every later call (from any
/// thread) gets the same `Arc`, or `None` again if loading failed. Concurrent
/// first calls block on one load instead of racing.
pub struct ModuleResolver<L = DylibLoader> {
    loader: L,
    registry: &'static CallbackRegistry,
    slots: Mutex<HashMap<String, ResolveSlot>>,
    loads: AtomicUsize,
}

impl<L: ModuleLoader> ModuleResolver<L> {
    pub fn new(loader: L) -> Self {
        Self::with_registry(loader, registry::global())
    }

    pub fn with_registry(loader: L, registry: &'static CallbackRegistry) -> Self {
        Self {
            loader,
            registry,
            slots: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Resolve a module by name, loading it on first access
    pub fn resolve(&self, name: &str) -> Option<Arc<ResolvedModule>> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(name.to_string()).or_default())
        };

        slot.get_or_init(|| self.load(name)).clone()
    }

    fn load(&self, name: &str) -> Option<Arc<ResolvedModule>> {
        // Callbacks are final once any module can see them
        self.registry.seal();
        self.loads.fetch_add(1, Ordering::SeqCst);

        match self.loader.load(name) {
            Ok(module) => {
                let module = module.with_registry(self.registry);
                if let Some(init_global) = module.table().init_global {
                    unsafe { self.registry.table().inject(init_global) };
                }

                tracing::info!(
                    "Resolved module '{}': {} input(s), {} output(s)",
                    name,
                    module.descriptor().num_inputs(),
                    module.descriptor().num_outputs()
                );

                Some(Arc::new(module))
            }
            Err(err) => {
                self.registry
                    .print_str(&format!("ERROR: No {name} module loaded: {err}\n"));
                None
            }
        }
    }

    /// Whether `name` has been resolved (successfully or not)
    pub fn is_resolved(&self, name: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(name).is_some_and(|slot| slot.get().is_some())
    }

    /// Number of load attempts made so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }
}

impl ModuleResolver<DylibLoader> {
    /// The process-wide resolver, created with `loader` on first call
    ///
    /// Later calls return the existing resolver and ignore their argument.
    pub fn init_global(loader: DylibLoader) -> &'static Self {
        global_slot().get_or_init(|| Self::new(loader))
    }

    /// The process-wide resolver, with default search paths if not yet created
    pub fn global() -> &'static Self {
        global_slot().get_or_init(|| Self::new(DylibLoader::default()))
    }
}

fn global_slot() -> &'static OnceLock<ModuleResolver<DylibLoader>> {
    static GLOBAL: OnceLock<ModuleResolver<DylibLoader>> = OnceLock::new();
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::sine::Sine;
    use std::thread;

    fn test_registry() -> &'static CallbackRegistry {
        Box::leak(Box::new(CallbackRegistry::new()))
    }

    #[test]
    fn test_resolve_is_memoized() {
        let loader = StaticLoader::new().with_module("sine", ModuleTable::of::<Sine>());
        let resolver = ModuleResolver::with_registry(loader, test_registry());

        let first = resolver.resolve("sine").unwrap();
        let second = resolver.resolve("sine").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.load_count(), 1);
        assert_eq!(first.descriptor().outputs, vec!["out"]);
    }

    #[test]
    fn test_failed_resolution_is_memoized() {
        let resolver = ModuleResolver::with_registry(StaticLoader::new(), test_registry());

        assert!(resolver.resolve("missing").is_none());
        assert!(resolver.resolve("missing").is_none());
        assert!(resolver.is_resolved("missing"));
        assert_eq!(resolver.load_count(), 1);
    }

    #[test]
    fn test_concurrent_first_access_loads_once() {
        let loader = StaticLoader::new().with_module("sine", ModuleTable::of::<Sine>());
        let resolver = ModuleResolver::with_registry(loader, test_registry());

        let modules: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| resolver.resolve("sine")))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(resolver.load_count(), 1);
        let first = modules[0].as_ref().unwrap();
        for module in &modules {
            assert!(Arc::ptr_eq(first, module.as_ref().unwrap()));
        }
    }

    #[test]
    fn test_resolution_seals_registry() {
        let registry = test_registry();
        let resolver = ModuleResolver::with_registry(StaticLoader::new(), registry);

        assert!(!registry.is_sealed());
        resolver.resolve("anything");
        assert!(registry.is_sealed());
    }

    #[test]
    fn test_resolved_module_keeps_resolver_registry() {
        let registry = test_registry();
        let loader = StaticLoader::new().with_module("sine", ModuleTable::of::<Sine>());
        let resolver = ModuleResolver::with_registry(loader, registry);

        let module = resolver.resolve("sine").unwrap();
        assert!(std::ptr::eq(module.registry(), registry));
    }

    #[test]
    fn test_dylib_loader_missing_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let loader = DylibLoader::new(vec![temp_dir.path().to_path_buf()], 2);

        let err = loader.load("libdoesnotexist").unwrap_err();
        assert!(matches!(err, ModuleError::LibraryNotFound { .. }));
    }

    #[test]
    fn test_dylib_loader_rejects_non_library() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let file_name = search::library_file_names("libbroken").remove(0);
        std::fs::write(temp_dir.path().join(file_name), b"not a shared library").unwrap();

        let loader = DylibLoader::new(vec![temp_dir.path().to_path_buf()], 2);
        assert!(matches!(
            loader.load("libbroken"),
            Err(ModuleError::LibraryError(_))
        ));
    }

    #[test]
    fn test_symbol_name() {
        assert_eq!(symbol_name(SYM_PERFORM64), "Omni_UGenPerform64");
    }
}
