//! Loading the sine module from its built shared library
//!
//! Needs `modules/sine` built into the same target directory (for example
//! `cargo build --workspace`); skipped when the library is not there.

use libloading::{Library, Symbol};
use std::f64::consts::TAU;
use std::os::raw::{c_char, c_int};
use std::path::PathBuf;
use std::sync::Arc;
use ugen_bridge::host::{HostConfig, UnitDefinition};
use ugen_bridge::module::abi::PrintDebugFunc;
use ugen_bridge::module::registry::{CallbackRegistry, CallbackTable};
use ugen_bridge::module::search;
use ugen_bridge::{DylibLoader, LifecycleState, ModuleResolver, Precision};

unsafe extern "C" fn marker_debug(_format: *const c_char, _value: usize) {}
unsafe extern "C" fn marker_float(_value: f32) {}
unsafe extern "C" fn marker_int(_value: c_int) {}

/// `target/<profile>`, derived from this test binary's location
fn profile_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    // target/<profile>/deps/<test binary>
    Some(exe.parent()?.parent()?.to_path_buf())
}

fn built_library() -> Option<PathBuf> {
    let dir = profile_dir()?;
    search::find_library("sine", &[dir], 1).ok()
}

#[test]
fn test_built_sine_library_loads_and_renders() {
    let Some(path) = built_library() else {
        eprintln!("libsine not built in this target directory, skipping");
        return;
    };
    let search_root = path.parent().map(PathBuf::from).unwrap_or_default();

    let registry: &'static CallbackRegistry = Box::leak(Box::new(CallbackRegistry::new()));
    let defaults = CallbackTable::defaults();
    registry
        .install_print(marker_debug, defaults.print_str, marker_float, marker_int)
        .unwrap();

    let resolver =
        ModuleResolver::with_registry(DylibLoader::new(vec![search_root], 1), registry);
    let config = HostConfig::default()
        .with_sample_rate(48000.0)
        .with_block_size(4);
    let definition = UnitDefinition::with_resolver(&resolver, "sine", &config);

    let module = Arc::clone(definition.module().expect("libsine resolves"));
    assert_eq!(module.path(), Some(path.as_path()));
    assert!(module.table().init_global.is_some());
    assert!(module.table().alloc_init32.is_some());
    assert!(module.table().alloc_init64.is_some());

    let descriptor = module.descriptor();
    assert_eq!(descriptor.num_inputs(), 1);
    assert_eq!(descriptor.inputs[0].name, "freq");
    assert_eq!(descriptor.default_value("freq"), Some(440.0));
    assert_eq!(descriptor.outputs, vec!["out"]);

    // The library's own registry now holds the callbacks injected at load
    let library = unsafe { Library::new(&path) }.unwrap();
    let injected: Symbol<unsafe extern "C" fn() -> PrintDebugFunc> =
        unsafe { library.get(b"get_omni_print_debug_func\0") }.unwrap();
    let print_debug = unsafe { injected() };
    assert_eq!(
        print_debug as *const (),
        marker_debug as PrintDebugFunc as *const ()
    );

    let freq = [0.0f64; 4];
    let inputs: [&[f64]; 1] = [&freq];
    let mut unit = definition.construct::<f64>(&inputs, 1);
    assert_eq!(module.live_instances(), 1);

    let mut out = [9.0f64; 4];
    unit.process(&inputs, &mut [&mut out[..]], 4);
    assert_eq!(unit.state(), LifecycleState::Performing(Precision::Double));

    for (i, sample) in out.iter().enumerate() {
        let expected = (i as f64 * 440.0 / 48000.0 * TAU).sin();
        assert!((sample - expected).abs() < 1e-12, "sample {i}: {sample}");
    }

    drop(unit);
    assert_eq!(module.live_instances(), 0);
}
