//! Lifecycle ordering through the host adapter
//!
//! Modules here record every entry point they see into a per-thread log, so
//! each test observes only its own instances.

use std::cell::RefCell;
use std::ffi::CStr;
use std::os::raw::c_void;
use std::sync::Arc;
use ugen_bridge::host::{HostAdapter, UnitContext};
use ugen_bridge::sdk::sine::Sine;
use ugen_bridge::{
    BufferInterface, Channels, ChannelsMut, DspModule, InitContext, LifecycleState, ModuleError,
    ModuleTable, Precision, ResolvedModule, Sample,
};

thread_local! {
    static CALLS: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
}

fn record(call: &'static str) {
    CALLS.with(|calls| calls.borrow_mut().push(call));
}

fn take_calls() -> Vec<&'static str> {
    CALLS.with(|calls| std::mem::take(&mut *calls.borrow_mut()))
}

/// Sums its two inputs into one output
struct Recorder;

impl DspModule for Recorder {
    const INPUT_NAMES: &'static CStr = c"a,b";
    const OUTPUT_NAMES: &'static CStr = c"sum";
    const DEFAULTS: &'static [f32] = &[1.0, 2.0];

    fn new() -> Self {
        record("alloc");
        Recorder
    }

    fn init<S: Sample>(&mut self, _ctx: InitContext<'_, S>) -> bool {
        record("init");
        true
    }

    fn perform<S: Sample>(&mut self, ins: Channels<'_, S>, mut outs: ChannelsMut<'_, S>, _bufsize: usize) {
        record("perform");
        let (Some(a), Some(b)) = (ins.get(0), ins.get(1)) else {
            return;
        };
        if let Some(out) = outs.get_mut(0) {
            for ((out, a), b) in out.iter_mut().zip(a).zip(b) {
                *out = *a + *b;
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        record("free");
    }
}

/// Refuses every initialize
struct Broken;

impl DspModule for Broken {
    const INPUT_NAMES: &'static CStr = c"";
    const OUTPUT_NAMES: &'static CStr = c"out";
    const DEFAULTS: &'static [f32] = &[];

    fn new() -> Self {
        record("alloc");
        Broken
    }

    fn init<S: Sample>(&mut self, _ctx: InitContext<'_, S>) -> bool {
        record("init");
        false
    }

    fn perform<S: Sample>(&mut self, _ins: Channels<'_, S>, _outs: ChannelsMut<'_, S>, _bufsize: usize) {
        record("perform");
    }
}

impl Drop for Broken {
    fn drop(&mut self) {
        record("free");
    }
}

unsafe extern "C" fn null_alloc() -> *mut c_void {
    std::ptr::null_mut()
}

fn resolved(name: &str, table: ModuleTable) -> Arc<ResolvedModule> {
    Arc::new(ResolvedModule::from_table(name, table).unwrap())
}

fn context<'a, S>(inputs: &'a [&'a [S]], num_outputs: usize, block_size: usize) -> UnitContext<'a, S> {
    UnitContext {
        inputs,
        num_outputs,
        block_size,
        sample_rate: 48000.0,
        buffer_interface: BufferInterface::NONE,
    }
}

#[test]
fn test_entry_points_run_in_order() {
    take_calls();
    let module = resolved("recorder", ModuleTable::of::<Recorder>());

    let a = [0.25f64; 8];
    let b = [0.5f64; 8];
    let inputs: [&[f64]; 2] = [&a, &b];
    let mut adapter = HostAdapter::<f64>::new(Some(&module), context(&inputs, 1, 8));

    let mut out = [0.0f64; 8];
    for _ in 0..3 {
        let mut outputs: [&mut [f64]; 1] = [&mut out];
        adapter.process(&inputs, &mut outputs, 8);
    }
    assert_eq!(out, [0.75; 8]);
    assert_eq!(adapter.state(), LifecycleState::Performing(Precision::Double));

    drop(adapter);
    assert_eq!(
        take_calls(),
        vec!["alloc", "init", "perform", "perform", "perform", "free"]
    );
    assert_eq!(module.live_instances(), 0);
}

#[test]
fn test_failed_initialize_frees_exactly_once() {
    take_calls();
    let module = resolved("broken", ModuleTable::of::<Broken>());

    let inputs: [&[f32]; 0] = [];
    let mut adapter = HostAdapter::<f32>::new(Some(&module), context(&inputs, 1, 16));

    assert!(adapter.is_degraded());
    assert_eq!(adapter.state(), LifecycleState::Freed);
    assert!(matches!(
        adapter.failure(),
        Some(ModuleError::InitializationFailed(Precision::Single))
    ));

    let mut out = [1.0f32; 16];
    let mut outputs: [&mut [f32]; 1] = [&mut out];
    adapter.process(&inputs, &mut outputs, 16);
    assert_eq!(out, [0.0; 16]);

    drop(adapter);
    // perform is never reached and the drop does not free a second time
    assert_eq!(take_calls(), vec!["alloc", "init", "free"]);
    assert_eq!(module.live_instances(), 0);
}

#[test]
fn test_failed_allocation_outputs_silence() {
    take_calls();
    let table = ModuleTable {
        alloc: null_alloc,
        ..ModuleTable::of::<Recorder>()
    };
    let module = resolved("recorder", table);

    let a = [1.0f32; 32];
    let b = [1.0f32; 32];
    let inputs: [&[f32]; 2] = [&a, &b];
    let mut adapter = HostAdapter::<f32>::new(Some(&module), context(&inputs, 1, 32));

    assert!(adapter.is_degraded());
    assert_eq!(adapter.state(), LifecycleState::Resolved);
    assert!(matches!(adapter.failure(), Some(ModuleError::AllocationFailed)));

    let mut out = [0.5f32; 32];
    let mut outputs: [&mut [f32]; 1] = [&mut out];
    adapter.process(&inputs, &mut outputs, 32);
    assert_eq!(out, [0.0; 32]);

    drop(adapter);
    assert!(take_calls().is_empty());
}

#[test]
fn test_missing_inputs_skip_allocation() {
    take_calls();
    let module = resolved("recorder", ModuleTable::of::<Recorder>());

    let a = [0.0f64; 4];
    let inputs: [&[f64]; 1] = [&a];
    let adapter = HostAdapter::<f64>::new(Some(&module), context(&inputs, 1, 4));

    assert!(matches!(
        adapter.failure(),
        Some(ModuleError::ChannelMismatch {
            direction: "inputs",
            declared: 2,
            provided: 1,
        })
    ));
    drop(adapter);
    assert!(take_calls().is_empty());
}

#[test]
fn test_short_host_buffers_clamp_block() {
    take_calls();
    let module = resolved("recorder", ModuleTable::of::<Recorder>());

    let a = [1.0f32; 8];
    let b = [1.0f32; 4];
    let inputs: [&[f32]; 2] = [&a, &b];
    let mut adapter = HostAdapter::<f32>::new(Some(&module), context(&inputs, 1, 8));

    let mut out = [9.0f32; 8];
    let mut outputs: [&mut [f32]; 1] = [&mut out];
    adapter.process(&inputs, &mut outputs, 8);

    // The tail past the short input is zeroed, not left from earlier blocks
    assert_eq!(out, [2.0, 2.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn test_identical_units_render_identically() {
    let module = resolved("sine", ModuleTable::of::<Sine>());

    let freq = [220.0f64; 64];
    let inputs: [&[f64]; 1] = [&freq];
    let mut first = HostAdapter::<f64>::new(Some(&module), context(&inputs, 1, 64));
    let mut second = HostAdapter::<f64>::new(Some(&module), context(&inputs, 1, 64));
    assert_eq!(module.live_instances(), 2);

    for _ in 0..4 {
        let mut left = [0.0f64; 64];
        let mut right = [0.0f64; 64];
        first.process(&inputs, &mut [&mut left[..]], 64);
        second.process(&inputs, &mut [&mut right[..]], 64);
        assert_eq!(left, right);
    }
}
