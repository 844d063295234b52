// Host-side callbacks injected into the registry
//
// Allocation and printing use the registry defaults (libc allocator, tracing
// output); the environment callbacks report the host's current sample rate and
// block size.

use crate::module::registry::{CallbackRegistry, CallbackTable, RegistryError};
use std::os::raw::c_int;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

static SAMPLE_RATE_BITS: AtomicU64 = AtomicU64::new(0);
static BLOCK_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Process-wide audio environment seen by modules
pub struct HostEnvironment;

impl HostEnvironment {
    pub fn set(sample_rate: f64, block_size: usize) {
        SAMPLE_RATE_BITS.store(sample_rate.to_bits(), Ordering::Release);
        BLOCK_SIZE.store(block_size, Ordering::Release);
    }

    pub fn sample_rate() -> f64 {
        f64::from_bits(SAMPLE_RATE_BITS.load(Ordering::Acquire))
    }

    pub fn block_size() -> usize {
        BLOCK_SIZE.load(Ordering::Acquire)
    }
}

unsafe extern "C" fn host_samplerate() -> f64 {
    HostEnvironment::sample_rate()
}

unsafe extern "C" fn host_bufsize() -> c_int {
    c_int::try_from(HostEnvironment::block_size()).unwrap_or(c_int::MAX)
}

/// The callback table this host hands to modules
pub fn host_callback_table() -> CallbackTable {
    CallbackTable {
        get_samplerate: host_samplerate,
        get_bufsize: host_bufsize,
        ..CallbackTable::defaults()
    }
}

/// Install the host table into `registry`, one group at a time
///
/// Groups the embedder already installed are kept and skipped. Only a sealed
/// registry is an error, since then none of the host callbacks can reach
/// modules.
pub fn install_host_callbacks(registry: &CallbackRegistry) -> Result<(), RegistryError> {
    let table = host_callback_table();

    let groups = [
        registry.install_alloc(table.alloc, table.realloc, table.free),
        registry.install_print(
            table.print_debug,
            table.print_str,
            table.print_float,
            table.print_int,
        ),
        registry.install_utilities(table.get_samplerate, table.get_bufsize),
    ];

    for result in groups {
        match result {
            Ok(()) => {}
            Err(RegistryError::AlreadyInstalled(group)) => {
                tracing::debug!("Keeping previously installed {} callbacks", group)
            }
            Err(err) => return Err(err),
        }
    }

    tracing::debug!("Host callbacks installed");
    Ok(())
}
