pub mod abi;
pub mod descriptor;
pub mod handle;
pub mod instance;
pub mod lifecycle;
pub mod registry;
pub mod resolver;
pub mod search;

pub use abi::*;
pub use descriptor::*;
pub use handle::*;
pub use instance::*;
pub use lifecycle::*;
pub use registry::{CallbackTable, RegistryError};
pub use resolver::*;

use std::path::PathBuf;
use thiserror::Error;

/// Module-related errors
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module library not found: {name} (searched {} location(s))", .searched.len())]
    LibraryNotFound { name: String, searched: Vec<PathBuf> },

    #[error("Module '{module}' does not export {symbol}")]
    MissingSymbol {
        module: String,
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("Invalid module metadata: {0}")]
    InvalidMetadata(String),

    #[error("Module allocation failed")]
    AllocationFailed,

    #[error("Module initialization failed ({0})")]
    InitializationFailed(Precision),

    #[error("Instance initialized as {initialized} but {requested} was requested")]
    PrecisionMismatch {
        initialized: Precision,
        requested: Precision,
    },

    #[error("Cannot {operation} an instance in state {state:?}")]
    InvalidState {
        state: LifecycleState,
        operation: &'static str,
    },

    #[error("Stale module handle {0}")]
    StaleHandle(HandleId),

    #[error("Module returned address {0:#x} which belongs to a live instance")]
    DuplicateHandle(usize),

    #[error("Channel mismatch: module declares {declared} {direction}, host provides {provided}")]
    ChannelMismatch {
        direction: &'static str,
        declared: usize,
        provided: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Callback registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Library loading error: {0}")]
    LibraryError(#[from] libloading::Error),
}

pub type ModuleResult<T> = Result<T, ModuleError>;
