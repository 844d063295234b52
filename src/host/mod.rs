// Host side: configuration, callbacks and the per-unit adapter

pub mod adapter;
pub mod callbacks;
pub mod channels;
pub mod config;
pub mod unit;

pub use adapter::{HostAdapter, UnitContext};
pub use callbacks::{HostEnvironment, host_callback_table, install_host_callbacks};
pub use config::HostConfig;
pub use unit::UnitDefinition;
