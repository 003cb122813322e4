//! Configuration for the ipcman daemon.
//!
//! The loader resolves a single [`IpcmanConfig`] from an explicit path, inline
//! JSON, or a default file, and the config converts into the option structs
//! the core crates take.
#![allow(missing_docs)]

pub mod error;
pub mod loader;
pub mod models;

pub use error::ConfigError;
pub use loader::{ConfigLoad, ConfigLoader, ConfigSource};
pub use models::{DeviceConfig, IpcmanConfig, ScanConfig, SessionConfig, WorkerConfig};
