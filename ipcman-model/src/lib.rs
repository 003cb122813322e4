//! Core data model definitions shared across ipcman crates.
#![allow(missing_docs)]

pub use ::chrono;
pub use ::chrono_tz;

pub mod device;
pub mod error;
pub mod files;
pub mod ids;
pub mod scan;

// Intentionally curated re-exports for downstream consumers.
pub use device::{ConnectionDescriptor, Credentials, DeviceFeature};
pub use error::{ModelError, Result as ModelResult};
pub use files::{FileKind, FileRecord};
pub use ids::DeviceId;
pub use scan::{SCAN_EPOCH, ScanCursor, ScanType, TimeRange, scan_epoch};
