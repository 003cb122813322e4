//! Cursor-driven reconciliation of device file listings into the catalog.

pub mod engine;
pub mod lock;
pub mod period;
pub mod stream;
pub mod unique_time;

pub use engine::{ScanEngine, ScanOptions, ScanPlan, ScanReport};
pub use lock::ScanLock;
pub use period::PeriodIterator;
pub use stream::FileStream;
pub use unique_time::{unique_offset, unique_time};
