use std::fmt;
use std::str::FromStr;

use crate::chrono::{DateTime, Duration, TimeZone, Utc};
use crate::error::{ModelError, Result};
use crate::ids::DeviceId;

/// Oldest instant a device file can carry (`2009-12-31 00:00:00 UTC`).
pub const SCAN_EPOCH: i64 = 1_262_217_600;

pub fn scan_epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(SCAN_EPOCH, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Half-open `[start, end)` interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(ModelError::InvalidRange(format!(
                "start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn span(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScanType {
    Quick,
    Full,
    Reverse,
    Manual,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Quick => "quick",
            ScanType::Full => "full",
            ScanType::Reverse => "reverse",
            ScanType::Manual => "manual",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quick" => Ok(ScanType::Quick),
            "full" => Ok(ScanType::Full),
            "reverse" => Ok(ScanType::Reverse),
            "manual" => Ok(ScanType::Manual),
            other => Err(ModelError::InvalidRange(format!(
                "unknown scan type: {other}"
            ))),
        }
    }
}

/// Persisted per-device scan progress.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanCursor {
    pub device_id: DeviceId,
    /// Everything before this instant has been quick-scanned.
    pub quick_watermark: DateTime<Utc>,
    /// Full scans walk backwards from here toward `full_epoch`.
    pub full_watermark: DateTime<Utc>,
    pub full_epoch: DateTime<Utc>,
    pub in_progress: bool,
    pub scan_type: Option<ScanType>,
    pub percent: f64,
    pub updated_at: DateTime<Utc>,
}

impl ScanCursor {
    /// Cursor for a freshly onboarded device.
    pub fn new(
        device_id: DeviceId,
        now: DateTime<Utc>,
        volatile_window: Duration,
    ) -> Self {
        Self {
            device_id,
            quick_watermark: now - volatile_window,
            full_watermark: now,
            full_epoch: scan_epoch(),
            in_progress: false,
            scan_type: None,
            percent: 0.0,
            updated_at: now,
        }
    }

    pub fn full_complete(&self) -> bool {
        self.full_watermark <= self.full_epoch
    }
}
