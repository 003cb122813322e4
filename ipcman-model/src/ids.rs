use std::fmt;

/// Catalog identifier for a device.
///
/// Devices are keyed by the integer the catalog assigns them; the core never
/// mints ids of its own.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DeviceId(pub i64);

impl DeviceId {
    pub fn new(id: i64) -> Self {
        DeviceId(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for DeviceId {
    fn from(value: i64) -> Self {
        DeviceId(value)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
