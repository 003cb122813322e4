use std::fmt;

use crate::chrono::{DateTime, Utc};
use crate::ids::DeviceId;

/// Media type as reported by the device listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileKind {
    Picture,
    Video,
    Other(String),
}

impl FileKind {
    pub fn from_device_type(kind: &str) -> Self {
        match kind {
            "jpg" => FileKind::Picture,
            "dav" => FileKind::Video,
            other => FileKind::Other(other.to_string()),
        }
    }

    pub fn as_device_type(&self) -> &str {
        match self {
            FileKind::Picture => "jpg",
            FileKind::Video => "dav",
            FileKind::Other(other) => other.as_str(),
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_device_type())
    }
}

/// One media file on a device as indexed by the catalog.
///
/// `(device_id, file_path)` is the identity used for upserts. `start_time` and
/// `end_time` carry the synthesized sub-second offset so they are unique
/// across the fleet.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileRecord {
    pub device_id: DeviceId,
    pub channel: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub kind: FileKind,
    pub file_path: String,
    pub length: i64,
    pub duration: i64,
    pub disk: i64,
    pub video_stream: String,
    pub flags: Vec<String>,
    pub events: Vec<String>,
    pub cluster: i64,
    pub partition: i64,
    pub pic_index: i64,
    pub repeat: i64,
    pub work_dir: String,
    pub work_dir_sn: bool,
    /// File is stored on the device's own disk (not a remote share).
    pub local: bool,
    /// Set to the scan's start instant on every upsert; reconciliation deletes
    /// records in a scanned period whose marker is older than the pass.
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn key(&self) -> (DeviceId, &str) {
        (self.device_id, self.file_path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_device_strings() {
        assert_eq!(FileKind::from_device_type("jpg"), FileKind::Picture);
        assert_eq!(FileKind::from_device_type("dav"), FileKind::Video);
        assert_eq!(
            FileKind::from_device_type("mp4"),
            FileKind::Other("mp4".into())
        );
        assert_eq!(FileKind::Other("mp4".into()).to_string(), "mp4");
    }
}
