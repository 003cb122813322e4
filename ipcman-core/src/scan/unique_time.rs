use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::error::ScanError;
use crate::rpc::modules::media_file_find::FileInfo;
use crate::rpc::timestamp::{self, extract_file_path_tags};

/// Sub-second offset that keeps file times unique.
///
/// Device clocks only have whole seconds. The millisecond part is derived
/// from the file's path tags and type so files on one device differ; the
/// microsecond part comes from the device seed so devices differ.
pub fn unique_offset(file_path: &str, kind: &str, seed: i64) -> Duration {
    let mut prefix: i64 = 0;

    let tags = extract_file_path_tags(file_path);
    if tags.len() >= 4 {
        prefix += tags[2].parse::<i64>().unwrap_or_default();
        prefix += tags[3].parse::<i64>().unwrap_or_default();
    }
    prefix += kind.chars().map(|c| c as i64).sum::<i64>();

    Duration::milliseconds(prefix.rem_euclid(999)) + Duration::microseconds(seed.rem_euclid(999))
}

/// Parsed start and end of a listed file with the unique offset applied.
pub fn unique_time(
    info: &FileInfo,
    seed: i64,
    tz: Tz,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ScanError> {
    let start = timestamp::parse(&info.start_time, tz).map_err(ScanError::Timestamp)?;
    let end = timestamp::parse(&info.end_time, tz).map_err(ScanError::Timestamp)?;
    let offset = unique_offset(&info.file_path, &info.kind, seed);
    Ok((start + offset, end + offset))
}
