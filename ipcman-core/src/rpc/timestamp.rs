use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

const FORMAT_24H: &str = "%Y-%m-%d %H:%M:%S";
const FORMAT_12H: &str = "%Y-%m-%d %I:%M:%S %p";

/// Renders a UTC instant as a device-local timestamp string.
pub fn format(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format(FORMAT_24H).to_string()
}

/// Parses a device-local timestamp (24-hour or `AM`/`PM` form) into UTC.
///
/// Ambiguous local times inside a DST fold resolve to the earlier instant;
/// times inside a DST gap are rejected.
pub fn parse(raw: &str, tz: Tz) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    let layout = if raw.ends_with("AM") || raw.ends_with("PM") {
        FORMAT_12H
    } else {
        FORMAT_24H
    };
    let naive = NaiveDateTime::parse_from_str(raw, layout).map_err(|err| format!("{raw}: {err}"))?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(format!("{raw}: does not exist in {tz}")),
    }
}

/// Bracketed tags in the last path segment, in order.
pub fn extract_file_path_tags(path: &str) -> Vec<&str> {
    let segment = match path.rfind('/') {
        Some(idx) => &path[idx..],
        None => path,
    };

    segment
        .split('[')
        .skip(1)
        .filter_map(|token| token.find(']').map(|end| &token[..end]))
        .collect()
}
