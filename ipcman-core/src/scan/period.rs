use chrono::{DateTime, Duration, Utc};
use ipcman_model::TimeRange;

/// Walks a range from its end toward its start in chunks no longer than
/// `max_period`.
///
/// Devices return unreliable listings for long query spans, so every
/// sub-period is capped.
#[derive(Debug, Clone)]
pub struct PeriodIterator {
    range: TimeRange,
    cursor: DateTime<Utc>,
    max_period: Duration,
}

impl PeriodIterator {
    pub fn new(range: TimeRange, max_period: Duration) -> Self {
        Self {
            range,
            cursor: range.end,
            max_period: max_period.max(Duration::seconds(1)),
        }
    }

    /// Start of the last emitted period; everything after it has been handed
    /// out.
    pub fn cursor(&self) -> DateTime<Utc> {
        self.cursor
    }

    /// Share of the range already handed out, in `[0, 100]`.
    pub fn percent(&self) -> f64 {
        if self.cursor <= self.range.start {
            return 100.0;
        }
        let total = self.range.span().num_milliseconds() as f64;
        let done = (self.range.end - self.cursor).num_milliseconds() as f64;
        (done / total * 100.0).clamp(0.0, 100.0)
    }
}

impl Iterator for PeriodIterator {
    type Item = TimeRange;

    fn next(&mut self) -> Option<TimeRange> {
        if self.cursor <= self.range.start {
            return None;
        }

        let end = self.cursor;
        let start = (end - self.max_period).max(self.range.start);
        self.cursor = start;
        Some(TimeRange { start, end })
    }
}
