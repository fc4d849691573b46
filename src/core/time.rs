use std::time::Duration;

use time::{macros::format_description, OffsetDateTime};

/// Lobby clock, `HH:MM:SS`.
pub(crate) fn format_clock(remaining: Duration) -> String {
    let total_seconds = remaining.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// In-exam clock, `MM:SS`. Minutes are not wrapped into hours.
pub(crate) fn format_short_clock(remaining: Duration) -> String {
    let total_seconds = remaining.as_secs();
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    let total_seconds = elapsed.as_secs();
    format!("{}min {}s", total_seconds / 60, total_seconds % 60)
}

/// Server values are signed milliseconds; anything at or below zero is no time left.
pub(crate) fn millis_to_duration(millis: f64) -> Duration {
    if millis.is_finite() && millis > 0.0 {
        Duration::from_millis(millis as u64)
    } else {
        Duration::ZERO
    }
}

pub(crate) fn format_report_date(value: OffsetDateTime) -> String {
    let description = format_description!("[day]/[month]/[year]");
    value.format(&description).unwrap_or_else(|_| value.date().to_string())
}
