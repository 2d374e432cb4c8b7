//! General utilities.

use std::time::Duration;

use serde::Serializer;

/// Format an epoch offset as RFC 3339 with microseconds
/// (e.g., "2018-11-21T15:48:46.700248Z").
///
/// Returns `None` if the offset is outside chrono's representable range.
pub fn format_timestamp_rfc3339(since_epoch: Duration) -> Option<String> {
    let secs = i64::try_from(since_epoch.as_secs()).ok()?;
    chrono::DateTime::from_timestamp(secs, since_epoch.subsec_nanos())
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
}

/// Serialize a duration as fractional seconds.
///
/// Used with `#[serde(serialize_with = "...")]` so JSON output carries plain
/// numbers rather than serde's `{secs, nanos}` struct.
pub fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Human-readable duration, e.g. "2.5ms" or "1.200305s".
pub fn format_duration(duration: Duration) -> String {
    format!("{duration:?}")
}

/// Suffix for an error message carrying a tool's output.
///
/// Empty output adds nothing, a single line follows a colon, and multi-line
/// output is set off in its own block.
pub fn format_tool_output(output: &str) -> String {
    let output = output.trim();
    if output.is_empty() {
        String::new()
    } else if output.contains('\n') {
        format!(":\n-----\n{output}\n-----")
    } else {
        format!(": {output}")
    }
}
