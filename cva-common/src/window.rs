//! Time window resolution.
//!
//! Turns the human-supplied RFC3339 timestamps of an [`AnalysisSpec`] into
//! epoch-millisecond start times and a lifetime in whole minutes.
//!
//! [`AnalysisSpec`]: crate::spec::AnalysisSpec

use crate::clock::Clock;
use crate::error::{AnalysisError, Result};
use chrono::{DateTime, FixedOffset, Utc};

/// Start times and lifetime of one canary run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub baseline_start_ms: i64,
    pub canary_start_ms: i64,
    pub lifetime_minutes: i64,
}

fn parse_rfc3339(field: &str, value: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).map_err(|e| AnalysisError::TimeParse {
        field: field.to_string(),
        reason: format!("parsing time \"{value}\": {e}"),
    })
}

fn start_millis(field: &str, value: Option<&str>, now: DateTime<Utc>) -> Result<i64> {
    match value {
        None => Ok(now.timestamp_millis()),
        Some(value) => Ok(parse_rfc3339(field, value)?.timestamp_millis()),
    }
}

/// Round a minute count to the nearest integer, ties away from zero.
pub fn round_minutes(minutes: f64) -> i64 {
    minutes.round() as i64
}

/// Resolve the analysis window.
///
/// Empty start times default to the clock's "now". When `lifetime_minutes`
/// is `None` it is derived from `end_time`, measured from the canary start.
pub fn resolve_window(
    baseline_start: Option<&str>,
    canary_start: Option<&str>,
    end_time: Option<&str>,
    lifetime_minutes: Option<u32>,
    clock: &dyn Clock,
) -> Result<ResolvedWindow> {
    let now = clock.now();
    let canary_start_ms = start_millis("canaryStartTime", canary_start, now)?;
    let baseline_start_ms = start_millis("baselineStartTime", baseline_start, now)?;

    let lifetime_minutes = match lifetime_minutes.filter(|m| *m != 0) {
        Some(minutes) => i64::from(minutes),
        None => {
            let end_value = end_time.unwrap_or_default();
            let end = parse_rfc3339("endTime", end_value)?;
            if let Some(canary) = canary_start
                && canary > end_value
            {
                return Err(AnalysisError::Ordering(
                    "start time cannot be greater than end time".to_string(),
                ));
            }
            let start_ms = match canary_start {
                Some(_) => canary_start_ms,
                None => now.timestamp_millis(),
            };
            let elapsed_ms = end.timestamp_millis() - start_ms;
            round_minutes(elapsed_ms as f64 / 60_000.0)
        }
    };

    Ok(ResolvedWindow {
        baseline_start_ms,
        canary_start_ms,
        lifetime_minutes,
    })
}
