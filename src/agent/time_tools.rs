//! Time tools offered to the agent alongside the provider tools.
//!
//! Log data frequently carries clock-skewed or malformed timestamps;
//! these functions let the agent check them against the current UTC
//! time and pick sensible query windows.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timestamp layout accepted and produced by the time tools.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Span above which a set of timestamps is flagged.
const MAX_EXPECTED_SPAN_DAYS: i64 = 365;

/// Future timestamps listed in a formatted report.
const REPORT_FUTURE_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum TimeToolError {
    #[error("a window of {0} days reaches outside the supported date range")]
    WindowOutOfRange(u32),

    #[error("analysis data is not a valid validation result: {0}")]
    InvalidAnalysis(#[from] serde_json::Error),
}

/// Result of [`validate_log_timestamps`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampValidation {
    pub current_time: String,
    pub total_timestamps: usize,
    pub future_timestamps: Vec<FutureTimestamp>,
    pub past_timestamps: Vec<String>,
    pub invalid_timestamps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureTimestamp {
    pub timestamp: String,
    /// Whole days between now and the timestamp.
    pub days_in_future: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub earliest: String,
    pub latest: String,
    pub span_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    FutureTimestamps,
    InvalidFormat,
    LargeTimeSpan,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_days: Option<i64>,
    #[serde(default)]
    pub description: String,
}

/// A suggested query window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
    pub description: String,
}

/// Result of [`time_filter_suggestion`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeFilterSuggestion {
    pub current_time: String,
    pub today: TimeWindow,
    pub last_7_days: TimeWindow,
    pub last_30_days: TimeWindow,
    pub custom_range: TimeWindow,
}

fn display_now(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Current UTC time in RFC 3339 form.
pub fn current_time() -> String {
    Utc::now().to_rfc3339()
}

/// Validate a comma-separated list of timestamps against the current time.
pub fn validate_log_timestamps(log_timestamps: &str) -> TimestampValidation {
    validate_log_timestamps_at(log_timestamps, Utc::now())
}

pub fn validate_log_timestamps_at(log_timestamps: &str, now: DateTime<Utc>) -> TimestampValidation {
    let entries: Vec<&str> = log_timestamps.split(',').map(str::trim).collect();

    let mut result = TimestampValidation {
        current_time: display_now(now),
        total_timestamps: entries.len(),
        ..TimestampValidation::default()
    };

    let mut parsed: Vec<DateTime<Utc>> = Vec::new();

    for entry in entries {
        match NaiveDateTime::parse_from_str(entry, TIMESTAMP_FORMAT) {
            Ok(naive) => {
                let at = Utc.from_utc_datetime(&naive);
                parsed.push(at);
                if at > now {
                    result.future_timestamps.push(FutureTimestamp {
                        timestamp: entry.to_string(),
                        days_in_future: (at - now).num_days(),
                    });
                } else {
                    result.past_timestamps.push(entry.to_string());
                }
            }
            Err(_) => result.invalid_timestamps.push(entry.to_string()),
        }
    }

    if let (Some(earliest), Some(latest)) = (parsed.iter().min(), parsed.iter().max()) {
        result.time_range = Some(TimeRange {
            earliest: earliest.format(TIMESTAMP_FORMAT).to_string(),
            latest: latest.format(TIMESTAMP_FORMAT).to_string(),
            span_days: (*latest - *earliest).num_days(),
        });
    }

    if !result.future_timestamps.is_empty() {
        result.anomalies.push(Anomaly {
            kind: AnomalyKind::FutureTimestamps,
            count: Some(result.future_timestamps.len()),
            span_days: None,
            description: "Timestamps lie in the future; the source clock may be misconfigured or this is test data"
                .to_string(),
        });
    }

    if !result.invalid_timestamps.is_empty() {
        result.anomalies.push(Anomaly {
            kind: AnomalyKind::InvalidFormat,
            count: Some(result.invalid_timestamps.len()),
            span_days: None,
            description: "Timestamps could not be parsed as YYYY-MM-DD HH:MM:SS".to_string(),
        });
    }

    if let Some(span) = result.time_range.as_ref().map(|r| r.span_days) {
        if span > MAX_EXPECTED_SPAN_DAYS {
            result.anomalies.push(Anomaly {
                kind: AnomalyKind::LargeTimeSpan,
                count: None,
                span_days: Some(span),
                description: "Timestamps span more than a year; confirm the data range is intended"
                    .to_string(),
            });
        }
    }

    result
}

/// Render a validation result (as JSON) into a plain-text report.
pub fn format_time_analysis(analysis_data: &str) -> Result<String, TimeToolError> {
    let data: TimestampValidation = serde_json::from_str(analysis_data)?;
    Ok(render_validation_report(&data))
}

pub fn render_validation_report(data: &TimestampValidation) -> String {
    let mut report = vec![
        "Timestamp Validation Report".to_string(),
        "=".repeat(30),
    ];

    let current = if data.current_time.is_empty() {
        "N/A"
    } else {
        data.current_time.as_str()
    };
    report.push(format!("Current time: {}", current));
    report.push(format!("Total timestamps: {}", data.total_timestamps));

    if let Some(ref range) = data.time_range {
        report.push(format!("Time range: {} to {}", range.earliest, range.latest));
        report.push(format!("Span: {} days", range.span_days));
    }

    if !data.anomalies.is_empty() {
        report.push("\nAnomalies:".to_string());
        for anomaly in &data.anomalies {
            report.push(format!("• {}", anomaly.description));
            if let Some(count) = anomaly.count {
                report.push(format!("  Affected: {}", count));
            }
        }
    }

    if !data.future_timestamps.is_empty() {
        report.push("\nFuture timestamps:".to_string());
        for future in data.future_timestamps.iter().take(REPORT_FUTURE_LIMIT) {
            report.push(format!(
                "• {} ({} days in the future)",
                future.timestamp, future.days_in_future
            ));
        }
    }

    report.push("\nRecommended actions:".to_string());
    if !data.future_timestamps.is_empty() {
        report.push("• Check the system clock configuration".to_string());
        report.push("• Confirm whether the records are test data".to_string());
        report.push("• Verify time synchronization of the data source".to_string());
    }
    if !data.invalid_timestamps.is_empty() {
        report.push("• Standardize the timestamp format".to_string());
        report.push("• Review the log collection pipeline".to_string());
    }
    if data.future_timestamps.is_empty() && data.invalid_timestamps.is_empty() {
        report.push("• No action needed".to_string());
    }

    report.join("\n")
}

/// Suggest query windows anchored at today's UTC midnight.
pub fn time_filter_suggestion(time_range_days: u32) -> Result<TimeFilterSuggestion, TimeToolError> {
    time_filter_suggestion_at(time_range_days, Utc::now())
}

pub fn time_filter_suggestion_at(
    time_range_days: u32,
    now: DateTime<Utc>,
) -> Result<TimeFilterSuggestion, TimeToolError> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    let end = now.format(TIMESTAMP_FORMAT).to_string();

    let window = |days: u32, description: String| -> Result<TimeWindow, TimeToolError> {
        let start = midnight
            .checked_sub_signed(Duration::days(i64::from(days)))
            .ok_or(TimeToolError::WindowOutOfRange(days))?;
        Ok(TimeWindow {
            start: start.format(TIMESTAMP_FORMAT).to_string(),
            end: end.clone(),
            description,
        })
    };

    Ok(TimeFilterSuggestion {
        current_time: display_now(now),
        today: window(0, "Today".to_string())?,
        last_7_days: window(7, "Last 7 days".to_string())?,
        last_30_days: window(30, "Last 30 days".to_string())?,
        custom_range: window(time_range_days, format!("Last {} days", time_range_days))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 16, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_future_and_invalid_timestamps() {
        let result = validate_log_timestamps_at("2099-01-01 00:00:00,not-a-date", fixed_now());

        assert_eq!(result.total_timestamps, 2);
        assert_eq!(result.future_timestamps.len(), 1);
        assert!(result.future_timestamps[0].days_in_future > 0);
        assert_eq!(result.invalid_timestamps, vec!["not-a-date"]);

        let kinds: Vec<_> = result.anomalies.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AnomalyKind::FutureTimestamps, AnomalyKind::InvalidFormat]);
    }

    #[test]
    fn test_past_timestamps_and_range() {
        let result = validate_log_timestamps_at(
            "2025-02-13 02:42:16, 2025-07-15 23:26:11",
            fixed_now(),
        );

        assert_eq!(result.past_timestamps.len(), 2);
        assert!(result.anomalies.is_empty());
        let range = result.time_range.unwrap();
        assert_eq!(range.earliest, "2025-02-13 02:42:16");
        assert_eq!(range.latest, "2025-07-15 23:26:11");
        assert_eq!(range.span_days, 152);
        assert_eq!(result.current_time, "2025-07-16 09:30:00 UTC");
    }

    #[test]
    fn test_large_time_span_is_flagged() {
        let result =
            validate_log_timestamps_at("2020-01-01 00:00:00,2025-01-01 00:00:00", fixed_now());

        let anomaly = result
            .anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::LargeTimeSpan)
            .unwrap();
        assert_eq!(anomaly.span_days, Some(1827));
    }

    #[test]
    fn test_serialized_anomaly_types() {
        let result = validate_log_timestamps_at("2099-01-01 00:00:00,bad", fixed_now());
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["anomalies"][0]["type"], "future_timestamps");
        assert_eq!(json["anomalies"][1]["type"], "invalid_format");
        assert!(json["anomalies"][0].get("span_days").is_none());
    }

    #[test]
    fn test_format_time_analysis_report() {
        let result = validate_log_timestamps_at("2099-01-01 00:00:00,bad", fixed_now());
        let json = serde_json::to_string(&result).unwrap();

        let report = format_time_analysis(&json).unwrap();
        assert!(report.starts_with("Timestamp Validation Report"));
        assert!(report.contains("Total timestamps: 2"));
        assert!(report.contains("Affected: 1"));
        assert!(report.contains("• 2099-01-01 00:00:00 ("));
        assert!(report.contains("• Check the system clock configuration"));
        assert!(report.contains("• Standardize the timestamp format"));
    }

    #[test]
    fn test_format_time_analysis_tolerates_partial_data() {
        let report = format_time_analysis(r#"{"total_timestamps": 3}"#).unwrap();
        assert!(report.contains("Current time: N/A"));
        assert!(report.contains("• No action needed"));

        assert!(format_time_analysis("not json").is_err());
    }

    #[test]
    fn test_time_filter_suggestion() {
        let suggestion = time_filter_suggestion_at(14, fixed_now()).unwrap();

        assert_eq!(suggestion.today.start, "2025-07-16 00:00:00");
        assert_eq!(suggestion.today.end, "2025-07-16 09:30:00");
        assert_eq!(suggestion.last_7_days.start, "2025-07-09 00:00:00");
        assert_eq!(suggestion.last_30_days.start, "2025-06-16 00:00:00");
        assert_eq!(suggestion.custom_range.start, "2025-07-02 00:00:00");
        assert_eq!(suggestion.custom_range.description, "Last 14 days");
    }

    #[test]
    fn test_time_filter_suggestion_out_of_range() {
        assert!(matches!(
            time_filter_suggestion_at(u32::MAX, fixed_now()),
            Err(TimeToolError::WindowOutOfRange(_))
        ));
    }
}
