use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One point-in-time usage measurement as reported by the usage probe.
///
/// Every field is optional: the probe contract only promises a JSON object,
/// and the cache record fills in defaults for anything missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    #[serde(default, deserialize_with = "lenient_number")]
    pub token_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub token_limit: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub remaining_tokens: Option<f64>,
    #[serde(default)]
    pub tokens: Option<Value>,
    #[serde(default)]
    pub model_breakdown: Option<Value>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub message_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub message_count: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub message_limit: Option<f64>,
    #[serde(default)]
    pub legacy: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub plan: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub window_start: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub window_end: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub window_hours: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub time_until_reset: Option<f64>,
    #[serde(default)]
    pub reset_status: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub error: Option<String>,
    /// When the daemon obtained this snapshot. Not part of the probe output.
    #[serde(skip, default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
}

/// Numbers may arrive as JSON numbers or numeric strings. Anything else reads
/// as absent so one odd field cannot discard the rest of the snapshot.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

impl UsageSnapshot {
    /// A snapshot with every quantitative field zeroed and `error` set.
    pub fn degraded(error: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            token_percent: Some(0.0),
            token_limit: Some(0.0),
            remaining_tokens: Some(0.0),
            message_percent: Some(0.0),
            message_count: Some(0.0),
            message_limit: Some(0.0),
            time_until_reset: Some(0.0),
            error: Some(error.into()),
            fetched_at,
            ..Default::default()
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// The persisted form of the latest snapshot.
///
/// Deserialization is lenient so that readers (including `status`) accept
/// both the full record and the minimal degraded shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheRecord {
    pub timestamp: DateTime<Utc>,
    pub token_percent: f64,
    pub token_limit: f64,
    pub remaining_tokens: f64,
    pub tokens: Option<Value>,
    pub model_breakdown: Option<Value>,
    pub message_percent: f64,
    pub legacy: Option<Value>,
    pub plan: String,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
    pub window_hours: f64,
    pub time_until_reset: f64,
    pub reset_status: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub const DEFAULT_PLAN: &str = "pro";
pub const DEFAULT_WINDOW_HOURS: f64 = 5.0;

impl Default for CacheRecord {
    fn default() -> Self {
        Self {
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            token_percent: 0.0,
            token_limit: 0.0,
            remaining_tokens: 0.0,
            tokens: None,
            model_breakdown: None,
            message_percent: 0.0,
            legacy: None,
            plan: DEFAULT_PLAN.to_string(),
            window_start: None,
            window_end: None,
            window_hours: DEFAULT_WINDOW_HOURS,
            time_until_reset: 0.0,
            reset_status: None,
            error: None,
        }
    }
}

// Zero, NaN and missing values all fall back to the default.
fn number_or(value: Option<f64>, default: f64) -> f64 {
    value
        .filter(|n| n.is_finite() && *n != 0.0)
        .unwrap_or(default)
}

fn non_null(value: &Option<Value>) -> Option<Value> {
    value.clone().filter(|v| !v.is_null())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|s| !s.is_empty())
}

impl CacheRecord {
    /// Compose a record from a snapshot, filling defaults for absent fields.
    pub fn from_snapshot(snapshot: &UsageSnapshot) -> Self {
        Self {
            timestamp: snapshot.fetched_at,
            token_percent: number_or(snapshot.token_percent, 0.0),
            token_limit: number_or(snapshot.token_limit, 0.0),
            remaining_tokens: number_or(snapshot.remaining_tokens, 0.0),
            tokens: non_null(&snapshot.tokens),
            model_breakdown: non_null(&snapshot.model_breakdown),
            message_percent: number_or(snapshot.message_percent, 0.0),
            legacy: non_null(&snapshot.legacy),
            plan: non_empty(&snapshot.plan).unwrap_or_else(|| DEFAULT_PLAN.to_string()),
            window_start: non_empty(&snapshot.window_start),
            window_end: non_empty(&snapshot.window_end),
            window_hours: number_or(snapshot.window_hours, DEFAULT_WINDOW_HOURS),
            time_until_reset: number_or(snapshot.time_until_reset, 0.0),
            reset_status: non_null(&snapshot.reset_status),
            error: non_empty(&snapshot.error),
        }
    }

    /// Weighted token total reported under `tokens.weighted.total`, if any.
    pub fn weighted_tokens(&self) -> f64 {
        self.tokens
            .as_ref()
            .and_then(|t| t.pointer("/weighted/total"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    /// One-line summary used in the log and by `status`.
    pub fn summary(&self) -> String {
        let reset_minutes = (self.time_until_reset / 60.0).floor() as i64;
        let used_k = (self.weighted_tokens() / 1000.0).round() as i64;
        let limit_k = (self.token_limit / 1000.0).round() as i64;
        format!(
            "{}% ({}K/{}K tokens, reset in {}m)",
            self.token_percent, used_k, limit_k, reset_minutes
        )
    }
}

/// Fallback record written when the full record cannot be persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DegradedRecord {
    pub timestamp: DateTime<Utc>,
    pub token_percent: f64,
    pub token_limit: f64,
    pub message_percent: f64,
    pub error: String,
}

impl DegradedRecord {
    pub fn new(timestamp: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            timestamp,
            token_percent: 0.0,
            token_limit: 0.0,
            message_percent: 0.0,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_parses_probe_output() {
        let json = r#"{
            "tokenPercent": 82,
            "tokenLimit": 19000000,
            "remainingTokens": 3420000,
            "tokens": {"weighted": {"total": 15580000}},
            "plan": "max-100",
            "windowStart": "2026-10-17T09:00:00+00:00",
            "timeUntilReset": 5400,
            "somethingNew": true
        }"#;
        let snapshot: UsageSnapshot = serde_json::from_str(json).expect("parse");
        assert_eq!(snapshot.token_percent, Some(82.0));
        assert_eq!(snapshot.token_limit, Some(19_000_000.0));
        assert_eq!(snapshot.plan.as_deref(), Some("max-100"));
        assert!(snapshot.window_end.is_none());
        assert!(!snapshot.is_degraded());
    }

    #[test]
    fn test_snapshot_accepts_null_fields() {
        let json = r#"{"tokenPercent": null, "plan": null, "resetStatus": null}"#;
        let snapshot: UsageSnapshot = serde_json::from_str(json).expect("parse");
        assert!(snapshot.token_percent.is_none());
        assert!(snapshot.plan.is_none());
        assert!(snapshot.reset_status.is_none());
    }

    #[test]
    fn test_snapshot_tolerates_mistyped_fields() {
        let json = r#"{"tokenPercent": 82, "plan": 200, "windowHours": "5", "tokenLimit": [1], "windowEnd": false}"#;
        let snapshot: UsageSnapshot = serde_json::from_str(json).expect("parse");
        assert_eq!(snapshot.token_percent, Some(82.0));
        assert!(snapshot.plan.is_none());
        assert_eq!(snapshot.window_hours, Some(5.0));
        assert!(snapshot.token_limit.is_none());
        assert!(snapshot.window_end.is_none());

        let record = CacheRecord::from_snapshot(&snapshot);
        assert_eq!(record.token_percent, 82.0);
        assert_eq!(record.plan, "pro");
    }

    #[test]
    fn test_snapshot_reads_numeric_strings() {
        let json = r#"{"tokenPercent": " 82.5 ", "timeUntilReset": "lots"}"#;
        let snapshot: UsageSnapshot = serde_json::from_str(json).expect("parse");
        assert_eq!(snapshot.token_percent, Some(82.5));
        assert!(snapshot.time_until_reset.is_none());
    }

    #[test]
    fn test_degraded_snapshot_zeroes_quantities() {
        let snapshot = UsageSnapshot::degraded("probe timed out", Utc::now());
        assert_eq!(snapshot.token_percent, Some(0.0));
        assert_eq!(snapshot.token_limit, Some(0.0));
        assert_eq!(snapshot.remaining_tokens, Some(0.0));
        assert_eq!(snapshot.message_percent, Some(0.0));
        assert_eq!(snapshot.time_until_reset, Some(0.0));
        assert_eq!(snapshot.error.as_deref(), Some("probe timed out"));
        assert!(snapshot.is_degraded());
    }

    #[test]
    fn test_record_fills_defaults() {
        let snapshot = UsageSnapshot::default();
        let record = CacheRecord::from_snapshot(&snapshot);
        assert_eq!(record.token_percent, 0.0);
        assert_eq!(record.plan, "pro");
        assert_eq!(record.window_hours, 5.0);
        assert!(record.tokens.is_none());
        assert!(record.error.is_none());

        let value = serde_json::to_value(&record).expect("serialize");
        assert!(value.get("timestamp").is_some());
        assert_eq!(value["plan"], json!("pro"));
        assert_eq!(value["windowStart"], Value::Null);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_record_keeps_reported_values() {
        let snapshot = UsageSnapshot {
            token_percent: Some(45.5),
            token_limit: Some(19_000_000.0),
            plan: Some("max-200".to_string()),
            window_hours: Some(0.0),
            tokens: Some(json!({"weighted": {"total": 8_550_000}})),
            ..Default::default()
        };
        let record = CacheRecord::from_snapshot(&snapshot);
        assert_eq!(record.token_percent, 45.5);
        assert_eq!(record.plan, "max-200");
        // zero window length falls back to the default
        assert_eq!(record.window_hours, 5.0);
        assert_eq!(record.weighted_tokens(), 8_550_000.0);
    }

    #[test]
    fn test_record_replaces_non_finite_numbers() {
        let snapshot = UsageSnapshot {
            token_percent: Some(f64::NAN),
            time_until_reset: Some(f64::INFINITY),
            ..Default::default()
        };
        let record = CacheRecord::from_snapshot(&snapshot);
        assert_eq!(record.token_percent, 0.0);
        assert_eq!(record.time_until_reset, 0.0);
    }

    #[test]
    fn test_record_carries_error() {
        let snapshot = UsageSnapshot::degraded("Log directory not found", Utc::now());
        let record = CacheRecord::from_snapshot(&snapshot);
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["error"], json!("Log directory not found"));
        assert_eq!(value["tokenPercent"], json!(0.0));
    }

    #[test]
    fn test_record_summary() {
        let record = CacheRecord {
            token_percent: 82.0,
            token_limit: 19_000_000.0,
            tokens: Some(json!({"weighted": {"total": 15_580_000}})),
            time_until_reset: 5430.0,
            ..Default::default()
        };
        assert_eq!(record.summary(), "82% (15580K/19000K tokens, reset in 90m)");
    }

    #[test]
    fn test_record_reads_degraded_shape() {
        let degraded = DegradedRecord::new(Utc::now(), "disk full");
        let json = serde_json::to_string(&degraded).expect("serialize");
        let record: CacheRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(record.error.as_deref(), Some("disk full"));
        assert_eq!(record.plan, "pro");
        assert_eq!(record.token_percent, 0.0);
    }
}
