use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Append-only audit log entry. Primary purpose: post-hoc inspection and
/// initial snapshot rehydration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: String,
    pub event_type: String,
    pub metadata: Value,
    pub occurred_at: DateTime<Utc>,
}

impl RunEvent {
    pub fn new(run_id: impl Into<String>, event_type: impl Into<String>, metadata: Value) -> Self {
        Self {
            run_id: run_id.into(),
            event_type: event_type.into(),
            metadata,
            occurred_at: Utc::now(),
        }
    }

    /// The `to_status` carried by a `status_changed` event, if this is one.
    pub fn status_changed_to(&self) -> Option<&str> {
        if self.event_type != "status_changed" {
            return None;
        }
        self.metadata.get("to_status").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub conversation_id: String,
    pub run_id: Option<String>,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub cached_input_tokens: i64,
    pub output_tokens: i64,
    pub created_at: DateTime<Utc>,
}

/// Emitted once per pod after termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodBillingRecord {
    pub run_id: String,
    pub amount_usd: Decimal,
    pub time_billed_ms: i64,
    pub records: Value,
    pub context: String,
    pub occurred_at: DateTime<Utc>,
}

/// Supplemental (§3.1): raw disk-usage observation from an `hw-stats`
/// payload, kept distinct from the `low_disk_space` [`RunEvent`] derived
/// from it once the low-free-disk threshold is crossed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskUsageEvent {
    pub run_id: String,
    pub used_bytes: i64,
    pub total_bytes: i64,
    pub partition: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Bytes of free space below which a `low_disk_space` event is raised.
pub const LOW_FREE_DISK_THRESHOLD_BYTES: i64 = 50 * 1024 * 1024 * 1024;

impl DiskUsageEvent {
    pub fn free_bytes(&self) -> i64 {
        self.total_bytes - self.used_bytes
    }

    pub fn is_low_disk(&self) -> bool {
        self.free_bytes() < LOW_FREE_DISK_THRESHOLD_BYTES
    }
}

/// Supplemental (§3.1): the raw webhook payload for a `gpu-shortage`
/// notification, distinct from the `gpu_shortage_retry` [`RunEvent`] the
/// retry policy appends once it acts on this signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuShortageEvent {
    pub run_id: String,
    pub requested_gpu_type: Option<String>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Supplemental (§3.1): an in-flight, best-effort billing snapshot,
/// independent of whether the pod has actually been deleted yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodBillingSummary {
    pub run_id: String,
    pub amount_usd: Decimal,
    pub time_billed_ms: i64,
    pub observed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn low_disk_threshold_is_crossed_only_below_50gib() {
        let event = DiskUsageEvent {
            run_id: "rp-0000000000".into(),
            used_bytes: 900 * 1024 * 1024 * 1024,
            total_bytes: 940 * 1024 * 1024 * 1024,
            partition: Some("/".into()),
            occurred_at: Utc::now(),
        };
        assert!(event.is_low_disk());

        let healthy = DiskUsageEvent {
            used_bytes: 100 * 1024 * 1024 * 1024,
            ..event
        };
        assert!(!healthy.is_low_disk());
    }

    #[test]
    fn status_changed_to_reads_terminal_target() {
        let event = RunEvent::new("rp-0000000000", "status_changed", json!({"to_status": "completed"}));
        assert_eq!(event.status_changed_to(), Some("completed"));

        let other = RunEvent::new("rp-0000000000", "heartbeat", json!({}));
        assert_eq!(other.status_changed_to(), None);
    }
}
