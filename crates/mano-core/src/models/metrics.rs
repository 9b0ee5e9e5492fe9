use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Figures behind the dashboard overview panel (`GET /api/dashboard/metrics`).
///
/// Every field is optional on the wire; fields the client does not model
/// are retained in `extra` so front-ends can still show them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    #[serde(default)]
    pub active_deals: u64,
    #[serde(default)]
    pub pending_reminders: u64,
    #[serde(default)]
    pub new_this_week: u64,
    /// Deal counts per pipeline stage, in stage order
    #[serde(default)]
    pub pipeline_data: Vec<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DashboardMetrics {
    /// Total deals across all pipeline stages
    pub fn pipeline_total(&self) -> u64 {
        self.pipeline_data.iter().sum()
    }
}

/// A metrics payload stamped with the time it was fetched.
/// Snapshots are never reused; every fetch produces a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub metrics: DashboardMetrics,
    pub fetched_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    pub fn new(metrics: DashboardMetrics) -> Self {
        Self {
            metrics,
            fetched_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.fetched_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}
