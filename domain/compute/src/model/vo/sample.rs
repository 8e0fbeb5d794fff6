use serde::{Deserialize, Serialize};

/// One resource-utilization sample, written as a JSON line.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSample {
    /// Seconds since the epoch.
    pub timestamp: f64,
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub network_sent_bytes: u64,
    pub network_received_bytes: u64,
    /// Absent when no GPU data could be collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpus: Option<Vec<GpuLoad>>,
}

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GpuLoad {
    pub index: u32,
    pub load_percent: f64,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
}
