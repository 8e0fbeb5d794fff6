use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resources a job declares at creation time.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequiredResources {
    /// CPU cores per task.
    #[serde(alias = "numCpus")]
    pub cpu_count: u32,
    /// GPUs per task.
    #[serde(alias = "numGpus")]
    pub gpu_count: u32,
    /// Memory per task in GB.
    pub memory_gb: f64,
    /// Wall-clock limit in seconds.
    #[serde(alias = "timeSec")]
    pub time_limit_sec: f64,
}

impl RequiredResources {
    pub fn needs_gpu(&self) -> bool {
        self.gpu_count > 0
    }

    /// How many tasks of this shape fit on one node of `node_cpu_capacity` cpus.
    /// Never less than one.
    pub fn tasks_per_node(&self, node_cpu_capacity: u32) -> usize {
        if self.cpu_count == 0 {
            return node_cpu_capacity.max(1) as usize;
        }
        ((node_cpu_capacity / self.cpu_count) as usize).max(1)
    }

    /// Memory per cpu in MB, floored.
    pub fn memory_per_cpu_mb(&self) -> u64 {
        let cpus = self.cpu_count.max(1) as f64;
        (self.memory_gb * 1024.0 / cpus).floor().max(0.0) as u64
    }

    /// Wall-clock limit, `None` when the declared limit is not positive.
    pub fn time_limit(&self) -> Option<Duration> {
        if self.time_limit_sec.is_finite() && self.time_limit_sec > 0.0 {
            Some(Duration::from_secs_f64(self.time_limit_sec))
        } else {
            None
        }
    }
}
