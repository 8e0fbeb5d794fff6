use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use domain_compute::{
    model::vo::{GpuLoad, ResourceSample},
    service::SystemSampler,
};
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

/// Host-wide counters from procfs plus `nvidia-smi`.
pub struct ProcSystemSampler {
    proc_root: PathBuf,
    /// Cpu counters of the previous sample.
    previous: Mutex<Option<CpuTimes>>,
    query_gpus: bool,
}

impl Default for ProcSystemSampler {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            previous: Mutex::new(None),
            query_gpus: true,
        }
    }
}

impl ProcSystemSampler {
    pub fn with_proc_root(proc_root: impl Into<PathBuf>, query_gpus: bool) -> Self {
        Self {
            proc_root: proc_root.into(),
            previous: Mutex::new(None),
            query_gpus,
        }
    }

    async fn read(&self, name: &str) -> anyhow::Result<String> {
        let path = self.proc_root.join(name);
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Unable to read {}", path.display()))
    }

    async fn cpu_percent(&self) -> anyhow::Result<f64> {
        let current = parse_cpu_times(&self.read("stat").await?)?;
        let mut previous = self.previous.lock().await;
        // The first sample covers the time since boot.
        let baseline = previous.replace(current).unwrap_or_default();
        let total = current.total.saturating_sub(baseline.total);
        let idle = current.idle.saturating_sub(baseline.idle);
        if total == 0 {
            return Ok(0.0);
        }
        Ok(100.0 * (total - idle.min(total)) as f64 / total as f64)
    }
}

#[async_trait]
impl SystemSampler for ProcSystemSampler {
    async fn sample(&self) -> anyhow::Result<ResourceSample> {
        let cpu_percent = self.cpu_percent().await?;
        let (memory_total_bytes, memory_used_bytes) = parse_meminfo(&self.read("meminfo").await?)?;
        let (disk_read_bytes, disk_write_bytes) = parse_diskstats(&self.read("diskstats").await?);
        let (network_received_bytes, network_sent_bytes) =
            parse_net_dev(&self.read("net/dev").await?);
        let gpus = if self.query_gpus {
            query_gpus().await
        } else {
            None
        };
        Ok(ResourceSample {
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            cpu_percent,
            memory_used_bytes,
            memory_total_bytes,
            disk_read_bytes,
            disk_write_bytes,
            network_sent_bytes,
            network_received_bytes,
            gpus,
        })
    }
}

/// Aggregate `cpu` line of `/proc/stat`; iowait counts as idle.
fn parse_cpu_times(stat: &str) -> anyhow::Result<CpuTimes> {
    let line = stat
        .lines()
        .find(|line| line.starts_with("cpu "))
        .context("No aggregate cpu line")?;
    let fields = line
        .split_whitespace()
        .skip(1)
        .map(str::parse::<u64>)
        .collect::<Result<Vec<_>, _>>()?;
    if fields.len() < 4 {
        anyhow::bail!("Short cpu line: {line}");
    }
    // user nice system idle iowait irq softirq steal; guest time is already
    // part of user.
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total = fields.iter().take(8).sum();
    Ok(CpuTimes { idle, total })
}

/// `(total, used)` in bytes.
fn parse_meminfo(meminfo: &str) -> anyhow::Result<(u64, u64)> {
    let value = |key: &str| -> Option<u64> {
        meminfo
            .lines()
            .find_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next()?.parse::<u64>().ok())
            .map(|kib| kib * 1024)
    };
    let total = value("MemTotal").context("MemTotal missing")?;
    let available = value("MemAvailable")
        .or_else(|| value("MemFree"))
        .context("MemAvailable missing")?;
    Ok((total, total.saturating_sub(available)))
}

/// `(read, written)` bytes of whole disks. Partitions are skipped when their
/// disk is listed, loop and ram devices always.
fn parse_diskstats(diskstats: &str) -> (u64, u64) {
    let rows: Vec<(&str, u64, u64)> = diskstats
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let name = *fields.get(2)?;
            let read = fields.get(5)?.parse::<u64>().ok()?;
            let written = fields.get(9)?.parse::<u64>().ok()?;
            Some((name, read, written))
        })
        .filter(|(name, _, _)| !name.starts_with("loop") && !name.starts_with("ram"))
        .collect();
    let names: HashSet<&str> = rows.iter().map(|(name, _, _)| *name).collect();
    let is_partition = |name: &str| {
        let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
        if base.len() == name.len() {
            return false;
        }
        names.contains(base) || base.strip_suffix('p').is_some_and(|disk| names.contains(disk))
    };
    rows.iter()
        .filter(|(name, _, _)| !is_partition(name))
        .fold((0, 0), |(read, written), (_, sectors_read, sectors_written)| {
            (read + sectors_read * 512, written + sectors_written * 512)
        })
}

/// `(received, sent)` bytes over every interface but loopback.
fn parse_net_dev(net_dev: &str) -> (u64, u64) {
    net_dev
        .lines()
        .filter_map(|line| {
            let (name, counters) = line.split_once(':')?;
            if name.trim() == "lo" {
                return None;
            }
            let fields: Vec<&str> = counters.split_whitespace().collect();
            let received = fields.first()?.parse::<u64>().ok()?;
            let sent = fields.get(8)?.parse::<u64>().ok()?;
            Some((received, sent))
        })
        .fold((0, 0), |(rx, tx), (received, sent)| (rx + received, tx + sent))
}

#[derive(Deserialize)]
struct GpuRecord {
    index: u32,
    utilization: f64,
    memory_used: f64,
    memory_total: f64,
}

/// Any failure yields no GPU data.
async fn query_gpus() -> Option<Vec<GpuLoad>> {
    let out = Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,utilization.gpu,memory.used,memory.total",
            "--format=csv,noheader,nounits",
        ])
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;
    if !out.status.success() {
        debug!("nvidia-smi exited with {}", out.status);
        return None;
    }
    match parse_gpu_csv(&out.stdout) {
        Ok(gpus) => Some(gpus),
        Err(e) => {
            debug!("Unable to parse nvidia-smi output: {e:#}");
            None
        }
    }
}

fn parse_gpu_csv(output: &[u8]) -> anyhow::Result<Vec<GpuLoad>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(output);
    let mut gpus = Vec::new();
    for record in csv_reader.deserialize() {
        let record: GpuRecord = record?;
        gpus.push(GpuLoad {
            index: record.index,
            load_percent: record.utilization,
            memory_used_mb: record.memory_used,
            memory_total_mb: record.memory_total,
        });
    }
    Ok(gpus)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_cpu_times() {
        let times = parse_cpu_times(indoc! {"
            cpu  100 0 50 800 50 0 0 0 0 0
            cpu0 50 0 25 400 25 0 0 0 0 0
        "})
        .unwrap();
        assert_eq!(times, CpuTimes { idle: 850, total: 1000 });
        assert!(parse_cpu_times("intr 1 2 3").is_err());
    }

    #[test]
    fn test_meminfo() {
        let (total, used) = parse_meminfo(indoc! {"
            MemTotal:       16000 kB
            MemFree:         2000 kB
            MemAvailable:    6000 kB
        "})
        .unwrap();
        assert_eq!(total, 16000 * 1024);
        assert_eq!(used, 10000 * 1024);
    }

    #[test]
    fn test_diskstats_skip_partitions() {
        let (read, written) = parse_diskstats(indoc! {"
               8       0 sda 10 0 100 0 20 0 200 0 0 0 0
               8       1 sda1 5 0 60 0 10 0 150 0 0 0 0
             259       0 nvme0n1 1 0 10 0 1 0 20 0 0 0 0
             259       1 nvme0n1p1 1 0 10 0 1 0 20 0 0 0 0
               7       0 loop0 1 0 999 0 1 0 999 0 0 0 0
        "});
        assert_eq!(read, (100 + 10) * 512);
        assert_eq!(written, (200 + 20) * 512);
    }

    #[test]
    fn test_net_dev_skips_loopback() {
        let (received, sent) = parse_net_dev(indoc! {"
            Inter-|   Receive                                                |  Transmit
             face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
                lo: 5000 10 0 0 0 0 0 0 5000 10 0 0 0 0 0 0
              eth0: 1000 10 0 0 0 0 0 0 300 5 0 0 0 0 0 0
              eth1: 24 1 0 0 0 0 0 0 6 1 0 0 0 0 0 0
        "});
        assert_eq!(received, 1024);
        assert_eq!(sent, 306);
    }

    #[test]
    fn test_gpu_csv() {
        let gpus = parse_gpu_csv(b"0, 35, 1024, 16384\n1, 0, 0, 16384\n").unwrap();
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].load_percent, 35.0);
        assert_eq!(gpus[1].memory_total_mb, 16384.0);
        assert!(parse_gpu_csv(b"0, [N/A], 1, 2\n").is_err());
    }

    #[tokio::test]
    async fn test_sample_from_fake_procfs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("net")).unwrap();
        std::fs::write(dir.path().join("stat"), "cpu  100 0 0 100 0 0 0 0\n").unwrap();
        std::fs::write(
            dir.path().join("meminfo"),
            "MemTotal: 4 kB\nMemAvailable: 1 kB\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("diskstats"), "").unwrap();
        std::fs::write(dir.path().join("net/dev"), "").unwrap();

        let sampler = ProcSystemSampler::with_proc_root(dir.path(), false);
        let sample = sampler.sample().await.unwrap();
        assert_eq!(sample.cpu_percent, 50.0);
        assert_eq!(sample.memory_used_bytes, 3 * 1024);
        assert!(sample.gpus.is_none());

        // Second sample only sees the delta.
        std::fs::write(dir.path().join("stat"), "cpu  100 0 0 200 0 0 0 0\n").unwrap();
        assert_eq!(sampler.sample().await.unwrap().cpu_percent, 0.0);
    }
}
