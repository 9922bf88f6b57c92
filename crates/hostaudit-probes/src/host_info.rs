//! Host hardware and OS facts via sysinfo.

use std::path::Path;

use async_trait::async_trait;
use hostaudit_core::{Probe, ProbeError, ProbeResult, Recommendation, ResultBuilder};
use serde::Serialize;
use sysinfo::{Disks, System};
use tracing::info;

use crate::narration::{finish, Narration};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Limits {
    /// Percent of memory in use above which memory is flagged.
    pub memory_usage: f64,
    /// Percent of a disk in use above which it is flagged.
    pub disk_usage: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            memory_usage: 90.0,
            disk_usage: 85.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemFacts {
    pub os: String,
    pub os_version: String,
    pub kernel: String,
    pub architecture: String,
    pub hostname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuFacts {
    pub model: String,
    pub count: usize,
    pub load_1: f64,
    pub load_5: f64,
    pub load_15: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryFacts {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub usage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskFacts {
    pub name: String,
    pub mount_point: String,
    pub file_system: String,
    pub total: u64,
    pub free: u64,
    pub usage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostFacts {
    pub system: SystemFacts,
    pub cpu: CpuFacts,
    pub memory: MemoryFacts,
    pub disks: Vec<DiskFacts>,
    pub path: Vec<String>,
    pub limits: Limits,
}

pub struct HostInfoProbe {
    limits: Limits,
}

impl HostInfoProbe {
    pub fn new() -> Self {
        Self {
            limits: Limits::default(),
        }
    }
}

impl Default for HostInfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for HostInfoProbe {
    fn name(&self) -> &str {
        "host_info"
    }

    fn description(&self) -> &str {
        "OS, CPU, memory and disk usage"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let limits = self.limits;
        let facts = tokio::task::spawn_blocking(move || gather(limits))
            .await
            .map_err(|e| ProbeError::Other(format!("telemetry task failed: {}", e)))?;
        info!(
            probe = "host_info",
            cpus = facts.cpu.count,
            disks = facts.disks.len(),
            "Collected host facts"
        );

        let actions = remediation(&facts);
        let builder = ResultBuilder::new(self.name(), id_offset, log_path);
        Ok(finish(
            builder,
            serde_json::to_value(&facts)?,
            actions,
            Narration::new(
                "Initiating system information gathering.",
                "System has been analyzed.",
                &["system", "status"],
            ),
        ))
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    ((part as f64 / whole as f64) * 1000.0).round() / 10.0
}

fn gather(limits: Limits) -> HostFacts {
    let mut sys = System::new_all();
    sys.refresh_all();

    let load = System::load_average();
    let total = sys.total_memory();
    let used = sys.used_memory();

    let disks = Disks::new_with_refreshed_list()
        .iter()
        .map(|disk| {
            let total = disk.total_space();
            let free = disk.available_space();
            DiskFacts {
                name: disk.name().to_string_lossy().to_string(),
                mount_point: disk.mount_point().to_string_lossy().to_string(),
                file_system: disk.file_system().to_string_lossy().to_string(),
                total,
                free,
                usage: percent(total.saturating_sub(free), total),
            }
        })
        .collect();

    HostFacts {
        system: SystemFacts {
            os: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            os_version: System::os_version().unwrap_or_default(),
            kernel: System::kernel_version().unwrap_or_default(),
            architecture: std::env::consts::ARCH.to_string(),
            hostname: System::host_name().unwrap_or_default(),
        },
        cpu: CpuFacts {
            model: sys.cpus().first().map(|c| c.brand().trim().to_string()).unwrap_or_default(),
            count: sys.cpus().len(),
            load_1: load.one,
            load_5: load.five,
            load_15: load.fifteen,
        },
        memory: MemoryFacts {
            total,
            used,
            available: sys.available_memory(),
            usage: percent(used, total),
        },
        disks,
        path: path_entries(&std::env::var("PATH").unwrap_or_default()),
        limits,
    }
}

/// PATH entries, first occurrence wins.
fn path_entries(path: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for entry in path.split(':').filter(|e| !e.is_empty()) {
        if !seen.iter().any(|s: &String| s == entry) {
            seen.push(entry.to_string());
        }
    }
    seen
}

pub fn remediation(facts: &HostFacts) -> Vec<Recommendation> {
    let mut tasks = Vec::new();

    if facts.cpu.count > 0 && facts.cpu.load_1 > facts.cpu.count as f64 {
        tasks.push(
            Recommendation::new(
                "investigate_high_load",
                "Investigate and resolve high system load",
                format!(
                    "Current system load ({:.2}) exceeds CPU count ({})",
                    facts.cpu.load_1, facts.cpu.count
                ),
            )
            .with_tags(&["system", "cpu"]),
        );
    }

    if facts.memory.usage > facts.limits.memory_usage {
        tasks.push(
            Recommendation::new(
                "free_memory",
                "Free up memory or add more RAM",
                format!("Memory usage is high at {}%", facts.memory.usage),
            )
            .with_tags(&["system", "memory"]),
        );
    }

    for disk in facts.disks.iter().filter(|d| d.usage > facts.limits.disk_usage) {
        tasks.push(
            Recommendation::new(
                "clear_disk_space",
                "Clear disk space or expand storage",
                format!("Disk usage on {} is high at {}%", disk.mount_point, disk.usage),
            )
            .with_tags(&["system", "disk"])
            .with_target(disk.mount_point.clone()),
        );
    }

    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> HostFacts {
        HostFacts {
            system: SystemFacts {
                os: "Ubuntu".to_string(),
                os_version: "22.04".to_string(),
                kernel: "6.5.0".to_string(),
                architecture: "x86_64".to_string(),
                hostname: "lab".to_string(),
            },
            cpu: CpuFacts {
                model: "AMD EPYC".to_string(),
                count: 4,
                load_1: 1.5,
                load_5: 1.0,
                load_15: 0.5,
            },
            memory: MemoryFacts {
                total: 1000,
                used: 500,
                available: 500,
                usage: 50.0,
            },
            disks: vec![DiskFacts {
                name: "/dev/sda1".to_string(),
                mount_point: "/".to_string(),
                file_system: "ext4".to_string(),
                total: 100,
                free: 40,
                usage: 60.0,
            }],
            path: vec!["/usr/bin".to_string()],
            limits: Limits::default(),
        }
    }

    #[test]
    fn healthy_host_needs_nothing() {
        assert!(remediation(&facts()).is_empty());
    }

    #[test]
    fn thresholds_trigger_tasks() {
        let mut f = facts();
        f.cpu.load_1 = 6.0;
        f.memory.usage = 95.5;
        f.disks.push(DiskFacts {
            name: "/dev/sdb1".to_string(),
            mount_point: "/data".to_string(),
            file_system: "xfs".to_string(),
            total: 100,
            free: 10,
            usage: 90.0,
        });
        let actions: Vec<String> = remediation(&f).into_iter().map(|t| t.action).collect();
        assert_eq!(actions, vec!["investigate_high_load", "free_memory", "clear_disk_space"]);
    }

    #[test]
    fn percent_rounds_to_one_decimal() {
        assert_eq!(percent(1, 3), 33.3);
        assert_eq!(percent(5, 0), 0.0);
    }

    #[test]
    fn path_entries_are_deduplicated() {
        assert_eq!(
            path_entries("/usr/bin:/bin::/usr/bin:/sbin"),
            vec!["/usr/bin", "/bin", "/sbin"]
        );
    }
}
