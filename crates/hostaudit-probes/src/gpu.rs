//! GPU detection: NVIDIA (nvidia-smi, lspci fallback), AMD (lspci, amdgpu, ROCm)
//! and Intel (lspci, oneAPI).

use std::path::Path;

use async_trait::async_trait;
use hostaudit_core::{Probe, ProbeError, ProbeResult, Recommendation, ResultBuilder};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::command::{which, CommandRunner};
use crate::narration::{finish, Narration};

const NVIDIA_QUERY: &str = "--query-gpu=index,gpu_uuid,gpu_name,memory.total,power.max_limit,clocks.max.graphics,clocks.max.sm,clocks.max.memory,driver_version,pci.bus_id";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NvidiaGpu {
    pub index: String,
    pub uuid: String,
    pub model: String,
    pub memory_total: String,
    pub power_max_limit: String,
    pub power_cur_limit: Option<String>,
    pub clock_max_graphics: String,
    pub clock_max_sm: String,
    pub clock_max_memory: String,
    pub driver_version: String,
    pub pci_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpuFacts<T> {
    pub gpu_present: bool,
    pub gpus: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parse `nvidia-smi --query-gpu=... --format=csv,noheader` output.
pub fn parse_nvidia_csv(output: &str) -> Vec<NvidiaGpu> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let vals: Vec<&str> = line.split(',').map(str::trim).collect();
            if vals.len() < 10 {
                return None;
            }
            Some(NvidiaGpu {
                index: vals[0].to_string(),
                uuid: vals[1].to_string(),
                model: vals[2].to_string(),
                memory_total: vals[3].to_string(),
                power_max_limit: vals[4].to_string(),
                power_cur_limit: None,
                clock_max_graphics: vals[5].to_string(),
                clock_max_sm: vals[6].to_string(),
                clock_max_memory: vals[7].to_string(),
                driver_version: vals[8].to_string(),
                pci_id: Some(vals[9].to_string()),
            })
        })
        .collect()
}

/// `Current Power Limit : 250.00 W` from `nvidia-smi -q -d POWER`.
pub fn parse_power_limit(output: &str) -> Option<String> {
    let re = Regex::new(r"Current Power Limit\s*:\s*([\d.]+)\s*W").ok()?;
    re.captures(output).map(|c| format!("{} W", &c[1]))
}

/// Display-controller lines from `lspci` that mention `vendor`.
pub fn lspci_gpus<'a>(lspci: &'a str, vendor: &str) -> Vec<&'a str> {
    let vendor = vendor.to_ascii_lowercase();
    lspci
        .lines()
        .filter(|l| {
            let lower = l.to_ascii_lowercase();
            (lower.contains("vga") || lower.contains("3d controller") || lower.contains("display controller"))
                && lower.contains(&vendor)
        })
        .collect()
}

/// Model name after the controller class in an `lspci` line.
pub fn lspci_model(line: &str) -> String {
    let after_slot = line.split_once(' ').map_or(line, |(_, rest)| rest);
    after_slot
        .split_once(": ")
        .map_or(after_slot, |(_, model)| model)
        .trim()
        .to_string()
}

/// Runs `lspci`, treating a missing binary as "no devices".
async fn lspci(runner: &CommandRunner) -> Result<String, ProbeError> {
    match runner.stdout("lspci", &[]).await {
        Err(ProbeError::MissingDependency(_)) => Ok(String::new()),
        other => other,
    }
}

pub struct NvidiaGpuProbe {
    runner: CommandRunner,
}

impl NvidiaGpuProbe {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    async fn assess(&self) -> GpuFacts<NvidiaGpu> {
        let mut facts = GpuFacts::default();
        match self.runner.stdout("nvidia-smi", &[NVIDIA_QUERY, "--format=csv,noheader"]).await {
            Ok(csv) => {
                facts.gpus = parse_nvidia_csv(&csv);
                for gpu in facts.gpus.iter_mut() {
                    match self.runner.stdout("nvidia-smi", &["-q", "-d", "POWER", "-i", gpu.index.as_str()]).await {
                        Ok(out) => gpu.power_cur_limit = parse_power_limit(&out),
                        Err(e) => warn!(probe = "gpu_nvidia", gpu = %gpu.index, reason = %e, "Power query failed"),
                    }
                }
            }
            Err(e) => {
                facts.error = Some(e.to_string());
                match lspci(&self.runner).await {
                    Ok(out) => {
                        facts.gpus = lspci_gpus(&out, "nvidia")
                            .into_iter()
                            .map(|line| NvidiaGpu {
                                model: lspci_model(line),
                                uuid: "Unknown".to_string(),
                                pci_id: line.split_whitespace().next().map(str::to_string),
                                ..NvidiaGpu::default()
                            })
                            .collect();
                    }
                    Err(e) => facts.error = Some(e.to_string()),
                }
            }
        }
        facts.gpu_present = !facts.gpus.is_empty();
        facts
    }
}

pub fn nvidia_remediation(facts: &GpuFacts<NvidiaGpu>) -> Vec<Recommendation> {
    facts
        .gpus
        .iter()
        .enumerate()
        .filter(|(_, gpu)| gpu.driver_version.trim().is_empty())
        .map(|(i, _)| {
            Recommendation::new(
                "install_nvidia_driver",
                "Install or update NVIDIA GPU drivers",
                format!("GPU {} driver version not detected or outdated", i),
            )
            .with_tags(&["system", "gpu", "nvidia"])
        })
        .collect()
}

#[async_trait]
impl Probe for NvidiaGpuProbe {
    fn name(&self) -> &str {
        "gpu_nvidia"
    }

    fn description(&self) -> &str {
        "NVIDIA GPUs, drivers, clocks and power limits"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let facts = self.assess().await;
        info!(probe = "gpu_nvidia", gpus = facts.gpus.len(), "NVIDIA assessment done");
        let closing = if facts.gpu_present {
            format!("NVIDIA GPU analysis completed. {} GPU(s) found.", facts.gpus.len())
        } else {
            "NVIDIA GPU analysis completed. No NVIDIA GPU found.".to_string()
        };
        let actions = nvidia_remediation(&facts);
        Ok(finish(
            ResultBuilder::new(self.name(), id_offset, log_path),
            serde_json::json!({ "gpu_nvidia": facts }),
            actions,
            Narration::new("Checking for NVIDIA GPUs.", closing, &["system", "gpu", "nvidia"]),
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PciGpu {
    pub model: String,
    pub pci_id: Option<String>,
}

fn pci_gpus(lspci: &str, vendor: &str) -> Vec<PciGpu> {
    lspci_gpus(lspci, vendor)
        .into_iter()
        .map(|line| PciGpu {
            model: lspci_model(line),
            pci_id: line.split_whitespace().next().map(str::to_string),
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AmdFacts {
    #[serde(flatten)]
    pub gpus: GpuFacts<PciGpu>,
    pub amdgpu_driver: bool,
    pub rocm_installed: bool,
}

pub struct AmdGpuProbe {
    runner: CommandRunner,
}

impl AmdGpuProbe {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    async fn assess(&self) -> AmdFacts {
        let mut facts = AmdFacts::default();
        match lspci(&self.runner).await {
            Ok(out) => facts.gpus.gpus = pci_gpus(&out, "AMD"),
            Err(e) => facts.gpus.error = Some(e.to_string()),
        }
        facts.gpus.gpu_present = !facts.gpus.gpus.is_empty();
        if facts.gpus.gpu_present {
            facts.amdgpu_driver = self.runner.stdout("modinfo", &["amdgpu"]).await.is_ok()
                || Path::new("/sys/module/amdgpu").exists();
            facts.rocm_installed = which("rocminfo").is_some() || Path::new("/opt/rocm").exists();
        }
        facts
    }
}

pub fn amd_remediation(facts: &AmdFacts) -> Vec<Recommendation> {
    let mut tasks = Vec::new();
    if !facts.gpus.gpu_present {
        return tasks;
    }
    if !facts.amdgpu_driver {
        tasks.push(
            Recommendation::new("install_amd_gpu_drivers", "Install AMD GPU drivers", "AMD GPU drivers not detected")
                .with_tags(&["system", "gpu", "amd"]),
        );
    }
    if !facts.rocm_installed {
        tasks.push(
            Recommendation::new("install_rocm", "Install ROCm for GPGPU computing", "ROCm not installed or not found")
                .with_tags(&["system", "gpu", "amd"]),
        );
    }
    tasks
}

#[async_trait]
impl Probe for AmdGpuProbe {
    fn name(&self) -> &str {
        "gpu_amd"
    }

    fn description(&self) -> &str {
        "AMD GPUs, amdgpu driver and ROCm"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let facts = self.assess().await;
        let closing = if facts.gpus.gpu_present {
            "AMD GPU analysis completed."
        } else {
            "AMD GPU analysis completed. No AMD GPU found."
        };
        let actions = amd_remediation(&facts);
        Ok(finish(
            ResultBuilder::new(self.name(), id_offset, log_path),
            serde_json::json!({ "gpu_amd": facts }),
            actions,
            Narration::new("Checking for AMD GPUs.", closing, &["system", "gpu", "amd"]),
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntelFacts {
    #[serde(flatten)]
    pub gpus: GpuFacts<PciGpu>,
    pub oneapi_installed: bool,
    pub oneapi_version: Option<String>,
}

/// `# Version: 2024.0.1.46` header of oneAPI's `setvars.sh`.
pub fn parse_oneapi_version(setvars: &str) -> Option<String> {
    let re = Regex::new(r"# Version: (\d+\.\d+\.\d+(?:\.\d+)?)").ok()?;
    re.captures(setvars).map(|c| c[1].to_string())
}

pub struct IntelGpuProbe {
    runner: CommandRunner,
    oneapi_root: std::path::PathBuf,
}

impl IntelGpuProbe {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            oneapi_root: std::path::PathBuf::from("/opt/intel/oneapi"),
        }
    }

    async fn assess(&self) -> IntelFacts {
        let mut facts = IntelFacts::default();
        match lspci(&self.runner).await {
            Ok(out) => facts.gpus.gpus = pci_gpus(&out, "Intel"),
            Err(e) => facts.gpus.error = Some(e.to_string()),
        }
        facts.gpus.gpu_present = !facts.gpus.gpus.is_empty();
        if facts.gpus.gpu_present {
            facts.oneapi_installed = self.oneapi_root.exists() || which("sycl-ls").is_some();
            facts.oneapi_version = tokio::fs::read_to_string(self.oneapi_root.join("setvars.sh"))
                .await
                .ok()
                .and_then(|s| parse_oneapi_version(&s));
        }
        facts
    }
}

pub fn intel_remediation(facts: &IntelFacts) -> Vec<Recommendation> {
    if facts.gpus.gpu_present && !facts.oneapi_installed {
        vec![Recommendation::new("install_intel_oneapi", "Install Intel oneAPI toolkit", "Intel oneAPI not found")
            .with_tags(&["system", "gpu", "intel"])]
    } else {
        Vec::new()
    }
}

#[async_trait]
impl Probe for IntelGpuProbe {
    fn name(&self) -> &str {
        "gpu_intel"
    }

    fn description(&self) -> &str {
        "Intel GPUs and the oneAPI runtime"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let facts = self.assess().await;
        let closing = if facts.gpus.gpu_present {
            "Intel GPU analysis completed."
        } else {
            "Intel GPU analysis completed. No Intel GPU found."
        };
        let actions = intel_remediation(&facts);
        Ok(finish(
            ResultBuilder::new(self.name(), id_offset, log_path),
            serde_json::json!({ "gpu_intel": facts }),
            actions,
            Narration::new("Checking for Intel GPUs.", closing, &["system", "gpu", "intel"]),
        ))
    }
}
