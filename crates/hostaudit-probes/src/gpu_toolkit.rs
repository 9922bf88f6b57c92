//! NVIDIA software stack around the driver: CUDA toolkit, Container Toolkit,
//! Docker runtime wiring, CDI specs and Nsight.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hostaudit_core::{Probe, ProbeError, ProbeResult, Recommendation, ResultBuilder};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::command::{which, CommandRunner};
use crate::docker::parse_runtimes;
use crate::narration::{finish, Narration};

const CUDA_DEFAULT_HOME: &str = "/usr/local/cuda";
const CDI_DIRS: &[&str] = &["/etc/cdi", "/var/run/cdi"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriverInstall {
    pub index: String,
    pub driver_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CudaToolkit {
    pub version: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainerToolkit {
    pub installed: bool,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DockerWiring {
    pub docker_installed: bool,
    /// Runtimes the running engine reports.
    pub runtimes: Vec<String>,
    /// daemon.json declares an `nvidia` runtime or makes it the default.
    pub daemon_json_nvidia: bool,
    pub configured: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Nsight {
    pub installed: bool,
    pub systems_version: Option<String>,
    pub compute_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolkitFacts {
    pub gpu_present: bool,
    pub drivers: Vec<DriverInstall>,
    pub cuda: CudaToolkit,
    pub container_toolkit: ContainerToolkit,
    pub docker: DockerWiring,
    /// CDI spec files declaring `nvidia.com/gpu` devices.
    pub cdi_specs: Vec<String>,
    pub nsight: Nsight,
    pub errors: Vec<String>,
}

/// Rows of `nvidia-smi --query-gpu=index,driver_version --format=csv,noheader`.
pub fn parse_driver_rows(output: &str) -> Vec<DriverInstall> {
    output
        .lines()
        .filter_map(|line| {
            let (index, version) = line.split_once(',')?;
            let version = version.trim();
            if version.is_empty() {
                return None;
            }
            Some(DriverInstall {
                index: index.trim().to_string(),
                driver_version: version.to_string(),
            })
        })
        .collect()
}

/// `Cuda compilation tools, release 12.2, V12.2.140` -> `12.2`.
pub fn parse_nvcc_release(output: &str) -> Option<String> {
    let re = Regex::new(r"release (\d+\.\d+)").ok()?;
    re.captures(output).map(|c| c[1].to_string())
}

/// `NVIDIA Container Toolkit CLI version 1.14.3` -> `1.14.3`.
pub fn parse_ctk_version(output: &str) -> Option<String> {
    let re = Regex::new(r"version (\d+\.\d+\.\d+)").ok()?;
    re.captures(output).map(|c| c[1].to_string())
}

/// Nsight tools print year-based versions, e.g. `2023.2.3.1001-32894139v0`.
pub fn parse_nsight_version(output: &str) -> Option<String> {
    let re = Regex::new(r"(20\d{2}\.\d+(?:\.\d+)*)").ok()?;
    re.captures(output).map(|c| c[1].to_string())
}

/// Whether a daemon.json document wires in the `nvidia` runtime.
pub fn daemon_declares_nvidia(json: &str) -> Result<bool, serde_json::Error> {
    let doc: Value = serde_json::from_str(json)?;
    let in_runtimes = doc
        .get("runtimes")
        .and_then(Value::as_object)
        .is_some_and(|r| r.contains_key("nvidia"));
    let default = doc.get("default-runtime").and_then(Value::as_str) == Some("nvidia");
    Ok(in_runtimes || default)
}

/// Whether a CDI spec (YAML or JSON) declares the `nvidia.com/gpu` kind.
pub fn cdi_declares_nvidia(content: &str) -> bool {
    Regex::new(r#"(?m)^\s*"?kind"?\s*:\s*"?nvidia\.com/gpu"?"#)
        .map(|re| re.is_match(content))
        .unwrap_or(false)
}

pub fn remediation(facts: &ToolkitFacts) -> Vec<Recommendation> {
    let mut tasks = Vec::new();
    let ctk = &facts.container_toolkit;
    if !facts.gpu_present && !ctk.installed {
        return tasks;
    }
    if facts.cuda.version.is_none() {
        tasks.push(
            Recommendation::new("install_cuda", "Install CUDA Toolkit", "CUDA Toolkit not installed or not found in PATH")
                .with_tags(&["system", "gpu", "nvidia"]),
        );
    }
    if !ctk.installed {
        tasks.push(
            Recommendation::new(
                "install_container_toolkit",
                "Install NVIDIA Container Toolkit",
                "NVIDIA Container Toolkit not installed or nvidia-ctk not available",
            )
            .with_tags(&["system", "gpu", "nvidia", "containers"]),
        );
    }
    if ctk.installed && facts.docker.docker_installed && !facts.docker.configured {
        tasks.push(
            Recommendation::new(
                "configure_docker",
                "Configure Docker to use NVIDIA runtime",
                "Docker not configured to use NVIDIA runtime",
            )
            .with_tags(&["system", "gpu", "nvidia", "containers"]),
        );
    }
    if ctk.installed && facts.cdi_specs.is_empty() {
        tasks.push(
            Recommendation::new(
                "generate_cdi_spec",
                "Generate CDI specification for NVIDIA devices",
                "CDI specification for NVIDIA not found",
            )
            .with_tags(&["system", "gpu", "nvidia", "toolkit"]),
        );
    }
    if !facts.nsight.installed {
        tasks.push(
            Recommendation::new("install_nsight", "Install NVIDIA Nsight", "NVIDIA Nsight not installed")
                .with_tags(&["system", "gpu", "nvidia", "toolkit"]),
        );
    }
    tasks
}

/// Spec files under `dirs` that declare NVIDIA devices, sorted.
pub async fn scan_cdi_specs(dirs: &[PathBuf]) -> Vec<String> {
    let mut specs = Vec::new();
    for dir in dirs {
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_spec = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml" | "yml" | "json")
            );
            if !is_spec {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) if cdi_declares_nvidia(&content) => specs.push(path.display().to_string()),
                Ok(_) => {}
                Err(e) => debug!(probe = "gpu_nvidia_toolkit", path = %path.display(), reason = %e, "CDI spec unreadable"),
            }
        }
    }
    specs.sort();
    specs
}

pub struct NvidiaToolkitProbe {
    runner: CommandRunner,
    cdi_dirs: Vec<PathBuf>,
    daemon_json: PathBuf,
}

impl NvidiaToolkitProbe {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            cdi_dirs: CDI_DIRS.iter().map(PathBuf::from).collect(),
            daemon_json: PathBuf::from("/etc/docker/daemon.json"),
        }
    }

    /// First `nvcc` on PATH, else the one under the CUDA home.
    fn nvcc(cuda_home: &Path) -> Option<PathBuf> {
        which("nvcc").or_else(|| Some(cuda_home.join("bin/nvcc")).filter(|p| p.is_file()))
    }

    async fn version_of(&self, program: &str, args: &[&str], facts: &mut ToolkitFacts) -> Option<String> {
        match self.runner.stdout(program, args).await {
            Ok(out) => Some(out),
            Err(ProbeError::MissingDependency(_)) => None,
            Err(e) => {
                facts.errors.push(e.to_string());
                None
            }
        }
    }

    async fn assess(&self) -> ToolkitFacts {
        let mut facts = ToolkitFacts::default();

        if let Some(out) = self
            .version_of("nvidia-smi", &["--query-gpu=index,driver_version", "--format=csv,noheader"], &mut facts)
            .await
        {
            facts.drivers = parse_driver_rows(&out);
        }
        facts.gpu_present = !facts.drivers.is_empty();

        let cuda_home = std::env::var_os("CUDA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CUDA_DEFAULT_HOME));
        if cuda_home.is_dir() {
            facts.cuda.path = Some(cuda_home.display().to_string());
        }
        if let Some(nvcc) = Self::nvcc(&cuda_home) {
            let program = nvcc.display().to_string();
            if let Some(out) = self.version_of(&program, &["--version"], &mut facts).await {
                facts.cuda.version = parse_nvcc_release(&out);
            }
        }

        if let Some(out) = self.version_of("nvidia-ctk", &["--version"], &mut facts).await {
            facts.container_toolkit.installed = true;
            facts.container_toolkit.version = parse_ctk_version(&out);
        }

        facts.docker.docker_installed = which("docker").is_some();
        if facts.docker.docker_installed {
            if let Some(out) = self
                .version_of("docker", &["info", "--format", "{{json .Runtimes}}"], &mut facts)
                .await
            {
                match parse_runtimes(&out) {
                    Ok(runtimes) => facts.docker.runtimes = runtimes,
                    Err(e) => debug!(probe = "gpu_nvidia_toolkit", reason = %e, "Runtimes not parseable"),
                }
            }
        }
        if let Ok(content) = tokio::fs::read_to_string(&self.daemon_json).await {
            match daemon_declares_nvidia(&content) {
                Ok(declared) => facts.docker.daemon_json_nvidia = declared,
                Err(e) => facts.errors.push(format!("Invalid JSON in daemon.json: {}", e)),
            }
        }
        facts.docker.configured =
            facts.docker.daemon_json_nvidia || facts.docker.runtimes.iter().any(|r| r == "nvidia");

        facts.cdi_specs = scan_cdi_specs(&self.cdi_dirs).await;

        if let Some(out) = self.version_of("nsys", &["--version"], &mut facts).await {
            facts.nsight.systems_version = parse_nsight_version(&out);
            facts.nsight.installed = true;
        }
        if let Some(out) = self.version_of("ncu", &["--version"], &mut facts).await {
            facts.nsight.compute_version = parse_nsight_version(&out);
            facts.nsight.installed = true;
        }
        facts
    }
}

#[async_trait]
impl Probe for NvidiaToolkitProbe {
    fn name(&self) -> &str {
        "gpu_nvidia_toolkit"
    }

    fn description(&self) -> &str {
        "CUDA, NVIDIA Container Toolkit, CDI and Nsight"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let facts = self.assess().await;
        info!(
            probe = "gpu_nvidia_toolkit",
            cuda = facts.cuda.version.as_deref().unwrap_or("none"),
            container_toolkit = facts.container_toolkit.installed,
            "NVIDIA toolkit assessment done"
        );
        let closing = if facts.gpu_present {
            "NVIDIA Toolkit analysis completed."
        } else {
            "NVIDIA Toolkit analysis completed. No NVIDIA GPU found."
        };
        let actions = remediation(&facts);
        Ok(finish(
            ResultBuilder::new(self.name(), id_offset, log_path),
            serde_json::json!({ "gpu_nvidia_toolkit": facts }),
            actions,
            Narration::new("Checking for NVIDIA Toolkits.", closing, &["system", "gpu", "nvidia"]),
        ))
    }
}
