//! Docker engine installation, runtimes, proxies and daemon configuration.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hostaudit_core::{Probe, ProbeError, ProbeResult, Recommendation, ResultBuilder};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::command::{which, CommandRunner};
use crate::narration::{finish, Narration};

/// daemon.json keys worth reporting.
const DAEMON_KEYS: &[&str] = &["debug", "experimental", "features", "insecure-registries", "log-driver"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineInfo {
    pub server_version: Option<String>,
    pub operating_system: Option<String>,
    pub kernel_version: Option<String>,
    pub proxies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DaemonConfig {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DockerFacts {
    pub installed: bool,
    pub engine: Option<EngineInfo>,
    pub runtimes: Vec<String>,
    pub rootless: bool,
    pub daemon_config: Option<DaemonConfig>,
    pub errors: Vec<String>,
}

/// Fields of interest from `docker info --format json`.
pub fn parse_info(json: &str) -> Result<EngineInfo, serde_json::Error> {
    let v: Value = serde_json::from_str(json)?;
    let text = |key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);
    let proxies = v
        .get("Env")
        .and_then(Value::as_array)
        .map(|env| {
            env.iter()
                .filter_map(Value::as_str)
                .filter(|e| e.to_ascii_lowercase().contains("proxy"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(EngineInfo {
        server_version: text("ServerVersion"),
        operating_system: text("OperatingSystem"),
        kernel_version: text("KernelVersion"),
        proxies,
    })
}

/// Runtime names from `docker info --format "{{json .Runtimes}}"`.
pub fn parse_runtimes(json: &str) -> Result<Vec<String>, serde_json::Error> {
    let v: Map<String, Value> = serde_json::from_str(json)?;
    let mut names: Vec<String> = v.into_iter().map(|(k, _)| k).collect();
    names.sort();
    Ok(names)
}

/// Keep only the reported subset of a daemon.json document.
pub fn daemon_subset(json: &str) -> Result<Map<String, Value>, serde_json::Error> {
    let v: Map<String, Value> = serde_json::from_str(json)?;
    Ok(v.into_iter()
        .filter(|(k, _)| DAEMON_KEYS.contains(&k.as_str()))
        .collect())
}

pub fn is_rootless(docker_host: Option<&str>) -> bool {
    docker_host.map(|h| h.contains("user/")).unwrap_or(false)
}

pub fn remediation(facts: &DockerFacts) -> Vec<Recommendation> {
    let mut tasks = Vec::new();
    if !facts.installed {
        tasks.push(
            Recommendation::new("install_docker", "Install Docker", "Docker is not installed")
                .with_tags(&["docker", "install"]),
        );
        return tasks;
    }
    let version_known = facts
        .engine
        .as_ref()
        .and_then(|e| e.server_version.as_ref())
        .is_some();
    if !version_known {
        tasks.push(
            Recommendation::new(
                "check_docker_installation",
                "Check Docker installation",
                "Docker server version could not be determined",
            )
            .with_tags(&["docker", "troubleshoot"]),
        );
    }
    if let Some(DaemonConfig { path, error: Some(_), .. }) = &facts.daemon_config {
        tasks.push(
            Recommendation::new("fix_daemon_json", "Fix Docker daemon.json", "Invalid JSON in daemon.json")
                .with_tags(&["docker", "configuration"])
                .with_target(path.clone()),
        );
    }
    tasks
}

pub struct DockerProbe {
    runner: CommandRunner,
    daemon_paths: Vec<PathBuf>,
}

impl DockerProbe {
    pub fn new(runner: CommandRunner) -> Self {
        let mut daemon_paths = vec![PathBuf::from("/etc/docker/daemon.json")];
        if let Some(home) = std::env::var_os("HOME") {
            daemon_paths.push(PathBuf::from(home).join(".config/docker/daemon.json"));
        }
        Self { runner, daemon_paths }
    }

    async fn daemon_config(&self) -> Option<DaemonConfig> {
        for path in &self.daemon_paths {
            let Ok(content) = tokio::fs::read_to_string(path).await else {
                continue;
            };
            let mut config = DaemonConfig {
                path: path.display().to_string(),
                ..DaemonConfig::default()
            };
            match daemon_subset(&content) {
                Ok(settings) => config.settings = Some(settings),
                Err(e) => config.error = Some(format!("Invalid JSON in daemon.json: {}", e)),
            }
            return Some(config);
        }
        None
    }

    async fn assess(&self) -> DockerFacts {
        let mut facts = DockerFacts {
            installed: which("docker").is_some(),
            rootless: is_rootless(std::env::var("DOCKER_HOST").ok().as_deref()),
            ..DockerFacts::default()
        };
        if !facts.installed {
            return facts;
        }

        match self.runner.stdout("docker", &["info", "--format", "json"]).await {
            Ok(out) => match parse_info(&out) {
                Ok(engine) => facts.engine = Some(engine),
                Err(e) => facts.errors.push(format!("docker info: {}", e)),
            },
            Err(e) => facts.errors.push(e.to_string()),
        }
        match self
            .runner
            .stdout("docker", &["info", "--format", "{{json .Runtimes}}"])
            .await
        {
            Ok(out) => match parse_runtimes(&out) {
                Ok(runtimes) => facts.runtimes = runtimes,
                Err(e) => debug!(probe = "docker", reason = %e, "Runtimes not parseable"),
            },
            Err(e) => facts.errors.push(e.to_string()),
        }
        facts.daemon_config = self.daemon_config().await;
        facts
    }
}

#[async_trait]
impl Probe for DockerProbe {
    fn name(&self) -> &str {
        "docker"
    }

    fn description(&self) -> &str {
        "Docker engine, runtimes and daemon configuration"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let facts = self.assess().await;
        info!(probe = "docker", installed = facts.installed, rootless = facts.rootless, "Docker check done");
        let closing = match facts.engine.as_ref().and_then(|e| e.server_version.as_deref()) {
            Some(version) => format!("Docker check completed. Server version {}.", version),
            None if facts.installed => "Docker check completed. Server version unknown.".to_string(),
            None => "Docker check completed. Docker is not installed.".to_string(),
        };
        let actions = remediation(&facts);
        Ok(finish(
            ResultBuilder::new(self.name(), id_offset, log_path),
            serde_json::json!({ "docker_info": facts }),
            actions,
            Narration::new("Checking Docker.", closing, &["docker", "status"]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_docker_info() {
        let json = r#"{"ServerVersion":"24.0.7","OperatingSystem":"Ubuntu 22.04.3 LTS","KernelVersion":"6.5.0-14-generic",
            "Env":["HTTP_PROXY=http://proxy:3128","PATH=/usr/bin"],"Containers":3}"#;
        let info = parse_info(json).unwrap();
        assert_eq!(info.server_version.as_deref(), Some("24.0.7"));
        assert_eq!(info.kernel_version.as_deref(), Some("6.5.0-14-generic"));
        assert_eq!(info.proxies, vec!["HTTP_PROXY=http://proxy:3128"]);
    }

    #[test]
    fn parses_runtimes_and_daemon_subset() {
        let runtimes = parse_runtimes(r#"{"runc":{"path":"runc"},"nvidia":{"path":"nvidia-container-runtime"}}"#).unwrap();
        assert_eq!(runtimes, vec!["nvidia", "runc"]);

        let subset = daemon_subset(r#"{"debug":true,"log-driver":"json-file","data-root":"/var/lib/docker"}"#).unwrap();
        assert_eq!(subset.len(), 2);
        assert!(subset.contains_key("log-driver"));
        assert!(daemon_subset("{not json").is_err());
    }

    #[test]
    fn rootless_from_docker_host() {
        assert!(is_rootless(Some("unix:///run/user/1000/docker.sock")));
        assert!(!is_rootless(Some("unix:///var/run/docker.sock")));
        assert!(!is_rootless(None));
    }

    #[test]
    fn remediation_by_state() {
        let missing = DockerFacts::default();
        assert_eq!(remediation(&missing)[0].action, "install_docker");

        let broken = DockerFacts {
            installed: true,
            daemon_config: Some(DaemonConfig {
                path: "/etc/docker/daemon.json".to_string(),
                settings: None,
                error: Some("Invalid JSON in daemon.json".to_string()),
            }),
            ..DockerFacts::default()
        };
        let actions: Vec<String> = remediation(&broken).into_iter().map(|t| t.action).collect();
        assert_eq!(actions, vec!["check_docker_installation", "fix_daemon_json"]);
    }

    #[tokio::test]
    async fn reads_first_existing_daemon_json() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("daemon.json");
        std::fs::write(&present, r#"{"experimental":false}"#).unwrap();
        let probe = DockerProbe {
            runner: CommandRunner::default(),
            daemon_paths: vec![dir.path().join("absent.json"), present],
        };
        let config = probe.daemon_config().await.unwrap();
        assert!(config.error.is_none());
        assert_eq!(config.settings.unwrap()["experimental"], false);
    }
}
