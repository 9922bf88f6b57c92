//! Run configuration: file, then environment, on top of built-in defaults.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::render::Format;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "HOSTAUDIT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/hostaudit.toml";

/// One HTTP endpoint checked by the `service_api` probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCheck {
    pub name: String,
    #[serde(default = "default_api_url")]
    pub url: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Exact (trimmed) body a healthy API answers with. Any 2xx body passes when unset.
    #[serde(default)]
    pub expected_result: Option<String>,
}

fn default_api_url() -> String {
    "http://localhost".to_string()
}

fn default_endpoint() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Hard limit for one probe invocation.
    pub probe_secs: u64,
    /// Limit for each external command a probe runs.
    pub command_secs: u64,
    /// Limit for each HTTP request.
    pub api_secs: u64,
    /// Per-probe replacements for `probe_secs`.
    pub overrides: HashMap<String, u64>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe_secs: 30,
            command_secs: 30,
            api_secs: 10,
            overrides: HashMap::new(),
        }
    }
}

impl Timeouts {
    pub fn for_probe(&self, probe: &str) -> Duration {
        Duration::from_secs(self.overrides.get(probe).copied().unwrap_or(self.probe_secs))
    }

    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn api(&self) -> Duration {
        Duration::from_secs(self.api_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Names log and artifact files. Defaults to the machine hostname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    pub initial_offset: u64,
    pub log_dir: PathBuf,
    pub report_dir: PathBuf,
    pub formats: Vec<Format>,
    /// Subset of built-in probes to run. All of them when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probes: Option<Vec<String>>,
    pub apps: Vec<String>,
    pub apis: Vec<ApiCheck>,
    pub obfuscate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protected_terms_path: Option<PathBuf>,
    pub timeouts: Timeouts,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            host_id: None,
            initial_offset: 0,
            log_dir: PathBuf::from("logs"),
            report_dir: PathBuf::from("reports"),
            formats: vec![Format::Html, Format::Json],
            probes: None,
            apps: vec!["git".to_string(), "curl".to_string(), "python3".to_string()],
            apis: Vec::new(),
            obfuscate: true,
            protected_terms_path: None,
            timeouts: Timeouts::default(),
        }
    }
}

impl AuditConfig {
    /// Load config from file and environment. Precedence: env `HOSTAUDIT__*` > file
    /// (`HOSTAUDIT_CONFIG` or `config/hostaudit.toml`) > defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let builder = ::config::Config::builder()
            .set_default("initial_offset", 0_i64)?
            .set_default("log_dir", "logs")?
            .set_default("report_dir", "reports")?
            .set_default("obfuscate", true)?;

        let builder = if path.exists() {
            builder.add_source(::config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                ::config::Environment::with_prefix("HOSTAUDIT")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("formats")
                    .with_list_parse_key("probes")
                    .with_list_parse_key("apps"),
            )
            .build()?;

        let config: AuditConfig = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.formats.is_empty() {
            return Err(ConfigError::Invalid("at least one output format is required".to_string()));
        }
        if self.timeouts.probe_secs == 0 || self.timeouts.command_secs == 0 || self.timeouts.api_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least one second".to_string()));
        }
        if let Some((probe, _)) = self.timeouts.overrides.iter().find(|(_, secs)| **secs == 0) {
            return Err(ConfigError::Invalid(format!("timeout override for `{}` must be at least one second", probe)));
        }
        if let Some(api) = self.apis.iter().find(|a| a.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("API check for `{}` has no name", api.url)));
        }
        let mut seen = HashSet::new();
        if let Some(api) = self.apis.iter().find(|a| !seen.insert(a.name.trim())) {
            return Err(ConfigError::Invalid(format!("API check `{}` is listed more than once", api.name.trim())));
        }
        Ok(())
    }

    /// Host identifier safe for use in file names.
    pub fn host_id(&self) -> String {
        let raw = self
            .host_id
            .clone()
            .or_else(sysinfo::System::host_name)
            .unwrap_or_default();
        sanitize_host_id(&raw)
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(format!("{}.log", self.host_id()))
    }

    /// Write this configuration as TOML, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Write(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write(e.to_string()))
    }
}

/// Keep `[A-Za-z0-9._-]`, replace anything else with `_`. Empty becomes `localhost`.
pub fn sanitize_host_id(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "localhost".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_path_characters() {
        assert_eq!(sanitize_host_id("web-01.example.com"), "web-01.example.com");
        assert_eq!(sanitize_host_id("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_host_id("  "), "localhost");
    }

    #[test]
    fn timeouts_use_overrides() {
        let mut t = Timeouts::default();
        t.overrides.insert("security".to_string(), 120);
        assert_eq!(t.for_probe("security"), Duration::from_secs(120));
        assert_eq!(t.for_probe("docker"), Duration::from_secs(30));
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostaudit.toml");
        std::fs::write(
            &path,
            r#"
host_id = "lab-7"
initial_offset = 100
formats = ["json"]
apps = ["docker", "nvidia-smi"]
probes = ["host_info", "apps"]

[timeouts]
probe_secs = 45

[timeouts.overrides]
security = 90

[[apis]]
name = "ollama"
url = "http://127.0.0.1"
port = 11434
endpoint = "/api/tags"
"#,
        )
        .unwrap();

        let cfg = AuditConfig::load_from(&path).unwrap();
        assert_eq!(cfg.host_id(), "lab-7");
        assert_eq!(cfg.initial_offset, 100);
        assert_eq!(cfg.formats, vec![Format::Json]);
        assert_eq!(cfg.probes.as_deref(), Some(&["host_info".to_string(), "apps".to_string()][..]));
        assert_eq!(cfg.timeouts.for_probe("security"), Duration::from_secs(90));
        assert_eq!(cfg.timeouts.for_probe("apps"), Duration::from_secs(45));
        assert_eq!(cfg.timeouts.api_secs, 10);
        assert_eq!(cfg.apis[0].port, Some(11434));
        assert_eq!(cfg.apis[0].expected_result, None);
        assert!(cfg.obfuscate);
        assert_eq!(cfg.log_path(), PathBuf::from("logs/lab-7.log"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[timeouts]\nprobe_secs = 0\n").unwrap();
        assert!(matches!(AuditConfig::load_from(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/hostaudit.toml");
        let mut cfg = AuditConfig::default();
        cfg.host_id = Some("saved".to_string());
        cfg.apis.push(ApiCheck {
            name: "health".to_string(),
            url: default_api_url(),
            port: Some(8080),
            endpoint: "/healthz".to_string(),
            expected_result: Some("ok".to_string()),
        });
        cfg.save_to_path(&path).unwrap();
        assert_eq!(AuditConfig::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn duplicate_api_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.toml");
        std::fs::write(
            &path,
            "[[apis]]\nname = \"health\"\nport = 8080\n\n[[apis]]\nname = \"health \"\nport = 9090\n",
        )
        .unwrap();
        match AuditConfig::load_from(&path) {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("`health`"), "{msg}"),
            other => panic!("expected a duplicate-name error, got {other:?}"),
        }

        std::fs::write(&path, "[[apis]]\nname = \"health\"\n\n[[apis]]\nname = \"metrics\"\n").unwrap();
        assert_eq!(AuditConfig::load_from(&path).unwrap().apis.len(), 2);
    }
}
