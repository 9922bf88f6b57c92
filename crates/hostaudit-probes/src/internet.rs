//! Internet reachability and proxy settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use hostaudit_core::{Probe, ProbeError, ProbeResult, Recommendation, ResultBuilder};
use serde::Serialize;
use tracing::{info, warn};

use crate::narration::{finish, Narration};

pub const WAN_LOOKUP_URL: &str = "https://ipinfo.io/ip";
const PROXY_VARS: &[&str] = &["http_proxy", "https_proxy", "ftp_proxy"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InternetFacts {
    pub environment_proxy: BTreeMap<String, String>,
    pub package_manager_proxy: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wan_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wan_error: Option<String>,
    /// Directory `check_package_manager_proxy` points at.
    #[serde(skip)]
    pub package_manager_config: String,
}

impl InternetFacts {
    pub fn online(&self) -> bool {
        self.wan_address.is_some()
    }
}

/// Proxy variables among `vars`, matched case-insensitively.
pub fn environment_proxies<I>(vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter(|(k, _)| PROXY_VARS.contains(&k.to_ascii_lowercase().as_str()))
        .collect()
}

/// Quoted proxy URL of an `Acquire::http(s)::Proxy "..."` apt directive.
pub fn apt_proxy(content: &str) -> Option<String> {
    content
        .lines()
        .filter(|l| l.contains("Acquire::http::Proxy") || l.contains("Acquire::https::Proxy"))
        .find_map(|l| l.split('"').nth(1).map(str::to_string))
}

/// Value of a `proxy=` line in yum.conf.
pub fn yum_proxy(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("proxy="))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn remediation(facts: &InternetFacts) -> Vec<Recommendation> {
    let mut tasks = Vec::new();
    if facts.online() {
        return tasks;
    }
    tasks.push(
        Recommendation::new("check_internet", "Check internet connectivity", "Failed to retrieve WAN address")
            .with_tags(&["internet", "connectivity"]),
    );
    if facts.package_manager_proxy.is_empty() {
        tasks.push(
            Recommendation::new(
                "check_package_manager_proxy",
                "Check package manager proxy settings",
                "No proxy settings found",
            )
            .with_tags(&["internet", "package_manager", "proxy"])
            .with_target(facts.package_manager_config.clone()),
        );
    }
    if facts.environment_proxy.is_empty() {
        tasks.push(
            Recommendation::new(
                "set_environment_proxy",
                "Set environment proxy variables",
                "No environment proxy variables set",
            )
            .with_tags(&["internet", "environment", "proxy"])
            .with_target("/etc/environment"),
        );
    }
    tasks
}

pub struct InternetProbe {
    timeout: Duration,
    wan_url: String,
    apt_conf_dir: PathBuf,
    yum_conf: PathBuf,
}

impl InternetProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            wan_url: WAN_LOOKUP_URL.to_string(),
            apt_conf_dir: PathBuf::from("/etc/apt/apt.conf.d"),
            yum_conf: PathBuf::from("/etc/yum.conf"),
        }
    }

    async fn package_manager_proxy(&self) -> BTreeMap<String, String> {
        let mut found = BTreeMap::new();
        if let Ok(mut entries) = tokio::fs::read_dir(&self.apt_conf_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let Ok(content) = tokio::fs::read_to_string(entry.path()).await else {
                    continue;
                };
                if let Some(proxy) = apt_proxy(&content) {
                    found.insert(entry.file_name().to_string_lossy().into_owned(), proxy);
                }
            }
        }
        if let Ok(content) = tokio::fs::read_to_string(&self.yum_conf).await {
            if let Some(proxy) = yum_proxy(&content) {
                found.insert("yum".to_string(), proxy);
            }
        }
        found
    }

    async fn wan_address(&self) -> Result<String, String> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent("hostaudit")
            .build()
            .map_err(|e| e.to_string())?;
        let response = client
            .get(&self.wan_url)
            .send()
            .await
            .map_err(|e| format!("Failed to retrieve WAN address: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("HTTP request failed with status: {}", response.status()));
        }
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(body.trim().to_string())
    }

    async fn assess(&self) -> InternetFacts {
        let mut facts = InternetFacts {
            environment_proxy: environment_proxies(std::env::vars()),
            package_manager_proxy: self.package_manager_proxy().await,
            package_manager_config: if self.apt_conf_dir.exists() {
                format!("{}/", self.apt_conf_dir.display())
            } else {
                self.yum_conf.display().to_string()
            },
            ..InternetFacts::default()
        };
        match self.wan_address().await {
            Ok(addr) => facts.wan_address = Some(addr),
            Err(e) => {
                warn!(probe = "internet", reason = %e, "WAN lookup failed");
                facts.wan_error = Some(e);
            }
        }
        facts
    }
}

#[async_trait]
impl Probe for InternetProbe {
    fn name(&self) -> &str {
        "internet"
    }

    fn description(&self) -> &str {
        "WAN reachability and proxy configuration"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let facts = self.assess().await;
        info!(probe = "internet", online = facts.online(), "Internet check done");
        let closing = if facts.online() {
            "Internet system analysis completed. The host is online."
        } else {
            "Internet system analysis completed. The host appears to be offline."
        };
        let actions = remediation(&facts);
        Ok(finish(
            ResultBuilder::new(self.name(), id_offset, log_path),
            serde_json::json!({ "internet_info": facts }),
            actions,
            Narration::new("Checking internet connectivity.", closing, &["system", "internet", "status"]),
        ))
    }
}
