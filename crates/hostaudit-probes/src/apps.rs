//! Installed application versions.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use hostaudit_core::{Probe, ProbeError, ProbeResult, Recommendation, ResultBuilder};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::command::{which, CommandRunner};
use crate::narration::{finish, Narration};

pub const VERSION_UNKNOWN: &str = "Installed - Version unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AppStatus {
    Installed { version: String, source: String },
    Missing,
}

/// First dotted version number in `text`.
pub fn extract_version(text: &str) -> Option<String> {
    let re = Regex::new(r"\d+(\.\d+)+").ok()?;
    re.find(text).map(|m| m.as_str().to_string())
}

pub fn remediation(apps: &BTreeMap<String, AppStatus>) -> Vec<Recommendation> {
    apps.iter()
        .filter(|(_, status)| matches!(status, AppStatus::Missing))
        .map(|(app, _)| {
            let mut task = Recommendation::new(
                "install_app",
                format!("Install or verify the installation of {}", app),
                format!("{} is either not installed or its status is unknown", app),
            );
            task.tags = vec!["system".to_string(), "software".to_string(), app.clone()];
            task
        })
        .collect()
}

pub struct AppsProbe {
    runner: CommandRunner,
    apps: Vec<String>,
}

impl AppsProbe {
    pub fn new(runner: CommandRunner, apps: Vec<String>) -> Self {
        Self { runner, apps }
    }

    async fn check(&self, app: &str) -> AppStatus {
        if which(app).is_some() {
            let version = match self.runner.run(app, &["--version"]).await {
                Ok(out) => extract_version(&out.stdout)
                    .or_else(|| extract_version(&out.stderr))
                    .unwrap_or_else(|| VERSION_UNKNOWN.to_string()),
                Err(e) => {
                    debug!(app, reason = %e, "Version query failed");
                    VERSION_UNKNOWN.to_string()
                }
            };
            return AppStatus::Installed {
                version,
                source: "path".to_string(),
            };
        }

        if which("dpkg-query").is_some() {
            if let Ok(v) = self.runner.stdout("dpkg-query", &["-W", "-f=${Version}", app]).await {
                return installed(v, "dpkg");
            }
        } else if which("rpm").is_some() {
            if let Ok(v) = self.runner.stdout("rpm", &["-q", "--queryformat", "%{VERSION}", app]).await {
                return installed(v, "rpm");
            }
        }
        AppStatus::Missing
    }
}

fn installed(version: String, source: &str) -> AppStatus {
    let version = version.trim();
    AppStatus::Installed {
        version: if version.is_empty() {
            VERSION_UNKNOWN.to_string()
        } else {
            version.to_string()
        },
        source: source.to_string(),
    }
}

#[async_trait]
impl Probe for AppsProbe {
    fn name(&self) -> &str {
        "apps"
    }

    fn description(&self) -> &str {
        "Presence and version of configured applications"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let mut apps = BTreeMap::new();
        for app in &self.apps {
            let status = self.check(app).await;
            apps.insert(app.clone(), status);
        }
        let missing = apps.values().filter(|s| matches!(s, AppStatus::Missing)).count();
        info!(probe = "apps", checked = apps.len(), missing, "Application check done");

        let actions = remediation(&apps);
        Ok(finish(
            ResultBuilder::new(self.name(), id_offset, log_path),
            serde_json::json!({ "app_info": apps }),
            actions,
            Narration::new(
                "Checking applications.",
                format!("Application check completed. {} of {} installed.", apps.len() - missing, apps.len()),
                &["system", "software", "status"],
            ),
        ))
    }
}
