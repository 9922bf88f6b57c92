//! Firewall state, pending patches and SSH daemon configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hostaudit_core::{Probe, ProbeError, ProbeResult, Recommendation, ResultBuilder};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::command::{which, CommandOutput, CommandRunner};
use crate::narration::{finish, Narration};

/// yum and dnf exit with 100 when updates are pending.
const YUM_UPDATES_PENDING: i32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AptCounts {
    pub upgraded: u32,
    pub newly_installed: u32,
    pub to_remove: u32,
    pub not_upgraded: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Patches {
    pub manager: Option<String>,
    pub updates_available: bool,
    pub upgradable_packages: Vec<String>,
    pub upgradable_packages_deferred: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<AptCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecurityFacts {
    pub firewall_status: BTreeMap<String, String>,
    pub patches: Patches,
    pub ssh_config: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_config_error: Option<String>,
}

impl SecurityFacts {
    pub fn firewall_active(&self) -> bool {
        self.firewall_status
            .values()
            .any(|v| v == "active" || v == "configured")
    }
}

/// Parse `apt-get upgrade -s` output.
pub fn parse_apt_upgrade(output: &str) -> Patches {
    let mut patches = Patches {
        manager: Some("apt".to_string()),
        ..Patches::default()
    };
    let counts = Regex::new(r"(\d+) upgraded, (\d+) newly installed, (\d+) to remove and (\d+) not upgraded").ok();

    let lines: Vec<&str> = output.lines().collect();
    for (idx, line) in lines.iter().enumerate() {
        if let Some(c) = counts.as_ref().and_then(|re| re.captures(line)) {
            let n = |i: usize| -> u32 { c[i].parse().unwrap_or(0) };
            patches.counts = Some(AptCounts {
                upgraded: n(1),
                newly_installed: n(2),
                to_remove: n(3),
                not_upgraded: n(4),
            });
        } else if line.contains("deferred due to phasing:") {
            if let Some(next) = lines.get(idx + 1) {
                patches.upgradable_packages_deferred = next.split_whitespace().map(str::to_string).collect();
            }
        } else if line.starts_with("Inst ") {
            if let Some(package) = line.split_whitespace().nth(1) {
                if !patches.upgradable_packages_deferred.iter().any(|d| d == package) {
                    patches.upgradable_packages.push(package.to_string());
                }
            }
        }
    }
    patches.updates_available = !patches.upgradable_packages.is_empty();
    patches
}

/// Package names from `yum check-update`, `pacman -Qu` or `zypper list-updates`.
pub fn parse_update_list(manager: &str, output: &str) -> Vec<String> {
    match manager {
        "yum" => output
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.starts_with(' '))
            .filter_map(|l| {
                let cols: Vec<&str> = l.split_whitespace().collect();
                (cols.len() == 3 && cols[0].contains('.')).then(|| cols[0].to_string())
            })
            .collect(),
        "pacman" => output
            .lines()
            .filter_map(|l| l.split_whitespace().next())
            .map(str::to_string)
            .collect(),
        "zypper" => output
            .lines()
            .filter(|l| l.starts_with("v "))
            .filter_map(|l| l.split('|').nth(2))
            .map(|s| s.trim().to_string())
            .collect(),
        _ => Vec::new(),
    }
}

/// `ufw status` output to `active` / `inactive`.
pub fn parse_ufw_status(output: &str) -> &'static str {
    if output.contains("Status: active") {
        "active"
    } else {
        "inactive"
    }
}

pub fn parse_iptables_rules(output: &str) -> &'static str {
    if output.contains("ACCEPT") || output.contains("DROP") {
        "configured"
    } else {
        "empty"
    }
}

/// Key/value directives of an sshd_config, skipping comments.
pub fn parse_sshd_config(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let (key, value) = l.split_once(char::is_whitespace)?;
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

pub fn remediation(facts: &SecurityFacts) -> Vec<Recommendation> {
    let mut tasks = Vec::new();
    if facts.patches.updates_available {
        tasks.push(
            Recommendation::new(
                "update_system",
                "Update the system to install available patches",
                "System updates are available",
            )
            .with_tags(&["security", "updates"]),
        );
    }
    if !facts.firewall_active() {
        tasks.push(
            Recommendation::new("enable_firewall", "Enable or install a firewall", "No active firewall detected")
                .with_tags(&["security", "firewall"]),
        );
    }
    if facts.ssh_config.get("Port").map_or(true, |p| p == "22") {
        tasks.push(
            Recommendation::new(
                "change_ssh_port",
                "Change SSH port from default",
                "SSH is using default port 22 which might be insecure",
            )
            .with_tags(&["security", "ssh"]),
        );
    }
    tasks
}

pub struct SecurityProbe {
    runner: CommandRunner,
    sshd_paths: Vec<PathBuf>,
}

impl SecurityProbe {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            sshd_paths: vec![PathBuf::from("/etc/ssh/sshd_config"), PathBuf::from("/etc/sshd_config")],
        }
    }

    /// Run directly, then through non-interactive sudo when that fails.
    async fn privileged(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ProbeError> {
        let direct = self.runner.run(program, args).await?;
        if direct.success {
            return Ok(direct);
        }
        let mut sudo_args = vec!["-n", program];
        sudo_args.extend_from_slice(args);
        match self.runner.run("sudo", &sudo_args).await {
            Ok(out) if out.success => Ok(out),
            _ => Ok(direct),
        }
    }

    async fn firewall_status(&self) -> BTreeMap<String, String> {
        let mut status = BTreeMap::new();
        match self.privileged("iptables", &["-L", "-t", "filter"]).await {
            Ok(out) if out.success => {
                status.insert("iptables".to_string(), "active".to_string());
                status.insert("iptables_rules".to_string(), parse_iptables_rules(&out.stdout).to_string());
            }
            Ok(_) => {
                status.insert("iptables".to_string(), "error".to_string());
            }
            Err(e) => {
                debug!(probe = "security", reason = %e, "iptables unavailable");
                status.insert("iptables".to_string(), "not available".to_string());
            }
        }
        if which("ufw").is_some() {
            let state = match self.privileged("ufw", &["status", "verbose"]).await {
                Ok(out) if out.success => parse_ufw_status(&out.stdout),
                _ => "error",
            };
            status.insert("ufw".to_string(), state.to_string());
        } else {
            status.insert("ufw".to_string(), "not installed".to_string());
        }
        status
    }

    async fn patches(&self) -> Patches {
        let manager = ["apt-get", "yum", "pacman", "zypper"]
            .into_iter()
            .find(|m| which(m).is_some());
        let Some(manager) = manager else {
            return Patches {
                error: Some("no supported package manager found".to_string()),
                ..Patches::default()
            };
        };

        let result = match manager {
            "apt-get" => self.runner.run("apt-get", &["upgrade", "-s"]).await,
            "yum" => self.runner.run("yum", &["check-update", "-q"]).await,
            "pacman" => self.runner.run("pacman", &["-Qu"]).await,
            _ => self.runner.run("zypper", &["--non-interactive", "list-updates"]).await,
        };
        let out = match result {
            Ok(out) => out,
            Err(e) => {
                return Patches {
                    manager: Some(manager.to_string()),
                    error: Some(e.to_string()),
                    ..Patches::default()
                }
            }
        };

        if manager == "apt-get" {
            if !out.success {
                return Patches {
                    manager: Some("apt".to_string()),
                    error: Some(format!("apt-get upgrade -s failed: {}", out.stderr.trim())),
                    ..Patches::default()
                };
            }
            return parse_apt_upgrade(&out.stdout);
        }

        let packages = parse_update_list(manager, &out.stdout);
        let updates_available = match manager {
            "yum" => out.exit_code == Some(YUM_UPDATES_PENDING) || !packages.is_empty(),
            "zypper" => !out.stdout.contains("No updates found") && !packages.is_empty(),
            _ => !packages.is_empty(),
        };
        Patches {
            manager: Some(manager.to_string()),
            updates_available,
            upgradable_packages: packages,
            ..Patches::default()
        }
    }

    async fn ssh_config(&self) -> Result<BTreeMap<String, String>, String> {
        for path in &self.sshd_paths {
            if let Ok(content) = tokio::fs::read_to_string(path).await {
                return Ok(parse_sshd_config(&content));
            }
        }
        Err("sshd_config not found".to_string())
    }

    async fn assess(&self) -> SecurityFacts {
        let mut facts = SecurityFacts {
            firewall_status: self.firewall_status().await,
            patches: self.patches().await,
            ..SecurityFacts::default()
        };
        match self.ssh_config().await {
            Ok(config) => facts.ssh_config = config,
            Err(e) => facts.ssh_config_error = Some(e),
        }
        facts
    }
}

#[async_trait]
impl Probe for SecurityProbe {
    fn name(&self) -> &str {
        "security"
    }

    fn description(&self) -> &str {
        "Firewall, pending patches and SSH configuration"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let facts = self.assess().await;
        info!(
            probe = "security",
            firewall = facts.firewall_active(),
            updates = facts.patches.updates_available,
            "Security check done"
        );
        let actions = remediation(&facts);
        Ok(finish(
            ResultBuilder::new(self.name(), id_offset, log_path),
            serde_json::json!({ "host": { "security": facts } }),
            actions,
            Narration::new("Checking system security.", "Security analysis completed.", &["system", "security", "status"]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APT_SIM: &str = "\
Reading package lists...
Building dependency tree...
Calculating upgrade...
The following upgrades have been deferred due to phasing:
  libsystemd0 udev
The following packages will be upgraded:
  curl libcurl4 libsystemd0
3 upgraded, 0 newly installed, 0 to remove and 2 not upgraded.
Inst curl [7.81.0-1ubuntu1.14] (7.81.0-1ubuntu1.15 Ubuntu:22.04/jammy-updates [amd64])
Inst libcurl4 [7.81.0-1ubuntu1.14] (7.81.0-1ubuntu1.15 Ubuntu:22.04/jammy-updates [amd64])
Inst libsystemd0 [249.11-0ubuntu3.11] (249.11-0ubuntu3.12 Ubuntu:22.04/jammy-updates [amd64])
Conf curl (7.81.0-1ubuntu1.15 Ubuntu:22.04/jammy-updates [amd64])
";

    #[test]
    fn parses_apt_simulation() {
        let patches = parse_apt_upgrade(APT_SIM);
        assert_eq!(
            patches.counts,
            Some(AptCounts {
                upgraded: 3,
                newly_installed: 0,
                to_remove: 0,
                not_upgraded: 2
            })
        );
        assert_eq!(patches.upgradable_packages_deferred, vec!["libsystemd0", "udev"]);
        assert_eq!(patches.upgradable_packages, vec!["curl", "libcurl4"]);
        assert!(patches.updates_available);

        let clean = parse_apt_upgrade("0 upgraded, 0 newly installed, 0 to remove and 0 not upgraded.\n");
        assert!(!clean.updates_available);
    }

    #[test]
    fn parses_other_package_managers() {
        let yum = "\nkernel.x86_64    5.14.0-362.el9    baseos\nopenssl.x86_64   1:3.0.7-25.el9    baseos\n";
        assert_eq!(parse_update_list("yum", yum), vec!["kernel.x86_64", "openssl.x86_64"]);
        assert_eq!(parse_update_list("pacman", "linux 6.6.1-1 -> 6.6.2-1\n"), vec!["linux"]);
        let zypper = "S | Repository | Name | Current | Available | Arch\n--+---\nv | Main | vim  | 9.0 | 9.1 | x86_64\n";
        assert_eq!(parse_update_list("zypper", zypper), vec!["vim"]);
    }

    #[test]
    fn parses_firewall_output() {
        assert_eq!(parse_ufw_status("Status: active\nLogging: on (low)\n"), "active");
        assert_eq!(parse_ufw_status("Status: inactive\n"), "inactive");
        assert_eq!(parse_iptables_rules("Chain INPUT (policy ACCEPT)\n"), "configured");
        assert_eq!(parse_iptables_rules(""), "empty");
    }

    #[test]
    fn remediation_covers_patches_firewall_and_ssh() {
        let mut facts = SecurityFacts {
            ssh_config: parse_sshd_config("# Port 2222\nPort 22\nPermitRootLogin no\n"),
            ..SecurityFacts::default()
        };
        facts.patches.updates_available = true;
        facts.firewall_status.insert("ufw".to_string(), "inactive".to_string());
        let actions: Vec<String> = remediation(&facts).into_iter().map(|t| t.action).collect();
        assert_eq!(actions, vec!["update_system", "enable_firewall", "change_ssh_port"]);

        let hardened = SecurityFacts {
            firewall_status: BTreeMap::from([("ufw".to_string(), "active".to_string())]),
            ssh_config: parse_sshd_config("Port 2202\n"),
            ..SecurityFacts::default()
        };
        assert!(remediation(&hardened).is_empty());
    }

    #[tokio::test]
    async fn missing_sshd_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let probe = SecurityProbe {
            runner: CommandRunner::default(),
            sshd_paths: vec![dir.path().join("sshd_config")],
        };
        assert_eq!(probe.ssh_config().await.unwrap_err(), "sshd_config not found");

        std::fs::write(dir.path().join("sshd_config"), "Port 2222\n").unwrap();
        assert_eq!(probe.ssh_config().await.unwrap()["Port"], "2222");
    }
}
