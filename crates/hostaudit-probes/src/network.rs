//! Network interfaces, routing table and resolvers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hostaudit_core::{Probe, ProbeError, ProbeResult, Recommendation, ResultBuilder};
use serde::Serialize;
use sysinfo::Networks;

use crate::command::CommandRunner;
use crate::narration::{finish, Narration};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub name: String,
    pub mac: String,
    pub received_bytes: u64,
    pub transmitted_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub destination: String,
    pub via: Option<String>,
    pub dev: Option<String>,
    pub metric: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkFacts {
    pub interfaces: Vec<Interface>,
    pub routes: Vec<Route>,
    pub dns_servers: Vec<String>,
    pub errors: Vec<String>,
}

impl NetworkFacts {
    pub fn has_default_route(&self) -> bool {
        self.routes.iter().any(|r| r.destination == "default")
    }
}

/// Parse `ip route` output.
pub fn parse_routes(output: &str) -> Vec<Route> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let destination = parts.first()?;
            let after = |key: &str| {
                parts
                    .iter()
                    .position(|p| *p == key)
                    .and_then(|i| parts.get(i + 1))
                    .map(|s| s.to_string())
            };
            Some(Route {
                destination: destination.to_string(),
                via: after("via"),
                dev: after("dev"),
                metric: after("metric"),
            })
        })
        .collect()
}

/// `nameserver` entries of a resolv.conf.
pub fn parse_resolv_conf(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#'))
        .filter_map(|l| {
            let mut parts = l.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("nameserver"), Some(addr)) => Some(addr.to_string()),
                _ => None,
            }
        })
        .collect()
}

pub fn remediation(facts: &NetworkFacts) -> Vec<Recommendation> {
    let mut tasks = Vec::new();
    if facts.dns_servers.is_empty() {
        tasks.push(
            Recommendation::new("configure_dns", "Configure DNS resolvers", "No nameserver is configured")
                .with_tags(&["network", "dns"])
                .with_target("/etc/resolv.conf"),
        );
    }
    if !facts.has_default_route() {
        tasks.push(
            Recommendation::new(
                "configure_default_route",
                "Configure a default route",
                "No default route is present in the routing table",
            )
            .with_tags(&["network", "routing"]),
        );
    }
    tasks
}

pub struct NetworkProbe {
    runner: CommandRunner,
    resolv_conf: PathBuf,
}

impl NetworkProbe {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
        }
    }

    async fn assess(&self) -> NetworkFacts {
        let mut facts = NetworkFacts {
            interfaces: interfaces(),
            ..NetworkFacts::default()
        };
        match self.runner.stdout("ip", &["route"]).await {
            Ok(out) => facts.routes = parse_routes(&out),
            Err(e) => facts.errors.push(e.to_string()),
        }
        match tokio::fs::read_to_string(&self.resolv_conf).await {
            Ok(content) => facts.dns_servers = parse_resolv_conf(&content),
            Err(e) => facts
                .errors
                .push(format!("{}: {}", self.resolv_conf.display(), e)),
        }
        facts
    }
}

fn interfaces() -> Vec<Interface> {
    let networks = Networks::new_with_refreshed_list();
    let mut list: Vec<Interface> = networks
        .iter()
        .map(|(name, data)| Interface {
            name: name.clone(),
            mac: data.mac_address().to_string(),
            received_bytes: data.total_received(),
            transmitted_bytes: data.total_transmitted(),
        })
        .collect();
    list.sort_by(|a, b| a.name.cmp(&b.name));
    list
}

#[async_trait]
impl Probe for NetworkProbe {
    fn name(&self) -> &str {
        "network"
    }

    fn description(&self) -> &str {
        "Interfaces, routes and DNS resolvers"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let facts = self.assess().await;
        let closing = format!(
            "Network check completed. {} interface(s), {} route(s), {} resolver(s).",
            facts.interfaces.len(),
            facts.routes.len(),
            facts.dns_servers.len()
        );
        let actions = remediation(&facts);
        Ok(finish(
            ResultBuilder::new(self.name(), id_offset, log_path),
            serde_json::json!({ "network": facts }),
            actions,
            Narration::new("Checking network configuration.", closing, &["system", "network", "status"]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ip_route() {
        let out = "\
default via 192.168.1.1 dev eth0 proto dhcp metric 100
172.17.0.0/16 dev docker0 proto kernel scope link src 172.17.0.1 linkdown
";
        let routes = parse_routes(out);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].via.as_deref(), Some("192.168.1.1"));
        assert_eq!(routes[0].metric.as_deref(), Some("100"));
        assert_eq!(routes[1].dev.as_deref(), Some("docker0"));
        assert_eq!(routes[1].via, None);
    }

    #[test]
    fn parses_resolv_conf() {
        let conf = "# generated\nnameserver 127.0.0.53\noptions edns0\nnameserver 1.1.1.1\n";
        assert_eq!(parse_resolv_conf(conf), vec!["127.0.0.53", "1.1.1.1"]);
    }

    #[test]
    fn missing_dns_and_route_are_flagged() {
        let facts = NetworkFacts::default();
        let actions: Vec<String> = remediation(&facts).into_iter().map(|t| t.action).collect();
        assert_eq!(actions, vec!["configure_dns", "configure_default_route"]);

        let healthy = NetworkFacts {
            routes: parse_routes("default via 10.0.0.1 dev eth0\n"),
            dns_servers: vec!["10.0.0.2".to_string()],
            ..NetworkFacts::default()
        };
        assert!(remediation(&healthy).is_empty());
    }

    #[tokio::test]
    async fn resolv_conf_is_read_from_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolv.conf");
        std::fs::write(&path, "nameserver 9.9.9.9\n").unwrap();
        let probe = NetworkProbe {
            runner: CommandRunner::default(),
            resolv_conf: path,
        };
        let facts = probe.assess().await;
        assert_eq!(facts.dns_servers, vec!["9.9.9.9"]);
    }
}
