//! Google Coral Edge TPU detection over USB and PCIe.

use std::path::Path;

use async_trait::async_trait;
use hostaudit_core::{Probe, ProbeError, ProbeResult, Recommendation, ResultBuilder};
use regex::Regex;
use serde::Serialize;

use crate::command::CommandRunner;
use crate::narration::{finish, Narration};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tpu {
    pub vendor: String,
    pub model: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TpuFacts {
    pub tpu_present: bool,
    pub tpus: Vec<Tpu>,
    pub runtime_installed: bool,
    pub errors: Vec<String>,
}

/// USB Coral devices in `lsusb` output.
pub fn parse_lsusb(output: &str) -> Vec<Tpu> {
    let Ok(re) = Regex::new(r"ID\s+[0-9a-fA-F]{4}:[0-9a-fA-F]{4}\s+(Google Inc\.(?: Edgetpu)?|Global Unichip Corp\.)") else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| re.captures(line))
        .map(|c| Tpu {
            vendor: c[1].to_string(),
            model: "Google Coral USB TPU".to_string(),
            kind: "USB".to_string(),
        })
        .collect()
}

/// PCIe Coral devices in `lspci` output.
pub fn parse_lspci(output: &str) -> Vec<Tpu> {
    output
        .lines()
        .filter(|l| l.contains("Google") || l.contains("Global Unichip"))
        .map(|_| Tpu {
            vendor: "Google".to_string(),
            model: "Coral PCIe TPU".to_string(),
            kind: "PCIe".to_string(),
        })
        .collect()
}

/// Whether `dpkg -l` lists an installed `edgetpu` runtime package.
pub fn runtime_listed(dpkg: &str) -> bool {
    dpkg.lines()
        .any(|l| l.starts_with("ii") && l.contains("edgetpu"))
}

pub fn remediation(facts: &TpuFacts) -> Vec<Recommendation> {
    if facts.tpu_present && !facts.runtime_installed {
        vec![Recommendation::new(
            "install_tpu_runtime",
            "Install Google Coral Edge TPU runtime",
            "Edge TPU runtime not installed",
        )
        .with_tags(&["system", "tpu", "coral"])]
    } else {
        Vec::new()
    }
}

pub struct CoralTpuProbe {
    runner: CommandRunner,
}

impl CoralTpuProbe {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    async fn assess(&self) -> TpuFacts {
        let mut facts = TpuFacts::default();
        match self.runner.stdout("lsusb", &[]).await {
            Ok(out) => facts.tpus.extend(parse_lsusb(&out)),
            Err(e) => facts.errors.push(e.to_string()),
        }
        match self.runner.stdout("lspci", &[]).await {
            Ok(out) => facts.tpus.extend(parse_lspci(&out)),
            Err(e) => facts.errors.push(e.to_string()),
        }
        facts.tpu_present = !facts.tpus.is_empty();
        if facts.tpu_present {
            facts.runtime_installed = match self.runner.stdout("dpkg", &["-l"]).await {
                Ok(out) => runtime_listed(&out),
                Err(e) => {
                    facts.errors.push(e.to_string());
                    Path::new("/usr/lib/libedgetpu.so.1").exists()
                }
            };
        }
        facts
    }
}

#[async_trait]
impl Probe for CoralTpuProbe {
    fn name(&self) -> &str {
        "tpu_coral"
    }

    fn description(&self) -> &str {
        "Google Coral Edge TPUs and their runtime"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let facts = self.assess().await;
        let closing = if facts.tpu_present {
            format!("Google Coral analysis completed. {} TPU(s) found.", facts.tpus.len())
        } else {
            "Google Coral analysis completed. No TPU found.".to_string()
        };
        let actions = remediation(&facts);
        Ok(finish(
            ResultBuilder::new(self.name(), id_offset, log_path),
            serde_json::json!({ "tpu_coral": facts }),
            actions,
            Narration::new("Checking for Google Coral TPUs.", closing, &["system", "tpu", "coral"]),
        ))
    }
}
