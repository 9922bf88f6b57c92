//! Built-in hostaudit probes.
//!
//! Every probe follows the same output convention (see [`narration`]): one
//! data item with its facts, one action per remediation task, then an opening
//! utterance, an optional "Recommended actions are: ..." summary and a closing
//! utterance. External commands run through [`CommandRunner`] without a shell.

pub mod apps;
pub mod command;
pub mod docker;
pub mod gpu;
pub mod gpu_toolkit;
pub mod host_info;
pub mod internet;
pub mod narration;
pub mod network;
pub mod security;
pub mod service_api;
pub mod tpu;

use std::sync::Arc;

use hostaudit_core::{AuditConfig, ProbeRegistry};

pub use apps::AppsProbe;
pub use command::{which, CommandOutput, CommandRunner};
pub use docker::DockerProbe;
pub use gpu::{AmdGpuProbe, IntelGpuProbe, NvidiaGpuProbe};
pub use gpu_toolkit::NvidiaToolkitProbe;
pub use host_info::HostInfoProbe;
pub use internet::InternetProbe;
pub use network::NetworkProbe;
pub use security::SecurityProbe;
pub use service_api::ServiceApiProbe;
pub use tpu::CoralTpuProbe;

/// Built-in probe names in run order.
pub const PROBE_NAMES: &[&str] = &[
    "host_info",
    "gpu_nvidia",
    "gpu_nvidia_toolkit",
    "gpu_amd",
    "gpu_intel",
    "tpu_coral",
    "network",
    "apps",
    "docker",
    "internet",
    "service_api",
    "security",
];

/// Registry with every built-in probe, configured from `config`.
pub fn standard_registry(config: &AuditConfig) -> ProbeRegistry {
    let runner = CommandRunner::new(config.timeouts.command());
    let api_timeout = config.timeouts.api();

    let mut registry = ProbeRegistry::new();
    registry.register(Arc::new(HostInfoProbe::new()));
    registry.register(Arc::new(NvidiaGpuProbe::new(runner.clone())));
    registry.register(Arc::new(NvidiaToolkitProbe::new(runner.clone())));
    registry.register(Arc::new(AmdGpuProbe::new(runner.clone())));
    registry.register(Arc::new(IntelGpuProbe::new(runner.clone())));
    registry.register(Arc::new(CoralTpuProbe::new(runner.clone())));
    registry.register(Arc::new(NetworkProbe::new(runner.clone())));
    registry.register(Arc::new(AppsProbe::new(runner.clone(), config.apps.clone())));
    registry.register(Arc::new(DockerProbe::new(runner.clone())));
    registry.register(Arc::new(InternetProbe::new(api_timeout)));
    registry.register(Arc::new(ServiceApiProbe::new(config.apis.clone(), api_timeout)));
    registry.register(Arc::new(SecurityProbe::new(runner)));
    registry
}
