//! Explicit, ordered list of probes.

use std::sync::Arc;

use crate::probe::Probe;

#[derive(Clone, Default)]
pub struct ProbeRegistry {
    probes: Vec<Arc<dyn Probe>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self { probes: Vec::new() }
    }

    /// Register a probe at the end of the execution order
    pub fn register(&mut self, probe: Arc<dyn Probe>) {
        self.probes.push(probe);
    }

    /// Get probe by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Probe>> {
        self.probes.iter().find(|p| p.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.probes.iter().map(|p| p.name()).collect()
    }

    /// List registered probes as (name, description)
    pub fn list(&self) -> Vec<(String, String)> {
        self.probes
            .iter()
            .map(|p| (p.name().to_string(), p.description().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Probes in registration order.
    pub fn probes(&self) -> &[Arc<dyn Probe>] {
        &self.probes
    }

    /// Keep only the named probes, preserving registration order.
    ///
    /// Fails with the first name that is not registered.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<dyn Probe>>, String> {
        if let Some(unknown) = names.iter().find(|n| self.get(n.as_ref()).is_none()) {
            return Err(format!(
                "unknown probe `{}` (available: {})",
                unknown.as_ref(),
                self.names().join(", ")
            ));
        }
        Ok(self
            .probes
            .iter()
            .filter(|p| names.iter().any(|n| n.as_ref() == p.name()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::probe::{ProbeResult, ResultBuilder};
    use std::path::Path;

    struct Named(&'static str);

    #[async_trait::async_trait]
    impl Probe for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test probe"
        }

        async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
            Ok(ResultBuilder::new(self.0, id_offset, log_path).finish())
        }
    }

    fn registry() -> ProbeRegistry {
        let mut r = ProbeRegistry::new();
        r.register(Arc::new(Named("host_info")));
        r.register(Arc::new(Named("apps")));
        r.register(Arc::new(Named("docker")));
        r
    }

    #[test]
    fn select_keeps_registration_order() {
        let selected = registry().select(&["docker", "host_info"]).unwrap();
        let names: Vec<&str> = selected.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["host_info", "docker"]);
    }

    #[test]
    fn select_rejects_unknown_names() {
        let err = registry().select(&["gpu_tensor"]).err().unwrap();
        assert!(err.contains("gpu_tensor"));
        assert!(err.contains("host_info, apps, docker"));
    }
}
