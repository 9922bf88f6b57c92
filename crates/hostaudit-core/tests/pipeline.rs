use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hostaudit_core::{
    split, ContractViolation, Finding, IdSpaceExhausted, Pipeline, Probe, ProbeError, ProbeResult,
    ProbeState, Recommendation, ResultBuilder, RunAbort,
};
use serde_json::json;

/// Emits `data` data items, then `actions` action items.
struct Scripted {
    name: &'static str,
    data: usize,
    actions: usize,
}

#[async_trait::async_trait]
impl Probe for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "scripted test probe"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let mut b = ResultBuilder::new(self.name, id_offset, log_path);
        for n in 0..self.data {
            b.data(json!({ "n": n }));
        }
        for n in 0..self.actions {
            b.action(Recommendation::new(format!("fix_{n}"), "Fix it", "broken"));
        }
        Ok(b.finish())
    }
}

struct Sleeper(&'static str);

#[async_trait::async_trait]
impl Probe for Sleeper {
    fn name(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "never finishes in time"
    }

    async fn invoke(&self, _id_offset: u64, _log_path: &Path) -> Result<ProbeResult, ProbeError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ProbeError::Other("unreachable".to_string()))
    }
}

struct Failing(&'static str);

#[async_trait::async_trait]
impl Probe for Failing {
    fn name(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "always errors"
    }

    async fn invoke(&self, _id_offset: u64, _log_path: &Path) -> Result<ProbeResult, ProbeError> {
        Err(ProbeError::MissingDependency("lspci".to_string()))
    }
}

/// Numbers its items from a fixed id regardless of the offset it is given.
struct Renumbering {
    start: u64,
}

#[async_trait::async_trait]
impl Probe for Renumbering {
    fn name(&self) -> &str {
        "renumbering"
    }

    fn description(&self) -> &str {
        "ignores its offset"
    }

    async fn invoke(&self, _id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let mut b = ResultBuilder::new("renumbering", self.start, log_path);
        b.data(json!({}));
        Ok(b.finish())
    }
}

/// Named `foreign` but attributes its result to `someone_else`. Numbers from
/// `start` when set, otherwise from the offset it is given.
struct Foreign {
    start: Option<u64>,
}

#[async_trait::async_trait]
impl Probe for Foreign {
    fn name(&self) -> &str {
        "foreign"
    }

    fn description(&self) -> &str {
        "misattributes its result"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let mut b = ResultBuilder::new("someone_else", self.start.unwrap_or(id_offset), log_path);
        b.data(json!({}));
        Ok(b.finish())
    }
}

/// Returns a speech item with no text.
struct Mute;

#[async_trait::async_trait]
impl Probe for Mute {
    fn name(&self) -> &str {
        "mute"
    }

    fn description(&self) -> &str {
        "returns malformed speech"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let mut b = ResultBuilder::new("mute", id_offset, log_path);
        b.data(json!({"ok": true}));
        b.narrate("", Vec::new());
        Ok(b.finish())
    }
}

fn ids(items: &[&hostaudit_core::InspectionItem]) -> Vec<u64> {
    items.iter().map(|i| i.id).collect()
}

#[tokio::test]
async fn hardware_apps_docker_scenario() {
    let probes: Vec<Arc<dyn Probe>> = vec![
        Arc::new(Scripted { name: "hardware", data: 2, actions: 0 }),
        Arc::new(Sleeper("apps")),
        Arc::new(Scripted { name: "docker", data: 0, actions: 1 }),
    ];
    let pipeline = Pipeline::new(probes, "logs/test.log")
        .with_timeout("apps", Duration::from_millis(50));

    let outcome = pipeline.run("test-host", 1).await;
    let report = &outcome.report;

    let all: Vec<u64> = report.items().iter().map(|i| i.id).collect();
    assert_eq!(all, vec![1, 2, 3, 4]);
    assert_eq!(report.next_id(), 5);

    let marker = report.get(3).unwrap();
    assert_eq!(marker.source, "apps");
    match &marker.finding {
        Finding::Data(v) => {
            assert_eq!(v["status"], json!("failed"));
            assert!(v["reason"].as_str().unwrap().contains("timed out"));
        }
        other => panic!("expected data marker, got {other:?}"),
    }
    assert_eq!(report.get(4).unwrap().source, "docker");

    let sections = split(report);
    assert_eq!(ids(&sections.actions), vec![4]);
    assert_eq!(ids(&sections.data), vec![1, 2, 3]);
    assert!(sections.speech.is_empty());

    let apps = outcome.outcome("apps").unwrap();
    assert_eq!(apps.state, ProbeState::Failed);
    assert_eq!(apps.offset, Some(3));
    assert_eq!(apps.marker_id, Some(3));
    assert_eq!(outcome.outcome("docker").unwrap().offset, Some(4));
    assert!(outcome.fatal.is_none());
    assert!(!outcome.cancelled);
}

#[tokio::test]
async fn offsets_follow_next_id_and_ids_stay_unique() {
    let probes: Vec<Arc<dyn Probe>> = vec![
        Arc::new(Scripted { name: "a", data: 3, actions: 1 }),
        Arc::new(Failing("b")),
        Arc::new(Scripted { name: "c", data: 0, actions: 0 }),
        Arc::new(Mute),
        Arc::new(Scripted { name: "d", data: 1, actions: 2 }),
    ];
    let outcome = Pipeline::new(probes, "t.log").run("h", 10).await;

    let offsets: Vec<Option<u64>> = outcome.probes.iter().map(|o| o.offset).collect();
    assert_eq!(offsets, vec![Some(10), Some(14), Some(15), Some(15), Some(16)]);

    let states: Vec<ProbeState> = outcome.probes.iter().map(|o| o.state).collect();
    assert_eq!(
        states,
        vec![
            ProbeState::Succeeded,
            ProbeState::Failed,
            ProbeState::Succeeded,
            ProbeState::Failed,
            ProbeState::Succeeded,
        ]
    );

    let report = &outcome.report;
    let unique: HashSet<u64> = report.items().iter().map(|i| i.id).collect();
    assert_eq!(unique.len(), report.len());
    assert_eq!(report.next_id(), 19);
    assert!(report.items().iter().all(|i| i.id < report.next_id()));

    let mute = outcome.outcome("mute").unwrap();
    assert!(mute.reason.as_deref().unwrap().contains("no text"));
    assert_eq!(report.get(15).unwrap().source, "mute");
}

#[tokio::test]
async fn contract_violation_stops_the_run() {
    let probes: Vec<Arc<dyn Probe>> = vec![
        Arc::new(Scripted { name: "first", data: 2, actions: 0 }),
        Arc::new(Renumbering { start: 0 }),
        Arc::new(Scripted { name: "never", data: 1, actions: 0 }),
    ];
    let outcome = Pipeline::new(probes, "t.log").run("h", 0).await;

    let violation = outcome.fatal.as_ref().and_then(RunAbort::violation).unwrap();
    assert_eq!(violation.probe, "renumbering");
    assert_eq!(violation.expected, 2);
    assert_eq!(violation.found, 0);

    let report = &outcome.report;
    assert!(report.aborted().is_some());
    assert_eq!(report.len(), 2);
    assert_eq!(report.next_id(), 2);

    assert_eq!(outcome.outcome("renumbering").unwrap().state, ProbeState::Rejected);
    let never = outcome.outcome("never").unwrap();
    assert_eq!(never.state, ProbeState::Pending);
    assert_eq!(never.offset, None);
}

#[tokio::test]
async fn registry_selection_feeds_the_pipeline() {
    let mut registry = hostaudit_core::ProbeRegistry::new();
    registry.register(Arc::new(Scripted { name: "x", data: 1, actions: 0 }));
    registry.register(Arc::new(Scripted { name: "y", data: 1, actions: 0 }));
    registry.register(Arc::new(Scripted { name: "z", data: 1, actions: 0 }));

    let selected = registry.select(&["z", "x"]).unwrap();
    let outcome = Pipeline::new(selected, "t.log").run("h", 0).await;
    let sources: Vec<&str> = outcome.report.items().iter().map(|i| i.source.as_str()).collect();
    assert_eq!(sources, vec!["x", "z"]);
}

#[tokio::test]
async fn misattributed_result_with_wrong_ids_is_fatal() {
    let probes: Vec<Arc<dyn Probe>> = vec![
        Arc::new(Foreign { start: Some(0) }),
        Arc::new(Scripted { name: "never", data: 1, actions: 0 }),
    ];
    let outcome = Pipeline::new(probes, "t.log").run("h", 10).await;

    assert_eq!(
        outcome.fatal,
        Some(RunAbort::Contract(ContractViolation {
            probe: "foreign".to_string(),
            position: 0,
            expected: 10,
            found: 0,
        }))
    );
    assert!(outcome.report.is_empty());
    assert!(outcome.report.aborted().is_some());
    assert_eq!(outcome.outcome("foreign").unwrap().state, ProbeState::Rejected);
    assert_eq!(outcome.outcome("never").unwrap().state, ProbeState::Pending);
}

#[tokio::test]
async fn misattributed_result_with_valid_ids_is_a_failure() {
    let probes: Vec<Arc<dyn Probe>> = vec![
        Arc::new(Foreign { start: None }),
        Arc::new(Scripted { name: "after", data: 1, actions: 0 }),
    ];
    let outcome = Pipeline::new(probes, "t.log").run("h", 10).await;

    assert!(outcome.fatal.is_none());
    let foreign = outcome.outcome("foreign").unwrap();
    assert_eq!(foreign.state, ProbeState::Failed);
    assert_eq!(foreign.marker_id, Some(10));
    assert!(foreign.reason.as_deref().unwrap().contains("someone_else"));
    assert_eq!(outcome.report.get(10).unwrap().source, "foreign");
    assert_eq!(outcome.outcome("after").unwrap().offset, Some(11));
}

#[tokio::test]
async fn failure_at_the_end_of_the_id_space_aborts() {
    let probes: Vec<Arc<dyn Probe>> = vec![
        Arc::new(Failing("lspci")),
        Arc::new(Scripted { name: "never", data: 1, actions: 0 }),
    ];
    let outcome = Pipeline::new(probes, "t.log").run("h", u64::MAX).await;

    assert_eq!(
        outcome.fatal,
        Some(RunAbort::Exhausted(IdSpaceExhausted { next_id: u64::MAX, requested: 1 }))
    );
    assert!(outcome.report.is_empty());
    assert_eq!(outcome.report.next_id(), u64::MAX);
    assert_eq!(outcome.outcome("lspci").unwrap().state, ProbeState::Rejected);
    assert_eq!(outcome.outcome("never").unwrap().state, ProbeState::Pending);
}

#[tokio::test]
async fn last_assignable_id_is_used() {
    let probes: Vec<Arc<dyn Probe>> = vec![
        Arc::new(Scripted { name: "last", data: 1, actions: 0 }),
        Arc::new(Scripted { name: "empty", data: 0, actions: 0 }),
    ];
    let outcome = Pipeline::new(probes, "t.log").run("h", u64::MAX - 1).await;

    assert!(outcome.fatal.is_none());
    assert_eq!(outcome.report.get(u64::MAX - 1).unwrap().source, "last");
    assert_eq!(outcome.report.next_id(), u64::MAX);
    assert_eq!(outcome.outcome("empty").unwrap().state, ProbeState::Succeeded);
}
