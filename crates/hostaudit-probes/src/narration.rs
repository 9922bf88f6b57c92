//! Shared output convention: one data item with the gathered facts, one action
//! per remediation task, then the spoken summary.

use std::collections::BTreeSet;

use hostaudit_core::{ProbeResult, Recommendation, ResultBuilder};

/// Spoken framing of one probe run.
pub struct Narration<'a> {
    pub opening: &'a str,
    pub closing: String,
    pub closing_tags: &'a [&'a str],
}

impl<'a> Narration<'a> {
    pub fn new(opening: &'a str, closing: impl Into<String>, closing_tags: &'a [&'a str]) -> Self {
        Self {
            opening,
            closing: closing.into(),
            closing_tags,
        }
    }
}

/// "Recommended actions are: ..." with the union of every task's tags.
pub fn summarize_actions(actions: &[Recommendation]) -> Option<(String, Vec<String>)> {
    if actions.is_empty() {
        return None;
    }
    let sentences: Vec<String> = actions
        .iter()
        .map(|a| format!("{} due to {}.", a.description, a.reason))
        .collect();
    let tags: BTreeSet<&str> = actions
        .iter()
        .flat_map(|a| a.tags.iter().map(String::as_str))
        .collect();
    Some((
        format!("Recommended actions are: {}", sentences.join(" ")),
        tags.into_iter().map(str::to_string).collect(),
    ))
}

pub fn finish(
    mut builder: ResultBuilder,
    facts: serde_json::Value,
    actions: Vec<Recommendation>,
    narration: Narration<'_>,
) -> ProbeResult {
    builder.data(facts);
    let summary = summarize_actions(&actions);
    for action in actions {
        builder.action(action);
    }
    builder.narrate(narration.opening, vec!["initiation".to_string()]);
    if let Some((text, tags)) = summary {
        builder.narrate(text, tags);
    }
    builder.narrate(
        narration.closing,
        narration.closing_tags.iter().map(|t| t.to_string()).collect(),
    );
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostaudit_core::{Finding, Section};
    use serde_json::json;
    use std::path::Path;

    #[test]
    fn summary_joins_tasks_and_unions_tags() {
        let actions = vec![
            Recommendation::new("free_memory", "Free up memory or add more RAM", "Memory usage is high at 95%")
                .with_tags(&["system", "memory"]),
            Recommendation::new("clear_disk_space", "Clear disk space or expand storage", "Disk usage on / is high at 90%")
                .with_tags(&["system", "disk"]),
        ];
        let (text, tags) = summarize_actions(&actions).unwrap();
        assert_eq!(
            text,
            "Recommended actions are: Free up memory or add more RAM due to Memory usage is high at 95%. \
             Clear disk space or expand storage due to Disk usage on / is high at 90%."
        );
        assert_eq!(tags, vec!["disk", "memory", "system"]);
        assert!(summarize_actions(&[]).is_none());
    }

    #[test]
    fn finish_orders_data_actions_speech() {
        let builder = ResultBuilder::new("docker", 20, Path::new("t.log"));
        let result = finish(
            builder,
            json!({"installed": false}),
            vec![Recommendation::new("install_docker", "Install Docker", "Docker is not installed")
                .with_tags(&["system", "docker"])],
            Narration::new("Checking Docker.", "Docker check completed.", &["system", "docker"]),
        );
        let sections: Vec<Section> = result.items.iter().map(|i| i.section()).collect();
        assert_eq!(
            sections,
            vec![Section::Data, Section::Action, Section::Speech, Section::Speech, Section::Speech]
        );
        assert_eq!(result.items.last().unwrap().id, 24);
        match &result.items[3].finding {
            Finding::Speech(u) => {
                assert!(u.text.starts_with("Recommended actions are: Install Docker"));
                assert_eq!(u.output_file.as_deref(), Some("/tmp/docker_report_23.wav"));
            }
            other => panic!("unexpected finding {other:?}"),
        }
    }

    #[test]
    fn clean_run_has_no_recommendation_sentence() {
        let builder = ResultBuilder::new("tpu_coral", 0, Path::new("t.log"));
        let result = finish(
            builder,
            json!({"tpu_present": false}),
            Vec::new(),
            Narration::new("Checking for Google Coral TPUs.", "No TPU found.", &["tpu"]),
        );
        assert_eq!(result.items.len(), 3);
    }
}
