//! Inspection items: the atomic findings a probe emits.
//!
//! Every item belongs to exactly one [`Section`]. The section is carried by the
//! [`Finding`] variant so an item can never claim one section while holding
//! another section's payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The three partitions of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    /// Recommended remediation.
    Action,
    /// Raw facts gathered from the host.
    Data,
    /// Narrated summaries.
    Speech,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Action => "action",
            Section::Data => "data",
            Section::Speech => "speech",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remediation task recommended by a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Machine-readable task id (e.g. `install_docker`).
    pub action: String,
    pub description: String,
    pub reason: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// File or resource the task applies to, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Recommendation {
    pub fn new(
        action: impl Into<String>,
        description: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            description: description.into(),
            reason: reason.into(),
            tags: Vec::new(),
            target: None,
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// One narrated sentence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    #[serde(default)]
    pub speaker_id: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Where a speech synthesizer should write the audio for this sentence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speaker_id: 0,
            tags: Vec::new(),
            output_file: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Section-specific payload of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "section", content = "payload", rename_all = "lowercase")]
pub enum Finding {
    Action(Recommendation),
    Data(serde_json::Value),
    Speech(Utterance),
}

impl Finding {
    pub fn section(&self) -> Section {
        match self {
            Finding::Action(_) => Section::Action,
            Finding::Data(_) => Section::Data,
            Finding::Speech(_) => Section::Speech,
        }
    }
}

/// One atomic finding, numbered within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionItem {
    pub id: u64,
    /// Name of the probe that produced the item.
    pub source: String,
    #[serde(flatten)]
    pub finding: Finding,
}

impl InspectionItem {
    pub fn section(&self) -> Section {
        self.finding.section()
    }

    /// Structural checks that do not depend on id allocation.
    pub fn validate(&self, expected_source: &str) -> Result<(), ItemError> {
        if self.source != expected_source {
            return Err(ItemError::ForeignSource {
                id: self.id,
                expected: expected_source.to_string(),
                found: self.source.clone(),
            });
        }
        match &self.finding {
            Finding::Speech(u) if u.text.trim().is_empty() => {
                Err(ItemError::EmptySpeech { id: self.id })
            }
            Finding::Action(r) if r.action.trim().is_empty() => {
                Err(ItemError::UnnamedAction { id: self.id })
            }
            _ => Ok(()),
        }
    }
}

/// Data-model violations found in a probe's items.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("item {id} claims source `{found}` but was returned by `{expected}`")]
    ForeignSource {
        id: u64,
        expected: String,
        found: String,
    },
    #[error("speech item {id} has no text")]
    EmptySpeech { id: u64 },
    #[error("action item {id} has no action name")]
    UnnamedAction { id: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn item_serializes_with_section_and_payload() {
        let item = InspectionItem {
            id: 7,
            source: "docker".to_string(),
            finding: Finding::Action(
                Recommendation::new("install_docker", "Install Docker", "Docker is not installed")
                    .with_tags(&["system", "docker"]),
            ),
        };
        let v = serde_json::to_value(&item).unwrap();
        assert_eq!(v["id"], json!(7));
        assert_eq!(v["section"], json!("action"));
        assert_eq!(v["payload"]["action"], json!("install_docker"));
        assert!(v["payload"].get("target").is_none());

        let back: InspectionItem = serde_json::from_value(v).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn validate_rejects_empty_speech_and_foreign_source() {
        let speech = InspectionItem {
            id: 1,
            source: "apps".to_string(),
            finding: Finding::Speech(Utterance::new("  ")),
        };
        assert_eq!(speech.validate("apps"), Err(ItemError::EmptySpeech { id: 1 }));

        let data = InspectionItem {
            id: 2,
            source: "apps".to_string(),
            finding: Finding::Data(json!({})),
        };
        assert!(data.validate("apps").is_ok());
        assert!(matches!(
            data.validate("docker"),
            Err(ItemError::ForeignSource { id: 2, .. })
        ));
    }
}
