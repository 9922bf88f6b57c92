//! Probe trait and the partial result a probe hands back to the driver.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::ProbeError;
use crate::item::{Finding, InspectionItem, Recommendation, Utterance};

/// One category of host inspection.
///
/// A probe is stateless between calls. It receives the first id it may use and
/// must number its items contiguously from there; the driver rejects anything
/// else.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    /// Unique probe identifier, also used as the `source` of every item.
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Run the inspection.
    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError>;
}

/// Partial report produced by one probe call. Consumed by exactly one merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub source: String,
    pub items: Vec<InspectionItem>,
    pub log_path: PathBuf,
}

impl ProbeResult {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Allocates sequential ids for a probe starting at the offset it was given.
#[derive(Debug)]
pub struct ResultBuilder {
    source: String,
    next_id: u64,
    log_path: PathBuf,
    items: Vec<InspectionItem>,
}

impl ResultBuilder {
    pub fn new(source: impl Into<String>, id_offset: u64, log_path: &Path) -> Self {
        Self {
            source: source.into(),
            next_id: id_offset,
            log_path: log_path.to_path_buf(),
            items: Vec::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Id the next pushed item will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Ids saturate at `u64::MAX`; the merger rejects a result that ran past
    /// the id space.
    pub fn push(&mut self, finding: Finding) -> u64 {
        let id = self.next_id;
        self.items.push(InspectionItem {
            id,
            source: self.source.clone(),
            finding,
        });
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    pub fn data(&mut self, facts: serde_json::Value) -> u64 {
        self.push(Finding::Data(facts))
    }

    pub fn action(&mut self, recommendation: Recommendation) -> u64 {
        self.push(Finding::Action(recommendation))
    }

    pub fn speech(&mut self, utterance: Utterance) -> u64 {
        self.push(Finding::Speech(utterance))
    }

    /// Push a speech item whose audio target is derived from its own id.
    pub fn narrate(&mut self, text: impl Into<String>, tags: Vec<String>) -> u64 {
        let id = self.next_id;
        let mut utterance = Utterance::new(text).with_tags(tags);
        utterance.output_file = Some(format!("/tmp/{}_report_{}.wav", self.source, id));
        self.speech(utterance)
    }

    pub fn finish(self) -> ProbeResult {
        ProbeResult {
            source: self.source,
            items: self.items,
            log_path: self.log_path,
        }
    }
}
