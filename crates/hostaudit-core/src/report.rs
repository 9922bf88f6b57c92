//! The running report and its merger.
//!
//! [`Report`] is the single authority on id allocation within a run. Probes are
//! handed `next_id` and must return items numbered contiguously from it;
//! [`Report::merge`] checks that contract before touching any state, so a
//! rejected partial leaves the report exactly as it was.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::error::{ContractViolation, IdSpaceExhausted, MergeError};
use crate::item::{Finding, InspectionItem, Section};
use crate::probe::ProbeResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    host_id: String,
    initial_offset: u64,
    next_id: u64,
    generated_at: DateTime<Utc>,
    items: Vec<InspectionItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aborted: Option<String>,
}

impl Report {
    pub fn new(host_id: impl Into<String>, initial_offset: u64) -> Self {
        Self {
            host_id: host_id.into(),
            initial_offset,
            next_id: initial_offset,
            generated_at: Utc::now(),
            items: Vec::new(),
            aborted: None,
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn initial_offset(&self) -> u64 {
        self.initial_offset
    }

    /// Next unused id. Equal to `max(id) + 1`, or the initial offset when empty.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn items(&self) -> &[InspectionItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn aborted(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    pub fn get(&self, id: u64) -> Option<&InspectionItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn actions(&self) -> impl Iterator<Item = &InspectionItem> {
        self.in_section(Section::Action)
    }

    pub fn data(&self) -> impl Iterator<Item = &InspectionItem> {
        self.in_section(Section::Data)
    }

    pub fn speech(&self) -> impl Iterator<Item = &InspectionItem> {
        self.in_section(Section::Speech)
    }

    fn in_section(&self, section: Section) -> impl Iterator<Item = &InspectionItem> {
        self.items.iter().filter(move |i| i.section() == section)
    }

    /// Append a probe's partial result and advance `next_id`.
    ///
    /// The id contract is checked first and is fatal when broken. A partial that
    /// honors the contract but carries malformed items is reported as
    /// [`MergeError::Malformed`] so the caller can treat it as a probe failure.
    /// Either way nothing is appended. Returns the number of items merged.
    pub fn merge(&mut self, partial: ProbeResult) -> Result<usize, MergeError> {
        let source = partial.source.clone();
        self.merge_as(&source, partial)
    }

    /// Like [`Report::merge`], but the partial must also be attributed to
    /// `probe`. Attribution is checked after the id contract, so a misattributed
    /// partial with wrong ids is still a contract violation.
    pub fn merge_as(&mut self, probe: &str, partial: ProbeResult) -> Result<usize, MergeError> {
        let requested = partial.items.len() as u64;
        let exhausted = IdSpaceExhausted {
            next_id: self.next_id,
            requested,
        };
        for (position, item) in partial.items.iter().enumerate() {
            let expected = self
                .next_id
                .checked_add(position as u64)
                .ok_or_else(|| exhausted.clone())?;
            if item.id != expected {
                return Err(ContractViolation {
                    probe: probe.to_string(),
                    position,
                    expected,
                    found: item.id,
                }
                .into());
            }
        }
        let next_id = self.next_id.checked_add(requested).ok_or(exhausted)?;

        if partial.source != probe {
            return Err(MergeError::Misattributed {
                probe: probe.to_string(),
                found: partial.source,
            });
        }
        for item in &partial.items {
            item.validate(&partial.source)
                .map_err(|error| MergeError::Malformed {
                    probe: partial.source.clone(),
                    error,
                })?;
        }

        let merged = partial.items.len();
        self.next_id = next_id;
        self.items.extend(partial.items);
        Ok(merged)
    }

    /// Mint the single data marker for a failed probe at `next_id`.
    pub fn record_failure(&mut self, probe: &str, reason: &str) -> Result<u64, IdSpaceExhausted> {
        let id = self.next_id;
        let next_id = id.checked_add(1).ok_or(IdSpaceExhausted {
            next_id: id,
            requested: 1,
        })?;
        self.items.push(InspectionItem {
            id,
            source: probe.to_string(),
            finding: Finding::Data(json!({ "status": "failed", "reason": reason })),
        });
        self.next_id = next_id;
        Ok(id)
    }

    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.aborted = Some(reason.into());
    }

    /// Copy of this report with every finding passed through `rewrite`.
    ///
    /// Ids, sources, order and counters are carried over untouched.
    pub fn with_findings<F>(&self, host_id: impl Into<String>, mut rewrite: F) -> Report
    where
        F: FnMut(&InspectionItem) -> Finding,
    {
        Report {
            host_id: host_id.into(),
            initial_offset: self.initial_offset,
            next_id: self.next_id,
            generated_at: self.generated_at,
            items: self
                .items
                .iter()
                .map(|item| InspectionItem {
                    id: item.id,
                    source: item.source.clone(),
                    finding: rewrite(item),
                })
                .collect(),
            aborted: self.aborted.clone(),
        }
    }
}
