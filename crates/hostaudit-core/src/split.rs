//! Partitioning of a merged report into its three sections.

use serde::Serialize;

use crate::item::{InspectionItem, Section};
use crate::report::Report;

/// Borrowed, order-preserving view of a report split by section.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Sections<'a> {
    pub actions: Vec<&'a InspectionItem>,
    pub data: Vec<&'a InspectionItem>,
    pub speech: Vec<&'a InspectionItem>,
}

impl<'a> Sections<'a> {
    pub fn len(&self) -> usize {
        self.actions.len() + self.data.len() + self.speech.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn section(&self, section: Section) -> &[&'a InspectionItem] {
        match section {
            Section::Action => &self.actions,
            Section::Data => &self.data,
            Section::Speech => &self.speech,
        }
    }

    /// Interleave the three sections back into id order.
    pub fn reassemble(&self) -> Vec<&'a InspectionItem> {
        let mut all: Vec<&'a InspectionItem> = self
            .actions
            .iter()
            .chain(self.data.iter())
            .chain(self.speech.iter())
            .copied()
            .collect();
        all.sort_by_key(|item| item.id);
        all
    }
}

pub fn split(report: &Report) -> Sections<'_> {
    let mut sections = Sections::default();
    for item in report.items() {
        match item.section() {
            Section::Action => sections.actions.push(item),
            Section::Data => sections.data.push(item),
            Section::Speech => sections.speech.push(item),
        }
    }
    sections
}
