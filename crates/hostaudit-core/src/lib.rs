//! hostaudit core: report model, id-allocating merger, section splitter,
//! pipeline driver, obfuscation and rendering.
//!
//! A run owns exactly one [`Report`]. The [`Pipeline`] invokes each [`Probe`]
//! with the report's `next_id`, merges what comes back, and records a single
//! failure marker for any probe that does not succeed. The [`Publisher`] then
//! obfuscates the finished report once and renders it in every requested
//! [`Format`].

pub mod audit;
pub mod config;
pub mod error;
pub mod item;
pub mod obfuscate;
pub mod pipeline;
pub mod probe;
pub mod registry;
pub mod render;
pub mod report;
pub mod split;

pub use audit::{Publication, Publisher};
pub use config::{ApiCheck, AuditConfig, Timeouts};
pub use error::{
    AuditError, ConfigError, ContractViolation, IdSpaceExhausted, MergeError, ObfuscationError, ProbeError, RenderError,
    RunAbort,
};
pub use item::{Finding, InspectionItem, ItemError, Recommendation, Section, Utterance};
pub use obfuscate::{verify_shape, Obfuscator, Redactor};
pub use pipeline::{CancelFlag, Pipeline, ProbeOutcome, ProbeState, RunOutcome};
pub use probe::{Probe, ProbeResult, ResultBuilder};
pub use registry::ProbeRegistry;
pub use render::{artifact_path, Format, Renderer, ReportRenderer};
pub use report::Report;
pub use split::{split, Sections};
