//! Report rendering (HTML via handlebars, JSON via serde_json).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::item::{Finding, InspectionItem};
use crate::report::Report;
use crate::split::{split, Sections};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Html,
    Json,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Html => "html",
            Format::Json => "json",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Format {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" | "htm" => Ok(Format::Html),
            "json" => Ok(Format::Json),
            other => Err(RenderError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// `<dir>/<host_id>.<ext>`
pub fn artifact_path(dir: &Path, host_id: &str, format: Format) -> PathBuf {
    dir.join(format!("{}.{}", host_id, format.extension()))
}

pub trait Renderer: Send + Sync {
    fn render(&self, report: &Report, format: Format) -> Result<Vec<u8>, RenderError>;
}

const REPORT_TEMPLATE_NAME: &str = "report";

pub struct ReportRenderer {
    handlebars: Handlebars<'static>,
}

impl ReportRenderer {
    pub fn new() -> Result<Self, RenderError> {
        Self::with_template(REPORT_TEMPLATE)
    }

    /// Use a custom HTML template. It is rendered against the same view as the
    /// built-in one.
    pub fn with_template(template: &str) -> Result<Self, RenderError> {
        let mut hb = Handlebars::new();
        hb.register_template_string(REPORT_TEMPLATE_NAME, template)?;
        Ok(Self { handlebars: hb })
    }
}

impl Renderer for ReportRenderer {
    fn render(&self, report: &Report, format: Format) -> Result<Vec<u8>, RenderError> {
        let sections = split(report);
        match format {
            Format::Json => Ok(serde_json::to_vec_pretty(&JsonView::new(report, &sections))?),
            Format::Html => {
                let view = HtmlView::new(report, &sections)?;
                Ok(self
                    .handlebars
                    .render(REPORT_TEMPLATE_NAME, &view)?
                    .into_bytes())
            }
        }
    }
}

#[derive(Serialize)]
struct JsonView<'a> {
    host_id: &'a str,
    generated_at: String,
    initial_offset: u64,
    next_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    aborted: Option<&'a str>,
    actions: &'a [&'a InspectionItem],
    data: &'a [&'a InspectionItem],
    speech: &'a [&'a InspectionItem],
}

impl<'a> JsonView<'a> {
    fn new(report: &'a Report, sections: &'a Sections<'a>) -> Self {
        Self {
            host_id: report.host_id(),
            generated_at: report.generated_at().to_rfc3339(),
            initial_offset: report.initial_offset(),
            next_id: report.next_id(),
            aborted: report.aborted(),
            actions: &sections.actions,
            data: &sections.data,
            speech: &sections.speech,
        }
    }
}

#[derive(Serialize)]
struct HtmlView<'a> {
    host_id: &'a str,
    generated_at: String,
    initial_offset: u64,
    next_id: u64,
    aborted: Option<&'a str>,
    total: usize,
    actions: Vec<ActionRow<'a>>,
    data: Vec<DataRow<'a>>,
    speech: Vec<SpeechRow<'a>>,
}

#[derive(Serialize)]
struct ActionRow<'a> {
    id: u64,
    source: &'a str,
    action: &'a str,
    description: &'a str,
    reason: &'a str,
    tags: String,
    target: Option<&'a str>,
}

#[derive(Serialize)]
struct DataRow<'a> {
    id: u64,
    source: &'a str,
    failed: bool,
    facts: String,
}

#[derive(Serialize)]
struct SpeechRow<'a> {
    id: u64,
    source: &'a str,
    text: &'a str,
    tags: String,
}

impl<'a> HtmlView<'a> {
    fn new(report: &'a Report, sections: &Sections<'a>) -> Result<Self, RenderError> {
        let mut actions = Vec::with_capacity(sections.actions.len());
        let mut data = Vec::with_capacity(sections.data.len());
        let mut speech = Vec::with_capacity(sections.speech.len());

        for item in sections.reassemble() {
            match &item.finding {
                Finding::Action(r) => actions.push(ActionRow {
                    id: item.id,
                    source: &item.source,
                    action: &r.action,
                    description: &r.description,
                    reason: &r.reason,
                    tags: r.tags.join(", "),
                    target: r.target.as_deref(),
                }),
                Finding::Data(facts) => data.push(DataRow {
                    id: item.id,
                    source: &item.source,
                    failed: facts.get("status").and_then(|s| s.as_str()) == Some("failed"),
                    facts: serde_json::to_string_pretty(facts)?,
                }),
                Finding::Speech(u) => speech.push(SpeechRow {
                    id: item.id,
                    source: &item.source,
                    text: &u.text,
                    tags: u.tags.join(", "),
                }),
            }
        }

        Ok(Self {
            host_id: report.host_id(),
            generated_at: report.generated_at().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            initial_offset: report.initial_offset(),
            next_id: report.next_id(),
            aborted: report.aborted(),
            total: report.len(),
            actions,
            data,
            speech,
        })
    }
}

const REPORT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Host audit: {{host_id}}</title>
<style>
body { font-family: sans-serif; margin: 2em; color: #222; }
table { border-collapse: collapse; width: 100%; margin-bottom: 2em; }
th, td { border: 1px solid #ccc; padding: 4px 8px; text-align: left; vertical-align: top; }
th { background: #f0f0f0; }
pre { margin: 0; white-space: pre-wrap; }
.aborted { background: #fdd; border: 1px solid #c00; padding: 1em; }
tr.failed { background: #fee; }
</style>
</head>
<body>
<h1>Host audit: {{host_id}}</h1>
<p>Generated {{generated_at}}. {{total}} items, ids {{initial_offset}} to {{next_id}} (exclusive).</p>
{{#if aborted}}<div class="aborted"><strong>Run aborted:</strong> {{aborted}}</div>{{/if}}

<h2>Recommended actions</h2>
{{#if actions}}
<table>
<tr><th>Id</th><th>Probe</th><th>Action</th><th>Description</th><th>Reason</th><th>Tags</th></tr>
{{#each actions}}
<tr><td>{{id}}</td><td>{{source}}</td><td><code>{{action}}</code>{{#if target}}<br><small>{{target}}</small>{{/if}}</td><td>{{description}}</td><td>{{reason}}</td><td>{{tags}}</td></tr>
{{/each}}
</table>
{{else}}
<p>No actions recommended.</p>
{{/if}}

<h2>Data</h2>
{{#if data}}
<table>
<tr><th>Id</th><th>Probe</th><th>Facts</th></tr>
{{#each data}}
<tr{{#if failed}} class="failed"{{/if}}><td>{{id}}</td><td>{{source}}</td><td><pre>{{facts}}</pre></td></tr>
{{/each}}
</table>
{{else}}
<p>No data collected.</p>
{{/if}}

<h2>Speech</h2>
{{#if speech}}
<ol>
{{#each speech}}
<li value="{{id}}"><em>{{source}}</em>: {{text}}</li>
{{/each}}
</ol>
{{else}}
<p>No narration.</p>
{{/if}}
</body>
</html>
"#;
