//! Redaction of sensitive values before a report leaves the host.
//!
//! Loads optional protected terms from a local file (one term per line; empty
//! lines and lines starting with `#` ignored) on top of the built-in rules:
//! identity keys, WAN addresses, home directories under `path` keys, GPU UUIDs,
//! API keys and bearer tokens.

use std::fs;
use std::io::BufRead;
use std::path::Path;

use regex::Regex;
use serde_json::Value;

use crate::error::ObfuscationError;
use crate::item::{Finding, Recommendation, Utterance};
use crate::report::Report;

/// Replacement for identity values.
pub const OBFUSCATED: &str = "[OBFUSCATED]";

/// Replacement for operator-supplied protected terms.
pub const PROTECTED_PLACEHOLDER: &str = "[PROTECTED_TERM]";

const IDENTITY_KEYS: &[&str] = &["username", "user", "hostname", "user_id", "wan_address"];

/// Pure transform over a report. Must not change item count, ids or sections.
pub trait Obfuscator: Send + Sync {
    fn obfuscate(&self, report: &Report) -> Result<Report, ObfuscationError>;
}

#[derive(Debug)]
pub struct Redactor {
    gpu_uuid: Regex,
    home_dir: Regex,
    api_key: Regex,
    bearer: Regex,
    terms: Vec<String>,
    /// Matches any protected term (case-insensitive, word boundaries).
    term_pattern: Option<Regex>,
}

impl Redactor {
    pub fn new() -> Result<Self, ObfuscationError> {
        Ok(Self {
            gpu_uuid: Regex::new(r"(GPU-)([a-zA-Z0-9-]+)")?,
            home_dir: Regex::new(r"/home/[^/\s]+")?,
            api_key: Regex::new(
                r#"(?i)(api[_-]?key|token|secret)["']?\s*[:=]\s*["']?([a-zA-Z0-9_-]{20,})["']?"#,
            )?,
            bearer: Regex::new(r"(?i)Bearer\s+[a-zA-Z0-9._-]{20,}")?,
            terms: Vec::new(),
            term_pattern: None,
        })
    }

    /// Built-in rules plus the protected terms listed in `path`.
    /// A missing file adds no terms.
    pub fn with_terms_file(path: &Path) -> Result<Self, ObfuscationError> {
        let terms = read_terms(path)?;
        Self::new()?.with_terms(terms)
    }

    pub fn with_terms(mut self, terms: Vec<String>) -> Result<Self, ObfuscationError> {
        self.terms = terms
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        self.term_pattern = term_pattern(&self.terms)?;
        Ok(self)
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Scrub free text: GPU UUIDs, secrets, protected terms, then the host name.
    pub fn scrub_text(&self, text: &str, host: Option<&Regex>) -> String {
        let text = self.gpu_uuid.replace_all(text, "${1}XXXXXX");
        let text = self.api_key.replace_all(&text, "$1: REDACTED");
        let text = self.bearer.replace_all(&text, "Bearer REDACTED");
        let text = match &self.term_pattern {
            Some(p) => p.replace_all(&text, PROTECTED_PLACEHOLDER).into_owned(),
            None => text.into_owned(),
        };
        match host {
            Some(h) => h.replace_all(&text, OBFUSCATED).into_owned(),
            None => text,
        }
    }

    fn scrub_path(&self, text: &str, host: Option<&Regex>) -> String {
        let text = self.home_dir.replace_all(text, "/home/[OBFUSCATED]");
        self.scrub_text(&text, host)
    }

    /// Walk a JSON value. Array elements are judged by the key that holds the array.
    pub fn scrub_value(&self, value: &Value, key: Option<&str>, host: Option<&Regex>) -> Value {
        let key_lower = key.map(str::to_ascii_lowercase);
        match value {
            Value::String(s) => match key_lower.as_deref() {
                Some(k) if IDENTITY_KEYS.contains(&k) => Value::String(OBFUSCATED.to_string()),
                Some("path") => Value::String(self.scrub_path(s, host)),
                _ => Value::String(self.scrub_text(s, host)),
            },
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.scrub_value(v, key, host))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.scrub_value(v, Some(k), host)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn scrub_finding(&self, finding: &Finding, host: Option<&Regex>) -> Finding {
        match finding {
            Finding::Data(value) => Finding::Data(self.scrub_value(value, None, host)),
            Finding::Action(r) => Finding::Action(Recommendation {
                action: r.action.clone(),
                description: self.scrub_text(&r.description, host),
                reason: self.scrub_text(&r.reason, host),
                tags: r.tags.clone(),
                target: r.target.as_deref().map(|t| self.scrub_path(t, host)),
            }),
            Finding::Speech(u) => Finding::Speech(Utterance {
                text: self.scrub_text(&u.text, host),
                speaker_id: u.speaker_id,
                tags: u.tags.clone(),
                output_file: u.output_file.clone(),
            }),
        }
    }
}

impl Obfuscator for Redactor {
    fn obfuscate(&self, report: &Report) -> Result<Report, ObfuscationError> {
        let host = host_pattern(report.host_id())?;
        let redacted = report.with_findings(OBFUSCATED, |item| {
            self.scrub_finding(&item.finding, host.as_ref())
        });
        Ok(redacted)
    }
}

/// Check that an obfuscated report still lines up with its source.
pub fn verify_shape(before: &Report, after: &Report) -> Result<(), ObfuscationError> {
    if before.len() != after.len() {
        return Err(ObfuscationError::ShapeChanged(format!(
            "item count {} became {}",
            before.len(),
            after.len()
        )));
    }
    if before.next_id() != after.next_id() {
        return Err(ObfuscationError::ShapeChanged(format!(
            "next_id {} became {}",
            before.next_id(),
            after.next_id()
        )));
    }
    for (a, b) in before.items().iter().zip(after.items()) {
        if a.id != b.id || a.section() != b.section() || a.source != b.source {
            return Err(ObfuscationError::ShapeChanged(format!(
                "item {} ({} from {}) became item {} ({} from {})",
                a.id,
                a.section(),
                a.source,
                b.id,
                b.section(),
                b.source
            )));
        }
    }
    Ok(())
}

fn host_pattern(host_id: &str) -> Result<Option<Regex>, regex::Error> {
    let host = host_id.trim();
    if host.is_empty() || host == OBFUSCATED {
        return Ok(None);
    }
    Regex::new(&format!("(?i){}", bounded(host))).map(Some)
}

fn term_pattern(terms: &[String]) -> Result<Option<Regex>, regex::Error> {
    if terms.is_empty() {
        return Ok(None);
    }
    let alternatives: Vec<String> = terms.iter().map(|t| bounded(t)).collect();
    Regex::new(&format!("(?i)(?:{})", alternatives.join("|"))).map(Some)
}

/// Escape `literal`, anchoring a word boundary only at an edge that is itself a
/// word character. `\b` next to `@` or `-` would never match at a word edge.
fn bounded(literal: &str) -> String {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let start = if is_word(literal.chars().next()) { r"\b" } else { "" };
    let end = if is_word(literal.chars().next_back()) { r"\b" } else { "" };
    format!("{}{}{}", start, regex::escape(literal), end)
}

/// Read protected terms (one per line; empty and `#` lines ignored).
pub fn read_terms(path: &Path) -> std::io::Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let f = fs::File::open(path)?;
    let mut terms = Vec::new();
    for line in std::io::BufReader::new(f).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        terms.push(line.to_string());
    }
    Ok(terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ResultBuilder;
    use serde_json::json;

    fn redactor() -> Redactor {
        Redactor::new().unwrap()
    }

    #[test]
    fn identity_keys_are_masked_at_any_depth() {
        let v = json!({
            "hostname": "build-01",
            "owner": { "User": "alice", "uid": 1000 },
            "wan_address": "203.0.113.9",
            "admins": { "username": ["bob", "carol"] }
        });
        let out = redactor().scrub_value(&v, None, None);
        assert_eq!(out["hostname"], json!(OBFUSCATED));
        assert_eq!(out["owner"]["User"], json!(OBFUSCATED));
        assert_eq!(out["owner"]["uid"], json!(1000));
        assert_eq!(out["wan_address"], json!(OBFUSCATED));
        assert_eq!(out["admins"]["username"], json!([OBFUSCATED, OBFUSCATED]));
    }

    #[test]
    fn gpu_uuid_and_home_paths() {
        let v = json!({
            "uuid": "GPU-5d1c2b3a-aaaa-bbbb-cccc-0123456789ab",
            "path": "/home/alice/.docker/config.json",
            "note": "/home/alice stays outside a path key"
        });
        let out = redactor().scrub_value(&v, None, None);
        assert_eq!(out["uuid"], json!("GPU-XXXXXX"));
        assert_eq!(out["path"], json!("/home/[OBFUSCATED]/.docker/config.json"));
        assert_eq!(out["note"], json!("/home/alice stays outside a path key"));
    }

    #[test]
    fn secrets_and_protected_terms() {
        let r = redactor()
            .with_terms(vec!["Vanguard".to_string(), " ".to_string()])
            .unwrap();
        assert_eq!(r.terms(), &["Vanguard".to_string()]);
        let text = "api_key=abcdefghijklmnopqrstuvwxyz with Bearer abcdefghijklmnopqrstuvwx for VANGUARD";
        assert_eq!(
            r.scrub_text(text, None),
            "api_key: REDACTED with Bearer REDACTED for [PROTECTED_TERM]"
        );
    }

    #[test]
    fn terms_with_punctuation_edges_still_match() {
        let r = redactor()
            .with_terms(vec!["@corp".to_string(), "web-01-".to_string(), "Vanguard".to_string()])
            .unwrap();
        assert_eq!(
            r.scrub_text("mail ops@corp.example from web-01-eu", None),
            "mail ops[PROTECTED_TERM].example from [PROTECTED_TERM]eu"
        );
        assert_eq!(r.scrub_text("Vanguards stay, vanguard goes", None), "Vanguards stay, [PROTECTED_TERM] goes");

        let host = host_pattern("-edge-").unwrap().unwrap();
        assert_eq!(r.scrub_text("node-edge-7", Some(&host)), "node[OBFUSCATED]7");
        let host = host_pattern("build-01").unwrap().unwrap();
        assert_eq!(r.scrub_text("build-01x build-01.", Some(&host)), "build-01x [OBFUSCATED].");
    }

    #[test]
    fn terms_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terms.txt");
        std::fs::write(&path, "# comment\n\nProjectX\n").unwrap();
        let r = Redactor::with_terms_file(&path).unwrap();
        assert_eq!(r.terms(), &["ProjectX".to_string()]);
        assert!(Redactor::with_terms_file(&dir.path().join("absent.txt"))
            .unwrap()
            .terms()
            .is_empty());
    }

    #[test]
    fn obfuscate_keeps_shape_and_hides_host() {
        let mut report = Report::new("build-01", 0);
        let mut b = ResultBuilder::new("host_info", 0, Path::new("t.log"));
        b.data(json!({"hostname": "build-01"}));
        b.narrate("Inspection of build-01 complete.", Vec::new());
        report.merge(b.finish()).unwrap();

        let out = redactor().obfuscate(&report).unwrap();
        verify_shape(&report, &out).unwrap();
        assert_eq!(out.host_id(), OBFUSCATED);
        match &out.items()[1].finding {
            Finding::Speech(u) => assert_eq!(u.text, "Inspection of [OBFUSCATED] complete."),
            other => panic!("unexpected finding {other:?}"),
        }
    }

    #[test]
    fn verify_shape_detects_dropped_items() {
        let mut report = Report::new("h", 0);
        report.record_failure("apps", "boom").unwrap();
        let empty = Report::new("h", 0);
        assert!(matches!(
            verify_shape(&report, &empty),
            Err(ObfuscationError::ShapeChanged(_))
        ));
    }
}
