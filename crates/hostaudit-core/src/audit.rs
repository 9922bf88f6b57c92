//! Final stage of a run: obfuscate once, render every requested format, write artifacts.

use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::error::AuditError;
use crate::obfuscate::{verify_shape, Obfuscator};
use crate::render::{artifact_path, Format, Renderer};
use crate::report::Report;

/// Artifacts written and errors hit while publishing one report.
#[derive(Debug, Default)]
pub struct Publication {
    pub artifacts: Vec<(Format, PathBuf)>,
    pub errors: Vec<AuditError>,
}

impl Publication {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct Publisher {
    renderer: Box<dyn Renderer>,
    obfuscator: Option<Box<dyn Obfuscator>>,
    formats: Vec<Format>,
    report_dir: PathBuf,
}

impl Publisher {
    pub fn new(renderer: Box<dyn Renderer>, report_dir: impl Into<PathBuf>) -> Self {
        Self {
            renderer,
            obfuscator: None,
            formats: vec![Format::Html, Format::Json],
            report_dir: report_dir.into(),
        }
    }

    pub fn with_obfuscator(mut self, obfuscator: Box<dyn Obfuscator>) -> Self {
        self.obfuscator = Some(obfuscator);
        self
    }

    pub fn with_formats(mut self, formats: Vec<Format>) -> Self {
        self.formats = formats;
        self
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    /// Write `<report_dir>/<file_stem>.<ext>` for each format.
    ///
    /// When obfuscation fails nothing is written. A render or write failure for
    /// one format does not stop the others.
    pub fn publish(&self, report: &Report, file_stem: &str) -> Publication {
        let mut publication = Publication::default();

        let redacted;
        let outgoing = match &self.obfuscator {
            Some(obfuscator) => {
                match obfuscator
                    .obfuscate(report)
                    .and_then(|r| verify_shape(report, &r).map(|_| r))
                {
                    Ok(r) => {
                        redacted = r;
                        &redacted
                    }
                    Err(e) => {
                        error!(reason = %e, "Obfuscation failed; no artifacts written");
                        publication.errors.push(AuditError::Obfuscation(e));
                        return publication;
                    }
                }
            }
            None => report,
        };

        if let Err(e) = std::fs::create_dir_all(&self.report_dir) {
            publication.errors.push(AuditError::Io(e));
            return publication;
        }

        for &format in &self.formats {
            let bytes = match self.renderer.render(outgoing, format) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(%format, reason = %e, "Render failed");
                    publication.errors.push(AuditError::Render {
                        format: format.to_string(),
                        error: e,
                    });
                    continue;
                }
            };
            let path = artifact_path(&self.report_dir, file_stem, format);
            match std::fs::write(&path, &bytes) {
                Ok(()) => {
                    info!(%format, path = %path.display(), bytes = bytes.len(), "Artifact written");
                    publication.artifacts.push((format, path));
                }
                Err(e) => {
                    error!(%format, path = %path.display(), reason = %e, "Failed to write artifact");
                    publication.errors.push(AuditError::Io(e));
                }
            }
        }

        publication
    }
}
