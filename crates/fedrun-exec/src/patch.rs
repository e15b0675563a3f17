use std::{
    fs, io,
    ops::Range,
    path::PathBuf,
};

use tracing::{debug, warn};

use crate::error::PatchError;

/// Section of the app configuration read by training code at run time.
pub const RUN_CONFIG_SECTION: &str = "[tool.flwr.app.config]";
/// Key carrying the id of the run record the training code reports against.
pub const RUN_ID_KEY: &str = "current-run-id";

/// Result of one [`ConfigPatcher::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// File or section absent; nothing touched.
    Skipped,
    /// Already in the requested state.
    Unchanged,
    Written,
}

/// Line-oriented view of a TOML-like document.
///
/// Only section headers and `key = value` lines are interpreted; everything
/// else is carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    lines: Vec<String>,
}

impl Document {
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(String::from).collect(),
        }
    }

    /// Body of the section whose header line is `header`, up to the next header.
    fn section(&self, header: &str) -> Option<Range<usize>> {
        let header = header.trim();
        let start = self.lines.iter().position(|l| l.trim() == header)? + 1;
        let end = self.lines[start..]
            .iter()
            .position(|l| l.starts_with('['))
            .map_or(self.lines.len(), |offset| start + offset);
        Some(start..end)
    }

    /// Line assigning `key` inside `body`.
    ///
    /// Stricter than a bare prefix match: the key must be followed by `=`, so
    /// `current-run-id-old = ...` is not taken for `current-run-id`.
    fn key_line(&self, body: Range<usize>, key: &str) -> Option<usize> {
        body.into_iter().find(|&i| {
            self.lines[i]
                .trim()
                .strip_prefix(key)
                .is_some_and(|rest| rest.trim_start().starts_with('='))
        })
    }

    /// Set `key` in section `header` to the string `value`, or remove it when `None`.
    ///
    /// Returns `None` when the section does not exist, otherwise whether the
    /// document changed.
    pub fn set(&mut self, header: &str, key: &str, value: Option<&str>) -> Option<bool> {
        let body = self.section(header)?;
        let existing = self.key_line(body.clone(), key);

        let changed = match (existing, value) {
            (Some(i), Some(value)) => {
                let line = assignment(key, value);
                if self.lines[i] == line {
                    false
                } else {
                    self.lines[i] = line;
                    true
                }
            }
            (Some(i), None) => {
                self.lines.remove(i);
                true
            }
            (None, Some(value)) => {
                let mut at = body.end;
                while at > body.start && self.lines[at - 1].trim().is_empty() {
                    at -= 1;
                }
                self.lines.insert(at, assignment(key, value));
                true
            }
            (None, None) => false,
        };
        Some(changed)
    }

    /// Lines joined with `\n`, with a single trailing newline.
    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

fn assignment(key: &str, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("{key} = \"{escaped}\"")
}

/// Keeps one key of one section of a configuration file in step with a correlation id.
#[derive(Debug, Clone)]
pub struct ConfigPatcher {
    path: PathBuf,
    section: String,
    key: String,
}

impl ConfigPatcher {
    pub fn new(path: impl Into<PathBuf>, section: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            section: section.into(),
            key: key.into(),
        }
    }

    /// Patcher for the run id key of the app config section.
    pub fn for_run_id(path: impl Into<PathBuf>) -> Self {
        Self::new(path, RUN_CONFIG_SECTION, RUN_ID_KEY)
    }

    /// Rewrite the file so the key holds `id`, or drop the key when `id` is `None`.
    pub fn apply(&self, id: Option<&str>) -> Result<PatchOutcome, PatchError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PatchOutcome::Skipped),
            Err(source) => {
                return Err(PatchError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut doc = Document::parse(&text);
        match doc.set(&self.section, &self.key, id) {
            None => Ok(PatchOutcome::Skipped),
            Some(false) => Ok(PatchOutcome::Unchanged),
            Some(true) => {
                fs::write(&self.path, doc.render()).map_err(|source| PatchError::Write {
                    path: self.path.clone(),
                    source,
                })?;
                Ok(PatchOutcome::Written)
            }
        }
    }

    /// Best-effort [`ConfigPatcher::apply`] off the async executor. Failures are logged.
    pub async fn set_correlation_id(&self, id: Option<&str>) {
        let patcher = self.clone();
        let owned = id.map(String::from);
        let result = tokio::task::spawn_blocking(move || patcher.apply(owned.as_deref()))
            .await
            .unwrap_or_else(|e| Err(PatchError::Aborted(e.to_string())));

        match result {
            Ok(outcome) => debug!(path = %self.path.display(), key = %self.key, ?outcome, "config patched"),
            Err(e) => warn!(error = %e, key = %self.key, "failed to patch config"),
        }
    }
}
