// src/lifecycle/template.rs

//! In-place rendering of `{{ dotted.key }}` tokens under `templates/`

use super::config::{lookup, render_value};
use crate::error::{Error, Result};
use crate::registry::ConfigMap;
use regex::{Captures, Regex};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}").unwrap()
});

/// Substitute tokens in one string
///
/// Objects and arrays are substituted as their JSON text. Unknown keys are
/// left in place and returned so the caller can report them.
pub fn render_str(input: &str, config: &ConfigMap) -> (String, Vec<String>) {
    let mut missing = Vec::new();
    let rendered = TOKEN_RE.replace_all(input, |caps: &Captures| {
        let key = &caps[1];
        match lookup(config, key) {
            Some(value) => render_value(value),
            None => {
                missing.push(key.to_string());
                caps[0].to_string()
            }
        }
    });
    (rendered.into_owned(), missing)
}

/// Render every file under `dir` in place; returns the number rewritten
///
/// A missing directory renders nothing. Files that are not UTF-8 are skipped.
pub fn render_dir(dir: &Path, config: &ConfigMap) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }

    let mut rewritten = 0;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::IoError(format!("Failed to walk {}: {}", dir.display(), e)))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Ok(content) = fs::read_to_string(path) else {
            debug!("Skipping non-text template {}", path.display());
            continue;
        };

        let (rendered, missing) = render_str(&content, config);
        for key in missing {
            warn!("{}: no configuration value for '{}'", path.display(), key);
        }
        if rendered != content {
            fs::write(path, rendered)
                .map_err(|e| Error::IoError(format!("Failed to write {}: {}", path.display(), e)))?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}
