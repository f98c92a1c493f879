// src/archive/ignore.rs

//! Ignore rules for packing
//!
//! Rules come from `.quillignore` or, when that file is absent,
//! `.gitignore` at the root of the packed directory. Supported syntax is
//! the common gitignore subset: `#` comments, `!` negation, a leading `/`
//! anchors to the root, a trailing `/` matches directories only, and
//! patterns without a `/` match a file name at any depth.

use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Ignore file names, in lookup order
pub const IGNORE_FILES: [&str; 2] = [".quillignore", ".gitignore"];

/// VCS metadata and OS junk that is never packed
const JUNK: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "CVS",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "node_modules",
    "npm-debug.log",
    "._*",
    "*.swp",
    "*~",
];

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct Rule {
    pattern: Pattern,
    negated: bool,
    dir_only: bool,
    anchored: bool,
}

impl Rule {
    fn parse(line: &str) -> Option<Rule> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let (negated, line) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let (dir_only, line) = match line.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let anchored = line.contains('/');
        let line = line.trim_start_matches('/');

        match Pattern::new(line) {
            Ok(pattern) => Some(Rule {
                pattern,
                negated,
                dir_only,
                anchored,
            }),
            Err(e) => {
                warn!("Skipping invalid ignore pattern '{}': {}", line, e);
                None
            }
        }
    }

    fn matches(&self, relative: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.anchored {
            self.pattern.matches_with(relative, MATCH)
        } else {
            let file_name = relative.rsplit('/').next().unwrap_or(relative);
            self.pattern.matches_with(file_name, MATCH)
        }
    }
}

/// Compiled ignore rules for one directory tree
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<Rule>,
}

impl IgnoreRules {
    /// Junk rules only
    pub fn junk() -> Self {
        Self::from_lines(JUNK.iter().copied())
    }

    /// Junk rules plus the first ignore file found under `root`
    pub fn load(root: &Path) -> Self {
        let mut rules = Self::junk();
        for name in IGNORE_FILES {
            let path = root.join(name);
            if let Ok(content) = fs::read_to_string(&path) {
                rules.rules.extend(content.lines().filter_map(Rule::parse));
                break;
            }
        }
        rules
    }

    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            rules: lines.into_iter().filter_map(Rule::parse).collect(),
        }
    }

    /// Whether a root-relative, `/`-separated path is ignored
    ///
    /// The last matching rule wins, so `!keep.log` after `*.log` re-includes.
    pub fn is_ignored(&self, relative: &str, is_dir: bool) -> bool {
        let mut ignored = false;
        for rule in &self.rules {
            if rule.matches(relative, is_dir) {
                ignored = !rule.negated;
            }
        }
        ignored
    }
}
