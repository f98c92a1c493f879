// src/install/history.rs

//! Per-system history ledger (`<installRoot>/<name>/history.json`)
//!
//! The ledger is an append-only log ordered by a monotonic sequence number.
//! Timestamps are informational only.
//!
//! Executed-ness is judged relative to the most recent completed uninstall:
//! only entries strictly after it count.

use crate::error::{Error, Result};
use crate::system::Action;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

/// What a history entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    /// Files copied from the cache into the install directory
    Copy,
    Install,
    Configure,
    Update,
    Start,
    Uninstall,
}

impl HistoryAction {
    pub fn lifecycle(&self) -> Option<Action> {
        match self {
            Self::Copy => None,
            Self::Install => Some(Action::Install),
            Self::Configure => Some(Action::Configure),
            Self::Update => Some(Action::Update),
            Self::Start => Some(Action::Start),
            Self::Uninstall => Some(Action::Uninstall),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Install => "install",
            Self::Configure => "configure",
            Self::Update => "update",
            Self::Start => "start",
            Self::Uninstall => "uninstall",
        }
    }
}

impl From<Action> for HistoryAction {
    fn from(action: Action) -> Self {
        match action {
            Action::Install => Self::Install,
            Action::Configure => Self::Configure,
            Action::Update => Self::Update,
            Action::Start => Self::Start,
            Action::Uninstall => Self::Uninstall,
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Start,
    End,
    /// The script exited non-zero or could not be spawned
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub action: HistoryAction,
    pub phase: Phase,
    /// Script that produced the entry; absent for copies and markers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLedger {
    /// Range the system was originally requested with, for roots
    #[serde(default)]
    pub requested: Option<String>,

    #[serde(default)]
    next_seq: u64,

    #[serde(default)]
    entries: Vec<HistoryEntry>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a ledger file; a missing file is an empty ledger
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::ParseError(format!("Corrupt history {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::IoError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Write through a temp file in the same directory, then rename
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| Error::IoError(format!("No parent directory for {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, self)?;
        temp.write_all(b"\n")?;
        temp.as_file().sync_all()?;
        temp.persist(path)
            .map_err(|e| Error::IoError(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Append an entry and return it
    pub fn record(
        &mut self,
        version: &str,
        action: HistoryAction,
        phase: Phase,
        script: Option<&str>,
    ) -> &HistoryEntry {
        let entry = HistoryEntry {
            seq: self.next_seq,
            timestamp: Utc::now(),
            version: version.to_string(),
            action,
            phase,
            script: script.map(str::to_string),
        };
        self.next_seq += 1;
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sequence number of the most recent completed uninstall
    pub fn last_uninstall(&self) -> Option<u64> {
        self.entries
            .iter()
            .filter(|e| e.action == HistoryAction::Uninstall && e.phase == Phase::End)
            .map(|e| e.seq)
            .max()
    }

    /// Entries strictly after the most recent completed uninstall
    fn since_uninstall(&self) -> impl Iterator<Item = &HistoryEntry> {
        let boundary = self.last_uninstall();
        self.entries
            .iter()
            .filter(move |e| boundary.is_none_or(|b| e.seq > b))
    }

    /// Whether `script` (tagged `action`) has completed since the last uninstall
    ///
    /// Entries recorded without a script name count for every script of
    /// their action.
    pub fn has_completed(&self, action: Action, script: &str) -> bool {
        let action = HistoryAction::from(action);
        self.since_uninstall().any(|e| {
            e.action == action
                && e.phase == Phase::End
                && e.script.as_deref().is_none_or(|s| s == script)
        })
    }

    /// Lifecycle actions with at least one completed entry since the last uninstall
    pub fn completed_actions(&self) -> BTreeSet<Action> {
        self.since_uninstall()
            .filter(|e| e.phase == Phase::End)
            .filter_map(|e| e.action.lifecycle())
            .filter(|a| *a != Action::Uninstall)
            .collect()
    }

    /// `start` entries never closed by an `end` or `failed` entry
    ///
    /// These are left behind when the process dies mid-script. They never
    /// count as executed; callers surface them as warnings.
    pub fn dangling(&self) -> Vec<&HistoryEntry> {
        let mut open: Vec<&HistoryEntry> = Vec::new();
        for entry in &self.entries {
            match entry.phase {
                Phase::Start => open.push(entry),
                Phase::End | Phase::Failed => {
                    if let Some(pos) = open.iter().rposition(|s| {
                        s.action == entry.action && s.version == entry.version && s.script == entry.script
                    }) {
                        open.remove(pos);
                    }
                }
            }
        }
        open
    }
}
