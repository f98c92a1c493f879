// src/system/mod.rs

//! System descriptors, lifecycle actions and resolved records
//!
//! A *system* is a versioned bundle of files and shell scripts with declared
//! dependencies. The registry serves one [`SystemDescriptor`] per version;
//! resolution turns those into immutable [`ResolvedSystem`] records.

mod action;
mod dependency_map;
mod validate;

pub use action::{Action, ScriptRef, order_scripts};
pub use dependency_map::DependencyMap;
pub use validate::{ValidationIssue, validate};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// OS-specific dependency/runlist override
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsOverride {
    /// Extra dependencies (name -> range) for this OS
    #[serde(default)]
    pub dependencies: DependencyMap,

    /// Extra runlist entries for this OS, placed ahead of the declared runlist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runlist: Option<Vec<String>>,
}

/// One version of a system, as served by the registry or read from disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemDescriptor {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Dependencies (name -> version range), in declaration order
    #[serde(default)]
    pub dependencies: DependencyMap,

    /// Explicit dependency install order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runlist: Option<Vec<String>>,

    /// Lifecycle scripts under `scripts/`, tagged by name prefix
    #[serde(default)]
    pub scripts: Vec<String>,

    /// OS identifier -> override
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub os: BTreeMap<String, OsOverride>,

    /// Opaque settings merged into the script environment
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: serde_json::Map<String, serde_json::Value>,

    /// Where the packed artifact for this version lives (path or URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
}

impl SystemDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Dependencies merged with the override for `os` (if any)
    ///
    /// OS dependencies come first; a declared dependency on the same name
    /// keeps the OS range.
    pub fn dependencies_for(&self, os: Option<&str>) -> DependencyMap {
        let mut merged = DependencyMap::new();
        if let Some(over) = os.and_then(|os| self.os.get(os)) {
            for (name, range) in over.dependencies.iter() {
                merged.insert(name, range);
            }
        }
        for (name, range) in self.dependencies.iter() {
            if !merged.contains_key(name) {
                merged.insert(name, range);
            }
        }
        merged
    }

    /// Effective dependency order for `os`
    ///
    /// OS runlist entries (or OS dependency keys, when the override declares
    /// no runlist) come first, then the declared runlist. Without a declared
    /// runlist the dependency keys are used in declaration order, which also
    /// covers the implicit single-dependency case.
    pub fn runlist_for(&self, os: Option<&str>) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if !order.iter().any(|n| n == name) {
                order.push(name.to_string());
            }
        };

        if let Some(over) = os.and_then(|os| self.os.get(os)) {
            match &over.runlist {
                Some(runlist) => runlist.iter().for_each(|n| push(n)),
                None => over.dependencies.keys().for_each(&mut push),
            }
        }

        match &self.runlist {
            Some(runlist) => runlist.iter().for_each(|n| push(n)),
            None => self.dependencies.keys().for_each(&mut push),
        }

        order
    }
}

/// Full version metadata for one system name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetadata {
    pub name: String,

    /// Latest published version
    #[serde(default)]
    pub version: String,

    /// Every known version
    #[serde(default)]
    pub versions: BTreeMap<String, SystemDescriptor>,
}

impl SystemMetadata {
    /// Build metadata from a set of descriptors; `version` becomes the highest
    pub fn from_descriptors(name: impl Into<String>, descriptors: Vec<SystemDescriptor>) -> Self {
        let name = name.into();
        let latest = descriptors
            .iter()
            .filter_map(|d| crate::version::parse_version(&d.version).ok())
            .max()
            .map(|v| v.to_string())
            .unwrap_or_default();

        Self {
            name,
            version: latest,
            versions: descriptors
                .into_iter()
                .map(|d| (d.version.clone(), d))
                .collect(),
        }
    }
}

/// A system pinned to a concrete version during one resolution pass
///
/// Constructed once per traversal step and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSystem {
    pub name: String,
    pub version: semver::Version,
    /// Range this version was resolved from
    pub range: String,
    pub descriptor: SystemDescriptor,
}

impl ResolvedSystem {
    pub fn new(version: semver::Version, range: impl Into<String>, descriptor: SystemDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            version,
            range: range.into(),
            descriptor,
        }
    }

    /// Copy of this record with a pruned script list
    pub fn with_scripts(&self, scripts: Vec<String>) -> Self {
        let mut descriptor = self.descriptor.clone();
        descriptor.scripts = scripts;
        Self {
            name: self.name.clone(),
            version: self.version.clone(),
            range: self.range.clone(),
            descriptor,
        }
    }

    pub fn scripts(&self) -> &[String] {
        &self.descriptor.scripts
    }
}

impl fmt::Display for ResolvedSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}
