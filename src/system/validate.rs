// src/system/validate.rs

//! Descriptor validation
//!
//! Issues are returned, not raised: the resolver decides whether they are
//! warnings (lenient mode) or `InvalidSystem` errors (strict mode).

use super::SystemDescriptor;
use std::fmt;

/// A single problem found in a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// `runlist` names a system that is not a dependency
    RunlistNotInDependencies(String),
    /// A dependency is missing from an explicit `runlist`
    DependencyNotInRunlist(String),
    /// A script whose name matches no lifecycle action
    UntaggedScript(String),
    /// `version` is not a valid semantic version
    BadVersion(String),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunlistNotInDependencies(n) => {
                write!(f, "runlist entry '{}' is not declared in dependencies", n)
            }
            Self::DependencyNotInRunlist(n) => {
                write!(f, "dependency '{}' is missing from runlist", n)
            }
            Self::UntaggedScript(s) => write!(f, "script '{}' matches no lifecycle action", s),
            Self::BadVersion(v) => write!(f, "version '{}' is not a valid semantic version", v),
        }
    }
}

/// Check a descriptor against the dependencies/runlist it will resolve with
///
/// Runlist and dependency names are compared after merging the override for
/// `os`, so an entry supplied only by the OS override is valid.
pub fn validate(descriptor: &SystemDescriptor, os: Option<&str>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if crate::version::parse_version(&descriptor.version).is_err() {
        issues.push(ValidationIssue::BadVersion(descriptor.version.clone()));
    }

    let dependencies = descriptor.dependencies_for(os);
    let os_runlist = os
        .and_then(|os| descriptor.os.get(os))
        .and_then(|o| o.runlist.clone())
        .unwrap_or_default();

    if let Some(runlist) = &descriptor.runlist {
        for name in runlist.iter().chain(os_runlist.iter()) {
            if !dependencies.contains_key(name) {
                issues.push(ValidationIssue::RunlistNotInDependencies(name.clone()));
            }
        }
        for name in dependencies.keys() {
            if !runlist.iter().chain(os_runlist.iter()).any(|n| n == name)
                && !os_declares(descriptor, os, name)
            {
                issues.push(ValidationIssue::DependencyNotInRunlist(name.to_string()));
            }
        }
    }

    for script in &descriptor.scripts {
        if super::Action::for_script(script).is_none() {
            issues.push(ValidationIssue::UntaggedScript(script.clone()));
        }
    }

    issues
}

/// OS dependencies without an OS runlist are ordered implicitly
fn os_declares(descriptor: &SystemDescriptor, os: Option<&str>, name: &str) -> bool {
    os.and_then(|os| descriptor.os.get(os))
        .is_some_and(|o| o.runlist.is_none() && o.dependencies.contains_key(name))
}
