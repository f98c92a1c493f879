// src/version/mod.rs

//! Version ranges and "highest satisfying version" resolution
//!
//! System descriptors declare dependencies with npm-style ranges. Those are
//! translated onto `semver::VersionReq`, with two differences from Cargo's
//! defaults that descriptors rely on:
//!
//! - a bare version (`"0.2.0"`) pins exactly, it is not a caret range
//! - `||` unions, hyphen ranges (`"1.0.0 - 1.4.0"`) and space-separated
//!   comparators (`">= 1.0.0 < 2.0.0"`) are accepted

use crate::error::{Error, Result};
use semver::{Version, VersionReq};
use std::fmt;

/// A parsed version range: satisfied when any alternative matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// Parse a range string
    ///
    /// Examples:
    /// - "0.2.0" → =0.2.0
    /// - "^1.2" → >=1.2.0, <2.0.0
    /// - ">= 1.0 < 2.0" → >=1.0, <2.0
    /// - "1.0.0 - 1.4.0" → >=1.0.0, <=1.4.0
    /// - "1.x || 3.0.0" → either
    /// - "*", "latest", "" → anything
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s.trim().to_string();
        let mut alternatives = Vec::new();

        for part in raw.split("||") {
            alternatives.push(parse_alternative(part.trim()).map_err(|e| {
                Error::ParseError(format!("Invalid version range '{}': {}", raw, e))
            })?);
        }

        Ok(Self { raw, alternatives })
    }

    /// Range matching every version
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            alternatives: vec![VersionReq::STAR],
        }
    }

    /// Check if a version satisfies this range
    pub fn satisfies(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// The range as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            write!(f, "*")
        } else {
            write!(f, "{}", self.raw)
        }
    }
}

fn parse_alternative(s: &str) -> std::result::Result<VersionReq, semver::Error> {
    if s.is_empty() || s == "*" || s == "latest" || s.eq_ignore_ascii_case("x") {
        return Ok(VersionReq::STAR);
    }

    // A bare version is an exact pin
    let bare = s.strip_prefix('v').unwrap_or(s);
    if let Ok(version) = Version::parse(bare) {
        return VersionReq::parse(&format!("={}", version));
    }

    if let Some((low, high)) = s.split_once(" - ") {
        return VersionReq::parse(&format!(">={}, <={}", low.trim(), high.trim()));
    }

    VersionReq::parse(&join_comparators(s))
}

/// Turn `">= 1.0 < 2.0"` into `">=1.0, <2.0"`
fn join_comparators(s: &str) -> String {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op: Option<&str> = None;

    for token in s.split(|c: char| c.is_whitespace() || c == ',') {
        if token.is_empty() {
            continue;
        }
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op = Some(token);
            continue;
        }
        match pending_op.take() {
            Some(op) => comparators.push(format!("{}{}", op, token)),
            None => comparators.push(token.to_string()),
        }
    }

    comparators.join(", ")
}

/// Parse a concrete system version
pub fn parse_version(s: &str) -> Result<Version> {
    let trimmed = s.trim();
    Version::parse(trimmed.strip_prefix('v').unwrap_or(trimmed))
        .map_err(|e| Error::ParseError(format!("Invalid version '{}': {}", s, e)))
}

/// Return the highest version in `versions` that satisfies `range`
///
/// Unparseable version strings are skipped. Fails with `NoSatisfyingVersion`
/// when the set is empty or nothing matches.
pub fn max_satisfying<'a, I>(name: &str, versions: I, range: &VersionRange) -> Result<Version>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .filter_map(|v| parse_version(v).ok())
        .filter(|v| range.satisfies(v))
        .max()
        .ok_or_else(|| Error::NoSatisfyingVersion {
            name: name.to_string(),
            range: range.to_string(),
        })
}

/// Split a root specifier `name@range` into its parts
///
/// A missing range means "any version".
pub fn split_specifier(spec: &str) -> Result<(String, VersionRange)> {
    match spec.split_once('@') {
        Some((name, range)) if !name.is_empty() => Ok((name.to_string(), VersionRange::parse(range)?)),
        Some(_) => Err(Error::ParseError(format!("Invalid system specifier '{}'", spec))),
        None => Ok((spec.to_string(), VersionRange::any())),
    }
}
