// src/resolver/mod.rs

//! Dependency resolution
//!
//! Turns root specifiers (`name` or `name@range`) into either a nested
//! [`DependencyTree`] or a flat, install-ordered runlist. Every name is
//! pinned to the highest registry version satisfying its range.
//!
//! Runlist construction: each root is appended, then its dependencies are
//! unshifted to the front of the list in reverse dependency order, each one
//! followed by its own dependencies. A name that is resolved again replaces
//! its earlier entry, so dependencies always precede dependents and no name
//! appears twice.

mod filter;

pub use filter::{filter_runlist, localize_runlist};

use crate::error::{Error, Result};
use crate::progress::{Event, SharedSink};
use crate::registry::Registry;
use crate::system::{ResolvedSystem, SystemDescriptor, SystemMetadata, validate};
use crate::version::{VersionRange, max_satisfying, parse_version, split_specifier};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// A resolved system and its resolved dependencies, in dependency order
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyTree {
    pub system: ResolvedSystem,
    pub dependencies: Vec<DependencyTree>,
}

impl DependencyTree {
    /// Find a node by name anywhere in the tree
    pub fn find(&self, name: &str) -> Option<&DependencyTree> {
        if self.system.name == name {
            return Some(self);
        }
        self.dependencies.iter().find_map(|d| d.find(name))
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{}{}", "  ".repeat(depth), self.system)?;
        for dep in &self.dependencies {
            dep.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for DependencyTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Builds dependency trees and runlists from registry metadata
pub struct DependencyGraphBuilder<'a> {
    registry: &'a dyn Registry,
    events: SharedSink,
    strict: bool,
}

impl<'a> DependencyGraphBuilder<'a> {
    pub fn new(registry: &'a dyn Registry, events: SharedSink) -> Self {
        Self {
            registry,
            events,
            strict: false,
        }
    }

    /// Raise descriptor validation issues as `InvalidSystem` instead of warning
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Resolve each root into a nested dependency tree
    pub fn dependencies(&self, names: &[String], os: Option<&str>) -> Result<Vec<DependencyTree>> {
        let mut pass = Pass::new(self, os);
        let mut trees = Vec::with_capacity(names.len());
        for spec in names {
            let (name, range) = split_specifier(spec)?;
            let system = pass.resolve(&name, &range)?;
            let mut ancestors = vec![name];
            trees.push(pass.tree(system, &mut ancestors)?);
        }
        Ok(trees)
    }

    /// Resolve roots into a flat install order; roots come last
    ///
    /// Expansion stops below `max_depth` (roots are depth 0); the partial
    /// runlist is returned without error.
    pub fn runlist(
        &self,
        names: &[String],
        os: Option<&str>,
        max_depth: Option<usize>,
    ) -> Result<Vec<ResolvedSystem>> {
        let mut pass = Pass::new(self, os);
        let mut list: Vec<ResolvedSystem> = Vec::new();

        for spec in names {
            let (name, range) = split_specifier(spec)?;
            let system = pass.resolve(&name, &range)?;
            // A root already pulled in by an earlier root keeps its place
            match list.iter().position(|s| s.name == name) {
                Some(pos) => list[pos] = system.clone(),
                None => list.push(system.clone()),
            }
            let mut ancestors = vec![name];
            pass.unshift_dependencies(&system, 0, max_depth, &mut list, &mut ancestors)?;
        }

        debug!(
            "Runlist: {}",
            list.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
        );
        Ok(list)
    }
}

/// State for one resolution pass: metadata is fetched once per name
struct Pass<'b, 'a> {
    builder: &'b DependencyGraphBuilder<'a>,
    os: Option<&'b str>,
    metadata: HashMap<String, SystemMetadata>,
}

impl<'b, 'a> Pass<'b, 'a> {
    fn new(builder: &'b DependencyGraphBuilder<'a>, os: Option<&'b str>) -> Self {
        Self {
            builder,
            os,
            metadata: HashMap::new(),
        }
    }

    fn metadata(&mut self, name: &str) -> Result<&SystemMetadata> {
        if !self.metadata.contains_key(name) {
            let meta = self.builder.registry.get_system(name)?;
            self.builder.events.emit(Event::ReadMetadata {
                name: name.to_string(),
            });
            self.metadata.insert(name.to_string(), meta);
        }
        self.metadata
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn resolve(&mut self, name: &str, range: &VersionRange) -> Result<ResolvedSystem> {
        let meta = self.metadata(name)?;
        let version = max_satisfying(name, meta.versions.keys().map(String::as_str), range)?;

        let mut descriptor: SystemDescriptor = meta
            .versions
            .iter()
            .find(|(key, _)| parse_version(key).is_ok_and(|v| v == version))
            .map(|(_, d)| d.clone())
            .ok_or_else(|| Error::NotFound(format!("{}@{}", name, version)))?;
        if descriptor.name.is_empty() {
            descriptor.name = name.to_string();
        }

        let issues = validate(&descriptor, self.os);
        if !issues.is_empty() {
            let reason = issues
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            if self.builder.strict {
                return Err(Error::InvalidSystem {
                    name: name.to_string(),
                    reason,
                });
            }
            warn!("{}@{}: {}", name, version, reason);
        }

        self.builder.events.emit(Event::Resolved {
            name: name.to_string(),
            version: version.to_string(),
        });
        Ok(ResolvedSystem::new(version, range.as_str(), descriptor))
    }

    /// Dependency names in install order, with their ranges
    ///
    /// Dependencies left out of an explicit runlist are appended so they
    /// still get installed.
    fn ordered_dependencies(&self, system: &ResolvedSystem) -> Vec<(String, String)> {
        let deps = system.descriptor.dependencies_for(self.os);
        let mut order = system.descriptor.runlist_for(self.os);
        for name in deps.keys() {
            if !order.iter().any(|n| n == name) {
                order.push(name.to_string());
            }
        }

        order
            .into_iter()
            .filter_map(|name| match deps.get(&name) {
                Some(range) => Some((name.clone(), range.to_string())),
                None => {
                    debug!("{}: runlist entry {} has no dependency range, skipping", system.name, name);
                    None
                }
            })
            .collect()
    }

    fn check_cycle(system: &ResolvedSystem, dep: &str, ancestors: &[String]) -> Result<()> {
        if ancestors.iter().any(|a| a == dep) {
            return Err(Error::InvalidSystem {
                name: system.name.clone(),
                reason: format!(
                    "dependency cycle: {} -> {}",
                    ancestors.join(" -> "),
                    dep
                ),
            });
        }
        Ok(())
    }

    fn tree(&mut self, system: ResolvedSystem, ancestors: &mut Vec<String>) -> Result<DependencyTree> {
        let mut dependencies = Vec::new();
        for (name, range) in self.ordered_dependencies(&system) {
            Self::check_cycle(&system, &name, ancestors)?;
            let dep = self.resolve(&name, &VersionRange::parse(&range)?)?;
            ancestors.push(name);
            dependencies.push(self.tree(dep, ancestors)?);
            ancestors.pop();
        }
        Ok(DependencyTree {
            system,
            dependencies,
        })
    }

    fn unshift_dependencies(
        &mut self,
        system: &ResolvedSystem,
        depth: usize,
        max_depth: Option<usize>,
        list: &mut Vec<ResolvedSystem>,
        ancestors: &mut Vec<String>,
    ) -> Result<()> {
        if max_depth.is_some_and(|max| depth >= max) {
            return Ok(());
        }

        for (name, range) in self.ordered_dependencies(system).into_iter().rev() {
            Self::check_cycle(system, &name, ancestors)?;
            let dep = self.resolve(&name, &VersionRange::parse(&range)?)?;

            // Last resolution wins
            list.retain(|s| s.name != name);
            list.insert(0, dep.clone());

            ancestors.push(name);
            self.unshift_dependencies(&dep, depth + 1, max_depth, list, ancestors)?;
            ancestors.pop();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentEvents;
    use crate::registry::MemoryRegistry;
    use crate::system::OsOverride;

    fn system(name: &str, version: &str, deps: &[(&str, &str)], runlist: Option<&[&str]>) -> SystemDescriptor {
        let mut d = SystemDescriptor::new(name, version);
        for (n, r) in deps {
            d.dependencies.insert(*n, *r);
        }
        d.runlist = runlist.map(|r| r.iter().map(|s| s.to_string()).collect());
        d
    }

    fn registry() -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        registry.insert(system("a", "0.0.1", &[], None));
        registry.insert(system("b", "0.2.0", &[], None));
        registry.insert(system("b", "0.1.0", &[], None));
        registry.insert(system("c", "0.3.0", &[("b", "0.2.0")], None));
        registry.insert(system(
            "two-deps",
            "0.1.0",
            &[("a", "0.0.1"), ("b", "0.2.0")],
            Some(&["b", "a"]),
        ));
        registry.insert(system("single-dep", "0.1.0", &[("a", "0.0.1")], None));
        registry.insert(system(
            "nested",
            "1.0.2",
            &[("a", "0.0.1"), ("b", "0.2.0"), ("c", "0.3.0")],
            Some(&["c", "b", "a"]),
        ));

        let mut ubuntu = system("single-ubuntu-dep", "0.0.1", &[("a", "0.0.1")], None);
        let mut over = OsOverride::default();
        over.dependencies.insert("b", "0.2.0");
        ubuntu.os.insert("ubuntu".to_string(), over);
        registry.insert(ubuntu);

        let mut ordered = system("os-ordered", "1.0.0", &[("a", "0.0.1"), ("b", "0.2.0")], Some(&["a", "b"]));
        let over = OsOverride {
            runlist: Some(vec!["b".to_string()]),
            ..Default::default()
        };
        ordered.os.insert("fedora".to_string(), over);
        registry.insert(ordered);

        registry.insert(system("loop-a", "1.0.0", &[("loop-b", "*")], None));
        registry.insert(system("loop-b", "1.0.0", &[("loop-a", "*")], None));
        registry
    }

    fn names(list: &[ResolvedSystem]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn roots(specs: &[&str]) -> Vec<String> {
        specs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_explicit_runlist_order() {
        let registry = registry();
        let builder = DependencyGraphBuilder::new(&registry, SilentEvents::shared());
        let list = builder.runlist(&roots(&["two-deps"]), None, None).unwrap();
        assert_eq!(names(&list), vec!["b@0.2.0", "a@0.0.1", "two-deps@0.1.0"]);
    }

    #[test]
    fn test_implicit_single_dependency() {
        let registry = registry();
        let builder = DependencyGraphBuilder::new(&registry, SilentEvents::shared());
        let list = builder.runlist(&roots(&["single-dep"]), None, None).unwrap();
        assert_eq!(names(&list), vec!["a@0.0.1", "single-dep@0.1.0"]);
    }

    #[test]
    fn test_nested_dependency_deduplicated() {
        let registry = registry();
        let builder = DependencyGraphBuilder::new(&registry, SilentEvents::shared());
        let list = builder.runlist(&roots(&["nested"]), None, None).unwrap();
        assert_eq!(
            names(&list),
            vec!["b@0.2.0", "c@0.3.0", "a@0.0.1", "nested@1.0.2"]
        );
    }

    #[test]
    fn test_os_dependency() {
        let registry = registry();
        let builder = DependencyGraphBuilder::new(&registry, SilentEvents::shared());

        let list = builder
            .runlist(&roots(&["single-ubuntu-dep"]), Some("ubuntu"), None)
            .unwrap();
        assert_eq!(
            names(&list),
            vec!["b@0.2.0", "a@0.0.1", "single-ubuntu-dep@0.0.1"]
        );

        let list = builder.runlist(&roots(&["single-ubuntu-dep"]), None, None).unwrap();
        assert_eq!(names(&list), vec!["a@0.0.1", "single-ubuntu-dep@0.0.1"]);
    }

    #[test]
    fn test_os_runlist_entries_come_first() {
        let registry = registry();
        let builder = DependencyGraphBuilder::new(&registry, SilentEvents::shared());

        let list = builder.runlist(&roots(&["os-ordered"]), Some("fedora"), None).unwrap();
        assert_eq!(names(&list), vec!["b@0.2.0", "a@0.0.1", "os-ordered@1.0.0"]);

        let list = builder.runlist(&roots(&["os-ordered"]), Some("ubuntu"), None).unwrap();
        assert_eq!(names(&list), vec!["a@0.0.1", "b@0.2.0", "os-ordered@1.0.0"]);
    }

    #[test]
    fn test_max_depth_truncates() {
        let registry = registry();
        let builder = DependencyGraphBuilder::new(&registry, SilentEvents::shared());

        let list = builder.runlist(&roots(&["nested"]), None, Some(0)).unwrap();
        assert_eq!(names(&list), vec!["nested@1.0.2"]);

        let list = builder.runlist(&roots(&["nested"]), None, Some(1)).unwrap();
        assert_eq!(names(&list), vec!["c@0.3.0", "b@0.2.0", "a@0.0.1", "nested@1.0.2"]);
    }

    #[test]
    fn test_root_range_specifier() {
        let registry = registry();
        let builder = DependencyGraphBuilder::new(&registry, SilentEvents::shared());

        let list = builder.runlist(&roots(&["b@<0.2.0"]), None, None).unwrap();
        assert_eq!(names(&list), vec!["b@0.1.0"]);
        assert_eq!(list[0].range, "<0.2.0");

        let err = builder.runlist(&roots(&["b@>=1.0.0"]), None, None).unwrap_err();
        assert!(matches!(err, Error::NoSatisfyingVersion { .. }));
    }

    #[test]
    fn test_unknown_system() {
        let registry = registry();
        let builder = DependencyGraphBuilder::new(&registry, SilentEvents::shared());
        let err = builder.runlist(&roots(&["nope"]), None, None).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_cycle_is_invalid() {
        let registry = registry();
        let builder = DependencyGraphBuilder::new(&registry, SilentEvents::shared());
        let err = builder.runlist(&roots(&["loop-a"]), None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidSystem { .. }));
    }

    #[test]
    fn test_strict_validation() {
        let registry = registry();
        registry.insert(system("sloppy", "1.0.0", &[("a", "0.0.1")], Some(&["a", "ghost"])));

        let lenient = DependencyGraphBuilder::new(&registry, SilentEvents::shared());
        let list = lenient.runlist(&roots(&["sloppy"]), None, None).unwrap();
        assert_eq!(names(&list), vec!["a@0.0.1", "sloppy@1.0.0"]);

        let strict = DependencyGraphBuilder::new(&registry, SilentEvents::shared()).strict(true);
        let err = strict.runlist(&roots(&["sloppy"]), None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidSystem { ref name, .. } if name == "sloppy"));
    }

    #[test]
    fn test_dependency_tree() {
        let registry = registry();
        let builder = DependencyGraphBuilder::new(&registry, SilentEvents::shared());
        let trees = builder.dependencies(&roots(&["nested"]), None).unwrap();

        let tree = &trees[0];
        let children: Vec<&str> = tree.dependencies.iter().map(|d| d.system.name.as_str()).collect();
        assert_eq!(children, vec!["c", "b", "a"]);
        assert_eq!(tree.find("c").unwrap().dependencies[0].system.to_string(), "b@0.2.0");
        assert_eq!(
            tree.to_string(),
            "nested@1.0.2\n  c@0.3.0\n    b@0.2.0\n  b@0.2.0\n  a@0.0.1\n"
        );
    }

    #[test]
    fn test_multiple_roots_stay_last() {
        let registry = registry();
        let builder = DependencyGraphBuilder::new(&registry, SilentEvents::shared());
        let list = builder.runlist(&roots(&["single-dep", "c"]), None, None).unwrap();
        assert_eq!(names(&list), vec!["b@0.2.0", "a@0.0.1", "single-dep@0.1.0", "c@0.3.0"]);
    }
}
