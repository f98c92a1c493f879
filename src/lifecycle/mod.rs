// src/lifecycle/mod.rs

//! Lifecycle engine
//!
//! Runs an action (`install`, `configure`, `update`, `start`, `uninstall`)
//! against a set of root systems:
//!
//! 1. Resolve the runlist through the registry
//! 2. Make sure every member is cached
//! 3. Copy members into the install store (uninstalling first on `--force`)
//! 4. Prune each member's scripts against its history
//! 5. Run the surviving scripts one system at a time, in runlist order
//!
//! Every script gets a `start` entry before it is spawned and an `end` (or
//! `failed`) entry after it exits. The first failure stops the invocation.

pub mod config;
mod executor;
pub mod template;

pub use executor::ScriptExecutor;

use crate::cache::{Cache, CacheRequest};
use crate::config::QuillConfig;
use crate::error::{Error, Result};
use crate::install::{HistoryAction, InstallStore, InstalledMap, InstalledSystem, Phase};
use crate::paths;
use crate::progress::{Event, SharedSink};
use crate::registry::{ConfigMap, Registry};
use crate::resolver::{DependencyGraphBuilder, filter_runlist, localize_runlist};
use crate::system::{Action, ResolvedSystem, order_scripts};
use crate::version::{parse_version, split_specifier};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Per-invocation knobs
#[derive(Debug, Clone, Default)]
pub struct LifecycleOptions {
    /// Re-run scripts regardless of history; for `install`, uninstall and
    /// reinstall every runlist member
    pub force: bool,
    /// Apply non-recursive actions to dependencies too; for `uninstall`,
    /// also remove dependencies nothing else needs
    pub recursive: bool,
    /// OS identifier override
    pub os: Option<String>,
    pub max_depth: Option<usize>,
    /// Local `key=value` overrides, highest precedence
    pub overrides: ConfigMap,
    /// Remote config sets merged in the order given
    pub config_sets: Vec<String>,
    /// Skip rendering `templates/` before configure scripts
    pub no_templates: bool,
}

/// One script that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedScript {
    pub system: String,
    pub version: String,
    pub script: String,
}

/// Outcome of a lifecycle invocation
#[derive(Debug, Clone)]
pub struct RunReport {
    pub action: Action,
    /// Resolved runlist, in install order
    pub runlist: Vec<ResolvedSystem>,
    /// Scripts executed, in order
    pub executed: Vec<ExecutedScript>,
    /// Systems removed from the install store
    pub removed: Vec<String>,
}

impl RunReport {
    fn new(action: Action) -> Self {
        Self {
            action,
            runlist: Vec::new(),
            executed: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Names of the executed scripts, for quick assertions and display
    pub fn script_names(&self) -> Vec<&str> {
        self.executed.iter().map(|s| s.script.as_str()).collect()
    }
}

/// A root moved to a newer version by [`LifecycleEngine::converge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Convergence {
    pub name: String,
    pub from: Option<String>,
    pub to: String,
    /// Last action run against the new version
    pub action: Action,
}

pub struct LifecycleEngine<'a> {
    config: QuillConfig,
    registry: &'a dyn Registry,
    cache: Cache,
    store: InstallStore,
    events: SharedSink,
}

impl<'a> LifecycleEngine<'a> {
    pub fn new(config: &QuillConfig, registry: &'a dyn Registry, events: SharedSink) -> Self {
        let cache = Cache::new(&config.paths.cache, events.clone()).with_concurrency(config.batch.concurrency);
        let store = InstallStore::new(&config.paths.install, &config.paths.cache, events.clone());
        Self {
            config: config.clone(),
            registry,
            cache,
            store,
            events,
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn store(&self) -> &InstallStore {
        &self.store
    }

    pub fn registry(&self) -> &'a dyn Registry {
        self.registry
    }

    /// OS identifier for this invocation: option, config, then host
    pub fn os(&self, options: &LifecycleOptions) -> String {
        options.os.clone().unwrap_or_else(|| self.config.os())
    }

    /// Resolve a runlist with the configured OS, strictness and depth
    pub fn resolve(&self, targets: &[String], options: &LifecycleOptions) -> Result<Vec<ResolvedSystem>> {
        let os = self.os(options);
        let max_depth = options.max_depth.or(self.config.resolve.max_depth);
        DependencyGraphBuilder::new(self.registry, self.events.clone())
            .strict(self.config.resolve.strict)
            .runlist(targets, Some(&os), max_depth)
    }

    /// Run `action` against `targets` (`name` or `name@range`)
    pub fn run(&self, action: Action, targets: &[String], options: &LifecycleOptions) -> Result<RunReport> {
        let result = if action == Action::Uninstall {
            self.uninstall_inner(targets, options)
        } else {
            self.run_inner(action, targets, options)
        };
        result.map_err(|e| e.in_action(action.as_str(), targets.join(", ")))
    }

    /// Run uninstall scripts and remove the install directories of `targets`
    ///
    /// Works from install records only; the registry is not consulted.
    pub fn uninstall(&self, targets: &[String], options: &LifecycleOptions) -> Result<RunReport> {
        self.run(Action::Uninstall, targets, options)
    }

    fn run_inner(&self, action: Action, targets: &[String], options: &LifecycleOptions) -> Result<RunReport> {
        let mut report = RunReport::new(action);
        let runlist = self.resolve(targets, options)?;
        info!(
            "{} runlist: {}",
            action,
            runlist.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
        );

        let requests = runlist
            .iter()
            .map(CacheRequest::for_system)
            .collect::<Result<Vec<_>>>()?;
        self.cache.add(&requests)?;

        let installed = self.store.list()?;
        if options.force && action == Action::Install {
            // Dependents first
            for system in runlist.iter().rev() {
                if let Some(record) = installed.get(&system.name).filter(|r| r.is_installed()) {
                    self.remove_installed(record, options, &mut report)?;
                }
            }
            self.store.add(&runlist, true)?;
        } else {
            self.store.add(&localize_runlist(&runlist, &installed), false)?;
        }

        let mut roots = BTreeSet::new();
        for spec in targets {
            let (name, range) = split_specifier(spec)?;
            if action == Action::Install {
                self.store.set_requested(&name, range.as_str())?;
            }
            roots.insert(name);
        }

        let (effective, installed) = self.effective_runlist(&runlist)?;
        self.execute_runlist(action, &effective, &installed, &roots, options, &mut report)?;
        report.runlist = runlist;
        Ok(report)
    }

    /// Swap each resolved member for what is actually installed
    fn effective_runlist(&self, runlist: &[ResolvedSystem]) -> Result<(Vec<ResolvedSystem>, InstalledMap)> {
        let mut effective = Vec::with_capacity(runlist.len());
        let mut installed = InstalledMap::new();

        for system in runlist {
            let record = self.store.read(&system.name)?;
            let descriptor = record
                .system
                .clone()
                .ok_or_else(|| Error::NotFound(format!("{} is not installed", system.name)))?;

            let version = parse_version(&descriptor.version)?;
            if version == system.version {
                effective.push(system.clone());
            } else {
                warn!(
                    "{} is installed at {} but {} resolved to {}; use --force to replace it",
                    system.name, descriptor.version, system.range, system.version
                );
                effective.push(ResolvedSystem::new(version, system.range.clone(), descriptor));
            }
            installed.insert(system.name.clone(), record);
        }
        Ok((effective, installed))
    }

    fn execute_runlist(
        &self,
        action: Action,
        runlist: &[ResolvedSystem],
        installed: &InstalledMap,
        roots: &BTreeSet<String>,
        options: &LifecycleOptions,
        report: &mut RunReport,
    ) -> Result<()> {
        let history = if options.force { InstalledMap::new() } else { installed.clone() };
        for system in filter_runlist(action, runlist, &history, roots, options.recursive) {
            if system.scripts().is_empty() {
                debug!("Nothing to run for {}", system);
                continue;
            }
            self.execute_scripts(&system, options, report)?;
        }
        Ok(())
    }

    /// Deep-merge descriptor config, remote config sets, local config and overrides
    pub fn merged_config(&self, system: &ResolvedSystem, options: &LifecycleOptions) -> Result<ConfigMap> {
        let mut merged = system.descriptor.config.clone();
        for name in &options.config_sets {
            config::deep_merge(&mut merged, &self.registry.get_config(name)?);
        }
        config::deep_merge(&mut merged, &self.config.config);
        config::deep_merge(&mut merged, &options.overrides);
        Ok(merged)
    }

    fn execute_scripts(&self, system: &ResolvedSystem, options: &LifecycleOptions, report: &mut RunReport) -> Result<()> {
        let version = system.version.to_string();
        let dir = self.store.version_dir(&system.name, &version);
        let merged = self.merged_config(system, options)?;
        let executor = ScriptExecutor::new(&system.name, &version, &dir, config::flatten(&merged), self.events.clone());

        let mut rendered = options.no_templates;
        for script in system.scripts() {
            let Some(action) = Action::for_script(script) else {
                warn!("{}: skipping untagged script {}", system, script);
                continue;
            };

            if action == Action::Configure && !rendered {
                let count = template::render_dir(&dir.join(paths::TEMPLATES_DIR), &merged)?;
                debug!("Rendered {} templates for {}", count, system);
                rendered = true;
            }

            self.run_script(&executor, system, &version, script, action)?;
            report.executed.push(ExecutedScript {
                system: system.name.clone(),
                version: version.clone(),
                script: script.clone(),
            });
        }
        Ok(())
    }

    fn run_script(
        &self,
        executor: &ScriptExecutor,
        system: &ResolvedSystem,
        version: &str,
        script: &str,
        action: Action,
    ) -> Result<()> {
        let history_action = HistoryAction::from(action);
        self.store
            .record(&system.name, version, history_action, Phase::Start, Some(script))?;

        match executor.execute(script, action) {
            Ok(()) => self
                .store
                .record(&system.name, version, history_action, Phase::End, Some(script)),
            Err(e) => {
                if let Err(record_err) =
                    self.store
                        .record(&system.name, version, history_action, Phase::Failed, Some(script))
                {
                    warn!("Failed to record failure of {} for {}: {}", script, system, record_err);
                }
                Err(e)
            }
        }
    }

    /// Run the uninstall scripts of an installed version
    ///
    /// Without uninstall scripts a bare uninstall marker is recorded so the
    /// history still starts over.
    fn run_uninstall_scripts(
        &self,
        record: &InstalledSystem,
        options: &LifecycleOptions,
        report: &mut RunReport,
    ) -> Result<()> {
        let Some(descriptor) = &record.system else {
            return Ok(());
        };
        let resolved = ResolvedSystem::new(parse_version(&descriptor.version)?, "*", descriptor.clone());
        let scripts: Vec<String> = order_scripts(resolved.scripts())
            .into_iter()
            .filter(|s| s.action == Action::Uninstall)
            .map(|s| s.name)
            .collect();

        if scripts.is_empty() {
            let version = descriptor.version.as_str();
            self.store
                .record(&record.name, version, HistoryAction::Uninstall, Phase::Start, None)?;
            self.store
                .record(&record.name, version, HistoryAction::Uninstall, Phase::End, None)
        } else {
            self.execute_scripts(&resolved.with_scripts(scripts), options, report)
        }
    }

    fn remove_installed(&self, record: &InstalledSystem, options: &LifecycleOptions, report: &mut RunReport) -> Result<()> {
        self.run_uninstall_scripts(record, options, report)?;
        self.store.remove(std::slice::from_ref(&record.name))?;
        report.removed.push(record.name.clone());
        Ok(())
    }

    fn uninstall_inner(&self, targets: &[String], options: &LifecycleOptions) -> Result<RunReport> {
        let mut report = RunReport::new(Action::Uninstall);
        let installed = self.store.list()?;
        let os = self.os(options);

        for spec in targets {
            let (name, _) = split_specifier(spec)?;
            let root = installed
                .get(&name)
                .filter(|r| r.is_installed())
                .ok_or_else(|| Error::NotFound(format!("{} is not installed", name)))?;

            let order = if options.recursive {
                removal_order(root, &installed, &os)
            } else {
                vec![name.clone()]
            };

            for member in order {
                if report.removed.contains(&member) {
                    continue;
                }
                // Re-read: an earlier removal in this invocation may have touched the ledger
                let record = self.store.read(&member)?;
                if record.is_installed() {
                    self.remove_installed(&record, options, &mut report)?;
                }
            }
        }
        Ok(report)
    }

    /// Move an installed root to `target`
    ///
    /// Caches the target and any new dependencies, runs the stale version's
    /// uninstall scripts, swaps the install directory, then runs `install`
    /// (or `configure` when `reconfigure` is set) over the new runlist.
    pub fn converge(
        &self,
        installed: &InstalledSystem,
        target: &ResolvedSystem,
        reconfigure: bool,
    ) -> Result<Convergence> {
        let action = if reconfigure { Action::Configure } else { Action::Install };
        self.converge_inner(installed, target, action)
            .map_err(|e| e.in_action("converge", target.to_string()))
    }

    fn converge_inner(&self, installed: &InstalledSystem, target: &ResolvedSystem, action: Action) -> Result<Convergence> {
        let options = LifecycleOptions::default();
        let mut report = RunReport::new(action);

        // The new version may pull in dependencies that are not installed yet
        let pinned = format!("{}@{}", target.name, target.version);
        let mut runlist = self.resolve(std::slice::from_ref(&pinned), &options)?;
        runlist.retain(|s| s.name != target.name);

        let requests = runlist
            .iter()
            .chain(std::iter::once(target))
            .map(CacheRequest::for_system)
            .collect::<Result<Vec<_>>>()?;
        self.cache.add(&requests)?;
        self.store.add(&localize_runlist(&runlist, &self.store.list()?), false)?;

        self.run_uninstall_scripts(installed, &options, &mut report)?;
        self.store.ensure_latest(installed, target)?;

        runlist.push(target.clone());
        let (effective, records) = self.effective_runlist(&runlist)?;
        let roots = BTreeSet::from([target.name.clone()]);
        self.execute_runlist(action, &effective, &records, &roots, &options, &mut report)?;

        let convergence = Convergence {
            name: target.name.clone(),
            from: installed.version().map(str::to_string),
            to: target.version.to_string(),
            action,
        };
        self.events.emit(Event::Converged {
            name: convergence.name.clone(),
            from: convergence.from.clone().unwrap_or_default(),
            to: convergence.to.clone(),
            action,
        });
        Ok(convergence)
    }
}

/// Names to remove for a recursive uninstall of `root`, dependents first
///
/// Installed transitive dependencies of `root` are included unless an
/// installed system outside the removal set still depends on them.
fn removal_order(root: &InstalledSystem, installed: &InstalledMap, os: &str) -> Vec<String> {
    let deps_of = |name: &str| -> Vec<String> {
        installed
            .get(name)
            .and_then(|r| r.system.as_ref())
            .map(|d| {
                d.dependencies_for(Some(os))
                    .keys()
                    .filter(|k| installed.get(*k).is_some_and(|r| r.is_installed()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut removal: BTreeSet<String> = BTreeSet::new();
    let mut stack = vec![root.name.clone()];
    while let Some(name) = stack.pop() {
        if removal.insert(name.clone()) {
            stack.extend(deps_of(&name));
        }
    }

    // Keep anything still needed from outside, and what that keeps alive
    loop {
        let needed: Vec<String> = removal
            .iter()
            .filter(|name| **name != root.name)
            .filter(|name| {
                installed
                    .iter()
                    .filter(|(other, record)| record.is_installed() && !removal.contains(*other))
                    .any(|(other, _)| deps_of(other).contains(*name))
            })
            .cloned()
            .collect();
        if needed.is_empty() {
            break;
        }
        for name in needed {
            removal.remove(&name);
        }
    }

    let mut order = Vec::with_capacity(removal.len());
    while !removal.is_empty() {
        let next = removal
            .iter()
            .find(|name| {
                !removal
                    .iter()
                    .any(|other| other != *name && deps_of(other).contains(*name))
            })
            .cloned();
        // A dependency cycle leaves no free member; take them in name order
        let next = next.or_else(|| removal.iter().next().cloned());
        let Some(next) = next else { break };
        removal.remove(&next);
        order.push(next);
    }
    order
}
