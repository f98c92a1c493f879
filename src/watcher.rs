// src/watcher.rs

//! Convergence watcher
//!
//! Polls the registry for newer versions of installed root systems (those
//! no other installed system depends on) and moves them forward. Each root
//! is re-resolved against the range it was originally requested with, so a
//! root installed as `web@^1.0` never jumps to 2.x.

use crate::error::Result;
use crate::install::InstalledMap;
use crate::lifecycle::{Convergence, LifecycleEngine, LifecycleOptions};
use crate::version::{VersionRange, parse_version};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest single sleep, so a stop request is noticed quickly
const SLEEP_SLICE: Duration = Duration::from_secs(1);

/// Bookkeeping across polls
#[derive(Debug, Clone, Default)]
pub struct WatcherState {
    pub last_check: Option<DateTime<Utc>>,
    pub checks: u64,
    pub convergences: u64,
}

pub struct ConvergenceWatcher<'e, 'a> {
    engine: &'e LifecycleEngine<'a>,
    interval: Duration,
    reconfigure: bool,
    options: LifecycleOptions,
    state: WatcherState,
}

impl<'e, 'a> ConvergenceWatcher<'e, 'a> {
    pub fn new(engine: &'e LifecycleEngine<'a>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            reconfigure: false,
            options: LifecycleOptions::default(),
            state: WatcherState::default(),
        }
    }

    /// Run `configure` after each convergence
    pub fn reconfigure(mut self, reconfigure: bool) -> Self {
        self.reconfigure = reconfigure;
        self
    }

    /// Resolution options (OS override) used when re-resolving roots
    pub fn with_options(mut self, options: LifecycleOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> &WatcherState {
        &self.state
    }

    /// Check every root once and converge the ones with a newer version
    ///
    /// A root that fails to resolve or converge is logged and skipped; the
    /// others are still checked.
    pub fn run_once(&mut self) -> Result<Vec<Convergence>> {
        let installed = self.engine.store().list()?;
        let os = self.engine.os(&self.options);
        let mut converged = Vec::new();

        for name in roots(&installed, Some(&os)) {
            let Some(record) = installed.get(&name) else { continue };
            let Some(current) = record.version() else { continue };
            let requested = record
                .history
                .requested
                .clone()
                .unwrap_or_else(|| VersionRange::any().as_str().to_string());

            // Depth 0: only the root itself is needed to compare versions
            let spec = format!("{}@{}", name, requested);
            let options = LifecycleOptions {
                max_depth: Some(0),
                ..self.options.clone()
            };
            let target = match self.engine.resolve(std::slice::from_ref(&spec), &options) {
                Ok(mut runlist) => match runlist.pop() {
                    Some(target) => target,
                    None => continue,
                },
                Err(e) => {
                    warn!("Cannot resolve {}: {}", spec, e);
                    continue;
                }
            };

            let current_version = match parse_version(current) {
                Ok(version) => version,
                Err(e) => {
                    warn!("Skipping {}: installed version {} is invalid: {}", name, current, e);
                    continue;
                }
            };
            if current_version >= target.version {
                debug!("{}@{} is current", name, current);
                continue;
            }

            info!("{} has a newer version: {} -> {}", name, current, target.version);
            match self.engine.converge(record, &target, self.reconfigure) {
                Ok(convergence) => converged.push(convergence),
                Err(e) => warn!("Failed to converge {}: {}", name, e),
            }
        }

        self.state.last_check = Some(Utc::now());
        self.state.checks += 1;
        self.state.convergences += converged.len() as u64;
        Ok(converged)
    }

    /// Poll until `stop` is set
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        info!("Watching installed systems every {:?}", self.interval);
        while !stop.load(Ordering::Relaxed) {
            match self.run_once() {
                Ok(converged) if !converged.is_empty() => {
                    info!("Converged {} system(s)", converged.len());
                }
                Ok(_) => {}
                Err(e) => warn!("Watch pass failed: {}", e),
            }

            let deadline = Instant::now() + self.interval;
            while !stop.load(Ordering::Relaxed) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep((deadline - now).min(SLEEP_SLICE));
            }
        }
        info!("Watcher stopped");
        Ok(())
    }
}

/// Installed systems that no other installed system depends on
fn roots(installed: &InstalledMap, os: Option<&str>) -> Vec<String> {
    let depended_on: BTreeSet<String> = installed
        .values()
        .filter_map(|record| record.system.as_ref())
        .flat_map(|descriptor| {
            descriptor
                .dependencies_for(os)
                .keys()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect();

    installed
        .values()
        .filter(|record| record.is_installed() && !depended_on.contains(&record.name))
        .map(|record| record.name.clone())
        .collect()
}
