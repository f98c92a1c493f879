// src/install/mod.rs

//! Active install directory
//!
//! Layout: `<installRoot>/<name>/<version>/...` holds the installed files
//! (copied from the cache) and `<installRoot>/<name>/history.json` the
//! history ledger. At most one version directory may exist per name.
//! Removing a system deletes its version directory but keeps the ledger so
//! later installs can consult it.

mod history;

pub use history::{HistoryAction, HistoryEntry, HistoryLedger, Phase};

use crate::error::{Error, Result};
use crate::paths;
use crate::progress::{Event, SharedSink};
use crate::system::{ResolvedSystem, SystemDescriptor};
use crate::version::parse_version;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// One installed name: its current descriptor (if any) and its ledger
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledSystem {
    pub name: String,
    /// `None` once removed; the ledger may still exist
    pub system: Option<SystemDescriptor>,
    pub history: HistoryLedger,
}

impl InstalledSystem {
    pub fn version(&self) -> Option<&str> {
        self.system.as_ref().map(|s| s.version.as_str())
    }

    pub fn is_installed(&self) -> bool {
        self.system.is_some()
    }
}

/// Installed records keyed by name
pub type InstalledMap = BTreeMap<String, InstalledSystem>;

pub struct InstallStore {
    root: PathBuf,
    cache_root: PathBuf,
    events: SharedSink,
}

impl InstallStore {
    pub fn new(root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>, events: SharedSink) -> Self {
        Self {
            root: root.into(),
            cache_root: cache_root.into(),
            events,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version_dir(&self, name: &str, version: &str) -> PathBuf {
        paths::install_version_dir(&self.root, name, version)
    }

    /// Version directories present for `name`
    fn version_dirs(&self, name: &str) -> Result<Vec<String>> {
        let dir = paths::install_name_dir(&self.root, name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::IoError(format!(
                    "Failed to read {}: {}",
                    dir.display(),
                    e
                )));
            }
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() && !file_name.starts_with('.') {
                versions.push(file_name);
            }
        }
        versions.sort();
        Ok(versions)
    }

    fn load_descriptor(&self, name: &str, version: &str) -> Result<SystemDescriptor> {
        let path = self.version_dir(name, version).join(paths::DESCRIPTOR_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::ParseError(format!("Invalid descriptor {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} has no {}, using a bare descriptor", path.display(), paths::DESCRIPTOR_FILE);
                Ok(SystemDescriptor::new(name, version))
            }
            Err(e) => Err(Error::IoError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Read the install record for one name
    ///
    /// Fails with `AmbiguousInstall` if more than one version directory exists.
    pub fn read(&self, name: &str) -> Result<InstalledSystem> {
        let versions = self.version_dirs(name)?;
        let system = match versions.as_slice() {
            [] => None,
            [version] => Some(self.load_descriptor(name, version)?),
            _ => {
                return Err(Error::AmbiguousInstall {
                    name: name.to_string(),
                    versions,
                });
            }
        };
        let history = HistoryLedger::load(&paths::history_file(&self.root, name))?;

        for entry in history.dangling() {
            warn!(
                "{}: {} {} started at {} never finished",
                name,
                entry.action,
                entry.script.as_deref().unwrap_or(""),
                entry.timestamp.to_rfc3339()
            );
        }

        Ok(InstalledSystem {
            name: name.to_string(),
            system,
            history,
        })
    }

    /// Every name with an install directory
    pub fn list(&self) -> Result<InstalledMap> {
        let mut out = InstalledMap::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !entry.file_type()?.is_dir() || name.starts_with('.') {
                continue;
            }
            let record = self.read(&name)?;
            out.insert(name, record);
        }
        Ok(out)
    }

    /// Copy resolved systems from the cache into the install directory
    ///
    /// Per system: a newer installed version is left alone and returned; an
    /// older one is a `VersionConflict` unless `force` is set, in which case
    /// it is replaced; the same version is a no-op.
    pub fn add(&self, systems: &[ResolvedSystem], force: bool) -> Result<Vec<InstalledSystem>> {
        let mut out = Vec::with_capacity(systems.len());

        for system in systems {
            let existing = self.read(&system.name)?;
            if let Some(installed) = existing.version() {
                let installed_version = parse_version(installed)?;
                match installed_version.cmp(&system.version) {
                    Ordering::Greater => {
                        info!(
                            "{}@{} is newer than {}, nothing to do",
                            system.name, installed, system.version
                        );
                        out.push(existing);
                        continue;
                    }
                    Ordering::Equal => {
                        debug!("{} already installed", system);
                        out.push(existing);
                        continue;
                    }
                    Ordering::Less if !force => {
                        return Err(Error::VersionConflict {
                            name: system.name.clone(),
                            installed: installed.to_string(),
                            requested: system.version.to_string(),
                        });
                    }
                    Ordering::Less => {
                        self.remove_version(&system.name, installed)?;
                    }
                }
            }

            out.push(self.copy_from_cache(system)?);
        }

        Ok(out)
    }

    /// Replace whatever version of `target.name` is installed with `target`
    pub fn ensure_latest(&self, installed: &InstalledSystem, target: &ResolvedSystem) -> Result<InstalledSystem> {
        if installed.version() == Some(target.version.to_string().as_str()) {
            return self.read(&target.name);
        }
        for version in self.version_dirs(&target.name)? {
            self.remove_version(&target.name, &version)?;
        }
        info!(
            "Converging {} from {} to {}",
            target.name,
            installed.version().unwrap_or("nothing"),
            target.version
        );
        self.copy_from_cache(target)
    }

    /// Delete installed version directories, keeping each name's ledger
    pub fn remove(&self, names: &[String]) -> Result<()> {
        for name in names {
            let versions = self.version_dirs(name)?;
            if versions.is_empty() {
                debug!("{} is not installed", name);
            }
            for version in versions {
                self.remove_version(name, &version)?;
            }
        }
        Ok(())
    }

    fn remove_version(&self, name: &str, version: &str) -> Result<()> {
        let dir = self.version_dir(name, version);
        info!("Removing {}", dir.display());
        fs::remove_dir_all(&dir)
            .map_err(|e| Error::IoError(format!("Failed to remove {}: {}", dir.display(), e)))
    }

    fn copy_from_cache(&self, system: &ResolvedSystem) -> Result<InstalledSystem> {
        let version = system.version.to_string();
        let source = paths::cache_contents(&self.cache_root, &system.name, &version);
        if !source.is_dir() {
            return Err(Error::NotFound(format!("{} is not cached", system)));
        }

        let name_dir = paths::install_name_dir(&self.root, &system.name);
        fs::create_dir_all(&name_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&name_dir)?;

        let staged = staging.path().join(&version);
        copy_tree(&source, &staged)?;
        fs::write(
            staged.join(paths::DESCRIPTOR_FILE),
            serde_json::to_vec_pretty(&system.descriptor)?,
        )?;

        let dest = self.version_dir(&system.name, &version);
        fs::rename(&staged, &dest).map_err(|e| {
            Error::IoError(format!("Failed to move install into {}: {}", dest.display(), e))
        })?;
        drop(staging);

        self.record(&system.name, &version, HistoryAction::Copy, Phase::End, None)?;
        self.events.emit(Event::Installed {
            name: system.name.clone(),
            version: version.clone(),
        });

        self.read(&system.name)
    }

    /// Append one entry to a name's ledger and persist it
    pub fn record(
        &self,
        name: &str,
        version: &str,
        action: HistoryAction,
        phase: Phase,
        script: Option<&str>,
    ) -> Result<()> {
        let path = paths::history_file(&self.root, name);
        let mut ledger = HistoryLedger::load(&path)?;
        ledger.record(version, action, phase, script);
        ledger.save(&path)?;

        self.events.emit(Event::HistoryUpdated {
            system: name.to_string(),
            action: action.to_string(),
            phase: phase.to_string(),
        });
        Ok(())
    }

    /// Remember the range a root was requested with
    pub fn set_requested(&self, name: &str, range: &str) -> Result<()> {
        let path = paths::history_file(&self.root, name);
        let mut ledger = HistoryLedger::load(&path)?;
        if ledger.requested.as_deref() != Some(range) {
            ledger.requested = Some(range.to_string());
            ledger.save(&path)?;
        }
        Ok(())
    }
}

/// Recursively copy `source` into `dest`, preserving permission bits
pub(crate) fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| Error::IoError(format!("Failed to walk {}: {}", source.display(), e)))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::IoError(e.to_string()))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            let perms = entry.metadata().map_err(|e| Error::IoError(e.to_string()))?.permissions();
            fs::set_permissions(&target, perms)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| {
                Error::IoError(format!("Failed to copy {}: {}", entry.path().display(), e))
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentEvents;
    use semver::Version;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        cache: PathBuf,
        store: InstallStore,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        let store = InstallStore::new(dir.path().join("installed"), &cache, SilentEvents::shared());
        Fixture {
            _dir: dir,
            cache,
            store,
        }
    }

    fn cached(fx: &Fixture, name: &str, version: &str) -> ResolvedSystem {
        let contents = paths::cache_contents(&fx.cache, name, version);
        fs::create_dir_all(contents.join("scripts")).unwrap();
        let script = contents.join("scripts/install.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut descriptor = SystemDescriptor::new(name, version);
        descriptor.scripts = vec!["install.sh".to_string()];
        ResolvedSystem::new(Version::parse(version).unwrap(), "*", descriptor)
    }

    #[test]
    fn test_add_copies_and_records() {
        let fx = fixture();
        let a = cached(&fx, "a", "0.1.0");

        let installed = fx.store.add(&[a], false).unwrap();
        assert_eq!(installed[0].version(), Some("0.1.0"));
        assert_eq!(installed[0].history.entries()[0].action, HistoryAction::Copy);

        let script = fx.store.version_dir("a", "0.1.0").join("scripts/install.sh");
        assert_eq!(fs::metadata(script).unwrap().permissions().mode() & 0o777, 0o755);
        let read = fx.store.read("a").unwrap();
        assert_eq!(read.system.unwrap().scripts, vec!["install.sh"]);
    }

    #[test]
    fn test_add_same_version_is_noop() {
        let fx = fixture();
        let a = cached(&fx, "a", "0.1.0");
        fx.store.add(std::slice::from_ref(&a), false).unwrap();
        let again = fx.store.add(&[a], false).unwrap();
        assert_eq!(again[0].history.entries().len(), 1);
    }

    #[test]
    fn test_newer_installed_short_circuits() {
        let fx = fixture();
        fx.store.add(&[cached(&fx, "a", "0.2.0")], false).unwrap();
        let result = fx.store.add(&[cached(&fx, "a", "0.1.0")], false).unwrap();
        assert_eq!(result[0].version(), Some("0.2.0"));
    }

    #[test]
    fn test_older_installed_conflicts_without_force() {
        let fx = fixture();
        fx.store.add(&[cached(&fx, "a", "0.1.0")], false).unwrap();

        let err = fx.store.add(&[cached(&fx, "a", "0.2.0")], false).unwrap_err();
        assert!(matches!(err, Error::VersionConflict { .. }));

        let replaced = fx.store.add(&[cached(&fx, "a", "0.2.0")], true).unwrap();
        assert_eq!(replaced[0].version(), Some("0.2.0"));
        assert!(!fx.store.version_dir("a", "0.1.0").exists());
    }

    #[test]
    fn test_remove_keeps_history() {
        let fx = fixture();
        fx.store.add(&[cached(&fx, "a", "0.1.0")], false).unwrap();
        fx.store.remove(&["a".to_string()]).unwrap();

        let record = fx.store.read("a").unwrap();
        assert!(!record.is_installed());
        assert_eq!(record.history.entries().len(), 1);
        assert!(fx.store.list().unwrap().contains_key("a"));
    }

    #[test]
    fn test_ambiguous_install() {
        let fx = fixture();
        fx.store.add(&[cached(&fx, "a", "0.1.0")], false).unwrap();
        fs::create_dir_all(fx.store.version_dir("a", "0.2.0")).unwrap();

        let err = fx.store.list().unwrap_err();
        assert!(matches!(err, Error::AmbiguousInstall { ref versions, .. } if versions.len() == 2));
    }

    #[test]
    fn test_ensure_latest_swaps_version() {
        let fx = fixture();
        fx.store.add(&[cached(&fx, "a", "0.1.0")], false).unwrap();
        let current = fx.store.read("a").unwrap();

        let target = cached(&fx, "a", "0.3.0");
        let converged = fx.store.ensure_latest(&current, &target).unwrap();
        assert_eq!(converged.version(), Some("0.3.0"));
        assert_eq!(converged.history.entries().len(), 2);
        assert!(!fx.store.version_dir("a", "0.1.0").exists());
    }

    #[test]
    fn test_list_empty_root() {
        let fx = fixture();
        assert!(fx.store.list().unwrap().is_empty());
    }

    #[test]
    fn test_add_uncached_fails() {
        let fx = fixture();
        let descriptor = SystemDescriptor::new("ghost", "1.0.0");
        let ghost = ResolvedSystem::new(Version::new(1, 0, 0), "*", descriptor);
        assert!(matches!(fx.store.add(&[ghost], false), Err(Error::NotFound(_))));
    }
}
