// src/cache/mod.rs

//! Download cache
//!
//! Layout per `(name, version)`:
//! - `<cacheRoot>/<name>/<version>/system.tgz`  the packed artifact
//! - `<cacheRoot>/<name>/<version>/system/`     its unpacked contents
//!
//! `add` stages every download and unpack in a temporary directory inside
//! the cache root and only moves results into place once the whole batch
//! succeeded, so an interrupted or failed add never leaves a
//! half-populated version directory.

use crate::archive::{self, ModeOptions};
use crate::batch::BatchRunner;
use crate::error::{Error, Result};
use crate::paths;
use crate::progress::{Event, SharedSink};
use crate::registry::download_file;
use crate::system::ResolvedSystem;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Where a tarball comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TarballSource {
    /// Local file, copied into the cache
    Path(PathBuf),
    /// `http(s)` URL, downloaded into the cache
    Url(String),
}

impl TarballSource {
    /// Interpret a descriptor `tarball` location
    pub fn from_location(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::Url(location.to_string())
        } else {
            Self::Path(PathBuf::from(location.strip_prefix("file://").unwrap_or(location)))
        }
    }

    fn fetch(&self, dest: &Path) -> Result<()> {
        match self {
            Self::Path(path) => {
                fs::copy(path, dest).map_err(|e| {
                    Error::IoError(format!("Failed to copy {}: {}", path.display(), e))
                })?;
                Ok(())
            }
            Self::Url(url) => download_file(url, dest),
        }
    }
}

/// A system to place in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    pub name: String,
    pub version: String,
    pub source: TarballSource,
}

impl CacheRequest {
    /// Build a request from a resolved system's descriptor
    pub fn for_system(system: &ResolvedSystem) -> Result<Self> {
        let location = system
            .descriptor
            .tarball
            .as_deref()
            .ok_or_else(|| Error::NotFound(format!("No tarball published for {}", system)))?;
        Ok(Self {
            name: system.name.clone(),
            version: system.version.to_string(),
            source: TarballSource::from_location(location),
        })
    }
}

/// Paths of one cached `(name, version)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub name: String,
    pub version: String,
    /// Versioned directory
    pub root: PathBuf,
    pub tarball: PathBuf,
    /// Unpacked contents
    pub cached: PathBuf,
}

impl CacheEntry {
    fn new(cache_root: &Path, name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            root: paths::cache_version_dir(cache_root, name, version),
            tarball: paths::cache_tarball(cache_root, name, version),
            cached: paths::cache_contents(cache_root, name, version),
        }
    }

    fn is_complete(&self) -> bool {
        self.tarball.is_file() && self.cached.is_dir()
    }
}

pub struct Cache {
    root: PathBuf,
    modes: ModeOptions,
    concurrency: usize,
    events: SharedSink,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>, events: SharedSink) -> Self {
        Self {
            root: root.into(),
            modes: ModeOptions::default(),
            concurrency: 4,
            events,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_modes(mut self, modes: ModeOptions) -> Self {
        self.modes = modes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry(&self, name: &str, version: &str) -> CacheEntry {
        CacheEntry::new(&self.root, name, version)
    }

    /// Ensure every requested `(name, version)` is cached
    ///
    /// Already-cached entries are left untouched. Uncached tarballs are
    /// fetched and unpacked concurrently; if any of them fails, nothing is
    /// moved into the cache and the first failure is returned.
    pub fn add(&self, requests: &[CacheRequest]) -> Result<Vec<CacheEntry>> {
        let inventory = self.list()?;
        let (cached, missing): (Vec<&CacheRequest>, Vec<&CacheRequest>) =
            requests.iter().partition(|request| {
                inventory
                    .get(&request.name)
                    .is_some_and(|versions| versions.contains(&request.version))
                    && self.entry(&request.name, &request.version).is_complete()
            });

        for request in &cached {
            debug!("{}@{} already cached", request.name, request.version);
        }

        if !missing.is_empty() {
            self.fetch_all(&missing)?;
        }

        Ok(requests
            .iter()
            .map(|r| self.entry(&r.name, &r.version))
            .collect())
    }

    fn fetch_all(&self, missing: &[&CacheRequest]) -> Result<()> {
        fs::create_dir_all(&self.root)
            .map_err(|e| Error::IoError(format!("Failed to create {}: {}", self.root.display(), e)))?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)?;

        info!("Fetching {} systems into the cache", missing.len());
        let runner = BatchRunner::new(self.concurrency)?;
        let units: Vec<_> = missing
            .iter()
            .enumerate()
            .map(|(index, request)| {
                let slot = staging.path().join(index.to_string());
                let modes = self.modes;
                let events = self.events.clone();
                move || -> Result<PathBuf> {
                    fs::create_dir_all(&slot)?;
                    let tarball = slot.join(paths::TARBALL_FILE);
                    request.source.fetch(&tarball)?;
                    events.emit(Event::Unpack {
                        name: request.name.clone(),
                        version: request.version.clone(),
                    });
                    archive::unpack(&tarball, &slot.join(paths::CACHED_DIR), modes)?;
                    Ok(slot)
                }
            })
            .collect();

        let slots = runner
            .run(units, |index, result| {
                if let Err(e) = result {
                    let request = missing[index];
                    debug!("Caching {}@{} failed: {}", request.name, request.version, e);
                }
            })
            .into_all()?;

        for (request, slot) in missing.iter().zip(slots) {
            let entry = self.entry(&request.name, &request.version);
            if entry.root.exists() {
                fs::remove_dir_all(&entry.root).map_err(|e| {
                    Error::IoError(format!("Failed to clear {}: {}", entry.root.display(), e))
                })?;
            }
            fs::create_dir_all(&entry.root)?;
            fs::rename(slot.join(paths::TARBALL_FILE), &entry.tarball)?;
            fs::rename(slot.join(paths::CACHED_DIR), &entry.cached)?;

            self.events.emit(Event::Cached {
                name: request.name.clone(),
                version: request.version.clone(),
            });
        }
        Ok(())
    }

    /// Cached versions per name
    ///
    /// A missing cache root is an empty cache.
    pub fn list(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut out = BTreeMap::new();
        for name in child_dirs(&self.root)? {
            let mut versions = child_dirs(&self.root.join(&name))?;
            versions.sort();
            if !versions.is_empty() {
                out.insert(name, versions);
            }
        }
        Ok(out)
    }

    /// Remove cached entries
    ///
    /// Each selector is `name` (every version) or `name@version`. An empty
    /// selector list removes everything.
    pub fn clean(&self, selectors: &[String]) -> Result<()> {
        if selectors.is_empty() {
            for name in child_dirs(&self.root)? {
                remove_dir(&self.root.join(name))?;
            }
            return Ok(());
        }

        let targets = selectors
            .iter()
            .map(|selector| self.clean_target(selector))
            .collect::<Result<Vec<_>>>()?;

        for (selector, target) in selectors.iter().zip(targets) {
            if target.exists() {
                remove_dir(&target)?;
            } else {
                debug!("Nothing cached for {}", selector);
            }
        }
        Ok(())
    }

    /// Directory a clean selector refers to, kept inside the cache root
    fn clean_target(&self, selector: &str) -> Result<PathBuf> {
        let (name, version) = match selector.split_once('@') {
            Some((name, version)) => (name, Some(version)),
            None => (selector, None),
        };
        for part in std::iter::once(name).chain(version) {
            if !is_plain_component(part) {
                return Err(Error::ParseError(format!("Invalid cache selector: {}", selector)));
            }
        }
        Ok(match version {
            Some(version) => paths::cache_version_dir(&self.root, name, version),
            None => self.root.join(name),
        })
    }
}

/// A single normal path component: no separators, no `.` or `..`
fn is_plain_component(part: &str) -> bool {
    let mut components = Path::new(part).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Non-hidden child directory names; a missing directory yields none
fn child_dirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
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

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type()?.is_dir() && !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn remove_dir(dir: &Path) -> Result<()> {
    info!("Removing {}", dir.display());
    fs::remove_dir_all(dir).map_err(|e| Error::IoError(format!("Failed to remove {}: {}", dir.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentEvents;
    use tempfile::TempDir;

    fn packed(dir: &Path, name: &str) -> PathBuf {
        let src = dir.join(format!("{}-src", name));
        fs::create_dir_all(src.join("scripts")).unwrap();
        fs::write(src.join("scripts/install.sh"), "#!/bin/sh\necho hi\n").unwrap();
        fs::write(src.join("README"), name).unwrap();
        let tarball = dir.join(format!("{}.tgz", name));
        archive::pack(&src, &tarball, &SilentEvents).unwrap();
        tarball
    }

    fn request(name: &str, version: &str, tarball: &Path) -> CacheRequest {
        CacheRequest {
            name: name.to_string(),
            version: version.to_string(),
            source: TarballSource::Path(tarball.to_path_buf()),
        }
    }

    #[test]
    fn test_add_and_list() {
        let dir = TempDir::new().unwrap();
        let tarball = packed(dir.path(), "a");
        let cache = Cache::new(dir.path().join("cache"), SilentEvents::shared());

        let entries = cache
            .add(&[request("a", "0.1.0", &tarball), request("a", "0.2.0", &tarball)])
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].tarball.is_file());
        assert_eq!(fs::read_to_string(entries[0].cached.join("README")).unwrap(), "a");

        let listed = cache.list().unwrap();
        assert_eq!(listed["a"], vec!["0.1.0", "0.2.0"]);
    }

    #[test]
    fn test_add_skips_cached() {
        let dir = TempDir::new().unwrap();
        let tarball = packed(dir.path(), "a");
        let cache = Cache::new(dir.path().join("cache"), SilentEvents::shared());
        cache.add(&[request("a", "0.1.0", &tarball)]).unwrap();

        let marker = cache.entry("a", "0.1.0").cached.join("marker");
        fs::write(&marker, "keep").unwrap();
        cache.add(&[request("a", "0.1.0", &tarball)]).unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn test_failed_batch_leaves_no_partial_entries() {
        let dir = TempDir::new().unwrap();
        let tarball = packed(dir.path(), "a");
        let broken = dir.path().join("broken.tgz");
        fs::write(&broken, "not a tarball").unwrap();
        let cache = Cache::new(dir.path().join("cache"), SilentEvents::shared());

        let err = cache
            .add(&[request("a", "0.1.0", &tarball), request("b", "0.1.0", &broken)])
            .unwrap_err();
        assert!(matches!(err, Error::UnpackError(_)));
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn test_clean_scoped() {
        let dir = TempDir::new().unwrap();
        let tarball = packed(dir.path(), "a");
        let cache = Cache::new(dir.path().join("cache"), SilentEvents::shared());
        cache
            .add(&[
                request("a", "0.1.0", &tarball),
                request("a", "0.2.0", &tarball),
                request("b", "1.0.0", &tarball),
            ])
            .unwrap();

        cache.clean(&["a@0.1.0".to_string()]).unwrap();
        assert_eq!(cache.list().unwrap()["a"], vec!["0.2.0"]);

        cache.clean(&["b".to_string()]).unwrap();
        assert!(!cache.list().unwrap().contains_key("b"));

        cache.clean(&[]).unwrap();
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn test_clean_rejects_selectors_outside_cache() {
        let dir = TempDir::new().unwrap();
        let installed = dir.path().join("installed/web/1.0.0");
        fs::create_dir_all(&installed).unwrap();
        let cache = Cache::new(dir.path().join("cache"), SilentEvents::shared());
        fs::create_dir_all(dir.path().join("cache/a/0.1.0")).unwrap();

        for selector in ["..", "a@..", "../installed", "a/../..", "/", "a@", "."] {
            let err = cache.clean(&["a@0.1.0".to_string(), selector.to_string()]).unwrap_err();
            assert!(matches!(err, Error::ParseError(_)), "{}", selector);
        }
        assert!(installed.exists());
        assert!(dir.path().join("cache/a/0.1.0").exists());
    }

    #[test]
    fn test_list_missing_root() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path().join("nope"), SilentEvents::shared());
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn test_tarball_source_from_location() {
        assert_eq!(
            TarballSource::from_location("https://r.example.com/a.tgz"),
            TarballSource::Url("https://r.example.com/a.tgz".to_string())
        );
        assert_eq!(
            TarballSource::from_location("file:///srv/a.tgz"),
            TarballSource::Path(PathBuf::from("/srv/a.tgz"))
        );
    }
}
