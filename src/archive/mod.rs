// src/archive/mod.rs

//! Gzip tarball codec for system bundles
//!
//! `pack` walks a system directory and writes a reproducible `.tgz` (sorted
//! entries, fixed mtime, junk and ignore-file matches skipped). `unpack`
//! extracts one with path traversal protection and normalizes permissions
//! afterwards according to [`ModeOptions`].

mod ignore;

pub use ignore::{IGNORE_FILES, IgnoreRules};

use crate::error::{Error, Result};
use crate::paths::SCRIPTS_DIR;
use crate::progress::{Event, EventSink};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Fixed entry mtime so identical trees pack to identical tarballs
const ENTRY_MTIME: u64 = 1704067200;

/// Permission bits applied after extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeOptions {
    pub file_mode: u32,
    pub executable_mode: u32,
    pub dir_mode: u32,
    pub umask: u32,
}

impl Default for ModeOptions {
    fn default() -> Self {
        Self {
            file_mode: 0o644,
            executable_mode: 0o755,
            dir_mode: 0o755,
            umask: 0o022,
        }
    }
}

impl ModeOptions {
    fn file(&self, executable: bool) -> u32 {
        let mode = if executable {
            self.executable_mode
        } else {
            self.file_mode
        };
        mode & !self.umask
    }

    fn dir(&self) -> u32 {
        self.dir_mode & !self.umask
    }
}

/// Result of packing a directory
#[derive(Debug, Clone)]
pub struct PackSummary {
    pub tarball: PathBuf,
    /// Packed files, relative to the source directory
    pub files: Vec<PathBuf>,
    /// Compressed size in bytes
    pub bytes: u64,
}

/// One packable path
struct Candidate {
    relative: PathBuf,
    absolute: PathBuf,
    kind: EntryKind,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Dir,
    File,
    Symlink,
}

fn relative_str(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk `source`, applying junk and ignore-file rules
///
/// `exclude` is skipped as well, so a tarball written inside the source
/// directory never packs itself.
fn collect(source: &Path, exclude: Option<&Path>) -> Result<Vec<Candidate>> {
    if !source.is_dir() {
        return Err(Error::NotFound(format!(
            "{} is not a directory",
            source.display()
        )));
    }

    let rules = IgnoreRules::load(source);
    let mut out = Vec::new();

    let walker = WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let Ok(relative) = entry.path().strip_prefix(source) else {
                return false;
            };
            if relative.as_os_str().is_empty() {
                return true;
            }
            if exclude.is_some_and(|ex| ex == entry.path()) {
                return false;
            }
            !rules.is_ignored(&relative_str(relative), entry.file_type().is_dir())
        });

    for entry in walker {
        let entry = entry.map_err(|e| Error::IoError(format!("Failed to walk {}: {}", source.display(), e)))?;
        let relative = match entry.path().strip_prefix(source) {
            Ok(r) if !r.as_os_str().is_empty() => r.to_path_buf(),
            _ => continue,
        };

        let file_type = entry.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            debug!("Skipping special file {}", entry.path().display());
            continue;
        };

        out.push(Candidate {
            relative,
            absolute: entry.path().to_path_buf(),
            kind,
        });
    }

    Ok(out)
}

/// Relative files (and symlinks) that `pack` would include
pub fn list(source: &Path, events: &dyn EventSink) -> Result<Vec<PathBuf>> {
    let files: Vec<PathBuf> = collect(source, None)?
        .into_iter()
        .filter(|c| c.kind != EntryKind::Dir)
        .map(|c| c.relative)
        .collect();

    events.emit(Event::ListFiles {
        root: source.to_path_buf(),
        count: files.len(),
    });
    Ok(files)
}

/// Pack `source` into a gzip tarball at `dest`
pub fn pack(source: &Path, dest: &Path, events: &dyn EventSink) -> Result<PackSummary> {
    let candidates = collect(source, Some(dest))?;
    events.emit(Event::ListFiles {
        root: source.to_path_buf(),
        count: candidates.iter().filter(|c| c.kind != EntryKind::Dir).count(),
    });

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let output = File::create(dest)
        .map_err(|e| Error::IoError(format!("Failed to create {}: {}", dest.display(), e)))?;
    let encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    let mut builder = Builder::new(encoder);
    let mut files = Vec::new();

    for candidate in &candidates {
        let metadata = fs::symlink_metadata(&candidate.absolute)?;
        let mode = metadata.permissions().mode() & 0o7777;
        let mut header = Header::new_gnu();
        header.set_mtime(ENTRY_MTIME);

        match candidate.kind {
            EntryKind::Dir => {
                header.set_entry_type(EntryType::Directory);
                header.set_mode(mode);
                header.set_size(0);
                header.set_cksum();
                builder.append_data(&mut header, &candidate.relative, io::empty())?;
            }
            EntryKind::Symlink => {
                let target = fs::read_link(&candidate.absolute)?;
                header.set_entry_type(EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder.append_link(&mut header, &candidate.relative, &target)?;
                files.push(candidate.relative.clone());
            }
            EntryKind::File => {
                header.set_entry_type(EntryType::Regular);
                header.set_mode(mode);
                header.set_size(metadata.len());
                header.set_cksum();
                let file = File::open(&candidate.absolute)?;
                builder.append_data(&mut header, &candidate.relative, BufReader::new(file))?;
                files.push(candidate.relative.clone());
            }
        }
    }

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    io::Write::flush(&mut writer)?;
    drop(writer);

    let bytes = fs::metadata(dest)?.len();
    debug!("Packed {} files from {} ({} bytes)", files.len(), source.display(), bytes);
    events.emit(Event::Pack {
        tarball: dest.to_path_buf(),
    });

    Ok(PackSummary {
        tarball: dest.to_path_buf(),
        files,
        bytes,
    })
}

/// Normalize an archive entry path, rejecting anything that escapes the target
fn sanitize_entry_path(path: &Path) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(Error::UnpackError(format!(
                    "Entry escapes the target directory: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(clean)
}

/// A symlink target is kept only if it stays inside the unpacked tree
fn link_stays_inside(entry: &Path, target: &Path) -> bool {
    if target.is_absolute() {
        return false;
    }
    let mut depth = entry.components().count() as isize - 1;
    for component in target.components() {
        match component {
            Component::ParentDir => depth -= 1,
            Component::Normal(_) => depth += 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    true
}

fn is_script(relative: &Path) -> bool {
    relative
        .components()
        .next()
        .is_some_and(|c| c.as_os_str() == SCRIPTS_DIR)
}

/// Extract `tarball` into `target` and apply `modes`
///
/// Regular files under `scripts/`, or archived with any execute bit, get
/// `executable_mode`; other files get `file_mode`; directories get
/// `dir_mode`. All are masked by `umask`.
pub fn unpack(tarball: &Path, target: &Path, modes: ModeOptions) -> Result<PathBuf> {
    let file = File::open(tarball)
        .map_err(|e| Error::UnpackError(format!("Failed to open {}: {}", tarball.display(), e)))?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    fs::create_dir_all(target)?;

    let unpack_err = |e: io::Error| Error::UnpackError(format!("{}: {}", tarball.display(), e));
    let mut dirs = Vec::new();

    for entry in archive.entries().map_err(unpack_err)? {
        let mut entry = entry.map_err(unpack_err)?;
        let relative = sanitize_entry_path(&entry.path().map_err(unpack_err)?)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let dest = target.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&dest)?;
                dirs.push(dest);
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let archived_mode = entry.header().mode().unwrap_or(0o644);
                let mut out = File::create(&dest)?;
                io::copy(&mut entry, &mut out).map_err(unpack_err)?;

                let executable = is_script(&relative) || archived_mode & 0o111 != 0;
                fs::set_permissions(&dest, fs::Permissions::from_mode(modes.file(executable)))?;
            }
            EntryType::Symlink => {
                let Some(link) = entry.link_name().map_err(unpack_err)? else {
                    continue;
                };
                if !link_stays_inside(&relative, &link) {
                    warn!(
                        "Skipping symlink {} -> {} that leaves the bundle",
                        relative.display(),
                        link.display()
                    );
                    continue;
                }
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                if dest.symlink_metadata().is_ok() {
                    fs::remove_file(&dest)?;
                }
                std::os::unix::fs::symlink(&link, &dest)?;
            }
            other => {
                debug!("Skipping {:?} entry {}", other, relative.display());
            }
        }
    }

    for dir in dirs {
        fs::set_permissions(&dir, fs::Permissions::from_mode(modes.dir()))?;
    }

    Ok(target.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{CallbackEvents, SilentEvents};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn bundle() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "system.json", "{}");
        write(dir.path(), "scripts/install.sh", "#!/bin/sh\necho hi\n");
        write(dir.path(), "templates/app.conf", "port={{ port }}\n");
        write(dir.path(), ".git/HEAD", "ref");
        write(dir.path(), ".DS_Store", "junk");
        write(dir.path(), "debug.log", "noise");
        write(dir.path(), ".quillignore", "*.log\n");
        dir
    }

    #[test]
    fn test_pack_skips_junk_and_ignored() {
        let src = bundle();
        let files = list(src.path(), &SilentEvents).unwrap();
        let names: Vec<String> = files.iter().map(|p| relative_str(p)).collect();

        assert_eq!(
            names,
            vec![".quillignore", "scripts/install.sh", "system.json", "templates/app.conf"]
        );
    }

    #[test]
    fn test_unpack_applies_modes() {
        let src = bundle();
        let out = TempDir::new().unwrap();
        let tarball = out.path().join("system.tgz");
        pack(src.path(), &tarball, &SilentEvents).unwrap();

        let target = out.path().join("system");
        unpack(&tarball, &target, ModeOptions::default()).unwrap();

        let script = fs::metadata(target.join("scripts/install.sh")).unwrap();
        assert_eq!(script.permissions().mode() & 0o777, 0o755);
        let conf = fs::metadata(target.join("templates/app.conf")).unwrap();
        assert_eq!(conf.permissions().mode() & 0o777, 0o644);
        assert!(!target.join(".git").exists());
    }

    #[test]
    fn test_pack_excludes_itself_and_emits_events() {
        let src = bundle();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = CallbackEvents::new(move |e| seen_clone.lock().unwrap().push(e));

        let tarball = src.path().join("out.tgz");
        let summary = pack(src.path(), &tarball, &sink).unwrap();
        assert!(!summary.files.iter().any(|f| f.ends_with("out.tgz")));
        assert!(summary.bytes > 0);

        let seen = seen.lock().unwrap();
        assert!(matches!(seen[0], Event::ListFiles { count: 4, .. }));
        assert!(matches!(&seen[1], Event::Pack { tarball: t } if *t == tarball));
    }

    #[test]
    fn test_sanitize_entry_path() {
        assert_eq!(
            sanitize_entry_path(Path::new("./scripts/install.sh")).unwrap(),
            PathBuf::from("scripts/install.sh")
        );
        assert_eq!(
            sanitize_entry_path(Path::new("/etc/passwd")).unwrap(),
            PathBuf::from("etc/passwd")
        );
        assert!(sanitize_entry_path(Path::new("../../etc/passwd")).is_err());
    }

    #[test]
    fn test_link_stays_inside() {
        assert!(link_stays_inside(Path::new("bin/tool"), Path::new("../lib/tool")));
        assert!(!link_stays_inside(Path::new("tool"), Path::new("../outside")));
        assert!(!link_stays_inside(Path::new("tool"), Path::new("/etc/passwd")));
    }

    #[test]
    fn test_unpack_missing_tarball() {
        let out = TempDir::new().unwrap();
        let err = unpack(&out.path().join("nope.tgz"), out.path(), ModeOptions::default());
        assert!(matches!(err, Err(Error::UnpackError(_))));
    }
}
