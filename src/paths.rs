// src/paths.rs
//! Centralized path derivation for the cache and install trees
//!
//! Cache:   `<cacheRoot>/<name>/<version>/system.tgz`
//!          `<cacheRoot>/<name>/<version>/system/...`
//! Install: `<installRoot>/<name>/<version>/...`
//!          `<installRoot>/<name>/history.json`

use std::path::{Path, PathBuf};

/// Unpacked directory name inside a cache version directory
pub const CACHED_DIR: &str = "system";

/// Tarball name inside a cache version directory
pub const TARBALL_FILE: &str = "system.tgz";

/// History ledger name inside an install name directory
pub const HISTORY_FILE: &str = "history.json";

/// Descriptor file shipped at the root of every system
pub const DESCRIPTOR_FILE: &str = "system.json";

/// Directory holding lifecycle scripts inside a system
pub const SCRIPTS_DIR: &str = "scripts";

/// Directory holding config templates inside a system
pub const TEMPLATES_DIR: &str = "templates";

/// Get the versioned cache directory for a system
pub fn cache_version_dir(cache_root: &Path, name: &str, version: &str) -> PathBuf {
    cache_root.join(name).join(version)
}

/// Get the cached tarball path
pub fn cache_tarball(cache_root: &Path, name: &str, version: &str) -> PathBuf {
    cache_version_dir(cache_root, name, version).join(TARBALL_FILE)
}

/// Get the unpacked cache contents path
pub fn cache_contents(cache_root: &Path, name: &str, version: &str) -> PathBuf {
    cache_version_dir(cache_root, name, version).join(CACHED_DIR)
}

/// Get the per-name install directory (holds versions and history)
pub fn install_name_dir(install_root: &Path, name: &str) -> PathBuf {
    install_root.join(name)
}

/// Get the active install directory for one version
pub fn install_version_dir(install_root: &Path, name: &str, version: &str) -> PathBuf {
    install_name_dir(install_root, name).join(version)
}

/// Get the history ledger path for a name
pub fn history_file(install_root: &Path, name: &str) -> PathBuf {
    install_name_dir(install_root, name).join(HISTORY_FILE)
}

/// Get a lifecycle script path inside an install directory
pub fn script_path(install_dir: &Path, script: &str) -> PathBuf {
    install_dir.join(SCRIPTS_DIR).join(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_layout() {
        let root = Path::new("/var/cache/quill");
        assert_eq!(
            cache_tarball(root, "nginx", "1.2.0"),
            PathBuf::from("/var/cache/quill/nginx/1.2.0/system.tgz")
        );
        assert_eq!(
            cache_contents(root, "nginx", "1.2.0"),
            PathBuf::from("/var/cache/quill/nginx/1.2.0/system")
        );
    }

    #[test]
    fn test_install_layout() {
        let root = Path::new("/opt/quill");
        assert_eq!(
            install_version_dir(root, "nginx", "1.2.0"),
            PathBuf::from("/opt/quill/nginx/1.2.0")
        );
        assert_eq!(
            history_file(root, "nginx"),
            PathBuf::from("/opt/quill/nginx/history.json")
        );
        assert_eq!(
            script_path(&install_version_dir(root, "nginx", "1.2.0"), "install.sh"),
            PathBuf::from("/opt/quill/nginx/1.2.0/scripts/install.sh")
        );
    }
}
