// src/registry/mod.rs

//! System registry access
//!
//! The registry serves version metadata for systems, stores named config
//! sets and accepts published bundles. [`HttpRegistry`] talks to a remote
//! registry over JSON/HTTP; [`MemoryRegistry`] keeps everything in process.

mod http;
mod memory;

pub use http::{HttpRegistry, download_file};
pub use memory::MemoryRegistry;

use crate::error::Result;
use crate::system::{SystemDescriptor, SystemMetadata};
use std::path::Path;

/// Key/value configuration set
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// Registry operations used by resolution, lifecycle and publishing
pub trait Registry: Send + Sync {
    /// Full version metadata for `name`; `NotFound` if unknown
    fn get_system(&self, name: &str) -> Result<SystemMetadata>;

    /// Named remote config set; `NotFound` if absent
    fn get_config(&self, name: &str) -> Result<ConfigMap>;

    fn set_config(&self, name: &str, config: &ConfigMap) -> Result<()>;

    fn delete_config(&self, name: &str) -> Result<()>;

    fn list_configs(&self) -> Result<Vec<String>>;

    /// Upload a packed bundle for `descriptor.name@descriptor.version`
    fn publish(&self, descriptor: &SystemDescriptor, tarball: &Path) -> Result<()>;

    fn add_owner(&self, system: &str, user: &str) -> Result<()>;

    fn remove_owner(&self, system: &str, user: &str) -> Result<()>;
}
