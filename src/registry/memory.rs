// src/registry/memory.rs

use super::{ConfigMap, Registry};
use crate::error::{Error, Result};
use crate::system::{SystemDescriptor, SystemMetadata};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::RwLock;

#[derive(Default)]
struct State {
    systems: BTreeMap<String, Vec<SystemDescriptor>>,
    configs: BTreeMap<String, ConfigMap>,
    owners: BTreeMap<String, BTreeSet<String>>,
}

/// In-process registry
///
/// Published bundles are referenced by their local tarball path, so the
/// cache can copy them without any network access.
#[derive(Default)]
pub struct MemoryRegistry {
    state: RwLock<State>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one descriptor version, replacing the same version if present
    pub fn insert(&self, descriptor: SystemDescriptor) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let versions = state.systems.entry(descriptor.name.clone()).or_default();
        versions.retain(|d| d.version != descriptor.version);
        versions.push(descriptor);
    }

    pub fn owners(&self, system: &str) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .owners
            .get(system)
            .map(|o| o.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Registry for MemoryRegistry {
    fn get_system(&self, name: &str) -> Result<SystemMetadata> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let versions = state
            .systems
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(SystemMetadata::from_descriptors(name, versions.clone()))
    }

    fn get_config(&self, name: &str) -> Result<ConfigMap> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .configs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("config set {}", name)))
    }

    fn set_config(&self, name: &str, config: &ConfigMap) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.configs.insert(name.to_string(), config.clone());
        Ok(())
    }

    fn delete_config(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state
            .configs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("config set {}", name)))
    }

    fn list_configs(&self) -> Result<Vec<String>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.configs.keys().cloned().collect())
    }

    fn publish(&self, descriptor: &SystemDescriptor, tarball: &Path) -> Result<()> {
        if !tarball.is_file() {
            return Err(Error::NotFound(tarball.display().to_string()));
        }
        let mut published = descriptor.clone();
        published.tarball = Some(tarball.display().to_string());
        self.insert(published);
        Ok(())
    }

    fn add_owner(&self, system: &str, user: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !state.systems.contains_key(system) {
            return Err(Error::NotFound(system.to_string()));
        }
        state
            .owners
            .entry(system.to_string())
            .or_default()
            .insert(user.to_string());
        Ok(())
    }

    fn remove_owner(&self, system: &str, user: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(owners) = state.owners.get_mut(system) {
            owners.remove(user);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_system_collects_versions() {
        let registry = MemoryRegistry::new();
        registry.insert(SystemDescriptor::new("a", "0.1.0"));
        registry.insert(SystemDescriptor::new("a", "0.2.0"));
        registry.insert(SystemDescriptor::new("a", "0.2.0"));

        let meta = registry.get_system("a").unwrap();
        assert_eq!(meta.version, "0.2.0");
        assert_eq!(meta.versions.len(), 2);
        assert!(matches!(registry.get_system("b"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_config_sets() {
        let registry = MemoryRegistry::new();
        let mut config = ConfigMap::new();
        config.insert("port".to_string(), serde_json::json!(80));

        registry.set_config("prod", &config).unwrap();
        assert_eq!(registry.list_configs().unwrap(), vec!["prod"]);
        assert_eq!(registry.get_config("prod").unwrap()["port"], 80);

        registry.delete_config("prod").unwrap();
        assert!(registry.get_config("prod").is_err());
        assert!(registry.delete_config("prod").is_err());
    }

    #[test]
    fn test_owners() {
        let registry = MemoryRegistry::new();
        registry.insert(SystemDescriptor::new("a", "0.1.0"));
        registry.add_owner("a", "alice").unwrap();
        registry.add_owner("a", "bob").unwrap();
        registry.remove_owner("a", "alice").unwrap();
        assert_eq!(registry.owners("a"), vec!["bob"]);
        assert!(registry.add_owner("missing", "alice").is_err());
    }

    #[test]
    fn test_publish_records_tarball_path() {
        let dir = tempfile::tempdir().unwrap();
        let tarball = dir.path().join("a.tgz");
        std::fs::write(&tarball, b"x").unwrap();

        let registry = MemoryRegistry::new();
        registry
            .publish(&SystemDescriptor::new("a", "1.0.0"), &tarball)
            .unwrap();
        let meta = registry.get_system("a").unwrap();
        assert_eq!(
            meta.versions["1.0.0"].tarball.as_deref(),
            Some(tarball.display().to_string().as_str())
        );
    }
}
