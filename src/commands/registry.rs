// src/commands/registry.rs

//! Packing, publishing and registry management commands

use anyhow::{Context, Result};
use quill::lifecycle::config::{parse_override, set_dotted};
use quill::paths;
use quill::{ConfigMap, HttpRegistry, LogEvents, QuillConfig, Registry, SystemDescriptor, archive};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Registry client from `[registry]` in the config
pub fn open_registry(config: &QuillConfig) -> Result<HttpRegistry> {
    let url = config
        .registry
        .url
        .as_deref()
        .context("No registry configured; set registry.url in the config file")?;
    Ok(HttpRegistry::new(url, config.registry.token.clone())?)
}

fn read_descriptor(dir: &Path) -> Result<SystemDescriptor> {
    let path = dir.join(paths::DESCRIPTOR_FILE);
    let content = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid descriptor {}", path.display()))
}

/// Pack a system directory
pub fn cmd_pack(dir: &Path, output: Option<PathBuf>) -> Result<()> {
    let descriptor = read_descriptor(dir)?;
    let output = output.unwrap_or_else(|| dir.join(paths::TARBALL_FILE));
    let summary = archive::pack(dir, &output, &LogEvents)?;

    println!(
        "Packed {}@{}: {} files, {} bytes -> {}",
        descriptor.name,
        descriptor.version,
        summary.files.len(),
        summary.bytes,
        summary.tarball.display()
    );
    Ok(())
}

/// Pack a system directory into a scratch file and publish it
pub fn cmd_publish(config: &QuillConfig, dir: &Path) -> Result<()> {
    let descriptor = read_descriptor(dir)?;
    let registry = open_registry(config)?;

    let scratch = tempfile::tempdir()?;
    let tarball = scratch.path().join(paths::TARBALL_FILE);
    archive::pack(dir, &tarball, &LogEvents)?;

    info!("Publishing {}@{}", descriptor.name, descriptor.version);
    registry.publish(&descriptor, &tarball)?;
    println!("Published {}@{}", descriptor.name, descriptor.version);
    Ok(())
}

pub fn cmd_configs_list(config: &QuillConfig) -> Result<()> {
    for name in open_registry(config)?.list_configs()? {
        println!("{}", name);
    }
    Ok(())
}

pub fn cmd_configs_get(config: &QuillConfig, name: &str) -> Result<()> {
    let set = open_registry(config)?.get_config(name)?;
    println!("{}", serde_json::to_string_pretty(&set)?);
    Ok(())
}

/// Merge `key=value` pairs into a config set
pub fn cmd_configs_set(config: &QuillConfig, name: &str, pairs: &[String]) -> Result<()> {
    let registry = open_registry(config)?;
    let mut set = match registry.get_config(name) {
        Ok(set) => set,
        Err(quill::Error::NotFound(_)) => ConfigMap::new(),
        Err(e) => return Err(e.into()),
    };
    for pair in pairs {
        let (key, value) = parse_override(pair)?;
        set_dotted(&mut set, &key, value)?;
    }
    registry.set_config(name, &set)?;
    println!("Updated config set {}", name);
    Ok(())
}

pub fn cmd_configs_delete(config: &QuillConfig, name: &str) -> Result<()> {
    open_registry(config)?.delete_config(name)?;
    println!("Deleted config set {}", name);
    Ok(())
}

pub fn cmd_owner_add(config: &QuillConfig, system: &str, user: &str) -> Result<()> {
    open_registry(config)?.add_owner(system, user)?;
    println!("Added {} as an owner of {}", user, system);
    Ok(())
}

pub fn cmd_owner_remove(config: &QuillConfig, system: &str, user: &str) -> Result<()> {
    open_registry(config)?.remove_owner(system, user)?;
    println!("Removed {} from the owners of {}", user, system);
    Ok(())
}
