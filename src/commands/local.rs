// src/commands/local.rs

//! Resolution and local state inspection

use super::open_registry;
use anyhow::Result;
use quill::{Cache, DependencyGraphBuilder, InstallStore, LogEvents, QuillConfig};

pub fn cmd_runlist(
    config: &QuillConfig,
    systems: &[String],
    os: Option<String>,
    max_depth: Option<usize>,
) -> Result<()> {
    let registry = open_registry(config)?;
    let os = os.unwrap_or_else(|| config.os());
    let runlist = DependencyGraphBuilder::new(&registry, LogEvents::shared())
        .strict(config.resolve.strict)
        .runlist(systems, Some(&os), max_depth.or(config.resolve.max_depth))?;

    for (index, system) in runlist.iter().enumerate() {
        println!("{:>3}. {}", index + 1, system);
    }
    Ok(())
}

pub fn cmd_tree(config: &QuillConfig, systems: &[String], os: Option<String>) -> Result<()> {
    let registry = open_registry(config)?;
    let os = os.unwrap_or_else(|| config.os());
    let trees = DependencyGraphBuilder::new(&registry, LogEvents::shared())
        .strict(config.resolve.strict)
        .dependencies(systems, Some(&os))?;

    for tree in trees {
        print!("{}", tree);
    }
    Ok(())
}

/// List the cache, or clean it
pub fn cmd_caches(config: &QuillConfig, clean: bool, names: &[String]) -> Result<()> {
    let cache = Cache::new(&config.paths.cache, LogEvents::shared());

    if clean {
        cache.clean(names)?;
        if names.is_empty() {
            println!("Cleaned the cache");
        } else {
            println!("Cleaned {}", names.join(", "));
        }
        return Ok(());
    }

    let inventory = cache.list()?;
    if inventory.is_empty() {
        println!("Cache is empty");
    }
    for (name, versions) in inventory {
        println!("{} {}", name, versions.join(", "));
    }
    Ok(())
}

pub fn cmd_installed(config: &QuillConfig, history: bool) -> Result<()> {
    let store = InstallStore::new(&config.paths.install, &config.paths.cache, LogEvents::shared());
    let installed = store.list()?;

    let mut shown = 0;
    for (name, record) in &installed {
        let Some(version) = record.version() else {
            continue;
        };
        shown += 1;
        match &record.history.requested {
            Some(range) => println!("{}@{} (requested {})", name, version, range),
            None => println!("{}@{}", name, version),
        }

        if history {
            for entry in record.history.entries() {
                println!(
                    "  {:>4} {} {} {} {}{}",
                    entry.seq,
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.version,
                    entry.action,
                    entry.phase,
                    entry.script.as_deref().map(|s| format!(" ({})", s)).unwrap_or_default()
                );
            }
        }
    }
    if shown == 0 {
        println!("No systems installed");
    }
    Ok(())
}
