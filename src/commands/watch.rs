// src/commands/watch.rs

//! Convergence watcher command

use super::open_registry;
use anyhow::Result;
use quill::{ConvergenceWatcher, LifecycleEngine, LogEvents, QuillConfig};
use std::sync::atomic::AtomicBool;

/// Watch installed roots; `once` checks a single time and exits
pub fn cmd_watch(config: &QuillConfig, once: bool, reconfigure: bool) -> Result<()> {
    let registry = open_registry(config)?;
    let engine = LifecycleEngine::new(config, &registry, LogEvents::shared());
    let interval = config.watch_interval()?;
    let mut watcher =
        ConvergenceWatcher::new(&engine, interval).reconfigure(reconfigure || config.watch.reconfigure);

    if once {
        let converged = watcher.run_once()?;
        if converged.is_empty() {
            println!("All installed systems are current");
        }
        for c in converged {
            println!(
                "{}: {} -> {}",
                c.name,
                c.from.as_deref().unwrap_or("nothing"),
                c.to
            );
        }
        return Ok(());
    }

    println!("Watching installed systems every {} (Ctrl+C to stop)", config.watch.interval);
    // Runs until the process is interrupted
    let stop = AtomicBool::new(false);
    watcher.run(&stop)?;
    Ok(())
}
