// src/commands/lifecycle.rs

//! Lifecycle action commands (install, configure, update, start, uninstall)

use super::open_registry;
use crate::cli::LifecycleArgs;
use anyhow::Result;
use quill::lifecycle::config::{parse_override, set_dotted};
use quill::{Action, ConfigMap, LifecycleEngine, LifecycleOptions, LogEvents, MemoryRegistry, QuillConfig, Registry};

fn options_from_args(args: &LifecycleArgs) -> Result<LifecycleOptions> {
    let mut overrides = ConfigMap::new();
    for pair in &args.overrides {
        let (key, value) = parse_override(pair)?;
        set_dotted(&mut overrides, &key, value)?;
    }

    Ok(LifecycleOptions {
        force: args.force,
        recursive: args.recursive,
        os: args.os.clone(),
        max_depth: args.max_depth,
        overrides,
        config_sets: args.config_sets.clone(),
        no_templates: args.no_templates,
    })
}

/// Run one lifecycle action and print what happened
pub fn cmd_lifecycle(config: &QuillConfig, action: Action, args: &LifecycleArgs) -> Result<()> {
    let options = options_from_args(args)?;
    // Uninstall works from install records alone
    let registry: Box<dyn Registry> = if action == Action::Uninstall {
        Box::new(MemoryRegistry::new())
    } else {
        Box::new(open_registry(config)?)
    };
    let engine = LifecycleEngine::new(config, registry.as_ref(), LogEvents::shared());

    let report = engine.run(action, &args.systems, &options)?;

    if !report.runlist.is_empty() {
        println!(
            "Runlist: {}",
            report.runlist.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
        );
    }
    for name in &report.removed {
        println!("Removed {}", name);
    }
    if report.executed.is_empty() {
        println!("Nothing to do for {}", action);
    } else {
        for script in &report.executed {
            println!("Ran {} for {}@{}", script.script, script.system, script.version);
        }
    }
    Ok(())
}
