// src/cli/mod.rs
//! CLI definitions for quill
//!
//! Lifecycle actions are root-level commands:
//! - `install`, `configure`, `update`, `start`, `uninstall`
//!
//! Inspection:
//! - `runlist`, `tree` - resolution without side effects
//! - `caches`, `installed` - local state
//!
//! Authoring and registry management:
//! - `pack`, `publish`, `configs`, `owner`
//!
//! Operations:
//! - `watch` - converge installed roots to newer versions
//! - `exec` - run one command on many hosts

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quill")]
#[command(author = "Quill Contributors")]
#[command(version)]
#[command(about = "Resolve, cache and run provisioning systems", long_about = None)]
pub struct Cli {
    /// Config file (default: $QUILL_CONFIG, then /etc/quill/quill.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Arguments shared by every lifecycle action
#[derive(Args, Debug, Clone)]
pub struct LifecycleArgs {
    /// Systems to act on (`name` or `name@range`)
    #[arg(required = true)]
    pub systems: Vec<String>,

    /// Ignore history; `install --force` uninstalls and reinstalls
    #[arg(short, long)]
    pub force: bool,

    /// Apply the action to dependencies too
    #[arg(short, long)]
    pub recursive: bool,

    /// OS identifier for OS-specific dependencies
    #[arg(long)]
    pub os: Option<String>,

    /// Stop expanding dependencies below this depth
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Configuration override, `key=value` (dotted keys allowed)
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// Remote config set to merge, in order
    #[arg(long = "config-set", value_name = "NAME")]
    pub config_sets: Vec<String>,

    /// Do not render templates before configure scripts
    #[arg(long)]
    pub no_templates: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install systems and their dependencies
    Install(LifecycleArgs),

    /// Run configure scripts (installing first if needed)
    Configure(LifecycleArgs),

    /// Run update scripts
    Update(LifecycleArgs),

    /// Run start scripts
    Start(LifecycleArgs),

    /// Run uninstall scripts and remove installed systems
    Uninstall(LifecycleArgs),

    /// Print the install order for systems
    Runlist {
        #[arg(required = true)]
        systems: Vec<String>,

        #[arg(long)]
        os: Option<String>,

        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Print the dependency tree for systems
    Tree {
        #[arg(required = true)]
        systems: Vec<String>,

        #[arg(long)]
        os: Option<String>,
    },

    /// List cached systems, or clean the cache
    Caches {
        /// Remove cached entries (all, or the named `name[@version]`)
        #[arg(long)]
        clean: bool,

        names: Vec<String>,
    },

    /// List installed systems
    Installed {
        /// Print each system's history ledger
        #[arg(long)]
        history: bool,
    },

    /// Pack a system directory into a tarball
    Pack {
        dir: PathBuf,

        /// Output file (default: <dir>/system.tgz)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Pack and publish a system directory to the registry
    Publish { dir: PathBuf },

    /// Manage remote config sets
    #[command(subcommand)]
    Configs(ConfigsCommands),

    /// Manage system owners
    #[command(subcommand)]
    Owner(OwnerCommands),

    /// Converge installed root systems to newer versions
    Watch {
        /// Check once and exit
        #[arg(long)]
        once: bool,

        /// Run configure after converging
        #[arg(long)]
        reconfigure: bool,
    },

    /// Run a command on many hosts
    Exec {
        /// Comma-separated host list
        #[arg(long, value_delimiter = ',', required = true)]
        hosts: Vec<String>,

        /// Hosts at once (default: batch.concurrency)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Program used to reach each host
        #[arg(long, default_value = "ssh")]
        transport: String,

        /// Command to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigsCommands {
    /// List config set names
    List,

    /// Print a config set as JSON
    Get { name: String },

    /// Set keys in a config set (created if missing)
    Set {
        name: String,

        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },

    /// Delete a config set
    Delete { name: String },
}

#[derive(Subcommand)]
pub enum OwnerCommands {
    Add { system: String, user: String },
    Remove { system: String, user: String },
}
