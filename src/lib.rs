// src/lib.rs

//! Quill: dependency resolution, caching and lifecycle execution for
//! provisioning systems
//!
//! A *system* is a versioned bundle of files and shell scripts with declared
//! dependencies. Quill resolves a requested system into an ordered runlist,
//! caches every member's tarball, copies members into an install directory
//! and runs their lifecycle scripts in dependency order.
//!
//! # Architecture
//!
//! - Registry: remote (or in-memory) source of system metadata and config sets
//! - Resolver: semver ranges, dependency trees and runlists
//! - Cache: `<cache>/<name>/<version>/{system.tgz,system/}`
//! - Install store: `<install>/<name>/<version>/` plus a per-name history ledger
//! - Lifecycle engine: install, configure, update, start, uninstall
//! - Watcher: polls for newer versions of installed roots and converges them

pub mod archive;
pub mod batch;
pub mod cache;
pub mod config;
mod error;
pub mod install;
pub mod lifecycle;
pub mod paths;
pub mod progress;
pub mod registry;
pub mod remote;
pub mod resolver;
pub mod system;
pub mod version;
pub mod watcher;

pub use batch::{BatchReport, BatchRunner};
pub use cache::{Cache, CacheEntry, CacheRequest, TarballSource};
pub use config::QuillConfig;
pub use error::{Error, Result};
pub use install::{HistoryAction, HistoryLedger, InstallStore, InstalledMap, InstalledSystem, Phase};
pub use lifecycle::{Convergence, LifecycleEngine, LifecycleOptions, RunReport};
pub use progress::{CallbackEvents, Event, EventSink, LogEvents, SharedSink, SilentEvents};
pub use registry::{ConfigMap, HttpRegistry, MemoryRegistry, Registry};
pub use resolver::{DependencyGraphBuilder, DependencyTree, filter_runlist, localize_runlist};
pub use system::{Action, ResolvedSystem, SystemDescriptor, SystemMetadata};
pub use version::{VersionRange, max_satisfying};
pub use watcher::ConvergenceWatcher;
