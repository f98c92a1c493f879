// src/progress.rs

//! Progress events emitted while resolving, caching, installing and
//! running lifecycle scripts
//!
//! Components take an `Arc<dyn EventSink>` and report observable milestones
//! through it. Implementations:
//! - `LogEvents`: forwards events to tracing
//! - `SilentEvents`: no-op for scripted/quiet modes
//! - `CallbackEvents`: calls a user-provided function (CLI output, tests)
//!
//! # Example
//!
//! ```ignore
//! use quill::progress::{CallbackEvents, Event};
//!
//! let sink = CallbackEvents::new(|event| {
//!     if let Event::ScriptStdout { line, .. } = event {
//!         println!("{}", line);
//!     }
//! });
//! ```

use crate::system::Action;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Observable milestones
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Registry metadata read for a system
    ReadMetadata { name: String },
    /// A concrete version was chosen
    Resolved { name: String, version: String },
    /// Files listed for packing
    ListFiles { root: PathBuf, count: usize },
    /// A tarball was written
    Pack { tarball: PathBuf },
    /// A tarball is being unpacked into the cache
    Unpack { name: String, version: String },
    /// A system landed in the cache
    Cached { name: String, version: String },
    /// A system was copied into the install directory
    Installed { name: String, version: String },
    ScriptStarted { system: String, script: String },
    ScriptStdout { system: String, script: String, line: String },
    ScriptStderr { system: String, script: String, line: String },
    ScriptFinished {
        system: String,
        script: String,
        exit_code: Option<i32>,
    },
    /// The history ledger of a system was written
    HistoryUpdated { system: String, action: String, phase: String },
    /// The watcher moved a root system to a newer version
    Converged {
        name: String,
        from: String,
        to: String,
        action: Action,
    },
}

/// Receiver for progress events
///
/// Implementations must be thread-safe: script output is emitted from
/// reader threads and batch units run on a worker pool.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Shared handle passed to components
pub type SharedSink = Arc<dyn EventSink>;

/// Silent sink (no-op)
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentEvents;

impl SilentEvents {
    pub fn shared() -> SharedSink {
        Arc::new(SilentEvents)
    }
}

impl EventSink for SilentEvents {
    fn emit(&self, _event: Event) {}
}

/// Logging sink
///
/// Script stdout is logged at info, stderr at warn, everything else at
/// debug so that a plain `quill install` stays readable.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvents;

impl LogEvents {
    pub fn shared() -> SharedSink {
        Arc::new(LogEvents)
    }
}

impl EventSink for LogEvents {
    fn emit(&self, event: Event) {
        match event {
            Event::ScriptStdout { system, script, line } => info!("[{} {}] {}", system, script, line),
            Event::ScriptStderr { system, script, line } => warn!("[{} {}] {}", system, script, line),
            Event::Installed { name, version } => info!("Installed {}@{}", name, version),
            Event::Converged { name, from, to, action } => {
                info!("Converged {} from {} to {} ({})", name, from, to, action)
            }
            other => debug!("{:?}", other),
        }
    }
}

/// Callback-based sink
pub struct CallbackEvents<F>
where
    F: Fn(Event) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackEvents<F>
where
    F: Fn(Event) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> EventSink for CallbackEvents<F>
where
    F: Fn(Event) + Send + Sync,
{
    fn emit(&self, event: Event) {
        (self.callback)(event);
    }
}
