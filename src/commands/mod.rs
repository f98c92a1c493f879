// src/commands/mod.rs
//! Command handlers for the quill CLI

mod exec;
mod lifecycle;
mod local;
mod registry;
mod watch;

pub use exec::cmd_exec;
pub use lifecycle::cmd_lifecycle;
pub use local::{cmd_caches, cmd_installed, cmd_runlist, cmd_tree};
pub use registry::{
    cmd_configs_delete, cmd_configs_get, cmd_configs_list, cmd_configs_set, cmd_owner_add,
    cmd_owner_remove, cmd_pack, cmd_publish, open_registry,
};
pub use watch::cmd_watch;
