// src/resolver/filter.rs

//! Runlist pruning against install state

use crate::install::InstalledMap;
use crate::system::{Action, ResolvedSystem, order_scripts};
use std::collections::BTreeSet;

/// Drop runlist members that are already installed
pub fn localize_runlist(runlist: &[ResolvedSystem], installed: &InstalledMap) -> Vec<ResolvedSystem> {
    runlist
        .iter()
        .filter(|system| {
            !installed
                .get(&system.name)
                .is_some_and(|record| record.is_installed())
        })
        .cloned()
        .collect()
}

/// Keep, per member, only the scripts `action` still has to run
///
/// Members named in `roots` may run scripts for `action` and every
/// prerequisite. Other members get the same set when the action is
/// recursive or `recursive` is requested; otherwise only the recursive
/// prerequisites (install, configure). Scripts already completed since the
/// member's last uninstall are removed. Surviving scripts are ordered
/// install, configure, then update/start.
pub fn filter_runlist(
    action: Action,
    runlist: &[ResolvedSystem],
    installed: &InstalledMap,
    roots: &BTreeSet<String>,
    recursive: bool,
) -> Vec<ResolvedSystem> {
    let full = action.with_prerequisites();
    let inherited: Vec<Action> = full.iter().copied().filter(Action::is_recursive).collect();

    runlist
        .iter()
        .map(|system| {
            let allowed = if roots.contains(&system.name) || action.is_recursive() || recursive {
                &full
            } else {
                &inherited
            };
            let history = installed.get(&system.name).map(|record| &record.history);

            let scripts = order_scripts(system.scripts())
                .into_iter()
                .filter(|script| allowed.contains(&script.action))
                .filter(|script| !history.is_some_and(|h| h.has_completed(script.action, &script.name)))
                .map(|script| script.name)
                .collect();

            system.with_scripts(scripts)
        })
        .collect()
}
