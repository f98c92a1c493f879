// src/system/action.rs

//! Lifecycle actions and script tagging
//!
//! Scripts are tagged with an action by file-name prefix: `install.sh`,
//! `configure-nginx.sh`, `start.py`, ... Each action declares the actions
//! that must have run before it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle action, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Install,
    Configure,
    Update,
    Start,
    Uninstall,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Install,
        Action::Configure,
        Action::Update,
        Action::Start,
        Action::Uninstall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Configure => "configure",
            Self::Update => "update",
            Self::Start => "start",
            Self::Uninstall => "uninstall",
        }
    }

    /// Actions that must have run before this one (direct)
    pub fn prerequisites(&self) -> &'static [Action] {
        match self {
            Self::Install | Self::Uninstall => &[],
            Self::Configure => &[Action::Install],
            Self::Update | Self::Start => &[Action::Install, Action::Configure],
        }
    }

    /// This action plus every transitive prerequisite
    pub fn with_prerequisites(&self) -> Vec<Action> {
        let mut out = vec![*self];
        let mut i = 0;
        while i < out.len() {
            for pre in out[i].prerequisites() {
                if !out.contains(pre) {
                    out.push(*pre);
                }
            }
            i += 1;
        }
        out.sort();
        out
    }

    /// Whether the action propagates to dependencies by default
    pub fn is_recursive(&self) -> bool {
        matches!(self, Self::Install | Self::Configure)
    }

    /// Execution rank inside one system: install, configure, then update/start
    fn rank(&self) -> u8 {
        match self {
            Self::Uninstall => 0,
            Self::Install => 1,
            Self::Configure => 2,
            Self::Update | Self::Start => 3,
        }
    }

    /// Tag a script by its file-name prefix
    pub fn for_script(script: &str) -> Option<Action> {
        let file = script.rsplit('/').next().unwrap_or(script);
        [
            Action::Uninstall,
            Action::Configure,
            Action::Install,
            Action::Update,
            Action::Start,
        ]
        .into_iter()
        .find(|action| file.starts_with(action.as_str()))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| crate::Error::ParseError(format!("Unknown lifecycle action: {}", s)))
    }
}

/// A script name together with the action it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRef {
    pub name: String,
    pub action: Action,
}

impl ScriptRef {
    pub fn parse(name: &str) -> Option<Self> {
        Action::for_script(name).map(|action| Self {
            name: name.to_string(),
            action,
        })
    }
}

/// Order one system's scripts: install, then configure, then update/start
///
/// Declared order is kept among scripts of the same rank. Untagged scripts
/// are dropped.
pub fn order_scripts(scripts: &[String]) -> Vec<ScriptRef> {
    let mut refs: Vec<ScriptRef> = scripts.iter().filter_map(|s| ScriptRef::parse(s)).collect();
    refs.sort_by_key(|r| r.action.rank());
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_script() {
        assert_eq!(Action::for_script("install.sh"), Some(Action::Install));
        assert_eq!(Action::for_script("uninstall.sh"), Some(Action::Uninstall));
        assert_eq!(Action::for_script("configure-nginx.sh"), Some(Action::Configure));
        assert_eq!(Action::for_script("scripts/start.py"), Some(Action::Start));
        assert_eq!(Action::for_script("update"), Some(Action::Update));
        assert_eq!(Action::for_script("helpers.sh"), None);
    }

    #[test]
    fn test_with_prerequisites() {
        assert_eq!(Action::Install.with_prerequisites(), vec![Action::Install]);
        assert_eq!(
            Action::Configure.with_prerequisites(),
            vec![Action::Install, Action::Configure]
        );
        assert_eq!(
            Action::Start.with_prerequisites(),
            vec![Action::Install, Action::Configure, Action::Start]
        );
        assert_eq!(Action::Uninstall.with_prerequisites(), vec![Action::Uninstall]);
    }

    #[test]
    fn test_order_scripts_overrides_declared_order() {
        let scripts: Vec<String> = ["start.sh", "configure.sh", "install.sh", "notes.txt"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let ordered: Vec<String> = order_scripts(&scripts).into_iter().map(|r| r.name).collect();
        assert_eq!(ordered, vec!["install.sh", "configure.sh", "start.sh"]);
    }

    #[test]
    fn test_update_and_start_keep_declared_order() {
        let scripts: Vec<String> = ["start.sh", "update.sh", "configure.sh"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let ordered: Vec<String> = order_scripts(&scripts).into_iter().map(|r| r.name).collect();
        assert_eq!(ordered, vec!["configure.sh", "start.sh", "update.sh"]);
    }

    #[test]
    fn test_action_round_trip_str() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("restart".parse::<Action>().is_err());
    }
}
