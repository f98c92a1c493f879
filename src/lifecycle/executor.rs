// src/lifecycle/executor.rs

//! Lifecycle script execution
//!
//! Scripts run as child processes from the system's install directory with
//! stdin closed. Configuration arrives as `quill_*` environment variables on
//! top of the inherited environment. Output is streamed line by line as
//! events while the script runs; there is no timeout.

use crate::error::{Error, Result};
use crate::paths;
use crate::progress::{Event, SharedSink};
use crate::system::Action;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::{debug, info};

/// Runs the scripts of one installed system
pub struct ScriptExecutor {
    system: String,
    version: String,
    dir: PathBuf,
    env: BTreeMap<String, String>,
    events: SharedSink,
}

impl ScriptExecutor {
    pub fn new(
        system: &str,
        version: &str,
        dir: &Path,
        env: BTreeMap<String, String>,
        events: SharedSink,
    ) -> Self {
        Self {
            system: system.to_string(),
            version: version.to_string(),
            dir: dir.to_path_buf(),
            env,
            events,
        }
    }

    fn failure(&self, script: &str, reason: String) -> Error {
        Error::ScriptFailure {
            system: format!("{}@{}", self.system, self.version),
            script: script.to_string(),
            reason,
        }
    }

    /// Run one script to completion
    ///
    /// A spawn error or non-zero exit is a `ScriptFailure`.
    pub fn execute(&self, script: &str, action: Action) -> Result<()> {
        let path = paths::script_path(&self.dir, script);
        if !path.is_file() {
            return Err(self.failure(script, format!("{} does not exist", path.display())));
        }

        info!("Running {} {} for {}@{}", action, script, self.system, self.version);
        self.events.emit(Event::ScriptStarted {
            system: self.system.clone(),
            script: script.to_string(),
        });

        let mut child = Command::new(&path)
            .current_dir(&self.dir)
            .envs(&self.env)
            .env("QUILL_SYSTEM", &self.system)
            .env("QUILL_VERSION", &self.version)
            .env("QUILL_ACTION", action.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.failure(script, format!("failed to spawn: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let status = thread::scope(|scope| {
            if let Some(out) = stdout {
                scope.spawn(|| self.stream(out, script, false));
            }
            if let Some(err) = stderr {
                scope.spawn(|| self.stream(err, script, true));
            }
            child.wait()
        })
        .map_err(|e| self.failure(script, format!("failed to wait: {}", e)))?;

        self.events.emit(Event::ScriptFinished {
            system: self.system.clone(),
            script: script.to_string(),
            exit_code: status.code(),
        });

        if status.success() {
            debug!("{} finished for {}", script, self.system);
            Ok(())
        } else {
            let reason = match status.code() {
                Some(code) => format!("exited with code {}", code),
                None => "terminated by a signal".to_string(),
            };
            Err(self.failure(script, reason))
        }
    }

    fn stream(&self, reader: impl Read, script: &str, is_stderr: bool) {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            let (system, script) = (self.system.clone(), script.to_string());
            self.events.emit(if is_stderr {
                Event::ScriptStderr { system, script, line }
            } else {
                Event::ScriptStdout { system, script, line }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::CallbackEvents;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) {
        let path = paths::script_path(dir, name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn capture() -> (SharedSink, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let clone = events.clone();
        let sink: SharedSink = Arc::new(CallbackEvents::new(move |e| clone.lock().unwrap().push(e)));
        (sink, events)
    }

    #[test]
    fn test_streams_output_and_env() {
        let dir = TempDir::new().unwrap();
        script(dir.path(), "install.sh", "echo \"port=$quill_port\"\necho oops >&2\npwd\n");

        let (sink, events) = capture();
        let mut env = BTreeMap::new();
        env.insert("quill_port".to_string(), "8080".to_string());
        let executor = ScriptExecutor::new("web", "1.0.0", dir.path(), env, sink);
        executor.execute("install.sh", Action::Install).unwrap();

        let events = events.lock().unwrap();
        let stdout: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                Event::ScriptStdout { line, .. } => Some(line.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stdout[0], "port=8080");
        assert_eq!(
            fs::canonicalize(stdout[1]).unwrap(),
            fs::canonicalize(dir.path()).unwrap()
        );
        assert!(events.iter().any(|e| matches!(e, Event::ScriptStderr { line, .. } if line == "oops")));
        assert!(matches!(
            events.last(),
            Some(Event::ScriptFinished { exit_code: Some(0), .. })
        ));
    }

    #[test]
    fn test_non_zero_exit_fails() {
        let dir = TempDir::new().unwrap();
        script(dir.path(), "start.sh", "exit 3\n");
        let (sink, _) = capture();
        let executor = ScriptExecutor::new("web", "1.0.0", dir.path(), BTreeMap::new(), sink);

        let err = executor.execute("start.sh", Action::Start).unwrap_err();
        assert!(matches!(err, Error::ScriptFailure { ref reason, .. } if reason.contains("code 3")));
    }

    #[test]
    fn test_missing_script_fails() {
        let dir = TempDir::new().unwrap();
        let (sink, _) = capture();
        let executor = ScriptExecutor::new("web", "1.0.0", dir.path(), BTreeMap::new(), sink);
        assert!(executor.execute("install.sh", Action::Install).is_err());
    }
}
