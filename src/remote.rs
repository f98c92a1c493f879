// src/remote.rs

//! Run one command on many hosts
//!
//! Each host is a separate batch unit: the transport program (`ssh` unless
//! configured otherwise) is invoked as `<transport> <host> <command...>`.
//! A host that fails does not stop the others.

use crate::batch::{BatchReport, BatchRunner};
use crate::error::{Error, Result};
use std::process::{Command, Stdio};
use tracing::{info, warn};

/// Default transport program
pub const DEFAULT_TRANSPORT: &str = "ssh";

/// Captured result of one host's command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOutput {
    pub host: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl HostOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub struct RemoteRunner {
    transport: String,
    runner: BatchRunner,
}

impl RemoteRunner {
    pub fn new(concurrency: usize) -> Result<Self> {
        Ok(Self {
            transport: DEFAULT_TRANSPORT.to_string(),
            runner: BatchRunner::new(concurrency)?,
        })
    }

    /// Use a different transport program
    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = transport.into();
        self
    }

    /// Run `command` on every host; results keep the order of `hosts`
    ///
    /// A non-zero exit is reported in the host's output, not as an error.
    /// Only a failure to spawn the transport is an error for that host.
    pub fn run(&self, hosts: &[String], command: &[String]) -> BatchReport<HostOutput> {
        let units: Vec<_> = hosts
            .iter()
            .map(|host| {
                let transport = self.transport.clone();
                let host = host.clone();
                let command = command.to_vec();
                move || run_one(&transport, &host, &command)
            })
            .collect();

        self.runner.run(units, |index, result| match result {
            Ok(output) if output.success() => info!("{}: done", output.host),
            Ok(output) => warn!("{}: exited with {:?}", output.host, output.exit_code),
            Err(e) => warn!("{}: {}", hosts[index], e),
        })
    }
}

fn run_one(transport: &str, host: &str, command: &[String]) -> Result<HostOutput> {
    let output = Command::new(transport)
        .arg(host)
        .args(command)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::IoError(format!("Failed to run {} for {}: {}", transport, host, e)))?;

    Ok(HostOutput {
        host: host.to_string(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run `command` on `hosts` over ssh with at most `concurrency` at once
pub fn run_on_hosts(hosts: &[String], command: &[String], concurrency: usize) -> Result<BatchReport<HostOutput>> {
    Ok(RemoteRunner::new(concurrency)?.run(hosts, command))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<String> {
        vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()]
    }

    #[test]
    fn test_runs_every_host_in_order() {
        let runner = RemoteRunner::new(2).unwrap().with_transport("echo");
        let report = runner.run(&hosts(), &["uptime".to_string()]);

        assert_eq!(report.len(), 3);
        assert_eq!(report.succeeded(), 3);
        let outputs = report.into_all().unwrap();
        assert_eq!(outputs[0].stdout.trim(), "alpha uptime");
        assert_eq!(outputs[2].host, "gamma");
    }

    #[test]
    fn test_missing_transport_fails_each_host() {
        let runner = RemoteRunner::new(2).unwrap().with_transport("/nonexistent/transport");
        let report = runner.run(&hosts(), &["true".to_string()]);
        assert_eq!(report.failed(), 3);
    }

    #[test]
    fn test_non_zero_exit_is_reported() {
        let runner = RemoteRunner::new(1).unwrap().with_transport("false");
        let report = runner.run(&hosts()[..1], &[]);
        let outputs = report.into_all().unwrap();
        assert!(!outputs[0].success());
    }
}
