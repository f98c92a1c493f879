// src/commands/exec.rs

//! Remote command fan-out

use anyhow::{Result, bail};
use quill::remote::RemoteRunner;
use quill::QuillConfig;

pub fn cmd_exec(
    config: &QuillConfig,
    hosts: &[String],
    command: &[String],
    concurrency: Option<usize>,
    transport: &str,
) -> Result<()> {
    let runner = RemoteRunner::new(concurrency.unwrap_or(config.batch.concurrency))?.with_transport(transport);
    let report = runner.run(hosts, command);

    let mut failures = 0;
    for (host, result) in hosts.iter().zip(report.results()) {
        match result {
            Ok(output) => {
                for line in output.stdout.lines() {
                    println!("[{}] {}", host, line);
                }
                for line in output.stderr.lines() {
                    eprintln!("[{}] {}", host, line);
                }
                if !output.success() {
                    failures += 1;
                    eprintln!("[{}] exited with {:?}", host, output.exit_code);
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("[{}] {}", host, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} hosts failed", failures, hosts.len());
    }
    Ok(())
}
