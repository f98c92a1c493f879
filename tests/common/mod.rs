// tests/common/mod.rs

//! Shared fixtures for integration tests
//!
//! Systems are built as real directories with `/bin/sh` scripts, packed
//! with the crate's own codec and published to an in-memory registry.

#![allow(dead_code)]

use quill::{
    CallbackEvents, ConfigMap, Event, LifecycleEngine, MemoryRegistry, QuillConfig, Registry,
    SharedSink, SystemDescriptor, archive, paths,
};
use serde_json::Value;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
    pub registry: MemoryRegistry,
    pub config: QuillConfig,
    events: Arc<Mutex<Vec<Event>>>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = QuillConfig::with_root(&dir.path().join("state"));
        config.resolve.os = Some("linux".to_string());
        config.batch.concurrency = 2;

        Self {
            dir,
            registry: MemoryRegistry::new(),
            config,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sink(&self) -> SharedSink {
        let events = self.events.clone();
        Arc::new(CallbackEvents::new(move |event| events.lock().unwrap().push(event)))
    }

    pub fn engine(&self) -> LifecycleEngine<'_> {
        LifecycleEngine::new(&self.config, &self.registry, self.sink())
    }

    /// Every script stdout line so far, each followed by a newline
    pub fn stdout(&self) -> String {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                Event::ScriptStdout { line, .. } => Some(format!("{}\n", line)),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn install_dir(&self, name: &str, version: &str) -> PathBuf {
        paths::install_version_dir(&self.config.paths.install, name, version)
    }

    pub fn set_config(&self, name: &str, value: Value) {
        self.registry.set_config(name, &object(value)).unwrap();
    }
}

pub fn object(value: Value) -> ConfigMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

pub fn specs(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// A system directory under construction
pub struct SystemBuilder {
    descriptor: SystemDescriptor,
    scripts: Vec<(String, String)>,
    files: Vec<(String, String)>,
}

impl SystemBuilder {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            descriptor: SystemDescriptor::new(name, version),
            scripts: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn dep(mut self, name: &str, range: &str) -> Self {
        self.descriptor.dependencies.insert(name, range);
        self
    }

    pub fn runlist(mut self, names: &[&str]) -> Self {
        self.descriptor.runlist = Some(specs(names));
        self
    }

    /// Add a script; the body runs under `/bin/sh`
    pub fn script(mut self, name: &str, body: &str) -> Self {
        self.descriptor.scripts.push(name.to_string());
        self.scripts.push((name.to_string(), body.to_string()));
        self
    }

    /// Script that echoes one line
    pub fn echo(self, name: &str, line: &str) -> Self {
        let body = format!("echo \"{}\"\n", line);
        self.script(name, &body)
    }

    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_string(), content.to_string()));
        self
    }

    pub fn config(mut self, value: Value) -> Self {
        self.descriptor.config = object(value);
        self
    }

    /// Write the directory, pack it and publish it
    pub fn publish(self, fixture: &Fixture) -> SystemDescriptor {
        let name = format!("{}-{}", self.descriptor.name, self.descriptor.version);
        let source = fixture.dir.path().join("sources").join(&name);
        self.write(&source);

        let tarball = fixture.dir.path().join("tarballs").join(format!("{}.tgz", name));
        archive::pack(&source, &tarball, &quill::SilentEvents).unwrap();
        fixture.registry.publish(&self.descriptor, &tarball).unwrap();
        self.descriptor
    }

    pub fn write(&self, dir: &Path) {
        let scripts = dir.join(paths::SCRIPTS_DIR);
        fs::create_dir_all(&scripts).unwrap();
        for (script, body) in &self.scripts {
            let path = scripts.join(script);
            fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        for (relative, content) in &self.files {
            let path = dir.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
        }
        fs::write(
            dir.join(paths::DESCRIPTOR_FILE),
            serde_json::to_vec_pretty(&self.descriptor).unwrap(),
        )
        .unwrap();
    }
}
