use crate::domain::{ContainerRuntime, ContainerSpec, ContainerState, LogSink, LogStream};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use walkdir::WalkDir;

const FIRST_HOST_PORT: u16 = 49153;

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: Option<String>,
    pub state: ContainerState,
    pub spec: ContainerSpec,
    pub ports: HashMap<String, u16>,
    pub logs: String,
    pub files: HashMap<String, (Vec<u8>, u32)>,
}

/// In-memory runtime. Ports are bound on start and released on stop, like a
/// real network namespace.
#[derive(Debug)]
pub struct MockRuntime {
    containers: RwLock<HashMap<String, MockContainer>>,
    commands: RwLock<Vec<String>>,
    fail_on: RwLock<Option<String>>,
    preset_ports: RwLock<HashMap<String, u16>>,
    host: RwLock<String>,
    next_id: RwLock<u32>,
    next_port: RwLock<u16>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            commands: RwLock::new(Vec::new()),
            fail_on: RwLock::new(None),
            preset_ports: RwLock::new(HashMap::new()),
            host: RwLock::new("localhost".to_string()),
            next_id: RwLock::new(0),
            next_port: RwLock::new(FIRST_HOST_PORT),
        }
    }

    /// Registers an existing container, as if left over from an earlier run.
    pub fn add_container(&self, name: &str, state: ContainerState) -> String {
        let id = self.allocate_id();
        let spec = ContainerSpec {
            name: Some(name.to_string()),
            ..ContainerSpec::default()
        };
        let ports = if state == ContainerState::Running {
            self.bind_ports(&spec)
        } else {
            HashMap::new()
        };
        self.containers.write().unwrap().insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                name: Some(name.to_string()),
                state,
                spec,
                ports,
                logs: String::new(),
                files: HashMap::new(),
            },
        );
        id
    }

    pub fn set_fail_on(&self, operation: &str) {
        *self.fail_on.write().unwrap() = Some(operation.to_string());
    }

    pub fn clear_fail_on(&self) {
        *self.fail_on.write().unwrap() = None;
    }

    pub fn set_host(&self, host: &str) {
        *self.host.write().unwrap() = host.to_string();
    }

    /// Host port to bind `port` to on the next start, instead of an allocated one.
    pub fn preset_port(&self, port: &str, host_port: u16) {
        self.preset_ports
            .write()
            .unwrap()
            .insert(port.to_string(), host_port);
    }

    pub fn set_logs(&self, id: &str, logs: &str) {
        if let Some(container) = self.containers.write().unwrap().get_mut(id) {
            container.logs = logs.to_string();
        }
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }

    pub fn get_state(&self, id: &str) -> Option<ContainerState> {
        self.containers.read().unwrap().get(id).map(|c| c.state)
    }

    pub fn container(&self, id: &str) -> Option<MockContainer> {
        self.containers.read().unwrap().get(id).cloned()
    }

    /// Content and mode of a file copied into the container.
    pub fn file(&self, id: &str, path: &str) -> Option<(Vec<u8>, u32)> {
        self.containers
            .read()
            .unwrap()
            .get(id)
            .and_then(|c| c.files.get(path).cloned())
    }

    fn allocate_id(&self) -> String {
        let mut next = self.next_id.write().unwrap();
        *next += 1;
        format!("mock-{:04}", *next)
    }

    fn bind_ports(&self, spec: &ContainerSpec) -> HashMap<String, u16> {
        let preset = self.preset_ports.read().unwrap();
        let mut next = self.next_port.write().unwrap();
        spec.exposed_ports
            .iter()
            .map(|port| {
                let host_port = preset.get(port).copied().unwrap_or_else(|| {
                    let allocated = *next;
                    *next += 1;
                    allocated
                });
                (port.clone(), host_port)
            })
            .collect()
    }

    fn record_command(&self, cmd: &str) {
        self.commands.write().unwrap().push(cmd.to_string());
    }

    fn check_fail(&self, operation: &str) -> Result<()> {
        if let Some(ref fail_on) = *self.fail_on.read().unwrap() {
            if fail_on == operation {
                bail!("Mock failure on: {}", operation);
            }
        }
        Ok(())
    }

    fn with_container<T>(&self, id: &str, f: impl FnOnce(&mut MockContainer) -> T) -> Result<T> {
        let mut containers = self.containers.write().unwrap();
        let container = containers
            .get_mut(id)
            .with_context(|| format!("no such container: {id}"))?;
        Ok(f(container))
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn find_by_name(&self, name: &str) -> Result<Option<String>> {
        self.record_command(&format!("find:{name}"));
        self.check_fail("find_by_name")?;

        Ok(self
            .containers
            .read()
            .unwrap()
            .values()
            .find(|c| c.name.as_deref() == Some(name))
            .map(|c| c.id.clone()))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        self.record_command(&format!("create:{}", spec.display_name()));
        self.check_fail("create")?;

        if let Some(name) = &spec.name {
            let taken = self
                .containers
                .read()
                .unwrap()
                .values()
                .any(|c| c.name.as_deref() == Some(name.as_str()));
            if taken {
                bail!("container name {name:?} is already in use");
            }
        }

        let id = self.allocate_id();
        self.containers.write().unwrap().insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                name: spec.name.clone(),
                state: ContainerState::Created,
                spec: spec.clone(),
                ports: HashMap::new(),
                logs: String::new(),
                files: HashMap::new(),
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.record_command(&format!("start:{id}"));
        self.check_fail("start")?;

        let spec = self.with_container(id, |c| c.spec.clone())?;
        let ports = self.bind_ports(&spec);
        self.with_container(id, |c| {
            c.state = ContainerState::Running;
            c.ports = ports;
        })
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        self.record_command(&format!("stop:{id}:{}s", grace.as_secs()));
        self.check_fail("stop")?;

        self.with_container(id, |c| {
            c.state = ContainerState::Stopped;
            c.ports.clear();
        })
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.record_command(&format!("remove:{id}"));
        self.check_fail("remove")?;

        self.containers.write().unwrap().remove(id);
        Ok(())
    }

    async fn is_running(&self, id: &str) -> Result<bool> {
        self.record_command(&format!("is_running:{id}"));
        self.check_fail("is_running")?;

        self.with_container(id, |c| c.state == ContainerState::Running)
    }

    async fn host(&self, id: &str) -> Result<String> {
        self.check_fail("host")?;
        self.with_container(id, |_| ())?;
        Ok(self.host.read().unwrap().clone())
    }

    async fn mapped_port(&self, id: &str, port: &str) -> Result<Option<u16>> {
        self.check_fail("mapped_port")?;
        self.with_container(id, |c| c.ports.get(port).copied())
    }

    async fn logs(&self, id: &str) -> Result<String> {
        self.check_fail("logs")?;
        self.with_container(id, |c| c.logs.clone())
    }

    async fn follow_logs(&self, id: &str) -> Result<LogStream> {
        self.record_command(&format!("follow_logs:{id}"));
        self.check_fail("follow_logs")?;

        let lines: Vec<String> =
            self.with_container(id, |c| c.logs.lines().map(str::to_string).collect())?;
        Ok(futures::stream::iter(lines).boxed())
    }

    async fn copy_file_to_container(
        &self,
        id: &str,
        host_path: &Path,
        container_path: &str,
        mode: u32,
    ) -> Result<()> {
        self.record_command(&format!("copy_file:{id}:{container_path}"));
        self.check_fail("copy_file")?;

        let content =
            std::fs::read(host_path).with_context(|| format!("reading {host_path:?}"))?;
        self.with_container(id, |c| {
            c.files
                .insert(container_path.to_string(), (content, mode));
        })
    }

    async fn copy_dir_to_container(
        &self,
        id: &str,
        host_dir: &Path,
        container_parent: &str,
        mode: u32,
    ) -> Result<()> {
        self.record_command(&format!("copy_dir:{id}:{container_parent}"));
        self.check_fail("copy_dir")?;

        let dir_name = host_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base = format!("{}/{dir_name}", container_parent.trim_end_matches('/'));

        let mut copied = Vec::new();
        for entry in WalkDir::new(host_dir).follow_links(false) {
            let entry = entry?;
            // Like the real bulk copy: links are skipped.
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(host_dir)?;
            let content = std::fs::read(entry.path())?;
            copied.push((format!("{base}/{}", rel.to_string_lossy()), content));
        }

        self.with_container(id, |c| {
            for (path, content) in copied {
                c.files.insert(path, (content, mode));
            }
        })
    }
}

/// Sink collecting forwarded lines.
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl LogSink for RecordingSink {
    fn accept(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}
