use super::hooks::{ContainerHook, HookPoint, LifecycleHooks};
use super::traits::LogSink;
use crate::options::Customizer;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_IMAGE: &str = "tarantool/tarantool:1.5";
pub const DEFAULT_PORT: &str = "3301/tcp";
pub const DEFAULT_FILE_MODE: u32 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Stopped,
    Terminated,
}

/// A host file placed into the container before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFile {
    pub host_path: PathBuf,
    pub container_path: String,
    pub mode: u32,
}

/// A bind mount of a host path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

/// Condition the runtime must observe before a start counts as complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Wait until the container output contains `pattern`.
    ForLog { pattern: String, timeout: Duration },
}

impl WaitStrategy {
    pub fn for_log(pattern: impl Into<String>, timeout: Duration) -> Self {
        Self::ForLog {
            pattern: pattern.into(),
            timeout,
        }
    }
}

/// Declarative description of the container to provision.
///
/// Scalar fields follow last-writer-wins as customizers are applied; list
/// fields (ports, env, files, mounts, cmd, hooks) accumulate in order.
#[derive(Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub exposed_ports: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub files: Vec<ContainerFile>,
    pub mounts: Vec<ContainerMount>,
    pub cmd: Vec<String>,
    pub wait: Option<WaitStrategy>,
    pub name: Option<String>,
    pub reuse: bool,
    pub started: bool,
    pub probe_budget: Option<Duration>,
    pub logger: Option<Arc<dyn LogSink>>,
    pub hooks: LifecycleHooks,
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            exposed_ports: vec![DEFAULT_PORT.to_string()],
            env: BTreeMap::new(),
            files: Vec::new(),
            mounts: Vec::new(),
            cmd: Vec::new(),
            wait: None,
            name: None,
            reuse: false,
            started: false,
            probe_budget: None,
            logger: None,
            hooks: LifecycleHooks::default(),
        }
    }
}

impl ContainerSpec {
    /// Applies `opts` left to right over a default spec.
    pub fn from_options(opts: &[Customizer]) -> Self {
        opts.iter().fold(Self::default(), |mut spec, opt| {
            opt.customize(&mut spec);
            spec
        })
    }

    pub fn add_hook(&mut self, point: HookPoint, hook: ContainerHook) {
        self.hooks.push(point, hook);
    }

    /// Port used for the server endpoint.
    pub fn primary_port(&self) -> &str {
        self.exposed_ports
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_PORT)
    }

    /// Name used in diagnostics when the spec has no explicit name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.image)
    }
}

impl fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerSpec")
            .field("image", &self.image)
            .field("exposed_ports", &self.exposed_ports)
            .field("env", &self.env)
            .field("files", &self.files)
            .field("mounts", &self.mounts)
            .field("cmd", &self.cmd)
            .field("wait", &self.wait)
            .field("name", &self.name)
            .field("reuse", &self.reuse)
            .field("started", &self.started)
            .field("probe_budget", &self.probe_budget)
            .field("logger", &self.logger.is_some())
            .field("hooks", &self.hooks)
            .finish()
    }
}
