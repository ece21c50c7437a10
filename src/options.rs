//! Composable customizers for [`ContainerSpec`].
//!
//! Each option is a reusable function over the spec, applied in order by
//! [`ContainerSpec::from_options`]. Image, wait strategy, name/reuse, logger,
//! `started` and probe budget are overwritten by later options; ports, env,
//! files, mounts, command arguments and hooks accumulate.

use crate::container::ContainerRef;
use crate::domain::{
    ContainerFile, ContainerHook, ContainerMount, ContainerSpec, DEFAULT_FILE_MODE, HookPoint,
    LogSink, WaitStrategy,
};
use anyhow::Context;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const TARANTOOL15_READY_LOG: &str = "entering event loop";
pub const TARANTOOL2_READY_LOG: &str = "entering the event loop";
pub const CONFIG_FILE_PATH: &str = "/etc/tarantool/tarantool.cfg";

#[derive(Clone)]
pub struct Customizer(Arc<dyn Fn(&mut ContainerSpec) + Send + Sync>);

impl Customizer {
    pub fn new(f: impl Fn(&mut ContainerSpec) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn customize(&self, spec: &mut ContainerSpec) {
        (self.0)(spec)
    }
}

impl fmt::Debug for Customizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Customizer")
    }
}

pub fn with_image(image: impl Into<String>) -> Customizer {
    let image = image.into();
    Customizer::new(move |spec| spec.image = image.clone())
}

pub fn with_wait(wait: WaitStrategy) -> Customizer {
    Customizer::new(move |spec| spec.wait = Some(wait.clone()))
}

/// Tarantool 1.5 image, ready once it logs "entering event loop".
pub fn with_tarantool15(image: impl Into<String>, startup_timeout: Duration) -> Customizer {
    with_flavor(image.into(), TARANTOOL15_READY_LOG, startup_timeout)
}

/// Tarantool 2.x image, ready once it logs "entering the event loop".
pub fn with_tarantool2(image: impl Into<String>, startup_timeout: Duration) -> Customizer {
    with_flavor(image.into(), TARANTOOL2_READY_LOG, startup_timeout)
}

fn with_flavor(image: String, ready_log: &'static str, startup_timeout: Duration) -> Customizer {
    Customizer::new(move |spec| {
        spec.image = image.clone();
        spec.wait = Some(WaitStrategy::for_log(ready_log, startup_timeout));
    })
}

pub fn with_exposed_port(port: impl Into<String>) -> Customizer {
    let port = port.into();
    Customizer::new(move |spec| {
        if !spec.exposed_ports.contains(&port) {
            spec.exposed_ports.push(port.clone());
        }
    })
}

/// Copies a host file into the container from a pre-start hook.
pub fn with_copy_file(
    host_path: impl Into<PathBuf>,
    container_path: impl Into<String>,
    mode: u32,
) -> Customizer {
    let host_path = host_path.into();
    let container_path = container_path.into();
    with_pre_start(move |c| {
        let host_path = host_path.clone();
        let container_path = container_path.clone();
        async move {
            c.copy_file_to_container(&host_path, &container_path, mode)
                .await?;
            Ok(())
        }
    })
}

/// Installs `cfg_path` as the server config file.
pub fn with_config_file(cfg_path: impl Into<PathBuf>) -> Customizer {
    with_copy_file(cfg_path, CONFIG_FILE_PATH, DEFAULT_FILE_MODE)
}

/// Declares `cfg_path` as a spec file placed at `container_path` on creation.
pub fn with_config_file_mapping(
    cfg_path: impl Into<PathBuf>,
    container_path: impl Into<String>,
) -> Customizer {
    let file = ContainerFile {
        host_path: cfg_path.into(),
        container_path: container_path.into(),
        mode: DEFAULT_FILE_MODE,
    };
    Customizer::new(move |spec| spec.files.push(file.clone()))
}

/// Bind-mounts a script directory, read-write.
pub fn with_scripts_mapping(
    script_dir: impl Into<PathBuf>,
    container_dir: impl Into<String>,
) -> Customizer {
    let mount = ContainerMount {
        source: script_dir.into(),
        target: container_dir.into(),
        read_only: false,
    };
    Customizer::new(move |spec| spec.mounts.push(mount.clone()))
}

/// Copies a script directory, symlink targets included, from a pre-start hook.
pub fn with_scripts(script_dir: impl Into<PathBuf>, container_dir: impl Into<String>) -> Customizer {
    let script_dir = script_dir.into();
    let container_dir = container_dir.into();
    with_pre_start(move |c| {
        let script_dir = script_dir.clone();
        let container_dir = container_dir.clone();
        async move {
            c.copy_dir_to_container(&script_dir, &container_dir, DEFAULT_FILE_MODE)
                .await?;
            Ok(())
        }
    })
}

pub fn with_logger(sink: Arc<dyn LogSink>) -> Customizer {
    Customizer::new(move |spec| spec.logger = Some(sink.clone()))
}

/// Appends a shell command. The first use prefixes `sh -c`.
pub fn with_command<I, S>(cmd: I) -> Customizer
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let cmd: Vec<String> = cmd.into_iter().map(Into::into).collect();
    Customizer::new(move |spec| {
        if spec.cmd.is_empty() {
            spec.cmd = vec!["sh".to_string(), "-c".to_string()];
        }
        spec.cmd.extend(cmd.iter().cloned());
    })
}

/// Appends arguments for the image entrypoint.
pub fn with_arguments<I, S>(args: I) -> Customizer
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    Customizer::new(move |spec| spec.cmd.extend(args.iter().cloned()))
}

pub fn with_name(name: impl Into<String>, reuse: bool) -> Customizer {
    let name = name.into();
    Customizer::new(move |spec| {
        spec.name = Some(name.clone());
        spec.reuse = reuse;
    })
}

/// Forwards host variables whose name starts with `prefix`.
///
/// The host environment is read here, once; applying the option later does
/// not see changes made in between.
pub fn with_env(prefix: &str) -> Customizer {
    let snapshot = env_with_prefix(std::env::vars(), prefix);
    Customizer::new(move |spec| spec.env.extend(snapshot.clone()))
}

fn env_with_prefix(
    vars: impl IntoIterator<Item = (String, String)>,
    prefix: &str,
) -> BTreeMap<String, String> {
    vars.into_iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .collect()
}

/// Starts the container as part of `new_container`.
pub fn with_started(started: bool) -> Customizer {
    Customizer::new(move |spec| spec.started = started)
}

/// Gates endpoint resolution on the reachability probe with `budget`.
pub fn with_probe_budget(budget: Duration) -> Customizer {
    Customizer::new(move |spec| spec.probe_budget = Some(budget))
}

pub fn with_hook<F, Fut>(point: HookPoint, hook: F) -> Customizer
where
    F: Fn(ContainerRef) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let hook = ContainerHook::new(hook);
    Customizer::new(move |spec| spec.add_hook(point, hook.clone()))
}

pub fn with_pre_start<F, Fut>(hook: F) -> Customizer
where
    F: Fn(ContainerRef) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    with_hook(HookPoint::PreStart, hook)
}

pub fn with_post_start<F, Fut>(hook: F) -> Customizer
where
    F: Fn(ContainerRef) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    with_hook(HookPoint::PostStart, hook)
}

pub fn with_pre_stop<F, Fut>(hook: F) -> Customizer
where
    F: Fn(ContainerRef) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    with_hook(HookPoint::PreStop, hook)
}

/// Runs `hook` with the server's `host:port` after every start.
pub fn with_hook_on_start<F, Fut>(hook: F) -> Customizer
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    with_connection_hook(HookPoint::PostStart, hook)
}

/// Runs `hook` with the server's `host:port` before every stop.
pub fn with_hook_on_stop<F, Fut>(hook: F) -> Customizer
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    with_connection_hook(HookPoint::PreStop, hook)
}

fn with_connection_hook<F, Fut>(point: HookPoint, hook: F) -> Customizer
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let hook = Arc::new(hook);
    with_hook(point, move |c| {
        let hook = hook.clone();
        async move {
            let conn = c
                .server_host_port()
                .await
                .context("can't get host:port of tarantool container")?;
            (*hook)(conn).await
        }
    })
}
