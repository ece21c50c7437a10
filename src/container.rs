//! Container handle and lifecycle transitions.
//!
//! [`new_container`] turns a list of customizers into a created (or reused)
//! container; [`Container`] then drives start/stop/terminate, runs the
//! lifecycle hooks around them and resolves the server endpoint.

use crate::domain::{
    ContainerRuntime, ContainerSpec, ContainerState, Error, HookPoint, LifecycleHooks, LogSink,
    Result, WaitStrategy,
};
use crate::logs::{LogAttachment, LogForwarder};
use crate::options::Customizer;
use crate::readiness::{ProbeSettings, RetryError, RetryPolicy, check_available, retry_until};
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Grace period given to the server before the runtime kills it.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

const LOG_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resolved `host:port` of a mapped container port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Cheap, cloneable reference to a live container.
///
/// This is what lifecycle hooks receive. It carries no lifecycle state, only
/// what is needed to talk to the runtime about one container.
#[derive(Debug, Clone)]
pub struct ContainerRef {
    id: String,
    runtime: Arc<dyn ContainerRuntime>,
    primary_port: String,
    probe_budget: Option<Duration>,
}

impl ContainerRef {
    pub fn new(id: impl Into<String>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            id: id.into(),
            runtime,
            primary_port: crate::domain::DEFAULT_PORT.to_string(),
            probe_budget: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn host(&self) -> Result<String> {
        self.runtime
            .host(&self.id)
            .await
            .map_err(Error::provisioning("resolve host of", &self.id))
    }

    /// Host port bound to `port`. Fails with [`Error::PortNotMapped`] until
    /// the runtime has bound it.
    pub async fn mapped_port(&self, port: &str) -> Result<u16> {
        self.runtime
            .mapped_port(&self.id, port)
            .await
            .map_err(Error::provisioning("resolve mapped port of", &self.id))?
            .ok_or_else(|| Error::PortNotMapped {
                port: port.to_string(),
            })
    }

    /// Recomputed on every call; mapped ports change across restarts.
    pub async fn endpoint(&self, port: &str) -> Result<Endpoint> {
        let port = self.mapped_port(port).await?;
        let host = self.host().await?;
        Ok(Endpoint { host, port })
    }

    /// `host:port` of the server, gated by the reachability probe when a
    /// budget is configured on the spec or in the environment.
    pub async fn server_host_port(&self) -> Result<String> {
        self.server_host_port_with_cancel(&CancellationToken::new())
            .await
    }

    pub async fn server_host_port_with_cancel(&self, cancel: &CancellationToken) -> Result<String> {
        let addr = self.endpoint(&self.primary_port).await?.to_string();

        let budget = self
            .probe_budget
            .or_else(|| ProbeSettings::from_env().map(|settings| settings.budget));
        if let Some(budget) = budget {
            check_available(&addr, budget, cancel).await?;
        }

        Ok(addr)
    }

    pub async fn copy_file_to_container(
        &self,
        host_path: &Path,
        container_path: &str,
        mode: u32,
    ) -> Result<()> {
        self.runtime
            .copy_file_to_container(&self.id, host_path, container_path, mode)
            .await
            .map_err(Error::copy(host_path))
    }

    /// Copies `host_dir` into `container_parent`, including the content of
    /// symbolic links, which the runtime's bulk copy skips.
    ///
    /// Link targets land at the link's own path below
    /// `container_parent/<dir name>` with `mode`, as regular files. The
    /// directory name is kept on purpose so links sit next to the files the
    /// bulk copy placed, rather than directly under `container_parent`.
    pub async fn copy_dir_to_container(
        &self,
        host_dir: &Path,
        container_parent: &str,
        mode: u32,
    ) -> Result<()> {
        self.runtime
            .copy_dir_to_container(&self.id, host_dir, container_parent, mode)
            .await
            .map_err(Error::copy(host_dir))?;

        let base = match host_dir.file_name() {
            Some(name) => container_join(container_parent, Path::new(name)),
            None => container_parent.trim_end_matches('/').to_string(),
        };

        for entry in WalkDir::new(host_dir).follow_links(false) {
            let entry = entry.map_err(|err| {
                let path = err.path().unwrap_or(host_dir).to_path_buf();
                Error::copy(path)(err.into())
            })?;

            if !entry.path_is_symlink() {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(host_dir)
                .map_err(|err| Error::copy(entry.path())(err.into()))?;
            let target = container_join(&base, rel);

            debug!("copying symlink {:?} to {target}", entry.path());
            self.copy_file_to_container(entry.path(), &target, mode)
                .await?;
        }

        Ok(())
    }
}

/// A provisioned container and its lifecycle state.
///
/// Lifecycle calls on one handle must be serialized by the caller; the
/// `&mut self` receivers enforce that.
pub struct Container {
    target: ContainerRef,
    name: Option<String>,
    state: ContainerState,
    wait: Option<WaitStrategy>,
    hooks: LifecycleHooks,
    logger: Option<Arc<dyn LogSink>>,
    log_forwarder: Option<LogForwarder>,
    log_attachment: LogAttachment,
}

impl Container {
    fn from_spec(
        id: String,
        state: ContainerState,
        runtime: Arc<dyn ContainerRuntime>,
        spec: ContainerSpec,
    ) -> Self {
        let target = ContainerRef {
            primary_port: spec.primary_port().to_string(),
            probe_budget: spec.probe_budget,
            ..ContainerRef::new(id, runtime)
        };

        Self {
            target,
            name: spec.name,
            state,
            wait: spec.wait,
            hooks: spec.hooks,
            logger: spec.logger,
            log_forwarder: None,
            log_attachment: LogAttachment::Disabled,
        }
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }

    pub fn log_attachment(&self) -> &LogAttachment {
        &self.log_attachment
    }

    /// Reference handed to hooks.
    pub fn to_ref(&self) -> ContainerRef {
        self.target.clone()
    }

    /// Starts the container. A no-op when it is already running.
    ///
    /// Order: pre-start hooks, runtime start, log forwarding, wait
    /// strategy, post-start hooks.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            debug!("{} already running", self.target.id);
            if self.log_forwarder.is_none() {
                self.attach_logs().await;
            }
            return Ok(());
        }

        self.run_hooks(HookPoint::PreStart).await?;

        info!("starting container {}", self.target.id);
        self.target
            .runtime
            .start(&self.target.id)
            .await
            .map_err(Error::provisioning("start", &self.target.id))?;
        self.state = ContainerState::Running;

        self.attach_logs().await;

        if let Some(wait) = &self.wait {
            wait_for(&self.target, wait).await?;
        }

        self.run_hooks(HookPoint::PostStart).await
    }

    /// Stops the container with [`STOP_GRACE`]. A no-op unless running.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            debug!("{} not running, nothing to stop", self.target.id);
            return Ok(());
        }

        self.run_hooks(HookPoint::PreStop).await?;

        info!("stopping container {}", self.target.id);
        self.target
            .runtime
            .stop(&self.target.id, STOP_GRACE)
            .await
            .map_err(Error::provisioning("stop", &self.target.id))?;
        self.detach_logs();
        self.state = ContainerState::Stopped;

        Ok(())
    }

    /// Removes the container and its anonymous volumes. Safe to repeat.
    ///
    /// A running container gets its pre-stop hooks first.
    pub async fn terminate(&mut self) -> Result<()> {
        if self.is_running() {
            self.run_hooks(HookPoint::PreStop).await?;
        }
        self.detach_logs();

        info!("terminating container {}", self.target.id);
        self.target
            .runtime
            .remove(&self.target.id)
            .await
            .map_err(Error::provisioning("terminate", &self.target.id))?;
        self.state = ContainerState::Terminated;

        Ok(())
    }

    async fn run_hooks(&self, point: HookPoint) -> Result<()> {
        for (index, hook) in self.hooks.at(point).iter().enumerate() {
            debug!("running {point} hook #{index} of {}", self.target.id);
            hook.call(self.target.clone())
                .await
                .map_err(|source| Error::Hook {
                    point,
                    index,
                    source: source.into(),
                })?;
        }
        Ok(())
    }

    async fn attach_logs(&mut self) {
        self.detach_logs();

        let Some(sink) = self.logger.clone() else {
            self.log_attachment = LogAttachment::Disabled;
            return;
        };

        self.log_attachment =
            match LogForwarder::attach(self.target.runtime.as_ref(), &self.target.id, sink).await {
                Ok(forwarder) => {
                    self.log_forwarder = Some(forwarder);
                    LogAttachment::Attached
                }
                Err(err) => {
                    warn!("can't follow logs of {}: {err:#}", self.target.id);
                    LogAttachment::Failed(format!("{err:#}"))
                }
            };
    }

    fn detach_logs(&mut self) {
        if let Some(forwarder) = self.log_forwarder.take() {
            forwarder.shutdown();
        }
    }
}

impl Deref for Container {
    type Target = ContainerRef;

    fn deref(&self) -> &ContainerRef {
        &self.target
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.target.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("log_attachment", &self.log_attachment)
            .finish()
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        self.detach_logs();
    }
}

enum LogWait {
    Pending,
    Failed(anyhow::Error),
}

async fn wait_for(target: &ContainerRef, wait: &WaitStrategy) -> Result<()> {
    match wait {
        WaitStrategy::ForLog { pattern, timeout } => {
            let policy = RetryPolicy {
                interval: LOG_POLL_INTERVAL,
                deadline: *timeout,
            };
            let outcome = retry_until(
                policy,
                &CancellationToken::new(),
                || async move {
                    let logs = target
                        .runtime
                        .logs(&target.id)
                        .await
                        .map_err(LogWait::Failed)?;
                    if logs.contains(pattern.as_str()) {
                        Ok(())
                    } else {
                        Err(LogWait::Pending)
                    }
                },
                |err| matches!(err, LogWait::Pending),
            )
            .await;

            match outcome {
                Ok(()) => Ok(()),
                Err(RetryError::DeadlineExceeded { .. } | RetryError::Fatal(LogWait::Pending)) => {
                    Err(Error::ReadinessTimeout {
                        target: format!("log {pattern:?} of {}", target.id),
                        budget: *timeout,
                    })
                }
                Err(RetryError::Cancelled) => Err(Error::Cancelled),
                Err(RetryError::Fatal(LogWait::Failed(source))) => {
                    Err(Error::provisioning("read logs of", &target.id)(source))
                }
            }
        }
    }
}

/// `host:port` of the server in `container`; see
/// [`ContainerRef::server_host_port`].
pub async fn server_host_port(container: &ContainerRef) -> Result<String> {
    container.server_host_port().await
}

fn container_join(parent: &str, rel: &Path) -> String {
    let mut joined = parent.trim_end_matches('/').to_string();
    for part in rel.components() {
        joined.push('/');
        joined.push_str(&part.as_os_str().to_string_lossy());
    }
    joined
}

/// Builds a spec from `opts` and submits it to `runtime`.
///
/// With reuse requested and a container of the same name present, that
/// container is adopted as-is: nothing is created and no files are copied.
/// The container is started only when the spec asks for it.
pub async fn new_container(
    runtime: Arc<dyn ContainerRuntime>,
    opts: &[Customizer],
) -> Result<Container> {
    let spec = ContainerSpec::from_options(opts);
    let target = spec.display_name().to_string();

    if spec.image.trim().is_empty() {
        return Err(Error::provisioning("create", target)(anyhow::anyhow!(
            "no image configured"
        )));
    }

    let existing = match (&spec.name, spec.reuse) {
        (Some(name), true) => runtime
            .find_by_name(name)
            .await
            .map_err(Error::provisioning("look up", name))?,
        _ => None,
    };

    let (id, state) = match existing {
        Some(id) => {
            let running = runtime
                .is_running(&id)
                .await
                .map_err(Error::provisioning("inspect", &id))?;
            info!("reusing container {target} ({id})");
            let state = if running {
                ContainerState::Running
            } else {
                ContainerState::Stopped
            };
            (id, state)
        }
        None => {
            let id = runtime
                .create(&spec)
                .await
                .map_err(Error::provisioning("create", &target))?;
            info!("created container {target} ({id})");

            for file in &spec.files {
                runtime
                    .copy_file_to_container(&id, &file.host_path, &file.container_path, file.mode)
                    .await
                    .map_err(Error::copy(&file.host_path))?;
            }
            (id, ContainerState::Created)
        }
    };

    let started = spec.started;
    let mut container = Container::from_spec(id, state, runtime, spec);
    if started {
        container.start().await?;
    }

    Ok(container)
}

/// [`new_container`] followed by [`Container::start`].
pub async fn run_container(
    runtime: Arc<dyn ContainerRuntime>,
    opts: &[Customizer],
) -> Result<Container> {
    let mut container = new_container(runtime, opts).await?;
    container.start().await?;
    Ok(container)
}
