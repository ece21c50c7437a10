use super::ContainerSpec;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

/// Live stream of container output lines.
pub type LogStream = BoxStream<'static, String>;

/// Trait for container runtime operations.
///
/// Implementations talk to a concrete engine; everything above this trait is
/// engine agnostic. Containers are addressed by the opaque id returned from
/// [`ContainerRuntime::create`] or [`ContainerRuntime::find_by_name`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync + Debug {
    /// Look up an existing container by name, for reuse
    async fn find_by_name(&self, name: &str) -> Result<Option<String>>;

    /// Create a container from a spec without starting it
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    /// Stop gracefully, killing after `grace`
    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;

    /// Destroy the container and its anonymous volumes. Missing containers are not an error.
    async fn remove(&self, id: &str) -> Result<()>;

    async fn is_running(&self, id: &str) -> Result<bool>;

    /// Hostname under which mapped ports are reachable
    async fn host(&self, id: &str) -> Result<String>;

    /// Host port bound to `port` (e.g. "3301/tcp"), `None` while unbound
    async fn mapped_port(&self, id: &str, port: &str) -> Result<Option<u16>>;

    /// Output produced so far
    async fn logs(&self, id: &str) -> Result<String>;

    /// Follow output as it is produced
    async fn follow_logs(&self, id: &str) -> Result<LogStream>;

    async fn copy_file_to_container(
        &self,
        id: &str,
        host_path: &Path,
        container_path: &str,
        mode: u32,
    ) -> Result<()>;

    /// Copy `host_dir` into `container_parent`. Symbolic links are skipped.
    async fn copy_dir_to_container(
        &self,
        id: &str,
        host_dir: &Path,
        container_parent: &str,
        mode: u32,
    ) -> Result<()>;
}

/// Receiver of forwarded container log lines.
pub trait LogSink: Send + Sync {
    fn accept(&self, line: &str);
}
