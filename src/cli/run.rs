use crate::container::{Container, run_container};
use crate::domain::ContainerRuntime;
use crate::infra::PodmanAdapter;
use crate::infra::config::{DEFAULT_CONFIG_NAME, load_app_config};
use crate::logs::TracingSink;
use crate::options::with_logger;
use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Args, Debug)]
pub struct RunCommand {
    /// Container description (see tntbox.toml)
    #[arg(long, short, env = "TNTBOX_CONFIG", default_value = DEFAULT_CONFIG_NAME)]
    pub config: PathBuf,

    /// Exit once the server is ready and leave the container running
    #[arg(long)]
    pub detach: bool,

    /// Forward container output to the log
    #[arg(long)]
    pub follow: bool,
}

pub async fn run(cmd: RunCommand) -> Result<()> {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(PodmanAdapter::new());
    let mut container = provision(&cmd.config, cmd.follow, runtime).await?;

    let addr = container.server_host_port().await?;
    println!("{addr}");

    if cmd.detach {
        info!("leaving {} running", container.id());
        return Ok(());
    }

    info!("server ready at {addr}, press Ctrl-C to tear down");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    container.stop().await?;
    container.terminate().await?;
    Ok(())
}

/// Builds and starts the container described by `config_path`.
pub async fn provision(
    config_path: &Path,
    follow: bool,
    runtime: Arc<dyn ContainerRuntime>,
) -> Result<Container> {
    let config = load_app_config(config_path)?;
    let mut opts = config.customizers()?;
    if follow {
        opts.push(with_logger(Arc::new(TracingSink)));
    }

    let container = run_container(runtime, &opts)
        .await
        .with_context(|| format!("provisioning container from {:?}", config_path))?;
    info!("container {} is running", container.id());

    Ok(container)
}
