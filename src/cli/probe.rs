use crate::infra::config::parse_duration;
use crate::readiness::check_available;
use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Args, Debug)]
pub struct ProbeCommand {
    /// host:port to probe
    pub address: String,

    /// How long to keep retrying refused connections
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

pub async fn run(cmd: ProbeCommand) -> Result<()> {
    let budget = parse_duration(&cmd.timeout)?;
    let cancel = CancellationToken::new();

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    check_available(&cmd.address, budget, &cancel).await?;
    info!("{} accepts connections", cmd.address);
    Ok(())
}
