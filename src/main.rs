use anyhow::Result;
use clap::{Parser, Subcommand};
use tntbox::cli::{ManageAction, ProbeCommand, RunCommand};
use tntbox::infra::PodmanAdapter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tntbox",
    about = "Disposable Tarantool containers for integration tests"
)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a container from a config file and print its endpoint
    Run(RunCommand),
    /// Wait until an address accepts TCP connections
    Probe(ProbeCommand),
    #[command(flatten)]
    Manage(ManageAction),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(cmd) => tntbox::cli::run::run(cmd).await,
        Commands::Probe(cmd) => tntbox::cli::probe::run(cmd).await,
        Commands::Manage(action) => tntbox::cli::manage::run(action, &PodmanAdapter::new()).await,
    }
}
