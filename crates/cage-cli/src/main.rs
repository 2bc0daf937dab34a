use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "cage",
    about = "cage — canary-gated gradual rollout tool for ECS services",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gradually replace the current service with a health-gated next service
    #[command(name = "rollout")]
    RollOut(commands::DeployArgs),
    /// Create the next task definition and service, wait for STABLE, then exit
    Up(commands::DeployArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RollOut(args) => commands::rollout::run(args).await,
        Commands::Up(args) => commands::up::run(args).await,
    }
}
