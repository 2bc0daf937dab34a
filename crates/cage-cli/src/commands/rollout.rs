//! The `rollout` subcommand.

use tracing::{error, info};

use super::DeployArgs;

pub async fn run(args: DeployArgs) -> anyhow::Result<()> {
    let config = super::resolve_config(&args)?;
    let driver = super::build_driver(&config).await;

    match driver.roll_out().await {
        Ok(summary) => {
            info!(
                "🎉 service roll out has completed successfully! {}/{} tasks replaced over {} batches 🎉",
                summary.replaced_count, summary.original_running_count, summary.roll_out_count,
            );
            Ok(())
        }
        Err(err) => {
            error!("😭 failed to roll out new tasks: {err}");
            Err(err.into())
        }
    }
}
