//! The `up` subcommand: one-shot service creation, no rollout.

use tracing::{error, info};

use super::DeployArgs;

pub async fn run(args: DeployArgs) -> anyhow::Result<()> {
    let config = super::resolve_config(&args)?;
    let driver = super::build_driver(&config).await;

    match driver.up().await {
        Ok(result) => {
            info!(
                task_definition = %result.task_definition,
                service = %result.service.arn,
                "🎉 service is up and STABLE"
            );
            Ok(())
        }
        Err(err) => {
            error!("😭 failed to bring the service up: {err}");
            Err(err.into())
        }
    }
}
