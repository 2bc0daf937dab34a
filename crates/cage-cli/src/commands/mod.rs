//! Subcommand implementations and the flag surface they share.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use cage_aws::client::{sdk_config, AwsCloudWatch, AwsEcs, AwsElb};
use cage_aws::{ContainerApi, LoadBalancerApi, MetricsApi};
use cage_core::config::{DeployConfig, DeployOverrides};
use cage_core::context::load_deploy_context;
use cage_health::HealthSampler;
use cage_rollout::RolloutDriver;

pub mod rollout;
pub mod up;

/// Flags shared by `rollout` and `up`. Resolution order is flag >
/// environment > deploy context > built-in default.
#[derive(clap::Args, Debug)]
pub struct DeployArgs {
    /// Cluster identifier
    #[arg(long, env = "CAGE_CLUSTER")]
    pub cluster: Option<String>,

    /// Name of the current service
    #[arg(long, env = "CAGE_SERVICE")]
    pub service: Option<String>,

    /// Precomputed task-definition ARN; skips registration
    #[arg(long = "nextTaskDefinitionArn", env = "CAGE_TASK_DEFINITION_ARN")]
    pub next_task_definition_arn: Option<String>,

    /// Container instance the canary tasks are pinned to
    #[arg(long = "canary-instance-arn", env = "CAGE_CANARY_INSTANCE_ARN")]
    pub canary_instance_arn: Option<String>,

    /// Cloud region
    #[arg(long, env = "CAGE_REGION")]
    pub region: Option<String>,

    /// Length of one health measurement window, in seconds
    #[arg(long = "roll-out-period", env = "CAGE_ROLL_OUT_PERIOD")]
    pub roll_out_period: Option<u64>,

    /// Minimum acceptable availability, in [0, 1]
    #[arg(long = "availability-threshold", env = "CAGE_AVAILABILITY_THRESHOLD")]
    pub availability_threshold: Option<f64>,

    /// Maximum acceptable response time, in seconds
    #[arg(long = "response-time-threshold", env = "CAGE_RESPONSE_TIME_THRESHOLD")]
    pub response_time_threshold: Option<f64>,

    /// Deploy context directory holding service.json and
    /// task-definition.json
    #[arg(value_name = "CONTEXT_DIR", default_value = ".")]
    pub context: PathBuf,
}

/// Load the deploy context, overlay flags and environment, validate.
pub fn resolve_config(args: &DeployArgs) -> anyhow::Result<DeployConfig> {
    let mut config = load_deploy_context(&args.context)?;
    config.apply(DeployOverrides {
        region: args.region.clone(),
        cluster: args.cluster.clone(),
        service: args.service.clone(),
        canary_instance_arn: args.canary_instance_arn.clone(),
        next_task_definition_arn: args.next_task_definition_arn.clone(),
        roll_out_period: args.roll_out_period.map(Duration::from_secs),
        availability_threshold: args.availability_threshold,
        response_time_threshold: args.response_time_threshold,
    });
    config.validate()?;
    Ok(config)
}

/// Wire the AWS clients and the shutdown signal into a driver. Ctrl-C
/// flips the watch channel, which aborts in-flight waiters and the
/// sampler sleep.
pub async fn build_driver(config: &DeployConfig) -> RolloutDriver {
    let sdk = sdk_config(&config.region).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let api: Arc<dyn ContainerApi> = Arc::new(AwsEcs::new(&sdk, shutdown_rx.clone()));
    let metrics: Arc<dyn MetricsApi> = Arc::new(AwsCloudWatch::new(&sdk));
    let elb: Arc<dyn LoadBalancerApi> = Arc::new(AwsElb::new(&sdk));
    let sampler = HealthSampler::new(metrics, elb, config.roll_out_period, shutdown_rx);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, aborting in-flight waits");
            let _ = shutdown_tx.send(true);
        }
    });

    RolloutDriver::new(api, sampler, config.clone())
}
