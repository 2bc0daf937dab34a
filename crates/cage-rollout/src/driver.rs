//! The rollout driver — top-level state machine.
//!
//! Forward path: register the next task definition, create the next
//! service, wait for it to stabilize, snapshot the current service's
//! running count, then loop: sample target-group health for one window,
//! re-describe both services, and either finish (current empty, next at
//! size), replace the next batch, or roll back. The estimated batch
//! count guards the loop against replacing forever.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{error, info, warn};

use cage_aws::{ContainerApi, ControlPlaneError};
use cage_core::config::{DeployConfig, TaskDefinitionSource};
use cage_core::types::{ServiceRecord, ServiceSpec};
use cage_core::ConfigError;
use cage_health::HealthSampler;

use crate::error::{RolloutError, RolloutResult};
use crate::plan::RolloutState;
use crate::replace::replace_batch;
use crate::rollback::rollback;

/// What a completed rollout did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutSummary {
    pub original_running_count: u64,
    pub replaced_count: u64,
    pub roll_out_count: u32,
}

/// Result of the one-shot `up` command.
#[derive(Debug, Clone)]
pub struct UpResult {
    pub task_definition: String,
    pub service: ServiceRecord,
}

pub struct RolloutDriver {
    api: Arc<dyn ContainerApi>,
    sampler: HealthSampler,
    config: DeployConfig,
}

impl RolloutDriver {
    /// `config` must have passed [`DeployConfig::validate`].
    pub fn new(api: Arc<dyn ContainerApi>, sampler: HealthSampler, config: DeployConfig) -> Self {
        Self {
            api,
            sampler,
            config,
        }
    }

    /// Perform the gradual rollout.
    pub async fn roll_out(&self) -> RolloutResult<RolloutSummary> {
        let cluster = &self.config.cluster;
        let current_name = &self.config.service;
        info!(
            cluster = %cluster,
            service = %current_name,
            "starting gradual roll out"
        );

        let next = self.create_next_service().await?;
        info!(service = %next.name, "waiting for next service to become STABLE");
        self.api
            .wait_until_services_stable(cluster, std::slice::from_ref(&next.name))
            .await?;

        // Snapshot the replacement target before anything moves.
        let current = self.describe_one(current_name).await?;
        let mut state = RolloutState::new(current.running_count);
        info!(
            original = state.original_running_count,
            estimated_batches = state.estimated_roll_out_count,
            "current service snapshot taken"
        );

        let target_group = next
            .target_group_arn()
            .ok_or_else(|| RolloutError::NoLoadBalancer(next.name.clone()))?
            .to_string();

        loop {
            if state.roll_out_count > state.estimated_roll_out_count {
                let cause = RolloutError::BudgetExceeded {
                    estimated: state.estimated_roll_out_count,
                    replaced: state.replaced_count(),
                    original: state.original_running_count,
                };
                return Err(self.attempt_rollback(cause, &next.name, &state).await);
            }

            let epoch = SystemTime::now();
            // An unusable sample aborts the loop without compensation:
            // nothing moved this round, the operator can simply re-run.
            let health = self.sampler.sample(&target_group, epoch).await?;

            let names = [current_name.clone(), next.name.clone()];
            let mut services = self.api.describe_services(cluster, &names).await?.into_iter();
            let (Some(current_snap), Some(next_snap)) = (services.next(), services.next()) else {
                return Err(ControlPlaneError::NotFound {
                    resource: format!("services '{current_name}' and '{}'", next.name),
                }
                .into());
            };

            if current_snap.running_count == 0
                && next_snap.running_count >= state.original_running_count
            {
                self.cleanup(&current_snap).await?;
                return Ok(RolloutSummary {
                    original_running_count: state.original_running_count,
                    replaced_count: state.replaced_count(),
                    roll_out_count: state.roll_out_count,
                });
            }

            let pass = health.availability > self.config.availability_threshold
                && health.response_time < self.config.response_time_threshold;
            if pass {
                if let Err(err) = replace_batch(
                    self.api.as_ref(),
                    cluster,
                    &current_snap,
                    &next_snap,
                    self.config.canary_instance_arn.as_deref(),
                    &mut state,
                )
                .await
                {
                    return Err(self.attempt_rollback(err, &next.name, &state).await);
                }
                info!(
                    "😙 {}th canary test has passed. {}/{} tasks rolled out: availability={} (threshold: {}), response time={} (threshold: {})",
                    state.roll_out_count,
                    state.replaced_count(),
                    state.original_running_count,
                    health.availability,
                    self.config.availability_threshold,
                    health.response_time,
                    self.config.response_time_threshold,
                );
            } else {
                warn!(
                    "😢 {}th canary test hasn't passed: availability={} (threshold: {}), response time={} (threshold: {})",
                    state.roll_out_count,
                    health.availability,
                    self.config.availability_threshold,
                    health.response_time,
                    self.config.response_time_threshold,
                );
                let cause = RolloutError::CanaryFailed {
                    round: state.roll_out_count,
                    availability: health.availability,
                    availability_threshold: self.config.availability_threshold,
                    response_time: health.response_time,
                    response_time_threshold: self.config.response_time_threshold,
                };
                return Err(self.attempt_rollback(cause, &next.name, &state).await);
            }
        }
    }

    /// Create the next task definition and service, wait for STABLE, and
    /// report what was made. Deletes nothing.
    pub async fn up(&self) -> RolloutResult<UpResult> {
        let spec = self.next_service_spec().await?;
        info!(
            service = %spec.service_name,
            task_definition = %spec.task_definition.as_deref().unwrap_or_default(),
            "creating service"
        );
        let created = self.api.create_service(&spec).await?;
        info!(service = %created.arn, "service created");
        info!(service = %spec.service_name, "waiting for service to become STABLE");
        self.api
            .wait_until_services_stable(&self.config.cluster, std::slice::from_ref(&spec.service_name))
            .await?;
        info!("became STABLE");
        let service = self.describe_one(&spec.service_name).await?;
        Ok(UpResult {
            task_definition: spec.task_definition.clone().unwrap_or_default(),
            service,
        })
    }

    /// Resolve the task-definition source and fill it into a copy of the
    /// next-service payload.
    async fn next_service_spec(&self) -> RolloutResult<ServiceSpec> {
        let task_definition_arn = match &self.config.task_definition {
            Some(TaskDefinitionSource::Register(td)) => {
                let registered = self.api.register_task_definition(td).await?;
                info!(
                    task_definition = %registered.arn,
                    family = %registered.family,
                    revision = registered.revision,
                    "next task definition registered"
                );
                registered.arn
            }
            Some(TaskDefinitionSource::Precomputed(arn)) => arn.clone(),
            None => {
                return Err(ConfigError::Invalid(
                    "no task definition source; provide a deploy context or --nextTaskDefinitionArn"
                        .into(),
                )
                .into())
            }
        };
        let mut spec = self
            .config
            .service_spec
            .clone()
            .ok_or_else(|| ConfigError::Invalid("no service payload; provide a deploy context".into()))?;
        spec.cluster = self.config.cluster.clone();
        spec.task_definition = Some(task_definition_arn);
        Ok(spec)
    }

    async fn create_next_service(&self) -> RolloutResult<ServiceRecord> {
        let spec = self.next_service_spec().await?;
        let next = self.api.create_service(&spec).await?;
        info!(service = %next.arn, "next service created");
        Ok(next)
    }

    async fn describe_one(&self, name: &str) -> RolloutResult<ServiceRecord> {
        let mut services = self
            .api
            .describe_services(&self.config.cluster, &[name.to_string()])
            .await?;
        services.pop().ok_or_else(|| {
            ControlPlaneError::NotFound {
                resource: format!("service '{name}'"),
            }
            .into()
        })
    }

    /// Delete the emptied current service and wait until it is gone.
    async fn cleanup(&self, current: &ServiceRecord) -> RolloutResult<()> {
        self.api
            .delete_service(&self.config.cluster, &current.name)
            .await?;
        self.api
            .wait_until_services_inactive(&self.config.cluster, std::slice::from_ref(&current.name))
            .await?;
        info!("all current tasks have been replaced into next tasks");
        Ok(())
    }

    /// Roll back after a forward-path failure. Returns the error the
    /// rollout should surface: the original cause when rollback
    /// succeeded, the rollback failure when it did not.
    async fn attempt_rollback(
        &self,
        cause: RolloutError,
        next_service_name: &str,
        state: &RolloutState,
    ) -> RolloutError {
        error!(error = %cause, "roll out failed, attempting rollback");
        let current = match self.describe_one(&self.config.service).await {
            Ok(current) => current,
            Err(err) => {
                error!(error = %err, "could not describe current service for rollback");
                return cause;
            }
        };
        match rollback(
            self.api.as_ref(),
            &self.config.cluster,
            &current,
            next_service_name,
            state.original_running_count,
        )
        .await
        {
            Ok(()) => cause,
            Err(rollback_err) => rollback_err,
        }
    }
}
