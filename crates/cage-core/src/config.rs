//! Deploy configuration — the immutable record a rollout runs against.
//!
//! Resolution order is flag > environment > deploy context > default.
//! The CLI collects flags and environment into a [`DeployOverrides`] and
//! applies it on top of the config loaded from the deploy context, then
//! calls [`DeployConfig::validate`].

use std::time::Duration;

use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{ServiceSpec, TaskDefinitionSpec};

pub const DEFAULT_REGION: &str = "us-west-2";
pub const DEFAULT_ROLL_OUT_PERIOD: Duration = Duration::from_secs(300);
pub const DEFAULT_AVAILABILITY_THRESHOLD: f64 = 0.9970;
pub const DEFAULT_RESPONSE_TIME_THRESHOLD: f64 = 1.0;

/// Where the next task definition comes from. Exactly one source must be
/// resolved before a rollout starts.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskDefinitionSource {
    /// Register this payload and use the returned ARN.
    Register(TaskDefinitionSpec),
    /// Use a precomputed task-definition ARN; nothing is registered.
    Precomputed(String),
}

/// Configuration for one rollout. Immutable once validated.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub region: String,
    pub cluster: String,
    /// Name of the *current* service, the one being replaced.
    pub service: String,
    /// Optional container instance the replacement tasks are pinned to.
    pub canary_instance_arn: Option<String>,
    /// Full creation request for the next service.
    pub service_spec: Option<ServiceSpec>,
    pub task_definition: Option<TaskDefinitionSource>,
    /// Length of one health measurement window.
    pub roll_out_period: Duration,
    /// Minimum acceptable availability in [0, 1]; equality fails.
    pub availability_threshold: f64,
    /// Maximum acceptable response time in seconds; equality fails.
    pub response_time_threshold: f64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            cluster: String::new(),
            service: String::new(),
            canary_instance_arn: None,
            service_spec: None,
            task_definition: None,
            roll_out_period: DEFAULT_ROLL_OUT_PERIOD,
            availability_threshold: DEFAULT_AVAILABILITY_THRESHOLD,
            response_time_threshold: DEFAULT_RESPONSE_TIME_THRESHOLD,
        }
    }
}

/// Partial configuration from flags and environment. Unset fields leave
/// the base value in place.
#[derive(Debug, Clone, Default)]
pub struct DeployOverrides {
    pub region: Option<String>,
    pub cluster: Option<String>,
    pub service: Option<String>,
    pub canary_instance_arn: Option<String>,
    /// A precomputed ARN beats the context's task-definition payload.
    pub next_task_definition_arn: Option<String>,
    pub roll_out_period: Option<Duration>,
    pub availability_threshold: Option<f64>,
    pub response_time_threshold: Option<f64>,
}

impl DeployConfig {
    /// Overlay flag/environment values onto this config.
    pub fn apply(&mut self, overrides: DeployOverrides) {
        if let Some(region) = overrides.region {
            self.region = region;
        }
        if let Some(cluster) = overrides.cluster {
            self.cluster = cluster;
        }
        if let Some(service) = overrides.service {
            self.service = service;
        }
        if let Some(arn) = overrides.canary_instance_arn {
            self.canary_instance_arn = Some(arn);
        }
        if let Some(arn) = overrides.next_task_definition_arn {
            self.task_definition = Some(TaskDefinitionSource::Precomputed(arn));
        }
        if let Some(period) = overrides.roll_out_period {
            self.roll_out_period = period;
        }
        if let Some(threshold) = overrides.availability_threshold {
            self.availability_threshold = threshold;
        }
        if let Some(threshold) = overrides.response_time_threshold {
            self.response_time_threshold = threshold;
        }
    }

    /// Check invariants and fill defaults. Must be called before the
    /// config reaches the driver.
    pub fn validate(&mut self) -> ConfigResult<()> {
        if self.cluster.is_empty() {
            return Err(ConfigError::Invalid(
                "--cluster [CAGE_CLUSTER] is required".into(),
            ));
        }
        if self.service.is_empty() {
            return Err(ConfigError::Invalid(
                "--service [CAGE_SERVICE] is required".into(),
            ));
        }
        if self.task_definition.is_none() {
            return Err(ConfigError::Invalid(
                "--nextTaskDefinitionArn or a deploy context with task-definition.json is required"
                    .into(),
            ));
        }
        if self.service_spec.is_none() {
            return Err(ConfigError::Invalid(
                "a deploy context with service.json is required".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.availability_threshold) {
            return Err(ConfigError::Invalid(format!(
                "availability threshold must be in [0, 1], got {}",
                self.availability_threshold
            )));
        }
        if self.response_time_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "response time threshold must be positive, got {}",
                self.response_time_threshold
            )));
        }
        if self.roll_out_period.is_zero() {
            return Err(ConfigError::Invalid(
                "roll out period must be positive".into(),
            ));
        }
        if self.region.is_empty() {
            warn!("--region was not set. using default region: {DEFAULT_REGION}");
            self.region = DEFAULT_REGION.to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContainerDefinition;

    fn minimal_task_definition() -> TaskDefinitionSpec {
        TaskDefinitionSpec {
            family: "web".into(),
            cpu: None,
            memory: None,
            network_mode: None,
            requires_compatibilities: vec![],
            execution_role_arn: None,
            task_role_arn: None,
            container_definitions: vec![ContainerDefinition {
                name: "web".into(),
                image: "nginx:latest".into(),
                cpu: None,
                memory: None,
                memory_reservation: None,
                essential: Some(true),
                port_mappings: vec![],
                environment: vec![],
                command: vec![],
            }],
        }
    }

    fn minimal_service_spec() -> ServiceSpec {
        ServiceSpec {
            cluster: "cage-test".into(),
            service_name: "web-next".into(),
            task_definition: None,
            desired_count: Some(1),
            launch_type: Some("FARGATE".into()),
            load_balancers: vec![],
            network_configuration: None,
            health_check_grace_period_seconds: None,
            platform_version: None,
        }
    }

    fn valid_config() -> DeployConfig {
        DeployConfig {
            cluster: "cage-test".into(),
            service: "web".into(),
            service_spec: Some(minimal_service_spec()),
            task_definition: Some(TaskDefinitionSource::Register(minimal_task_definition())),
            ..DeployConfig::default()
        }
    }

    #[test]
    fn validate_fills_default_region() {
        let mut config = valid_config();
        config.validate().unwrap();
        assert_eq!(config.region, DEFAULT_REGION);
    }

    #[test]
    fn validate_requires_cluster_and_service() {
        let mut config = valid_config();
        config.cluster.clear();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.service.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_a_task_definition_source() {
        let mut config = valid_config();
        config.task_definition = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_thresholds() {
        let mut config = valid_config();
        config.availability_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.response_time_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn apply_overlays_only_set_fields() {
        let mut config = valid_config();
        config.region = "eu-west-1".into();
        config.apply(DeployOverrides {
            cluster: Some("other-cluster".into()),
            next_task_definition_arn: Some("arn:td/web:9".into()),
            ..DeployOverrides::default()
        });
        assert_eq!(config.cluster, "other-cluster");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.service, "web");
        assert_eq!(
            config.task_definition,
            Some(TaskDefinitionSource::Precomputed("arn:td/web:9".into()))
        );
    }

    #[test]
    fn precomputed_arn_beats_context_payload() {
        let mut config = valid_config();
        config.apply(DeployOverrides {
            next_task_definition_arn: Some("arn:td/web:9".into()),
            ..DeployOverrides::default()
        });
        match config.task_definition {
            Some(TaskDefinitionSource::Precomputed(ref arn)) => {
                assert_eq!(arn, "arn:td/web:9")
            }
            ref other => panic!("expected precomputed source, got {other:?}"),
        }
    }
}
