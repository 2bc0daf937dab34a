//! AWS implementations of the capability traits.
//!
//! `AwsEcs` drives service and task lifecycle through `aws-sdk-ecs`,
//! `AwsCloudWatch` serves metric statistics, and `AwsElb` resolves
//! load-balancer topology. Payload mapping covers the field subset the
//! deploy contexts use; SDK optionals become plain values (or `Option`
//! where unset genuinely differs from zero) at this boundary.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use tokio::sync::watch;
use tracing::debug;

use cage_core::types::{
    LoadBalancerRef, ServiceRecord, ServiceSpec, ServiceStatus, TaskDefinitionRecord,
    TaskDefinitionSpec, TaskRecord, TaskStatus,
};

use crate::api::{ContainerApi, Datapoint, LoadBalancerApi, MetricsApi, MetricsQuery, Statistic};
use crate::error::{ApiResult, ControlPlaneError};
use crate::waiter::{poll_until, WaiterConfig};

/// Load the shared SDK configuration for a region.
pub async fn sdk_config(region: &str) -> aws_config::SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}

// ── ECS ────────────────────────────────────────────────────────────

/// ECS-backed [`ContainerApi`].
pub struct AwsEcs {
    client: aws_sdk_ecs::Client,
    service_waiter: WaiterConfig,
    task_waiter: WaiterConfig,
    shutdown: watch::Receiver<bool>,
}

impl AwsEcs {
    pub fn new(config: &aws_config::SdkConfig, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            client: aws_sdk_ecs::Client::new(config),
            service_waiter: WaiterConfig::services(),
            task_waiter: WaiterConfig::tasks(),
            shutdown,
        }
    }

    pub fn with_waiters(mut self, service: WaiterConfig, task: WaiterConfig) -> Self {
        self.service_waiter = service;
        self.task_waiter = task;
        self
    }
}

fn parse_service_status(status: &str) -> ApiResult<ServiceStatus> {
    match status {
        "ACTIVE" => Ok(ServiceStatus::Active),
        "DRAINING" => Ok(ServiceStatus::Draining),
        "INACTIVE" => Ok(ServiceStatus::Inactive),
        other => Err(ControlPlaneError::rejected(
            "describe_services",
            format!("unexpected service status '{other}'"),
        )),
    }
}

fn parse_task_status(status: &str) -> TaskStatus {
    match status {
        "RUNNING" => TaskStatus::Running,
        "STOPPED" | "DEPROVISIONING" | "DEACTIVATING" => TaskStatus::Stopped,
        _ => TaskStatus::Pending,
    }
}

fn map_service(service: &aws_sdk_ecs::types::Service) -> ApiResult<ServiceRecord> {
    let load_balancers = service
        .load_balancers()
        .iter()
        .filter_map(|lb| {
            lb.target_group_arn().map(|arn| LoadBalancerRef {
                target_group_arn: arn.to_string(),
                container_name: lb.container_name().map(str::to_string),
                container_port: lb.container_port().map(|p| p.max(0) as u16),
            })
        })
        .collect();
    Ok(ServiceRecord {
        name: service.service_name().unwrap_or_default().to_string(),
        arn: service.service_arn().unwrap_or_default().to_string(),
        status: parse_service_status(service.status().unwrap_or("ACTIVE"))?,
        running_count: service.running_count().max(0) as u64,
        desired_count: service.desired_count().max(0) as u64,
        task_definition: service.task_definition().unwrap_or_default().to_string(),
        load_balancers,
    })
}

fn map_task(task: &aws_sdk_ecs::types::Task) -> TaskRecord {
    TaskRecord {
        arn: task.task_arn().unwrap_or_default().to_string(),
        group: task.group().unwrap_or_default().to_string(),
        task_definition_arn: task.task_definition_arn().unwrap_or_default().to_string(),
        last_status: parse_task_status(task.last_status().unwrap_or("PENDING")),
    }
}

fn build_container_definition(
    def: &cage_core::types::ContainerDefinition,
) -> aws_sdk_ecs::types::ContainerDefinition {
    let mut builder = aws_sdk_ecs::types::ContainerDefinition::builder()
        .name(&def.name)
        .image(&def.image);
    builder = builder
        .set_cpu(def.cpu)
        .set_memory(def.memory)
        .set_memory_reservation(def.memory_reservation)
        .set_essential(def.essential);
    if !def.port_mappings.is_empty() {
        builder = builder.set_port_mappings(Some(
            def.port_mappings
                .iter()
                .map(|pm| {
                    aws_sdk_ecs::types::PortMapping::builder()
                        .set_container_port(pm.container_port)
                        .set_host_port(pm.host_port)
                        .set_protocol(
                            pm.protocol
                                .as_deref()
                                .map(aws_sdk_ecs::types::TransportProtocol::from),
                        )
                        .build()
                })
                .collect(),
        ));
    }
    if !def.environment.is_empty() {
        builder = builder.set_environment(Some(
            def.environment
                .iter()
                .map(|kv| {
                    aws_sdk_ecs::types::KeyValuePair::builder()
                        .name(&kv.name)
                        .value(&kv.value)
                        .build()
                })
                .collect(),
        ));
    }
    if !def.command.is_empty() {
        builder = builder.set_command(Some(def.command.clone()));
    }
    builder.build()
}

#[async_trait]
impl ContainerApi for AwsEcs {
    async fn register_task_definition(
        &self,
        spec: &TaskDefinitionSpec,
    ) -> ApiResult<TaskDefinitionRecord> {
        let mut request = self
            .client
            .register_task_definition()
            .family(&spec.family)
            .set_cpu(spec.cpu.clone())
            .set_memory(spec.memory.clone())
            .set_network_mode(
                spec.network_mode
                    .as_deref()
                    .map(aws_sdk_ecs::types::NetworkMode::from),
            )
            .set_execution_role_arn(spec.execution_role_arn.clone())
            .set_task_role_arn(spec.task_role_arn.clone());
        if !spec.requires_compatibilities.is_empty() {
            request = request.set_requires_compatibilities(Some(
                spec.requires_compatibilities
                    .iter()
                    .map(|c| aws_sdk_ecs::types::Compatibility::from(c.as_str()))
                    .collect(),
            ));
        }
        for def in &spec.container_definitions {
            request = request.container_definitions(build_container_definition(def));
        }
        let out = request
            .send()
            .await
            .map_err(|e| ControlPlaneError::rejected("register_task_definition", e))?;
        let td = out
            .task_definition()
            .ok_or_else(|| ControlPlaneError::NotFound {
                resource: format!("registered task definition for family '{}'", spec.family),
            })?;
        Ok(TaskDefinitionRecord {
            arn: td.task_definition_arn().unwrap_or_default().to_string(),
            family: td.family().unwrap_or_default().to_string(),
            revision: td.revision() as i64,
        })
    }

    async fn create_service(&self, spec: &ServiceSpec) -> ApiResult<ServiceRecord> {
        let mut request = self
            .client
            .create_service()
            .cluster(&spec.cluster)
            .service_name(&spec.service_name)
            .set_task_definition(spec.task_definition.clone())
            .set_desired_count(spec.desired_count.map(|c| c as i32))
            .set_launch_type(
                spec.launch_type
                    .as_deref()
                    .map(aws_sdk_ecs::types::LaunchType::from),
            )
            .set_health_check_grace_period_seconds(
                spec.health_check_grace_period_seconds.map(|s| s as i32),
            )
            .set_platform_version(spec.platform_version.clone());
        for lb in &spec.load_balancers {
            request = request.load_balancers(
                aws_sdk_ecs::types::LoadBalancer::builder()
                    .target_group_arn(&lb.target_group_arn)
                    .set_container_name(lb.container_name.clone())
                    .set_container_port(lb.container_port.map(i32::from))
                    .build(),
            );
        }
        if let Some(net) = spec
            .network_configuration
            .as_ref()
            .and_then(|n| n.awsvpc_configuration.as_ref())
        {
            let vpc = aws_sdk_ecs::types::AwsVpcConfiguration::builder()
                .set_subnets(Some(net.subnets.clone()))
                .set_security_groups(if net.security_groups.is_empty() {
                    None
                } else {
                    Some(net.security_groups.clone())
                })
                .set_assign_public_ip(
                    net.assign_public_ip
                        .as_deref()
                        .map(aws_sdk_ecs::types::AssignPublicIp::from),
                )
                .build()
                .map_err(|e| ControlPlaneError::rejected("create_service", e))?;
            request = request.network_configuration(
                aws_sdk_ecs::types::NetworkConfiguration::builder()
                    .awsvpc_configuration(vpc)
                    .build(),
            );
        }
        let out = request
            .send()
            .await
            .map_err(|e| ControlPlaneError::rejected("create_service", e))?;
        let service = out.service().ok_or_else(|| ControlPlaneError::NotFound {
            resource: format!("created service '{}'", spec.service_name),
        })?;
        map_service(service)
    }

    async fn describe_services(
        &self,
        cluster: &str,
        names: &[String],
    ) -> ApiResult<Vec<ServiceRecord>> {
        let out = self
            .client
            .describe_services()
            .cluster(cluster)
            .set_services(Some(names.to_vec()))
            .send()
            .await
            .map_err(|e| ControlPlaneError::rejected("describe_services", e))?;
        let mut records = Vec::with_capacity(names.len());
        for name in names {
            let service = out
                .services()
                .iter()
                .find(|s| {
                    s.service_name() == Some(name.as_str())
                        || s.service_arn() == Some(name.as_str())
                })
                .ok_or_else(|| ControlPlaneError::NotFound {
                    resource: format!("service '{name}'"),
                })?;
            records.push(map_service(service)?);
        }
        Ok(records)
    }

    async fn list_tasks(&self, cluster: &str, service_name: &str) -> ApiResult<Vec<String>> {
        let mut stream = self
            .client
            .list_tasks()
            .cluster(cluster)
            .service_name(service_name)
            .desired_status(aws_sdk_ecs::types::DesiredStatus::Running)
            .launch_type(aws_sdk_ecs::types::LaunchType::Fargate)
            .into_paginator()
            .items()
            .send();
        let mut arns = Vec::new();
        while let Some(item) = stream.next().await {
            arns.push(item.map_err(|e| ControlPlaneError::rejected("list_tasks", e))?);
        }
        debug!(service = service_name, tasks = arns.len(), "listed running tasks");
        Ok(arns)
    }

    async fn start_task(
        &self,
        cluster: &str,
        task_definition: &str,
        group: &str,
        container_instance: Option<&str>,
    ) -> ApiResult<TaskRecord> {
        let mut request = self
            .client
            .start_task()
            .cluster(cluster)
            .task_definition(task_definition)
            .group(group);
        if let Some(instance) = container_instance {
            request = request.container_instances(instance);
        }
        let out = request
            .send()
            .await
            .map_err(|e| ControlPlaneError::rejected("start_task", e))?;
        if let Some(task) = out.tasks().first() {
            return Ok(map_task(task));
        }
        let reason = out
            .failures()
            .first()
            .and_then(|f| f.reason())
            .unwrap_or("no task returned");
        Err(ControlPlaneError::rejected("start_task", reason))
    }

    async fn stop_task(&self, cluster: &str, task_arn: &str) -> ApiResult<TaskRecord> {
        let out = self
            .client
            .stop_task()
            .cluster(cluster)
            .task(task_arn)
            .send()
            .await
            .map_err(|e| ControlPlaneError::rejected("stop_task", e))?;
        let task = out.task().ok_or_else(|| ControlPlaneError::NotFound {
            resource: format!("task '{task_arn}'"),
        })?;
        Ok(map_task(task))
    }

    async fn delete_service(&self, cluster: &str, name: &str) -> ApiResult<()> {
        self.client
            .delete_service()
            .cluster(cluster)
            .service(name)
            .send()
            .await
            .map_err(|e| ControlPlaneError::rejected("delete_service", e))?;
        Ok(())
    }

    async fn wait_until_services_stable(&self, cluster: &str, names: &[String]) -> ApiResult<()> {
        let shutdown = self.shutdown.clone();
        let client = &self.client;
        poll_until(
            "services_stable",
            self.service_waiter,
            shutdown,
            || async move {
                let out = client
                    .describe_services()
                    .cluster(cluster)
                    .set_services(Some(names.to_vec()))
                    .send()
                    .await
                    .map_err(|e| ControlPlaneError::rejected("describe_services", e))?;
                let stable = names.iter().all(|name| {
                    out.services().iter().any(|s| {
                        s.service_name() == Some(name.as_str())
                            && s.status() == Some("ACTIVE")
                            && s.running_count() == s.desired_count()
                            && s.deployments().len() <= 1
                    })
                });
                Ok(stable)
            },
        )
        .await
    }

    async fn wait_until_services_inactive(&self, cluster: &str, names: &[String]) -> ApiResult<()> {
        let shutdown = self.shutdown.clone();
        let client = &self.client;
        poll_until(
            "services_inactive",
            self.service_waiter,
            shutdown,
            || async move {
                let out = client
                    .describe_services()
                    .cluster(cluster)
                    .set_services(Some(names.to_vec()))
                    .send()
                    .await
                    .map_err(|e| ControlPlaneError::rejected("describe_services", e))?;
                // A service that no longer shows up counts as gone.
                let inactive = out
                    .services()
                    .iter()
                    .all(|s| s.status() == Some("INACTIVE"));
                Ok(inactive)
            },
        )
        .await
    }

    async fn wait_until_tasks_running(&self, cluster: &str, task_arns: &[String]) -> ApiResult<()> {
        let shutdown = self.shutdown.clone();
        let client = &self.client;
        poll_until("tasks_running", self.task_waiter, shutdown, || async move {
            let out = client
                .describe_tasks()
                .cluster(cluster)
                .set_tasks(Some(task_arns.to_vec()))
                .send()
                .await
                .map_err(|e| ControlPlaneError::rejected("describe_tasks", e))?;
            for task in out.tasks() {
                // A task that dies while we wait will never run.
                if task.last_status() == Some("STOPPED") {
                    return Err(ControlPlaneError::rejected(
                        "wait_until_tasks_running",
                        format!(
                            "task '{}' reached STOPPED",
                            task.task_arn().unwrap_or_default()
                        ),
                    ));
                }
            }
            let running = task_arns.iter().all(|arn| {
                out.tasks().iter().any(|t| {
                    t.task_arn() == Some(arn.as_str()) && t.last_status() == Some("RUNNING")
                })
            });
            Ok(running)
        })
        .await
    }

    async fn wait_until_tasks_stopped(&self, cluster: &str, task_arns: &[String]) -> ApiResult<()> {
        let shutdown = self.shutdown.clone();
        let client = &self.client;
        poll_until("tasks_stopped", self.task_waiter, shutdown, || async move {
            let out = client
                .describe_tasks()
                .cluster(cluster)
                .set_tasks(Some(task_arns.to_vec()))
                .send()
                .await
                .map_err(|e| ControlPlaneError::rejected("describe_tasks", e))?;
            let stopped = task_arns.iter().all(|arn| {
                !out.tasks()
                    .iter()
                    .any(|t| t.task_arn() == Some(arn.as_str()) && t.last_status() != Some("STOPPED"))
            });
            Ok(stopped)
        })
        .await
    }
}

// ── CloudWatch ─────────────────────────────────────────────────────

/// CloudWatch-backed [`MetricsApi`].
pub struct AwsCloudWatch {
    client: aws_sdk_cloudwatch::Client,
}

impl AwsCloudWatch {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudwatch::Client::new(config),
        }
    }
}

#[async_trait]
impl MetricsApi for AwsCloudWatch {
    async fn get_metric_statistics(&self, query: &MetricsQuery) -> ApiResult<Vec<Datapoint>> {
        let statistic = match query.statistic {
            Statistic::Sum => aws_sdk_cloudwatch::types::Statistic::Sum,
            Statistic::Average => aws_sdk_cloudwatch::types::Statistic::Average,
        };
        let mut request = self
            .client
            .get_metric_statistics()
            .namespace(query.namespace)
            .metric_name(&query.metric_name)
            .statistics(statistic)
            .start_time(query.start_time.into())
            .end_time(query.end_time.into())
            .period(query.period.as_secs() as i32);
        for (name, value) in &query.dimensions {
            request = request.dimensions(
                aws_sdk_cloudwatch::types::Dimension::builder()
                    .name(name)
                    .value(value)
                    .build(),
            );
        }
        let out = request
            .send()
            .await
            .map_err(|e| ControlPlaneError::rejected("get_metric_statistics", e))?;
        Ok(out
            .datapoints()
            .iter()
            .map(|dp| Datapoint {
                sum: dp.sum(),
                average: dp.average(),
            })
            .collect())
    }
}

// ── ELBv2 ──────────────────────────────────────────────────────────

/// ELBv2-backed [`LoadBalancerApi`].
pub struct AwsElb {
    client: aws_sdk_elasticloadbalancingv2::Client,
}

impl AwsElb {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_elasticloadbalancingv2::Client::new(config),
        }
    }
}

#[async_trait]
impl LoadBalancerApi for AwsElb {
    async fn load_balancer_arn(&self, target_group_arn: &str) -> ApiResult<String> {
        let out = self
            .client
            .describe_target_groups()
            .target_group_arns(target_group_arn)
            .send()
            .await
            .map_err(|e| ControlPlaneError::rejected("describe_target_groups", e))?;
        out.target_groups()
            .first()
            .and_then(|tg| tg.load_balancer_arns().first())
            .cloned()
            .ok_or_else(|| ControlPlaneError::NotFound {
                resource: format!("load balancer for target group '{target_group_arn}'"),
            })
    }
}
