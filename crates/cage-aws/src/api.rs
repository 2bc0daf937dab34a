//! Capability traits the rollout engine consumes.
//!
//! Injected as trait objects into the driver; no process-wide client
//! state. Waiter methods are the only calls that may block for minutes,
//! and every implementation caps them with a maximum attempt count.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use cage_core::types::{
    ServiceRecord, ServiceSpec, TaskDefinitionRecord, TaskDefinitionSpec, TaskRecord,
};

use crate::error::ApiResult;

/// Metric namespace for application load balancers.
pub const METRICS_NAMESPACE: &str = "ApplicationELB";

/// Which statistic a metric query aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Sum,
    Average,
}

/// One GetMetricStatistics request.
#[derive(Debug, Clone)]
pub struct MetricsQuery {
    pub namespace: &'static str,
    pub metric_name: String,
    /// (name, value) pairs, e.g. `LoadBalancer=app/alb/123`.
    pub dimensions: Vec<(String, String)>,
    pub statistic: Statistic,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub period: Duration,
}

/// A single datapoint from the metrics source.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Datapoint {
    pub sum: Option<f64>,
    pub average: Option<f64>,
}

/// Service and task lifecycle on the container orchestrator.
#[async_trait]
pub trait ContainerApi: Send + Sync {
    async fn register_task_definition(
        &self,
        spec: &TaskDefinitionSpec,
    ) -> ApiResult<TaskDefinitionRecord>;

    async fn create_service(&self, spec: &ServiceSpec) -> ApiResult<ServiceRecord>;

    /// Describe the named services, returned in request order. A missing
    /// service is an error: the engine always knows what should exist.
    async fn describe_services(
        &self,
        cluster: &str,
        names: &[String],
    ) -> ApiResult<Vec<ServiceRecord>>;

    /// ARNs of the service's RUNNING tasks. Pagination is hidden here.
    async fn list_tasks(&self, cluster: &str, service_name: &str) -> ApiResult<Vec<String>>;

    /// Start one task from `task_definition` under `group`, optionally
    /// pinned to a container instance.
    async fn start_task(
        &self,
        cluster: &str,
        task_definition: &str,
        group: &str,
        container_instance: Option<&str>,
    ) -> ApiResult<TaskRecord>;

    async fn stop_task(&self, cluster: &str, task_arn: &str) -> ApiResult<TaskRecord>;

    async fn delete_service(&self, cluster: &str, name: &str) -> ApiResult<()>;

    /// Poll until every named service has running == desired and its
    /// deployments have quiesced.
    async fn wait_until_services_stable(&self, cluster: &str, names: &[String]) -> ApiResult<()>;

    /// Poll until every named service is INACTIVE (or gone).
    async fn wait_until_services_inactive(&self, cluster: &str, names: &[String]) -> ApiResult<()>;

    async fn wait_until_tasks_running(&self, cluster: &str, task_arns: &[String]) -> ApiResult<()>;

    async fn wait_until_tasks_stopped(&self, cluster: &str, task_arns: &[String]) -> ApiResult<()>;
}

/// Windowed metric statistics.
#[async_trait]
pub trait MetricsApi: Send + Sync {
    async fn get_metric_statistics(&self, query: &MetricsQuery) -> ApiResult<Vec<Datapoint>>;
}

/// Load-balancer topology lookups.
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    /// ARN of the load balancer fronting the given target group.
    async fn load_balancer_arn(&self, target_group_arn: &str) -> ApiResult<String>;
}
