//! Domain types for the rollout engine.
//!
//! Two families live here. The *record* types (`ServiceRecord`,
//! `TaskRecord`, ...) are plain-value snapshots of control-plane state:
//! the adapter translates the cloud SDK's pointer-typed payloads into
//! these at the boundary, so the engine never sees an unset-vs-zero
//! distinction it does not care about. The *spec* types (`ServiceSpec`,
//! `TaskDefinitionSpec`) mirror the deploy-context JSON payloads and use
//! `Option` + defaults exactly where the wire format does.

use serde::{Deserialize, Serialize};

/// ARN of an individual task.
pub type TaskArn = String;

// ── Control-plane snapshots ────────────────────────────────────────

/// Reconciliation status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Active,
    Draining,
    Inactive,
}

/// Snapshot of a service as returned by DescribeServices. Never mutated
/// by the engine; refreshed each iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRecord {
    pub name: String,
    pub arn: String,
    pub status: ServiceStatus,
    pub running_count: u64,
    pub desired_count: u64,
    /// Task definition ARN the service currently runs.
    pub task_definition: String,
    pub load_balancers: Vec<LoadBalancerRef>,
}

impl ServiceRecord {
    /// Target group of the first attached load balancer, if any.
    pub fn target_group_arn(&self) -> Option<&str> {
        self.load_balancers
            .first()
            .map(|lb| lb.target_group_arn.as_str())
    }
}

/// A service's attachment to a load-balancer target group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerRef {
    pub target_group_arn: String,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub container_port: Option<u16>,
}

/// Last observed status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Stopped,
}

/// Snapshot of a single task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub arn: TaskArn,
    /// `service:<name>` — associates started tasks back to a service.
    pub group: String,
    pub task_definition_arn: String,
    pub last_status: TaskStatus,
}

/// A registered task definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefinitionRecord {
    pub arn: String,
    pub family: String,
    pub revision: i64,
}

// ── Health sample ──────────────────────────────────────────────────

/// One windowed measurement of a target group's health.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceHealth {
    /// In [0, 1]: `clamp(0, 1, (requests − target5xx) / (requests + elb5xx))`.
    pub availability: f64,
    /// Mean backend response time over the window, in seconds.
    pub response_time: f64,
}

// ── Deploy-context payloads ────────────────────────────────────────

/// The `service.json` payload: the full creation request for the next
/// service. Fields the adapter does not map are simply not modeled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub cluster: String,
    pub service_name: String,
    /// Filled in by the driver once the next task definition is registered.
    #[serde(default)]
    pub task_definition: Option<String>,
    #[serde(default)]
    pub desired_count: Option<u64>,
    #[serde(default)]
    pub launch_type: Option<String>,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerRef>,
    #[serde(default)]
    pub network_configuration: Option<NetworkConfiguration>,
    #[serde(default)]
    pub health_check_grace_period_seconds: Option<u64>,
    #[serde(default)]
    pub platform_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfiguration {
    #[serde(default)]
    pub awsvpc_configuration: Option<AwsVpcConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsVpcConfiguration {
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub assign_public_ip: Option<String>,
}

/// The `task-definition.json` payload: the registration request for the
/// next task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinitionSpec {
    pub family: String,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub network_mode: Option<String>,
    #[serde(default)]
    pub requires_compatibilities: Vec<String>,
    #[serde(default)]
    pub execution_role_arn: Option<String>,
    #[serde(default)]
    pub task_role_arn: Option<String>,
    pub container_definitions: Vec<ContainerDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub cpu: Option<i32>,
    #[serde(default)]
    pub memory: Option<i32>,
    #[serde(default)]
    pub memory_reservation: Option<i32>,
    #[serde(default)]
    pub essential: Option<bool>,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    #[serde(default)]
    pub environment: Vec<KeyValuePair>,
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    #[serde(default)]
    pub container_port: Option<i32>,
    #[serde(default)]
    pub host_port: Option<i32>,
    #[serde(default)]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValuePair {
    pub name: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_spec_parses_minimal_payload() {
        let json = r#"{
            "cluster": "cage-test",
            "serviceName": "web-next",
            "desiredCount": 1,
            "launchType": "FARGATE",
            "loadBalancers": [
                {"targetGroupArn": "arn:aws:elasticloadbalancing:us-west-2:1111:targetgroup/tg/12345", "containerName": "web", "containerPort": 80}
            ]
        }"#;
        let spec: ServiceSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.cluster, "cage-test");
        assert_eq!(spec.service_name, "web-next");
        assert_eq!(spec.desired_count, Some(1));
        assert_eq!(spec.load_balancers[0].container_port, Some(80));
        assert!(spec.task_definition.is_none());
    }

    #[test]
    fn task_definition_spec_parses_container_definitions() {
        let json = r#"{
            "family": "web",
            "cpu": "256",
            "memory": "512",
            "networkMode": "awsvpc",
            "requiresCompatibilities": ["FARGATE"],
            "containerDefinitions": [{
                "name": "web",
                "image": "nginx:latest",
                "essential": true,
                "portMappings": [{"containerPort": 80, "protocol": "tcp"}],
                "environment": [{"name": "STAGE", "value": "canary"}]
            }]
        }"#;
        let spec: TaskDefinitionSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.family, "web");
        assert_eq!(spec.container_definitions.len(), 1);
        assert_eq!(spec.container_definitions[0].environment[0].value, "canary");
    }

    #[test]
    fn target_group_arn_of_first_load_balancer() {
        let record = ServiceRecord {
            name: "web".into(),
            arn: "arn:service/web".into(),
            status: ServiceStatus::Active,
            running_count: 2,
            desired_count: 2,
            task_definition: "arn:td/web:1".into(),
            load_balancers: vec![LoadBalancerRef {
                target_group_arn: "arn:tg/web".into(),
                container_name: None,
                container_port: None,
            }],
        };
        assert_eq!(record.target_group_arn(), Some("arn:tg/web"));
    }
}
