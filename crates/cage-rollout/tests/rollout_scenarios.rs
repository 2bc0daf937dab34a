//! End-to-end rollout scenarios against the in-memory control plane.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use cage_aws::fake::{FakeControlPlane, FakeElb, FakeMetrics, MetricWindow};
use cage_aws::ContainerApi;
use cage_core::config::{DeployConfig, TaskDefinitionSource};
use cage_core::types::{
    ContainerDefinition, LoadBalancerRef, ServiceSpec, TaskDefinitionSpec,
};
use cage_health::{HealthError, HealthSampler};
use cage_rollout::{RolloutDriver, RolloutError};

const CLUSTER: &str = "cage-test";
const CURRENT: &str = "web";
const NEXT: &str = "web-next";
const TARGET_GROUP: &str =
    "arn:aws:elasticloadbalancing:us-west-2:1111:targetgroup/tg/12345";

fn service_spec(name: &str, task_definition: Option<&str>, desired: u64) -> ServiceSpec {
    ServiceSpec {
        cluster: CLUSTER.into(),
        service_name: name.into(),
        task_definition: task_definition.map(str::to_string),
        desired_count: Some(desired),
        launch_type: Some("FARGATE".into()),
        load_balancers: vec![LoadBalancerRef {
            target_group_arn: TARGET_GROUP.into(),
            container_name: Some("web".into()),
            container_port: Some(80),
        }],
        network_configuration: None,
        health_check_grace_period_seconds: None,
        platform_version: None,
    }
}

fn task_definition_spec() -> TaskDefinitionSpec {
    TaskDefinitionSpec {
        family: "web".into(),
        cpu: Some("256".into()),
        memory: Some("512".into()),
        network_mode: Some("awsvpc".into()),
        requires_compatibilities: vec!["FARGATE".into()],
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

fn deploy_config() -> DeployConfig {
    DeployConfig {
        region: "us-west-2".into(),
        cluster: CLUSTER.into(),
        service: CURRENT.into(),
        service_spec: Some(service_spec(NEXT, None, 1)),
        task_definition: Some(TaskDefinitionSource::Register(task_definition_spec())),
        roll_out_period: Duration::from_millis(1),
        availability_threshold: 0.9,
        response_time_threshold: 1.0,
        ..DeployConfig::default()
    }
}

async fn seed_current(api: &FakeControlPlane, desired: u64) {
    api.create_service(&service_spec(CURRENT, Some("arn:td/web:1"), desired))
        .await
        .unwrap();
}

fn build_driver(
    api: Arc<FakeControlPlane>,
    metrics: FakeMetrics,
    config: DeployConfig,
) -> (RolloutDriver, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sampler = HealthSampler::new(
        Arc::new(metrics),
        Arc::new(FakeElb),
        config.roll_out_period,
        shutdown_rx,
    );
    (RolloutDriver::new(api, sampler, config), shutdown_tx)
}

#[tokio::test]
async fn happy_path_replaces_four_tasks_in_three_batches() {
    let api = Arc::new(FakeControlPlane::new());
    seed_current(&api, 4).await;
    let (driver, _guard) = build_driver(
        Arc::clone(&api),
        FakeMetrics::always(MetricWindow::healthy()),
        deploy_config(),
    );

    let summary = driver.roll_out().await.unwrap();

    // Batches of 1, 2, then a clipped 1.
    assert_eq!(summary.original_running_count, 4);
    assert_eq!(summary.replaced_count, 4);
    assert_eq!(summary.roll_out_count, 3);

    // Current service emptied and deleted, next carries the load.
    assert!(!api.has_active_service(CURRENT));
    assert_eq!(api.running_count(CURRENT), 0);
    assert!(api.running_count(NEXT) >= 4);
}

#[tokio::test]
async fn canary_failing_on_first_sample_rolls_back_untouched() {
    let api = Arc::new(FakeControlPlane::new());
    seed_current(&api, 4).await;
    let (driver, _guard) = build_driver(
        Arc::clone(&api),
        FakeMetrics::always(MetricWindow::failing()),
        deploy_config(),
    );

    let err = driver.roll_out().await.unwrap_err();

    assert!(matches!(err, RolloutError::CanaryFailed { round: 0, .. }));
    // No tasks were replaced; the next service is gone again.
    assert!(api.has_active_service(CURRENT));
    assert_eq!(api.running_count(CURRENT), 4);
    assert!(!api.has_active_service(NEXT));
}

#[tokio::test]
async fn canary_failing_mid_rollout_refills_current() {
    let api = Arc::new(FakeControlPlane::new());
    seed_current(&api, 4).await;
    // Two passing windows (batches of 1 and 2), then failure.
    let (driver, _guard) = build_driver(
        Arc::clone(&api),
        FakeMetrics::new(vec![
            MetricWindow::healthy(),
            MetricWindow::healthy(),
            MetricWindow::failing(),
        ]),
        deploy_config(),
    );

    let err = driver.roll_out().await.unwrap_err();

    assert!(matches!(err, RolloutError::CanaryFailed { .. }));
    // 3 of 4 replaced before the failure; rollback refilled 4 − 1 = 3.
    assert!(api.has_active_service(CURRENT));
    assert_eq!(api.running_count(CURRENT), 4);
    assert!(!api.has_active_service(NEXT));
}

#[tokio::test]
async fn exceeding_the_batch_budget_aborts_and_rolls_back() {
    let api = Arc::new(FakeControlPlane::new());
    seed_current(&api, 4).await;
    // A one-task ListTasks page keeps every batch at size 1, so the
    // loop needs more rounds than the estimate allows.
    api.set_list_page_size(1);
    let (driver, _guard) = build_driver(
        Arc::clone(&api),
        FakeMetrics::always(MetricWindow::healthy()),
        deploy_config(),
    );

    let err = driver.roll_out().await.unwrap_err();

    match err {
        RolloutError::BudgetExceeded {
            estimated,
            replaced,
            original,
        } => {
            assert_eq!(estimated, 3);
            assert_eq!(replaced, 4);
            assert_eq!(original, 4);
        }
        other => panic!("expected BudgetExceeded, got {other:?}"),
    }
    // Rollback restored the current service to its snapshot size.
    assert!(api.has_active_service(CURRENT));
    assert_eq!(api.running_count(CURRENT), 4);
    assert!(!api.has_active_service(NEXT));
}

#[tokio::test]
async fn imprecise_metrics_abort_without_rollback() {
    let api = Arc::new(FakeControlPlane::new());
    seed_current(&api, 4).await;
    let (driver, _guard) = build_driver(
        Arc::clone(&api),
        FakeMetrics::always(MetricWindow::quiet()),
        deploy_config(),
    );

    let err = driver.roll_out().await.unwrap_err();

    assert!(matches!(
        err,
        RolloutError::Health(HealthError::InsufficientMetricData)
    ));
    // Both services stay in place for the operator to inspect and
    // re-run.
    assert!(api.has_active_service(CURRENT));
    assert_eq!(api.running_count(CURRENT), 4);
    assert!(api.has_active_service(NEXT));
}

#[tokio::test]
async fn up_creates_the_service_and_nothing_else() {
    let api = Arc::new(FakeControlPlane::new());
    let (driver, _guard) = build_driver(
        Arc::clone(&api),
        FakeMetrics::always(MetricWindow::healthy()),
        deploy_config(),
    );

    let result = driver.up().await.unwrap();

    assert_eq!(result.service.name, NEXT);
    assert!(!result.task_definition.is_empty());
    assert!(api.has_active_service(NEXT));
    assert_eq!(api.running_count(NEXT), 1);
    // Up never touches or deletes anything pre-existing.
    assert_eq!(api.running_task_count(), 1);
}

#[tokio::test]
async fn canary_instance_pin_is_applied_to_every_replacement() {
    let api = Arc::new(FakeControlPlane::new());
    seed_current(&api, 4).await;
    let mut config = deploy_config();
    config.canary_instance_arn = Some("arn:instance/canary".into());
    let (driver, _guard) = build_driver(
        Arc::clone(&api),
        FakeMetrics::always(MetricWindow::healthy()),
        config,
    );

    driver.roll_out().await.unwrap();

    let placements = api.placements();
    assert_eq!(placements.len(), 4);
    assert!(placements
        .iter()
        .all(|(_, instance)| instance == "arn:instance/canary"));
}

#[tokio::test]
async fn mid_batch_start_failure_triggers_rollback() {
    let api = Arc::new(FakeControlPlane::new());
    seed_current(&api, 4).await;
    let (driver, _guard) = build_driver(
        Arc::clone(&api),
        FakeMetrics::always(MetricWindow::healthy()),
        deploy_config(),
    );
    // Service creation seeds its initial task internally, so the armed
    // failure lands on the first replacement start.
    api.fail_next_starts(1);

    let err = driver.roll_out().await.unwrap_err();
    // The forward error is a control-plane rejection; rollback ran.
    assert!(matches!(err, RolloutError::ControlPlane(_)));
    assert!(!api.has_active_service(NEXT));
    assert!(api.has_active_service(CURRENT));
    assert_eq!(api.running_count(CURRENT), 4);
}
