//! Deterministic in-memory control plane.
//!
//! Mirrors the bookkeeping the real orchestrator does for the calls the
//! engine makes: services own a running count, started tasks attach to a
//! service through their `service:<name>` group, stops and deletes
//! decrement. Waiters resolve instantly against current state. Knobs
//! exist for the failure modes the tests exercise: a `ListTasks` page
//! cap, injected start-task failures, and scripted metric windows.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use cage_core::types::{
    ServiceRecord, ServiceSpec, ServiceStatus, TaskDefinitionRecord, TaskDefinitionSpec,
    TaskRecord, TaskStatus,
};

use crate::api::{ContainerApi, Datapoint, LoadBalancerApi, MetricsApi, MetricsQuery};
use crate::error::{ApiResult, ControlPlaneError};

#[derive(Default)]
struct FakeState {
    services: HashMap<String, ServiceRecord>,
    // BTreeMap: zero-padded task ids keep ListTasks order deterministic.
    tasks: BTreeMap<String, TaskRecord>,
}

/// In-memory [`ContainerApi`] for tests.
#[derive(Default)]
pub struct FakeControlPlane {
    state: Mutex<FakeState>,
    next_id: AtomicU64,
    /// Remaining `start_task` calls to fail with a rejection.
    fail_starts: AtomicU64,
    /// Max tasks returned per `list_tasks` call, when set.
    list_page_size: Mutex<Option<usize>>,
    /// task arn → container instance arn, for canary pin assertions.
    placements: Mutex<HashMap<String, String>>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap how many task ARNs one `list_tasks` call returns.
    pub fn set_list_page_size(&self, size: usize) {
        *self.list_page_size.lock().unwrap() = Some(size);
    }

    /// Make the next `count` calls to `start_task` fail.
    pub fn fail_next_starts(&self, count: u64) {
        self.fail_starts.store(count, Ordering::SeqCst);
    }

    pub fn service(&self, name: &str) -> Option<ServiceRecord> {
        self.state.lock().unwrap().services.get(name).cloned()
    }

    pub fn has_active_service(&self, name: &str) -> bool {
        self.service(name)
            .is_some_and(|s| s.status == ServiceStatus::Active)
    }

    pub fn running_count(&self, name: &str) -> u64 {
        self.service(name).map(|s| s.running_count).unwrap_or(0)
    }

    pub fn running_task_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .tasks
            .values()
            .filter(|t| t.last_status == TaskStatus::Running)
            .count()
    }

    /// Container instance placements recorded by `start_task`.
    pub fn placements(&self) -> Vec<(String, String)> {
        let placements = self.placements.lock().unwrap();
        placements
            .iter()
            .map(|(task, instance)| (task.clone(), instance.clone()))
            .collect()
    }

    fn next_arn(&self, kind: &str) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("arn:aws:ecs:local:000000000000:{kind}/{id:06}")
    }

    fn start_task_locked(
        &self,
        state: &mut FakeState,
        task_definition: &str,
        group: &str,
    ) -> ApiResult<TaskRecord> {
        let service_name = group
            .strip_prefix("service:")
            .ok_or_else(|| ControlPlaneError::rejected("start_task", format!("bad group '{group}'")))?;
        let service = state.services.get_mut(service_name).ok_or_else(|| {
            ControlPlaneError::rejected("start_task", format!("service '{service_name}' not found"))
        })?;
        let task = TaskRecord {
            arn: self.next_arn("task"),
            group: group.to_string(),
            task_definition_arn: task_definition.to_string(),
            last_status: TaskStatus::Running,
        };
        service.running_count += 1;
        state.tasks.insert(task.arn.clone(), task.clone());
        Ok(task)
    }
}

#[async_trait]
impl ContainerApi for FakeControlPlane {
    async fn register_task_definition(
        &self,
        spec: &TaskDefinitionSpec,
    ) -> ApiResult<TaskDefinitionRecord> {
        Ok(TaskDefinitionRecord {
            arn: self.next_arn("task-definition"),
            family: spec.family.clone(),
            revision: 1,
        })
    }

    async fn create_service(&self, spec: &ServiceSpec) -> ApiResult<ServiceRecord> {
        let mut state = self.state.lock().unwrap();
        if state.services.contains_key(&spec.service_name) {
            return Err(ControlPlaneError::rejected(
                "create_service",
                format!("service '{}' already exists", spec.service_name),
            ));
        }
        let record = ServiceRecord {
            name: spec.service_name.clone(),
            arn: self.next_arn("service"),
            status: ServiceStatus::Active,
            running_count: 0,
            desired_count: spec.desired_count.unwrap_or(0),
            task_definition: spec.task_definition.clone().unwrap_or_default(),
            load_balancers: spec.load_balancers.clone(),
        };
        state.services.insert(record.name.clone(), record);
        let group = format!("service:{}", spec.service_name);
        let task_definition = spec.task_definition.clone().unwrap_or_default();
        for _ in 0..spec.desired_count.unwrap_or(0) {
            self.start_task_locked(&mut state, &task_definition, &group)?;
        }
        Ok(state.services[&spec.service_name].clone())
    }

    async fn describe_services(
        &self,
        _cluster: &str,
        names: &[String],
    ) -> ApiResult<Vec<ServiceRecord>> {
        let state = self.state.lock().unwrap();
        names
            .iter()
            .map(|name| {
                state
                    .services
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ControlPlaneError::NotFound {
                        resource: format!("service '{name}'"),
                    })
            })
            .collect()
    }

    async fn list_tasks(&self, _cluster: &str, service_name: &str) -> ApiResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        let group = format!("service:{service_name}");
        let mut arns: Vec<String> = state
            .tasks
            .values()
            .filter(|t| t.group == group && t.last_status == TaskStatus::Running)
            .map(|t| t.arn.clone())
            .collect();
        if let Some(limit) = *self.list_page_size.lock().unwrap() {
            arns.truncate(limit);
        }
        Ok(arns)
    }

    async fn start_task(
        &self,
        _cluster: &str,
        task_definition: &str,
        group: &str,
        container_instance: Option<&str>,
    ) -> ApiResult<TaskRecord> {
        if self
            .fail_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ControlPlaneError::rejected("start_task", "injected failure"));
        }
        let mut state = self.state.lock().unwrap();
        let task = self.start_task_locked(&mut state, task_definition, group)?;
        if let Some(instance) = container_instance {
            self.placements
                .lock()
                .unwrap()
                .insert(task.arn.clone(), instance.to_string());
        }
        Ok(task)
    }

    async fn stop_task(&self, _cluster: &str, task_arn: &str) -> ApiResult<TaskRecord> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let task = state.tasks.get_mut(task_arn).ok_or_else(|| {
            ControlPlaneError::rejected("stop_task", format!("task '{task_arn}' not found"))
        })?;
        if task.last_status == TaskStatus::Running {
            task.last_status = TaskStatus::Stopped;
            let service_name = task.group.trim_start_matches("service:");
            if let Some(service) = state.services.get_mut(service_name) {
                service.running_count = service.running_count.saturating_sub(1);
            }
        }
        Ok(state.tasks[task_arn].clone())
    }

    async fn delete_service(&self, _cluster: &str, name: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let Some(service) = state.services.get_mut(name) else {
            return Err(ControlPlaneError::NotFound {
                resource: format!("service '{name}'"),
            });
        };
        service.status = ServiceStatus::Inactive;
        service.running_count = 0;
        let group = format!("service:{name}");
        for task in state.tasks.values_mut() {
            if task.group == group && task.last_status == TaskStatus::Running {
                task.last_status = TaskStatus::Stopped;
            }
        }
        Ok(())
    }

    async fn wait_until_services_stable(&self, _cluster: &str, names: &[String]) -> ApiResult<()> {
        let state = self.state.lock().unwrap();
        for name in names {
            let stable = state
                .services
                .get(name)
                .is_some_and(|s| s.status == ServiceStatus::Active);
            if !stable {
                return Err(ControlPlaneError::rejected(
                    "wait_until_services_stable",
                    format!("service '{name}' never stabilized"),
                ));
            }
        }
        Ok(())
    }

    async fn wait_until_services_inactive(&self, _cluster: &str, names: &[String]) -> ApiResult<()> {
        let state = self.state.lock().unwrap();
        for name in names {
            let inactive = state
                .services
                .get(name)
                .is_none_or(|s| s.status == ServiceStatus::Inactive);
            if !inactive {
                return Err(ControlPlaneError::rejected(
                    "wait_until_services_inactive",
                    format!("service '{name}' still active"),
                ));
            }
        }
        Ok(())
    }

    async fn wait_until_tasks_running(&self, _cluster: &str, task_arns: &[String]) -> ApiResult<()> {
        let state = self.state.lock().unwrap();
        for arn in task_arns {
            let running = state
                .tasks
                .get(arn)
                .is_some_and(|t| t.last_status == TaskStatus::Running);
            if !running {
                return Err(ControlPlaneError::rejected(
                    "wait_until_tasks_running",
                    format!("task '{arn}' not running"),
                ));
            }
        }
        Ok(())
    }

    async fn wait_until_tasks_stopped(&self, _cluster: &str, task_arns: &[String]) -> ApiResult<()> {
        let state = self.state.lock().unwrap();
        for arn in task_arns {
            let stopped = state
                .tasks
                .get(arn)
                .is_none_or(|t| t.last_status == TaskStatus::Stopped);
            if !stopped {
                return Err(ControlPlaneError::rejected(
                    "wait_until_tasks_stopped",
                    format!("task '{arn}' still running"),
                ));
            }
        }
        Ok(())
    }
}

// ── Metrics ────────────────────────────────────────────────────────

/// One scripted measurement window.
#[derive(Debug, Clone, Copy)]
pub struct MetricWindow {
    pub request_count: f64,
    pub elb_5xx: f64,
    pub target_5xx: f64,
    pub response_time: f64,
}

impl MetricWindow {
    /// Plenty of traffic, negligible errors, fast responses.
    pub fn healthy() -> Self {
        Self {
            request_count: 100_000.0,
            elb_5xx: 1.0,
            target_5xx: 1.0,
            response_time: 0.1,
        }
    }

    /// Error storm: availability clamps to zero.
    pub fn failing() -> Self {
        Self {
            request_count: 1_000.0,
            elb_5xx: 500.0,
            target_5xx: 1_500.0,
            response_time: 5.0,
        }
    }

    /// No traffic at all: the sample is imprecise.
    pub fn quiet() -> Self {
        Self {
            request_count: 0.0,
            elb_5xx: 0.0,
            target_5xx: 0.0,
            response_time: 0.0,
        }
    }
}

/// Scripted [`MetricsApi`]: each metric walks the window list in order
/// and keeps serving the last window once the script runs out.
pub struct FakeMetrics {
    windows: Vec<MetricWindow>,
    served: Mutex<HashMap<String, usize>>,
}

impl FakeMetrics {
    pub fn new(windows: Vec<MetricWindow>) -> Self {
        Self {
            windows,
            served: Mutex::new(HashMap::new()),
        }
    }

    pub fn always(window: MetricWindow) -> Self {
        Self::new(vec![window])
    }
}

#[async_trait]
impl MetricsApi for FakeMetrics {
    async fn get_metric_statistics(&self, query: &MetricsQuery) -> ApiResult<Vec<Datapoint>> {
        let index = {
            let mut served = self.served.lock().unwrap();
            let counter = served.entry(query.metric_name.clone()).or_insert(0);
            let index = *counter;
            *counter += 1;
            index
        };
        let Some(window) = self
            .windows
            .get(index.min(self.windows.len().saturating_sub(1)))
            .copied()
        else {
            return Ok(vec![]);
        };
        let datapoint = match query.metric_name.as_str() {
            "RequestCount" => Datapoint {
                sum: Some(window.request_count),
                ..Datapoint::default()
            },
            "HTTPCode_ELB_5XX_Count" => Datapoint {
                sum: Some(window.elb_5xx),
                ..Datapoint::default()
            },
            "HTTPCode_Target_5XX_Count" => Datapoint {
                sum: Some(window.target_5xx),
                ..Datapoint::default()
            },
            "TargetResponseTime" => Datapoint {
                average: Some(window.response_time),
                ..Datapoint::default()
            },
            other => {
                return Err(ControlPlaneError::rejected(
                    "get_metric_statistics",
                    format!("unexpected metric '{other}'"),
                ))
            }
        };
        Ok(vec![datapoint])
    }
}

/// Static [`LoadBalancerApi`]: every target group fronts the same ALB.
#[derive(Default)]
pub struct FakeElb;

impl FakeElb {
    pub const LOAD_BALANCER_ARN: &'static str =
        "arn:aws:elasticloadbalancing:local:000000000000:loadbalancer/app/alb/1234567890";
}

#[async_trait]
impl LoadBalancerApi for FakeElb {
    async fn load_balancer_arn(&self, _target_group_arn: &str) -> ApiResult<String> {
        Ok(Self::LOAD_BALANCER_ARN.to_string())
    }
}
