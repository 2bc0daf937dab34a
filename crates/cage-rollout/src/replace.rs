//! One batch of task replacement.
//!
//! Every stop/start pair in the batch runs concurrently with the
//! others, and the stop and start inside a pair race each other too;
//! the batch joins before returning. First error fails the whole batch
//! and surfaces upward — compensation is the driver's call, not ours.

use std::sync::atomic::Ordering;

use futures::future::try_join_all;
use tracing::{debug, info};

use cage_aws::{ApiResult, ContainerApi};
use cage_core::types::ServiceRecord;

use crate::error::RolloutResult;
use crate::plan::{batch_size, RolloutState};

/// Replace the next batch of tasks: stop N on the current service,
/// start N on the next. `replaced` is bumped per completed pair;
/// `roll_out_count` once the batch joins. A batch that finds nothing to
/// replace returns without touching either counter.
pub async fn replace_batch(
    api: &dyn ContainerApi,
    cluster: &str,
    current: &ServiceRecord,
    next: &ServiceRecord,
    canary_instance: Option<&str>,
    state: &mut RolloutState,
) -> RolloutResult<()> {
    let tasks = api.list_tasks(cluster, &current.name).await?;
    let count = batch_size(
        state.roll_out_count,
        state.replaced_count(),
        state.original_running_count,
    ) as usize;
    if tasks.is_empty() || count == 0 {
        debug!(
            service = %current.name,
            listed = tasks.len(),
            batch = count,
            "nothing to replace this round"
        );
        return Ok(());
    }

    // TODO: pick which RUNNING tasks to stop instead of taking the head
    // of the list; a placement-aware choice would drain zones evenly.
    let group = format!("service:{}", next.name);
    let replaced = &state.replaced;
    let pairs = tasks.iter().take(count).map(|task_arn| {
        let group = group.as_str();
        async move {
            tokio::try_join!(
                async {
                    api.stop_task(cluster, task_arn).await?;
                    api.wait_until_tasks_stopped(cluster, std::slice::from_ref(task_arn))
                        .await?;
                    debug!(task = %task_arn, "current task stopped");
                    Ok(())
                },
                async {
                    let started = api
                        .start_task(cluster, &next.task_definition, group, canary_instance)
                        .await?;
                    api.wait_until_tasks_running(cluster, std::slice::from_ref(&started.arn))
                        .await?;
                    debug!(task = %started.arn, "next task running");
                    Ok::<(), _>(())
                },
            )?;
            replaced.fetch_add(1, Ordering::SeqCst);
            ApiResult::Ok(())
        }
    });
    try_join_all(pairs).await?;

    state.roll_out_count += 1;
    info!(
        batch = count,
        round = state.roll_out_count,
        replaced = state.replaced_count(),
        "batch replaced"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cage_aws::fake::FakeControlPlane;
    use cage_core::types::{LoadBalancerRef, ServiceSpec};

    const CLUSTER: &str = "cage-test";

    fn spec(name: &str, task_definition: &str, desired: u64) -> ServiceSpec {
        ServiceSpec {
            cluster: CLUSTER.into(),
            service_name: name.into(),
            task_definition: Some(task_definition.into()),
            desired_count: Some(desired),
            launch_type: Some("FARGATE".into()),
            load_balancers: vec![LoadBalancerRef {
                target_group_arn: "arn:tg/web".into(),
                container_name: None,
                container_port: None,
            }],
            network_configuration: None,
            health_check_grace_period_seconds: None,
            platform_version: None,
        }
    }

    async fn seed(fake: &FakeControlPlane) -> (ServiceRecord, ServiceRecord) {
        let current = fake
            .create_service(&spec("web", "arn:td/web:1", 4))
            .await
            .unwrap();
        let next = fake
            .create_service(&spec("web-next", "arn:td/web:2", 1))
            .await
            .unwrap();
        (current, next)
    }

    #[tokio::test]
    async fn first_batch_replaces_one_task() {
        let fake = FakeControlPlane::new();
        let (current, next) = seed(&fake).await;
        let mut state = RolloutState::new(4);

        replace_batch(&fake, CLUSTER, &current, &next, None, &mut state)
            .await
            .unwrap();

        assert_eq!(state.replaced_count(), 1);
        assert_eq!(state.roll_out_count, 1);
        assert_eq!(fake.running_count("web"), 3);
        assert_eq!(fake.running_count("web-next"), 2);
    }

    #[tokio::test]
    async fn second_batch_doubles() {
        let fake = FakeControlPlane::new();
        let (current, next) = seed(&fake).await;
        let mut state = RolloutState::new(4);
        state.roll_out_count = 1;
        state.replaced.store(1, Ordering::SeqCst);

        replace_batch(&fake, CLUSTER, &current, &next, None, &mut state)
            .await
            .unwrap();

        assert_eq!(state.replaced_count(), 3);
        assert_eq!(fake.running_count("web"), 2);
        assert_eq!(fake.running_count("web-next"), 3);
    }

    #[tokio::test]
    async fn empty_service_is_a_no_op() {
        let fake = FakeControlPlane::new();
        let current = fake
            .create_service(&spec("web", "arn:td/web:1", 0))
            .await
            .unwrap();
        let next = fake
            .create_service(&spec("web-next", "arn:td/web:2", 0))
            .await
            .unwrap();
        let mut state = RolloutState::new(4);

        replace_batch(&fake, CLUSTER, &current, &next, None, &mut state)
            .await
            .unwrap();

        assert_eq!(state.replaced_count(), 0);
        assert_eq!(state.roll_out_count, 0);
    }

    #[tokio::test]
    async fn failed_start_fails_the_batch() {
        let fake = FakeControlPlane::new();
        let (current, next) = seed(&fake).await;
        fake.fail_next_starts(1);
        let mut state = RolloutState::new(4);

        let err = replace_batch(&fake, CLUSTER, &current, &next, None, &mut state)
            .await
            .unwrap_err();

        assert!(matches!(err, crate::RolloutError::ControlPlane(_)));
        assert_eq!(state.replaced_count(), 0);
        assert_eq!(state.roll_out_count, 0);
    }

    #[tokio::test]
    async fn canary_instance_pin_reaches_start_task() {
        let fake = FakeControlPlane::new();
        let (current, next) = seed(&fake).await;
        let mut state = RolloutState::new(4);

        replace_batch(
            &fake,
            CLUSTER,
            &current,
            &next,
            Some("arn:instance/canary"),
            &mut state,
        )
        .await
        .unwrap();

        let placements = fake.placements();
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].1, "arn:instance/canary");
    }
}
