//! Rollback — delete the next service and refill the current one.
//!
//! Unlike the forward path, rollback is best-effort: every branch runs
//! to completion and failures are counted rather than short-circuited.
//! Leaving the cluster short of capacity is worse than one extra
//! failing launch.

use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use tracing::{error, info, warn};

use cage_aws::{ApiResult, ContainerApi};
use cage_core::types::ServiceRecord;

use crate::error::{RolloutError, RolloutResult};

const PROGRESS_ICONS: [&str; 2] = ["⏳", "⌛"];

/// Delete `next_service_name` and start tasks on the current service
/// until it is back at `original_count`, all concurrently.
pub async fn rollback(
    api: &dyn ContainerApi,
    cluster: &str,
    current: &ServiceRecord,
    next_service_name: &str,
    original_count: u64,
) -> RolloutResult<()> {
    let refill_count = original_count.saturating_sub(current.running_count);
    info!(
        service = %current.name,
        original = original_count,
        running = current.running_count,
        refill = refill_count,
        "starting rollback of current service"
    );

    let completed = AtomicU64::new(0);
    let failed = AtomicU64::new(0);

    let next_names = [next_service_name.to_string()];
    let delete_next = async {
        let result: ApiResult<()> = async {
            api.delete_service(cluster, next_service_name).await?;
            api.wait_until_services_inactive(cluster, &next_names).await
        }
        .await;
        if let Err(ref e) = result {
            failed.fetch_add(1, Ordering::SeqCst);
            error!(service = next_service_name, error = %e, "failed to remove next service");
        } else {
            info!(service = next_service_name, "next service removed");
        }
        result
    };

    let group = format!("service:{}", current.name);
    let refills = (0..refill_count).map(|_| {
        let group = group.as_str();
        let completed = &completed;
        let failed = &failed;
        async move {
            let result: ApiResult<()> = async {
                let task = api
                    .start_task(cluster, &current.task_definition, group, None)
                    .await?;
                api.wait_until_tasks_running(cluster, std::slice::from_ref(&task.arn))
                    .await
            }
            .await;
            match result {
                Ok(()) => {
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    let icon = PROGRESS_ICONS[done as usize % PROGRESS_ICONS.len()];
                    info!("{icon} rollback is continuing: {done}/{refill_count}");
                }
                Err(ref e) => {
                    let total = failed.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(error = %e, total_failures = total, "failed to launch rollback task");
                }
            }
            result
        }
    });

    let (_, _) = tokio::join!(delete_next, join_all(refills));

    let completed = completed.load(Ordering::SeqCst);
    let failed = failed.load(Ordering::SeqCst);
    if failed > 0 {
        error!(
            "😱 service rollback hasn't completed: succeeded={completed}/{refill_count}, failed={failed}"
        );
        return Err(RolloutError::RollbackIncomplete { completed, failed });
    }
    info!("service rollback has completed successfully");
    Ok(())
}
