//! Polling waiter with a maximum-attempts cap.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{ApiResult, ControlPlaneError};

/// Cadence and cap for one waiter family.
#[derive(Debug, Clone, Copy)]
pub struct WaiterConfig {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl WaiterConfig {
    /// The classic service-waiter envelope: 15s cadence, 40 attempts.
    pub fn services() -> Self {
        Self {
            delay: Duration::from_secs(15),
            max_attempts: 40,
        }
    }

    /// The classic task-waiter envelope: 6s cadence, 100 attempts.
    pub fn tasks() -> Self {
        Self {
            delay: Duration::from_secs(6),
            max_attempts: 100,
        }
    }
}

/// Poll `check` until it reports done, the attempt cap is exhausted
/// (`WaiterTimeout`), or the shutdown signal fires (`Cancelled`).
///
/// The first check runs immediately; the delay sits between attempts.
pub async fn poll_until<F, Fut>(
    waiter: &'static str,
    config: WaiterConfig,
    mut shutdown: watch::Receiver<bool>,
    mut check: F,
) -> ApiResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<bool>>,
{
    for attempt in 1..=config.max_attempts {
        if check().await? {
            return Ok(());
        }
        if attempt == config.max_attempts {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(config.delay) => {}
            _ = shutdown.changed() => return Err(ControlPlaneError::Cancelled),
        }
    }
    Err(ControlPlaneError::WaiterTimeout {
        waiter,
        attempts: config.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> WaiterConfig {
        WaiterConfig {
            delay: Duration::from_millis(1),
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn returns_once_condition_holds() {
        let (_tx, rx) = watch::channel(false);
        let calls = AtomicU32::new(0);
        let counter = &calls;
        poll_until("test", quick(), rx, || async move {
            Ok(counter.fetch_add(1, Ordering::SeqCst) >= 1)
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn times_out_after_max_attempts() {
        let (_tx, rx) = watch::channel(false);
        let err = poll_until("test", quick(), rx, || async { Ok(false) })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlPlaneError::WaiterTimeout {
                waiter: "test",
                attempts: 3
            }
        ));
    }

    #[tokio::test]
    async fn propagates_check_errors() {
        let (_tx, rx) = watch::channel(false);
        let err = poll_until("test", quick(), rx, || async {
            Err(ControlPlaneError::rejected("describe", "boom"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Rejected { .. }));
    }

    #[tokio::test]
    async fn aborts_promptly_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let config = WaiterConfig {
            delay: Duration::from_secs(3600),
            max_attempts: 2,
        };
        let handle = tokio::spawn(poll_until("test", config, rx, || async { Ok(false) }));
        tx.send(true).unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ControlPlaneError::Cancelled));
    }
}
