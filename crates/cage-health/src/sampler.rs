//! The health sampler.
//!
//! `sample` measures one rollout window: it resolves the load balancer
//! fronting the target group, sleeps for the window length, then fetches
//! the window's four metrics concurrently and folds them into a
//! [`ServiceHealth`].

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::debug;

use cage_aws::api::METRICS_NAMESPACE;
use cage_aws::{ControlPlaneError, LoadBalancerApi, MetricsApi, MetricsQuery, Statistic};
use cage_core::types::ServiceHealth;

use crate::arn::{extract_alb_id, extract_target_group_id};
use crate::error::{HealthError, HealthResult};

pub struct HealthSampler {
    metrics: Arc<dyn MetricsApi>,
    elb: Arc<dyn LoadBalancerApi>,
    /// Length of one measurement window.
    roll_out_period: Duration,
    shutdown: watch::Receiver<bool>,
}

impl HealthSampler {
    pub fn new(
        metrics: Arc<dyn MetricsApi>,
        elb: Arc<dyn LoadBalancerApi>,
        roll_out_period: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            metrics,
            elb,
            roll_out_period,
            shutdown,
        }
    }

    /// Measure the window `[epoch, epoch + roll_out_period]` for the
    /// given target group.
    ///
    /// The sleep is the measurement window; the metrics source is only
    /// consulted once the window has fully elapsed.
    pub async fn sample(
        &self,
        target_group_arn: &str,
        epoch: SystemTime,
    ) -> HealthResult<ServiceHealth> {
        let lb_arn = self.elb.load_balancer_arn(target_group_arn).await?;
        let lb_id = extract_alb_id(&lb_arn)?;
        let tg_id = extract_target_group_id(target_group_arn)?;

        debug!(
            load_balancer = %lb_id,
            target_group = %tg_id,
            window_secs = self.roll_out_period.as_secs(),
            "waiting out the measurement window"
        );
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.roll_out_period) => {}
            _ = shutdown.changed() => return Err(ControlPlaneError::Cancelled.into()),
        }

        let (request_count, elb_5xx, target_5xx, response_time) = tokio::try_join!(
            self.fetch_sum("RequestCount", &lb_id, &tg_id, epoch),
            self.fetch_sum("HTTPCode_ELB_5XX_Count", &lb_id, &tg_id, epoch),
            self.fetch_sum("HTTPCode_Target_5XX_Count", &lb_id, &tg_id, epoch),
            self.fetch_average("TargetResponseTime", &lb_id, &tg_id, epoch),
        )?;

        // A window with neither requests nor front-end errors cannot be
        // judged; surface that instead of reporting availability zero.
        if request_count == 0.0 && elb_5xx == 0.0 {
            return Err(HealthError::InsufficientMetricData);
        }
        let availability =
            ((request_count - target_5xx) / (request_count + elb_5xx)).clamp(0.0, 1.0);
        Ok(ServiceHealth {
            availability,
            response_time,
        })
    }

    fn query(
        &self,
        metric_name: &str,
        lb_id: &str,
        tg_id: &str,
        statistic: Statistic,
        epoch: SystemTime,
    ) -> MetricsQuery {
        MetricsQuery {
            namespace: METRICS_NAMESPACE,
            metric_name: metric_name.to_string(),
            dimensions: vec![
                ("LoadBalancer".to_string(), lb_id.to_string()),
                ("TargetGroup".to_string(), tg_id.to_string()),
            ],
            statistic,
            start_time: epoch,
            end_time: epoch + self.roll_out_period,
            period: self.roll_out_period,
        }
    }

    async fn fetch_sum(
        &self,
        metric_name: &str,
        lb_id: &str,
        tg_id: &str,
        epoch: SystemTime,
    ) -> HealthResult<f64> {
        let query = self.query(metric_name, lb_id, tg_id, Statistic::Sum, epoch);
        let datapoints = self.metrics.get_metric_statistics(&query).await?;
        Ok(datapoints.iter().filter_map(|dp| dp.sum).sum())
    }

    async fn fetch_average(
        &self,
        metric_name: &str,
        lb_id: &str,
        tg_id: &str,
        epoch: SystemTime,
    ) -> HealthResult<f64> {
        let query = self.query(metric_name, lb_id, tg_id, Statistic::Average, epoch);
        let datapoints = self.metrics.get_metric_statistics(&query).await?;
        let averages: Vec<f64> = datapoints.iter().filter_map(|dp| dp.average).collect();
        if averages.is_empty() {
            return Err(HealthError::InsufficientMetricData);
        }
        Ok(averages.iter().sum::<f64>() / averages.len() as f64)
    }
}
