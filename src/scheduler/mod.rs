use std::sync::Arc;

use thiserror::Error;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler, JobSchedulerError};

use crate::job::MailJob;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid cron expression '{0}'")]
    InvalidCron(String),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
}

/// Accepts the classic five field form by pinning the seconds field to 0.
///
/// ```text
/// sec   min   hour   day_of_month   month   day_of_week
/// ```
pub fn normalize_cron(expression: &str) -> Result<String, SchedulerError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();

    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 => Ok(fields.join(" ")),
        _ => Err(SchedulerError::InvalidCron(expression.to_string())),
    }
}

/// Runs the mail job on a cron schedule, in local time.
pub struct MailScheduler {
    inner: JobScheduler,
}

impl MailScheduler {
    pub async fn new(expression: &str, job: Arc<MailJob>) -> Result<Self, SchedulerError> {
        let schedule = normalize_cron(expression)?;
        let mut inner = JobScheduler::new().await?;

        let cron_job = CronJob::new_async_tz(schedule.as_str(), chrono::Local, move |_uuid, _lock| {
            let job = job.clone();
            Box::pin(async move {
                if let Err(e) = job.send(false).await {
                    tracing::error!(error = %e, "Scheduled mail job failed");
                }
            })
        })
        .map_err(|_| SchedulerError::InvalidCron(expression.to_string()))?;

        let id = inner.add(cron_job).await?;

        match inner.next_tick_for_job(id).await {
            Ok(Some(next)) => tracing::info!(%schedule, %next, "Mail job scheduled"),
            _ => tracing::warn!(%schedule, "Cron schedule has no upcoming run"),
        }

        Ok(Self { inner })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.inner.start().await?;
        tracing::info!("Scheduler running");
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<(), SchedulerError> {
        self.inner.shutdown().await?;
        tracing::info!("Scheduler stopped");
        Ok(())
    }
}
