use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio::sync::Mutex;

use crate::email::{MailError, Mailer};
use crate::fetch::{BalanceFetcher, ErrorKind, FetchError};
use crate::templates::Template;

#[derive(Debug)]
pub enum JobOutcome {
    Delivered,
    /// The fetch failed and the fallback email went out instead.
    FallbackDelivered(FetchError),
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("{0}")]
    Send(MailError),
    #[error("{source} (获取数据失败: {fetch})")]
    FallbackSend {
        fetch: FetchError,
        #[source]
        source: MailError,
    },
}

/// One fetch, render and send cycle.
pub struct MailJob {
    fetcher: BalanceFetcher,
    fallback: Template,
    mailer: Arc<dyn Mailer>,
    subject: String,
    running: Mutex<()>,
}

impl MailJob {
    pub fn new(
        fetcher: BalanceFetcher,
        fallback: Template,
        mailer: Arc<dyn Mailer>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            fallback,
            mailer,
            subject: subject.into(),
            running: Mutex::new(()),
        }
    }

    /// Runs the job once. `initial` marks the run made at process startup.
    ///
    /// Fetch failures never fail the run, they turn into the fallback email.
    /// Only a failed delivery is an error.
    pub async fn send(&self, initial: bool) -> Result<JobOutcome, JobError> {
        // Overlapping triggers queue up behind the run in flight.
        let _running = self.running.lock().await;

        tracing::info!(initial, "Mail job started");

        match self.fetcher.fetch().await {
            Ok(html) => {
                self.mailer
                    .send(&self.subject, &html)
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "Failed to send balance email");
                        JobError::Send(e)
                    })?;

                tracing::info!("Balance email delivered");
                Ok(JobOutcome::Delivered)
            }
            Err(fetch) => {
                match fetch.kind() {
                    ErrorKind::Transport => tracing::warn!(error = %fetch, "Fetch failed, sending fallback email"),
                    kind => tracing::error!(error = %fetch, ?kind, "Fetch failed, sending fallback email"),
                }

                let html = self.render_fallback(&fetch);

                if let Err(source) = self.mailer.send(&self.subject, &html).await {
                    tracing::error!(error = %source, "Failed to send fallback email");
                    return Err(JobError::FallbackSend { fetch, source });
                }

                tracing::info!("Fallback email delivered");
                Ok(JobOutcome::FallbackDelivered(fetch))
            }
        }
    }

    fn render_fallback(&self, error: &FetchError) -> String {
        self.fallback
            .render()
            .set("title", self.subject.as_str())
            .set("error", error.to_string())
            .build()
    }
}

/// Set-once handle the refresh endpoint uses to reach the job.
#[derive(Clone, Default)]
pub struct JobSlot {
    job: Arc<OnceLock<Arc<MailJob>>>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when a job was already installed.
    pub fn install(&self, job: Arc<MailJob>) -> bool {
        self.job.set(job).is_ok()
    }

    pub fn get(&self) -> Option<Arc<MailJob>> {
        self.job.get().cloned()
    }
}
