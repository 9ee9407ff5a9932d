//! Client for the intern job registry.
//!
//! Every action is a form-encoded POST carrying the app credentials and
//! the printer's identity. Transport failures are retried a bounded number
//! of times; an HTTP error status is reported to the caller as-is.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::InternEndpoint;
use crate::feeder::FeederStatus;
use crate::job::{Job, JobStatus};

const MAX_HTTP_RETRIES: u32 = 3;
const RETRY_INTERVAL: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bad response status from intern endpoint: {0}")]
    BadStatus(reqwest::StatusCode),
    #[error("job {id} action 'get' unsuccessful: {message}")]
    Api { id: u64, message: String },
    #[error("nothing to print")]
    NothingToPrint,
}

/// The job fields the registry serves. Status stays a free string here:
/// the registry echoes back whatever was last reported, including progress
/// strings like `Printing... (42.0%)`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteJob {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_content: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: f64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    content: Option<RemoteJob>,
    #[serde(default)]
    error: String,
}

pub struct RegistryClient {
    http: reqwest::Client,
    endpoint: InternEndpoint,
}

impl RegistryClient {
    /// Build the client with the TLS policy scoped to it alone: registry
    /// instances sit on trusted networks behind self-signed certificates.
    pub fn new(endpoint: InternEndpoint) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, endpoint })
    }

    /// Presence signal; the registry marks the printer alive.
    pub async fn heartbeat(&self) -> Result<(), RegistryError> {
        let params = self.base_params("heartbeat");
        self.post_with_retry("/printer/", &params).await.map(drop)
    }

    /// Ask the registry to reshuffle this printer's queue, best-effort.
    pub async fn reschedule(&self) -> Result<(), RegistryError> {
        let params = self.base_params("reschedule");
        self.post_with_retry("/printer/", &params).await.map(drop)
    }

    /// Fetch the next job in the queue.
    pub async fn next_job(&self) -> Result<RemoteJob, RegistryError> {
        self.get_job(None).await
    }

    /// Fetch one job, or the head of the queue when `id` is `None`. An
    /// empty queue comes back as `id == 0` and maps to
    /// [`RegistryError::NothingToPrint`].
    pub async fn get_job(&self, id: Option<u64>) -> Result<RemoteJob, RegistryError> {
        let mut params = self.base_params("get");
        if let Some(id) = id {
            params.push(("id", id.to_string()));
        }
        let response = self.post_with_retry("/job/", &params).await?;
        if !response.status().is_success() {
            return Err(RegistryError::BadStatus(response.status()));
        }
        let envelope: Envelope = response.json().await?;
        if !envelope.success {
            return Err(RegistryError::Api {
                id: id.unwrap_or(0),
                message: envelope.error,
            });
        }
        let job = envelope.content.unwrap_or_default();
        if job.id == 0 {
            return Err(RegistryError::NothingToPrint);
        }
        Ok(job)
    }

    /// Report the job's current status. `WaitingJob` is never put on the
    /// wire so idle printers don't flap between jobs.
    pub async fn report_job_status_change(&self, job: &Job) -> Result<(), RegistryError> {
        if job.status == JobStatus::WaitingJob {
            return Ok(());
        }

        let status = human_status(job);
        info!("updating intern status to '{status}'");

        let mut params = self.base_params("update");
        params.push(("status", status));
        params.push(("id", job.id.to_string()));
        self.post_with_retry("/job/", &params).await.map(drop)
    }

    /// Remove the job from the registry once it is finished or cancelled.
    pub async fn delete_job(&self, id: u64) -> Result<(), RegistryError> {
        let mut params = self.base_params("delete");
        params.push(("id", id.to_string()));
        self.post_with_retry("/job/", &params).await.map(drop)
    }

    fn base_params(&self, action: &'static str) -> Vec<(&'static str, String)> {
        vec![
            ("app", self.endpoint.api_app.clone()),
            ("token", self.endpoint.api_key.clone()),
            ("action", action.to_string()),
            ("printer_name", self.endpoint.printer_name.clone()),
            ("office_name", self.endpoint.office_name.clone()),
        ]
    }

    async fn post_with_retry(
        &self,
        path: &str,
        params: &[(&'static str, String)],
    ) -> Result<reqwest::Response, RegistryError> {
        let url = format!("{}{}", self.endpoint.api_uri, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.http.post(&url).form(params).send().await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if attempt >= MAX_HTTP_RETRIES {
                        return Err(err.into());
                    }
                    warn!(
                        "registry request to {path} failed \
                         (attempt {attempt}/{MAX_HTTP_RETRIES}): {err}"
                    );
                }
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }
}

/// The human string the registry shows to the job owner.
fn human_status(job: &Job) -> String {
    if job.status == JobStatus::Printing && job.feeder_status == FeederStatus::Printing {
        return format!("Printing... ({:.1}%)", job.progress);
    }
    if job.status == JobStatus::Paused {
        match job.feeder_status {
            FeederStatus::MMUBusy => return "Printing paused: MMU paused printing".to_string(),
            FeederStatus::FSensorBusy => {
                return "Printing paused: Filament sensor paused printing".to_string()
            }
            FeederStatus::ManuallyPaused => return "Printing paused manually".to_string(),
            _ => {}
        }
    }
    job.status.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(status: JobStatus, feeder_status: FeederStatus, progress: f64) -> Job {
        Job {
            id: 42,
            status,
            feeder_status,
            progress,
            ..Job::default()
        }
    }

    #[test]
    fn printing_status_carries_progress() {
        let j = job(JobStatus::Printing, FeederStatus::Printing, 41.25);
        assert_eq!(human_status(&j), "Printing... (41.2%)");
    }

    #[test]
    fn printing_without_feeder_progress_stays_plain() {
        let j = job(JobStatus::Printing, FeederStatus::MMUBusy, 41.0);
        assert_eq!(human_status(&j), "Printing");
    }

    #[test]
    fn paused_statuses_name_their_cause() {
        let mmu = job(JobStatus::Paused, FeederStatus::MMUBusy, 0.0);
        assert_eq!(human_status(&mmu), "Printing paused: MMU paused printing");

        let fsensor = job(JobStatus::Paused, FeederStatus::FSensorBusy, 0.0);
        assert_eq!(
            human_status(&fsensor),
            "Printing paused: Filament sensor paused printing"
        );

        let manual = job(JobStatus::Paused, FeederStatus::ManuallyPaused, 0.0);
        assert_eq!(human_status(&manual), "Printing paused manually");
    }

    #[test]
    fn other_statuses_use_their_wire_name() {
        let j = job(JobStatus::Cancelling, FeederStatus::Printing, 10.0);
        assert_eq!(human_status(&j), "Cancelling");
    }
}
