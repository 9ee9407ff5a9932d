//! Response models for the control surface.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::{Job, JobStatus};

/// What `/info` exposes about the current job. The G-code body and the
/// raw feeder state stay local.
#[derive(Debug, Serialize)]
pub struct JobInfo {
    pub id: u64,
    pub file_name: String,
    pub owner: String,
    pub progress: f64,
    pub status: JobStatus,
    pub color: String,
    pub fetched: Option<DateTime<Utc>>,
    pub scheduled: Option<DateTime<Utc>>,
}

impl From<&Job> for JobInfo {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            file_name: job.filename.clone(),
            owner: job.owner.clone(),
            progress: job.progress,
            status: job.status,
            color: job.color.clone(),
            fetched: job.fetched,
            scheduled: job.scheduled,
        }
    }
}
