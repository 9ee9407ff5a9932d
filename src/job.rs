use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::feeder::FeederStatus;

/// How long the operator has to press the button before the job is
/// handed back.
pub const WAITING_FOR_BUTTON_MINUTES: i64 = 10;

/// Lifecycle states of the one job the daemon owns.
///
/// The serialized form is the human-readable string the registry and the
/// companion UI both expect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    #[serde(rename = "Waiting for job")]
    WaitingJob,
    #[serde(rename = "Waiting for a button")]
    WaitingButton,
    #[serde(rename = "Sending to printer")]
    Sending,
    #[serde(rename = "Printing")]
    Printing,
    #[serde(rename = "Paused")]
    Paused,
    #[serde(rename = "Cancelling")]
    Cancelling,
    #[serde(rename = "Finished")]
    Finished,
    #[serde(rename = "Button timeout")]
    ButtonTimeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::WaitingJob => "Waiting for job",
            JobStatus::WaitingButton => "Waiting for a button",
            JobStatus::Sending => "Sending to printer",
            JobStatus::Printing => "Printing",
            JobStatus::Paused => "Paused",
            JobStatus::Cancelling => "Cancelling",
            JobStatus::Finished => "Finished",
            JobStatus::ButtonTimeout => "Button timeout",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single in-flight print job. "No job" is `id == 0` together with
/// [`JobStatus::WaitingJob`].
#[derive(Debug, Clone, Default)]
pub struct Job {
    pub id: u64,
    pub filename: String,
    pub file_content: String,
    pub owner: String,
    pub color: String,
    pub progress: f64,
    pub status: JobStatus,
    /// Last sampled feeder state; local only, never serialized.
    pub feeder_status: FeederStatus,
    /// When the job was accepted locally.
    pub fetched: Option<DateTime<Utc>>,
    /// Deadline for the button press; meaningful only in `WaitingButton`.
    pub scheduled: Option<DateTime<Utc>>,
}

impl Job {
    /// Arm the button-press window: the operator gets ten minutes to
    /// confirm at the device before the job times out.
    pub fn arm_button_window(&mut self) {
        let now = Utc::now();
        self.fetched = Some(now);
        self.scheduled = Some(now + Duration::minutes(WAITING_FOR_BUTTON_MINUTES));
    }
}
