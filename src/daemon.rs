//! The job lifecycle state machine.
//!
//! One task owns the current [`Job`] and ticks on a fixed interval,
//! reconciling three sources of truth: the registry (polled), the control
//! HTTP surface (transition requests over a bounded channel) and the
//! feeder (status and progress sampled lock-free). Each tick is
//! independent; registry failures are logged and the machine carries on.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::feeder::{Feeder, FeederStatus};
use crate::job::{Job, JobStatus};
use crate::registry::RegistryClient;

pub const POLLING_INTERVAL: Duration = Duration::from_secs(5);

/// Capacity of the transition-request channel. Producers drop on overflow
/// rather than block, so a stuck tick can never deadlock a handler.
pub const TRANSITION_QUEUE_CAPACITY: usize = 10;

/// Shared handle to the feeder of the active session, if any.
pub type FeederSlot = Arc<RwLock<Option<Arc<Feeder>>>>;

/// Propose the next job status. Used by the HTTP handlers and by the
/// daemon itself; a full queue drops the request with an error log.
pub fn request_transition(requests: &mpsc::Sender<JobStatus>, status: JobStatus) {
    match requests.try_send(status) {
        Ok(()) => debug!("requesting status change to '{status}'"),
        Err(_) => error!("unable to request status change to '{status}': queue is full"),
    }
}

pub struct Daemon {
    registry: RegistryClient,
    serial_device: String,
    jobfile: PathBuf,
    job: Arc<RwLock<Job>>,
    feeder: FeederSlot,
    requests_tx: mpsc::Sender<JobStatus>,
    requests_rx: mpsc::Receiver<JobStatus>,
    prev_status: JobStatus,
}

impl Daemon {
    pub fn new(config: &Config, registry: RegistryClient, jobfile: impl Into<PathBuf>) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(TRANSITION_QUEUE_CAPACITY);
        Self {
            registry,
            serial_device: config.serial.clone(),
            jobfile: jobfile.into(),
            job: Arc::new(RwLock::new(Job::default())),
            feeder: Arc::new(RwLock::new(None)),
            requests_tx,
            requests_rx,
            prev_status: JobStatus::WaitingJob,
        }
    }

    /// Handle to the current job, shared with the HTTP surface.
    pub fn job(&self) -> Arc<RwLock<Job>> {
        Arc::clone(&self.job)
    }

    /// Handle to the feeder slot, shared with the HTTP surface.
    pub fn feeder(&self) -> FeederSlot {
        Arc::clone(&self.feeder)
    }

    /// Sender half of the transition-request channel.
    pub fn transition_sender(&self) -> mpsc::Sender<JobStatus> {
        self.requests_tx.clone()
    }

    /// Run the tick loop forever.
    pub async fn run(&mut self) {
        if let Err(err) = self.registry.reschedule().await {
            error!("reschedule failed: {err}");
        }
        let mut ticker = tokio::time::interval(POLLING_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One turn of the state machine: drain at most one transition
    /// request, heartbeat, then dispatch on the current status.
    pub async fn tick(&mut self) {
        match self.requests_rx.try_recv() {
            Ok(next) => {
                debug!("assigning status '{next}'");
                let snapshot = {
                    let mut job = self.job.write().await;
                    job.status = next;
                    job.clone()
                };
                if let Err(err) = self.registry.report_job_status_change(&snapshot).await {
                    error!("can't report status change to intern: {err}");
                }
            }
            Err(_) => debug!("no status updates"),
        }

        let status = self.job.read().await.status;
        info!("my status is: '{status}'");

        if let Err(err) = self.registry.heartbeat().await {
            error!("heartbeat failed: {err}");
        }

        match status {
            JobStatus::WaitingJob | JobStatus::ButtonTimeout => self.handle_waiting_job().await,
            JobStatus::WaitingButton => self.handle_waiting_button().await,
            JobStatus::Sending => {
                if self.prev_status != JobStatus::WaitingButton
                    && self.prev_status != JobStatus::Paused
                {
                    warn!(
                        "forbidden status change sequence, from '{}' to '{status}', ignoring",
                        self.prev_status
                    );
                    return;
                }
                self.handle_sending().await;
            }
            JobStatus::Printing => self.handle_printing().await,
            JobStatus::Paused => self.handle_paused().await,
            JobStatus::Cancelling | JobStatus::Finished => self.handle_teardown().await,
        }

        self.prev_status = status;
    }

    /// Idle: ask the registry for work. On success the job starts waiting
    /// for its button press in the same tick.
    async fn handle_waiting_job(&self) {
        self.job.write().await.id = 0;

        let remote = match self.registry.next_job().await {
            Ok(remote) => remote,
            Err(err) => {
                error!("{err}");
                return;
            }
        };

        {
            let mut job = self.job.write().await;
            job.id = remote.id;
            job.filename = remote.file_name;
            job.file_content = remote.file_content;
            job.progress = remote.progress;
            job.owner = remote.owner;
            job.color = remote.color;
            job.arm_button_window();
        }
        request_transition(&self.requests_tx, JobStatus::WaitingButton);

        self.handle_waiting_button().await;
    }

    async fn handle_waiting_button(&self) {
        let (id, scheduled) = {
            let job = self.job.read().await;
            (job.id, job.scheduled)
        };
        info!("job {id} is waiting");

        match self.registry.get_job(Some(id)).await {
            Ok(remote) => {
                info!("job status on intern: {}", remote.status);
                if remote.status == JobStatus::Cancelling.as_str() {
                    info!("the job is cancelling");
                    request_transition(&self.requests_tx, JobStatus::Cancelling);
                    return;
                }
            }
            Err(err) => error!("can't get job status from intern: {err}"),
        }

        let now = Utc::now();
        match scheduled {
            Some(scheduled) if scheduled > now => {
                info!(
                    "waiting {} more seconds for somebody to press the button",
                    (scheduled - now).num_seconds()
                );
            }
            _ => {
                warn!("nobody pressed the button on time");
                request_transition(&self.requests_tx, JobStatus::ButtonTimeout);
            }
        }
    }

    /// Persist the G-code and hand it to a fresh feeder. A job that can't
    /// reach the printer is surrendered back to the registry.
    async fn handle_sending(&mut self) {
        info!("sending to printer");
        let content = self.job.read().await.file_content.clone();
        debug!("file size: {}", content.len());

        if let Err(err) = tokio::fs::write(&self.jobfile, content.as_bytes()).await {
            error!("failed to write job file: {err}");
            request_transition(&self.requests_tx, JobStatus::Cancelling);
            return;
        }

        let feeder = match Feeder::new(&self.serial_device, &self.jobfile) {
            Ok(feeder) => Arc::new(feeder),
            Err(err) => {
                error!("failed to create feeder: {err}");
                request_transition(&self.requests_tx, JobStatus::Cancelling);
                return;
            }
        };

        *self.feeder.write().await = Some(Arc::clone(&feeder));
        request_transition(&self.requests_tx, JobStatus::Printing);

        tokio::spawn(async move {
            if let Err(err) = feeder.feed().await {
                warn!("print session ended: {err}");
            }
        });
    }

    async fn handle_printing(&self) {
        let id = self.job.read().await.id;
        info!("job {id} is currently printing");

        match self.registry.get_job(Some(id)).await {
            Ok(remote) if remote.status == JobStatus::Cancelling.as_str() => {
                info!("cancelling the job");
                request_transition(&self.requests_tx, JobStatus::Cancelling);
                return;
            }
            Ok(_) => {}
            Err(err) => error!("can't get job status from intern: {err}"),
        }

        let Some(feeder) = self.feeder.read().await.clone() else {
            return;
        };
        let feeder_status = feeder.status();
        let snapshot = {
            let mut job = self.job.write().await;
            job.progress = f64::from(feeder.progress());
            job.feeder_status = feeder_status;
            job.clone()
        };

        match feeder_status {
            FeederStatus::Printing => {
                // Keep the registry's progress percentage fresh.
                if let Err(err) = self.registry.report_job_status_change(&snapshot).await {
                    error!("can't report progress to intern: {err}");
                }
            }
            FeederStatus::Finished => request_transition(&self.requests_tx, JobStatus::Finished),
            FeederStatus::Error => request_transition(&self.requests_tx, JobStatus::Cancelling),
            FeederStatus::ManuallyPaused | FeederStatus::FSensorBusy | FeederStatus::MMUBusy => {
                request_transition(&self.requests_tx, JobStatus::Paused)
            }
            other => warn!("printing, feeder status is: {other}"),
        }
    }

    async fn handle_paused(&self) {
        let id = self.job.read().await.id;
        info!("job {id} is currently paused");

        let Some(feeder) = self.feeder.read().await.clone() else {
            return;
        };
        let feeder_status = feeder.status();
        self.job.write().await.feeder_status = feeder_status;

        match feeder_status {
            FeederStatus::Printing => request_transition(&self.requests_tx, JobStatus::Printing),
            FeederStatus::Error => request_transition(&self.requests_tx, JobStatus::Cancelling),
            other => warn!("paused, feeder status is: {other}"),
        }
    }

    /// Cancelling and Finished share the same teardown: stop the feeder
    /// if it is still alive, drop the job from the registry, go idle.
    async fn handle_teardown(&mut self) {
        if let Some(feeder) = self.feeder.write().await.take() {
            if feeder.status() != FeederStatus::Finished {
                info!("stopping feeder");
                feeder.cancel().await;
            }
        }

        info!("deleting from intern");
        let id = self.job.read().await.id;
        if let Err(err) = self.registry.delete_job(id).await {
            error!("{err}");
        }
        request_transition(&self.requests_tx, JobStatus::WaitingJob);
    }
}
