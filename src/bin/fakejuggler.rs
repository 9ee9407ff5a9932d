//! Interactive stub of the daemon's control surface.
//!
//! Serves the same endpoints as the real daemon over an in-memory job so
//! the companion UI can be developed without a printer. Single-letter
//! commands on stdin drive the job through its lifecycle.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::RwLock;

use juggler3d::job::{Job, JobStatus};
use juggler3d::web::control_headers;
use juggler3d::web::models::JobInfo;

type SharedJob = Arc<RwLock<Job>>;

fn usage() {
    println!(
        "\npr: progress job by 10%\ns: start job\np: pause job\nf: finish the job\n\
         w: waiting for job\nb: waiting for a button"
    );
}

async fn info(State(job): State<SharedJob>) -> impl IntoResponse {
    let info = JobInfo::from(&*job.read().await);
    let body = serde_json::to_string(&info).unwrap_or_default();
    (StatusCode::OK, control_headers(), body)
}

async fn start(State(job): State<SharedJob>) -> impl IntoResponse {
    println!("start");
    let mut job = job.write().await;
    job.progress = 0.0;
    job.status = JobStatus::Printing;
    (StatusCode::OK, control_headers(), String::new())
}

async fn pause(State(job): State<SharedJob>) -> impl IntoResponse {
    println!("pause");
    job.write().await.status = JobStatus::Paused;
    (StatusCode::OK, control_headers(), String::new())
}

async fn reschedule(State(job): State<SharedJob>) -> impl IntoResponse {
    println!("reschedule");
    job.write().await.arm_button_window();
    (StatusCode::OK, control_headers(), String::new())
}

async fn cancel(State(job): State<SharedJob>) -> impl IntoResponse {
    println!("cancel");
    job.write().await.status = JobStatus::Cancelling;
    (StatusCode::OK, control_headers(), String::new())
}

async fn version() -> impl IntoResponse {
    println!("version");
    (StatusCode::OK, control_headers(), "12345".to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let job: SharedJob = Arc::new(RwLock::new(Job {
        owner: "user".to_string(),
        filename: "some_file.gcode".to_string(),
        ..Job::default()
    }));

    let app = Router::new()
        .route("/info", get(info))
        .route("/start", get(start))
        .route("/pause", get(pause))
        .route("/reschedule", get(reschedule))
        .route("/cancel", get(cancel))
        .route("/version", get(version))
        .with_state(Arc::clone(&job));

    let listener = tokio::net::TcpListener::bind("[::]:8888").await?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            eprintln!("serving HTTP: {err}");
        }
    });

    usage();
    println!("Current status: '{}'", job.read().await.status);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut job = job.write().await;
        match line.trim() {
            "pr" => {
                job.status = JobStatus::Printing;
                let next = (job.progress + 10.0).min(100.0);
                if next >= 100.0 {
                    job.status = JobStatus::Finished;
                }
                job.progress = next;
                println!("Updated progress to {next:.1}%");
            }
            "w" => {
                job.progress = 0.0;
                job.id = 0;
                job.status = JobStatus::WaitingJob;
            }
            "b" => {
                job.progress = 0.0;
                job.id = 10;
                job.status = JobStatus::WaitingButton;
                job.color = "Red".to_string();
                job.arm_button_window();
            }
            "s" => {
                job.progress = 0.0;
                job.status = JobStatus::Printing;
            }
            "p" => job.status = JobStatus::Paused,
            "f" => job.status = JobStatus::Finished,
            _ => usage(),
        }
        println!("New status: '{}'", job.status);
    }
    Ok(())
}
