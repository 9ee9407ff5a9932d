//! Wire-level tests for the registry client.

use std::time::{Duration, Instant};

use httpmock::prelude::*;
use serde_json::json;

use juggler3d::config::InternEndpoint;
use juggler3d::feeder::FeederStatus;
use juggler3d::job::{Job, JobStatus};
use juggler3d::registry::{RegistryClient, RegistryError};

fn endpoint(api_uri: String) -> InternEndpoint {
    InternEndpoint {
        api_app: "juggler".to_string(),
        api_key: "secret".to_string(),
        api_uri,
        printer_name: "prusa-1".to_string(),
        office_name: "berlin".to_string(),
    }
}

fn client_for(server: &MockServer) -> RegistryClient {
    RegistryClient::new(endpoint(server.base_url())).unwrap()
}

#[tokio::test]
async fn heartbeat_carries_the_printer_identity() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/printer/")
            .body_contains("action=heartbeat")
            .body_contains("app=juggler")
            .body_contains("token=secret")
            .body_contains("printer_name=prusa-1")
            .body_contains("office_name=berlin");
        then.status(200);
    });

    client_for(&server).heartbeat().await.unwrap();
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn get_decodes_the_job_envelope() {
    let server = MockServer::start();
    let _mock = server.mock(|when, then| {
        when.method(POST).path("/job/").body_contains("action=get");
        then.status(200).json_body(json!({
            "success": true,
            "content": {
                "id": 42,
                "file_name": "benchy.gcode",
                "file_content": "G28\n",
                "owner": "ada",
                "color": "Red",
                "status": "Waiting for a button",
                "progress": 12.5
            },
            "error": ""
        }));
    });

    let job = client_for(&server).next_job().await.unwrap();
    assert_eq!(job.id, 42);
    assert_eq!(job.file_name, "benchy.gcode");
    assert_eq!(job.file_content, "G28\n");
    assert_eq!(job.owner, "ada");
    assert_eq!(job.color, "Red");
    assert_eq!(job.progress, 12.5);
}

#[tokio::test]
async fn get_with_an_id_sends_it_along() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/job/")
            .body_contains("action=get")
            .body_contains("id=42");
        then.status(200).json_body(json!({
            "success": true,
            "content": {"id": 42},
            "error": ""
        }));
    });

    client_for(&server).get_job(Some(42)).await.unwrap();
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn an_empty_queue_is_nothing_to_print() {
    let server = MockServer::start();
    let _mock = server.mock(|when, then| {
        when.method(POST).path("/job/");
        then.status(200).json_body(json!({
            "success": true,
            "content": {"id": 0},
            "error": ""
        }));
    });

    let result = client_for(&server).next_job().await;
    assert!(matches!(result, Err(RegistryError::NothingToPrint)));
}

#[tokio::test]
async fn an_unsuccessful_get_reports_the_registry_message() {
    let server = MockServer::start();
    let _mock = server.mock(|when, then| {
        when.method(POST).path("/job/");
        then.status(200).json_body(json!({
            "success": false,
            "content": null,
            "error": "no job for this printer"
        }));
    });

    let err = client_for(&server).get_job(Some(7)).await.unwrap_err();
    assert!(err.to_string().contains("no job for this printer"));
}

#[tokio::test]
async fn an_http_error_status_is_not_retried() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/job/");
        then.status(503);
    });

    let result = client_for(&server).next_job().await;
    assert!(matches!(result, Err(RegistryError::BadStatus(_))));
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn waiting_job_is_never_put_on_the_wire() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/job/");
        then.status(200);
    });

    let job = Job::default();
    client_for(&server)
        .report_job_status_change(&job)
        .await
        .unwrap();
    assert_eq!(mock.hits(), 0);
}

#[tokio::test]
async fn a_paused_update_names_the_cause() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/job/")
            .body_contains("action=update")
            .body_contains("id=42")
            .body_contains("Filament+sensor+paused+printing");
        then.status(200);
    });

    let job = Job {
        id: 42,
        status: JobStatus::Paused,
        feeder_status: FeederStatus::FSensorBusy,
        ..Job::default()
    };
    client_for(&server)
        .report_job_status_change(&job)
        .await
        .unwrap();
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn transport_failures_are_retried_before_giving_up() {
    // Nothing listens on a discard port; every attempt is refused.
    let client = RegistryClient::new(endpoint("http://127.0.0.1:9".to_string())).unwrap();

    let started = Instant::now();
    let result = client.heartbeat().await;
    assert!(matches!(result, Err(RegistryError::Http(_))));
    // three attempts with two five-second waits in between
    assert!(started.elapsed() >= Duration::from_secs(9));
}
