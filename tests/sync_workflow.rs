//! End-to-end daily sync against mocked Alissa and MOLGENIS servers.

use httpmock::prelude::*;
use rdtools::alissa::{AlissaClient, AlissaCredentials};
use rdtools::config::SyncConfig;
use rdtools::logger::StepStatus;
use rdtools::molgenis::{BulkImporter, TokenSession};
use rdtools::{Clock, LoggerOptions, RunLogger};
use serde_json::json;

fn quiet_logger() -> RunLogger {
    RunLogger::new(
        LoggerOptions {
            silent: true,
            database_name: "cosas".to_string(),
            ..LoggerOptions::default()
        },
        Clock::default(),
    )
}

fn sync_config() -> SyncConfig {
    SyncConfig {
        variants_entity: "cosas_variants".to_string(),
        step_log_entity: Some("cosas_steps".to_string()),
        export_delay_secs: 0,
        ..SyncConfig::default()
    }
}

async fn alissa(server: &MockServer) -> AlissaClient {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/oauth/token");
            then.status(200)
                .json_body(json!({ "access_token": "tok", "token_type": "bearer" }));
        })
        .await;

    let credentials = AlissaCredentials {
        host: server.base_url(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        username: "api".to_string(),
        password: "pw".to_string(),
    };
    AlissaClient::connect(&credentials, &Clock::default())
        .await
        .expect("connect")
}

#[tokio::test]
async fn sync_walks_patients_to_import() {
    let upstream = MockServer::start_async().await;
    let molgenis = MockServer::start_async().await;
    let client = alissa(&upstream).await;

    upstream
        .mock_async(|when, then| {
            when.method(GET).path("/interpret/api/2/patients");
            then.status(200).json_body(json!([{ "id": "p1" }]));
        })
        .await;
    upstream
        .mock_async(|when, then| {
            when.method(GET).path("/interpret/api/2/patients/p1/analyses");
            then.status(200).json_body(json!([{ "id": 42 }]));
        })
        .await;
    upstream
        .mock_async(|when, then| {
            when.method(POST)
                .path("/interpret/api/2/patient_analyses/42/molecular_variants/exports");
            then.status(201).json_body(json!({ "exportId": "abc123" }));
        })
        .await;
    upstream
        .mock_async(|when, then| {
            when.method(GET)
                .path("/interpret/api/2/patient_analyses/42/molecular_variants/exports/abc123");
            then.status(200).json_body(json!([
                { "gene": "BRCA1", "hgvs": "c.68_69del" },
                { "gene": "TP53", "hgvs": null }
            ]));
        })
        .await;
    let variants = molgenis
        .mock_async(|when, then| {
            when.method(POST)
                .path("/plugin/importwizard/importFile")
                .body_contains("filename=\"cosas_variants.csv\"")
                .body_contains("\"BRCA1\"");
            then.status(201);
        })
        .await;
    let steps = molgenis
        .mock_async(|when, then| {
            when.method(POST)
                .path("/plugin/importwizard/importFile")
                .body_contains("filename=\"cosas_steps.csv\"");
            then.status(201);
        })
        .await;

    let importer = BulkImporter::new(
        TokenSession::new(&molgenis.base_url(), "mg"),
        Clock::default(),
    );
    let mut logger = quiet_logger();

    let report = rdtools::sync::run_daily_sync(&client, &importer, &mut logger, &sync_config())
        .await
        .expect("sync");

    variants.assert_async().await;
    steps.assert_async().await;
    assert_eq!(report.patients, 1);
    assert_eq!(report.analyses, 1);
    assert_eq!(report.exports, 1);
    assert_eq!(report.variants, 2);
    assert_eq!(report.import_status, Some(201));

    let run = logger.run().expect("run record");
    assert_eq!(run.steps.len(), 5);
    assert!(run.elapsed_time.is_some());
    assert!(logger
        .steps()
        .iter()
        .all(|s| s.status == Some(StepStatus::Success)));
}

#[tokio::test]
async fn sync_failure_closes_step_and_run() {
    let upstream = MockServer::start_async().await;
    let molgenis = MockServer::start_async().await;
    let client = alissa(&upstream).await;

    upstream
        .mock_async(|when, then| {
            when.method(GET).path("/interpret/api/2/patients");
            then.status(500).body("boom");
        })
        .await;
    molgenis
        .mock_async(|when, then| {
            when.method(POST).path("/plugin/importwizard/importFile");
            then.status(201);
        })
        .await;

    let importer = BulkImporter::new(
        TokenSession::new(&molgenis.base_url(), "mg"),
        Clock::default(),
    );
    let mut logger = quiet_logger();

    let err = rdtools::sync::run_daily_sync(&client, &importer, &mut logger, &sync_config())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("500"));

    assert!(!logger.is_running());
    let run = logger.run().expect("run record");
    assert!(run.comment.as_deref().unwrap_or_default().contains("sync failed"));
    assert_eq!(logger.steps().len(), 1);
    assert_eq!(logger.steps()[0].status, Some(StepStatus::Failed));
}
