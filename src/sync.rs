//! Daily Alissa → MOLGENIS variant sync.
//!
//! Walks patients → analyses → export requests → export data, then imports
//! the collected variants. Every phase runs as one logged step of a run.
//! Calls are issued one after another; nothing is retried.

use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::alissa::{AlissaClient, ExportFilter, PatientFilter};
use crate::config::SyncConfig;
use crate::logger::{RunLogger, StepStatus};
use crate::molgenis::{AuthenticatedSession, BulkImporter};

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct SyncReport {
    pub patients: usize,
    pub analyses: usize,
    pub exports: usize,
    pub variants: usize,
    /// Status returned by the variant import, if one was attempted.
    pub import_status: Option<u16>,
}

/// Run one full sync under `logger`. The run is always stopped before
/// returning, including when a step fails.
pub async fn run_daily_sync<S: AuthenticatedSession>(
    alissa: &AlissaClient,
    importer: &BulkImporter<S>,
    logger: &mut RunLogger,
    cfg: &SyncConfig,
) -> Result<SyncReport> {
    logger.start()?;

    let result = sync_steps(alissa, importer, logger, cfg).await;
    if let Err(e) = &result {
        if logger.current_step().is_some() {
            logger.stop_step_with(StepStatus::Failed, Some(e.to_string()))?;
        }
        logger.set_run_comment(format!("sync failed: {}", e))?;
    }
    logger.stop_run()?;

    persist_logs(importer, logger, cfg).await;
    result
}

async fn sync_steps<S: AuthenticatedSession>(
    alissa: &AlissaClient,
    importer: &BulkImporter<S>,
    logger: &mut RunLogger,
    cfg: &SyncConfig,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    logger.start_step("retrieve", "get-patients", None)?;
    let patients = alissa.get_patients(&PatientFilter::default()).await?;
    let patient_ids = record_ids(&patients);
    report.patients = patient_ids.len();
    logger.stop_step()?;

    logger.start_step("retrieve", "get-analyses", None)?;
    let mut analysis_ids = Vec::new();
    for patient_id in &patient_ids {
        let analyses = alissa.get_patient_analyses(patient_id).await?;
        analysis_ids.extend(numeric_analysis_ids(patient_id, &analyses));
    }
    report.analyses = analysis_ids.len();
    logger.stop_step()?;

    logger.start_step("retrieve", "request-exports", None)?;
    let filter = ExportFilter {
        marked_for_review: cfg.marked_for_review,
        marked_include_in_report: cfg.marked_include_in_report,
    };
    let mut exports = Vec::with_capacity(analysis_ids.len());
    for analysis_id in &analysis_ids {
        let export = alissa.get_patient_variant_export_id(*analysis_id, filter).await?;
        exports.push((*analysis_id, export.export_id));
    }
    report.exports = exports.len();
    logger.stop_step()?;

    // Exports are computed server-side; give them time before fetching.
    if cfg.export_delay_secs > 0 && !exports.is_empty() {
        tokio::time::sleep(Duration::from_secs(cfg.export_delay_secs)).await;
    }

    logger.start_step("retrieve", "get-export-data", None)?;
    let mut variants: Vec<Map<String, Value>> = Vec::new();
    for (analysis_id, export_id) in &exports {
        let data = alissa
            .get_patient_variant_export_data(*analysis_id, export_id)
            .await?;
        for mut record in records(data) {
            record.insert("analysisId".to_string(), Value::from(*analysis_id));
            variants.push(record);
        }
    }
    report.variants = variants.len();
    logger.stop_step()?;

    if variants.is_empty() {
        logger.start_step("import", "import-variants", Some(cfg.variants_entity.as_str()))?;
        logger.stop_step_with(StepStatus::Skipped, Some("no variants exported".to_string()))?;
        info!("no variants to import");
        return Ok(report);
    }

    logger.start_step("import", "import-variants", Some(cfg.variants_entity.as_str()))?;
    let response = importer
        .import_records(&cfg.variants_entity, &variants)
        .await?;
    let status = response.status();
    report.import_status = Some(status.as_u16());
    if status.is_success() {
        logger.stop_step()?;
    } else {
        logger.stop_step_with(
            StepStatus::Failed,
            Some(format!("import responded with status {}", status)),
        )?;
    }

    Ok(report)
}

/// Import the finished run and its steps into the configured log entities.
/// Failures are logged only; the sync result is already decided.
async fn persist_logs<S: AuthenticatedSession>(
    importer: &BulkImporter<S>,
    logger: &RunLogger,
    cfg: &SyncConfig,
) {
    if let (Some(entity), Some(run)) = (&cfg.run_log_entity, logger.run()) {
        if let Err(e) = importer.import_records(entity, std::slice::from_ref(run)).await {
            warn!(%entity, error = %e, "failed to import run log");
        }
    }
    if let Some(entity) = &cfg.step_log_entity {
        if !logger.steps().is_empty() {
            if let Err(e) = importer.import_records(entity, logger.steps()).await {
                warn!(%entity, error = %e, "failed to import step logs");
            }
        }
    }
}

/// `id` of every record in a list (or of a single record), as strings.
pub fn record_ids(value: &Value) -> Vec<String> {
    let id_of = |v: &Value| match v.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    match value {
        Value::Array(items) => items.iter().filter_map(id_of).collect(),
        Value::Object(_) => id_of(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Analysis ids that parse as numbers. Others are logged and skipped.
fn numeric_analysis_ids(patient_id: &str, analyses: &Value) -> Vec<u64> {
    record_ids(analyses)
        .into_iter()
        .filter_map(|id| match id.parse::<u64>() {
            Ok(analysis) => Some(analysis),
            Err(_) => {
                warn!(patient = %patient_id, id = %id, "skipping non-numeric analysis id");
                None
            }
        })
        .collect()
}

fn records(value: Value) -> Vec<Map<String, Value>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        Value::Object(map) => vec![map],
        _ => Vec::new(),
    }
}
