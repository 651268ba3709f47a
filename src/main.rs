use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rdtools::alissa::{ExportFilter, PatientFilter};
use rdtools::config::RdtoolsConfig;
use rdtools::table::Table;
use rdtools::{LoggerOptions, RunLogger};

#[derive(Parser)]
#[command(
    name = "rdtools",
    about = "Alissa Interpret and MOLGENIS import tools for daily rare-disease data runs",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, env = "RDTOOLS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List Alissa patients, optionally filtered
    Patients {
        #[arg(long)]
        accession_number: Option<String>,
        #[arg(long)]
        created_after: Option<String>,
        #[arg(long)]
        created_before: Option<String>,
        #[arg(long)]
        created_by: Option<String>,
        #[arg(long)]
        family_identifier: Option<String>,
        #[arg(long)]
        last_updated_after: Option<String>,
        #[arg(long)]
        last_updated_before: Option<String>,
        #[arg(long)]
        last_updated_by: Option<String>,
    },

    /// Show one patient by internal Alissa id
    Patient {
        #[arg(long)]
        patient_id: String,
    },

    /// List the analyses of a patient
    Analyses {
        #[arg(long)]
        patient_id: String,
    },

    /// Request a molecular variant export for an analysis
    RequestExport {
        #[arg(long)]
        analysis_id: u64,

        /// Do not restrict to variants marked for review
        #[arg(long)]
        all_review_states: bool,

        /// Do not restrict to variants included in the report
        #[arg(long)]
        all_report_states: bool,
    },

    /// Fetch a previously requested variant export
    ExportData {
        #[arg(long)]
        analysis_id: u64,
        #[arg(long)]
        export_id: String,
    },

    /// Import a JSON array of records into a MOLGENIS entity
    ImportTable {
        /// Target entity (package_entity)
        #[arg(long)]
        entity: String,

        /// JSON file holding an array of objects
        #[arg(long)]
        input: PathBuf,
    },

    /// Upload a file to MOLGENIS
    ImportFile {
        #[arg(long)]
        path: PathBuf,
    },

    /// Run the daily Alissa -> MOLGENIS variant sync
    Sync {
        /// Override the configured delay between export request and fetch
        #[arg(long)]
        export_delay_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = RdtoolsConfig::resolve(cli.config.as_deref())?;
    let clock = cfg.clock()?;

    match cli.command {
        Commands::Patients {
            accession_number,
            created_after,
            created_before,
            created_by,
            family_identifier,
            last_updated_after,
            last_updated_before,
            last_updated_by,
        } => {
            let filter = PatientFilter {
                accession_number,
                created_after,
                created_before,
                created_by,
                family_identifier,
                last_updated_after,
                last_updated_before,
                last_updated_by,
            };
            let client = rdtools::connect_alissa(&cfg, &clock).await?;
            print_json(&client.get_patients(&filter).await?)?;
        }
        Commands::Patient { patient_id } => {
            let client = rdtools::connect_alissa(&cfg, &clock).await?;
            print_json(&client.get_patient_by_internal_id(&patient_id).await?)?;
        }
        Commands::Analyses { patient_id } => {
            let client = rdtools::connect_alissa(&cfg, &clock).await?;
            print_json(&client.get_patient_analyses(&patient_id).await?)?;
        }
        Commands::RequestExport {
            analysis_id,
            all_review_states,
            all_report_states,
        } => {
            let filter = ExportFilter {
                marked_for_review: !all_review_states,
                marked_include_in_report: !all_report_states,
            };
            let client = rdtools::connect_alissa(&cfg, &clock).await?;
            let export = client
                .get_patient_variant_export_id(analysis_id, filter)
                .await?;
            println!("{}", export.export_id);
        }
        Commands::ExportData {
            analysis_id,
            export_id,
        } => {
            let client = rdtools::connect_alissa(&cfg, &clock).await?;
            print_json(
                &client
                    .get_patient_variant_export_data(analysis_id, &export_id)
                    .await?,
            )?;
        }
        Commands::ImportTable { entity, input } => {
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let records: Vec<serde_json::Value> = serde_json::from_str(&content)
                .with_context(|| format!("{} is not a JSON array", input.display()))?;
            let table = Table::from_records(&records)?;

            let importer = rdtools::importer(&cfg, &clock).await?;
            let response = importer.import_table(&entity, &table).await?;
            let status = response.status();
            println!("{} {}", status, response.text().await?);
        }
        Commands::ImportFile { path } => {
            let importer = rdtools::importer(&cfg, &clock).await?;
            let response = importer.import_file(&path).await?;
            let status = response.status();
            println!("{} {}", status, response.text().await?);
        }
        Commands::Sync { export_delay_secs } => {
            let mut sync_cfg = cfg.sync.clone();
            if let Some(delay) = export_delay_secs {
                sync_cfg.export_delay_secs = delay;
            }

            let client = rdtools::connect_alissa(&cfg, &clock).await?;
            let importer = rdtools::importer(&cfg, &clock).await?;
            let mut logger = RunLogger::new(LoggerOptions::from(&cfg.logger), clock.clone());

            let report = rdtools::sync::run_daily_sync(&client, &importer, &mut logger, &sync_cfg).await?;
            print_json(&report)?;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
