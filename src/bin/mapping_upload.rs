//! One-shot mapping upload.
//!
//! Builds the mapping payload for a single manifestation straight from the
//! job store, writes it to disk, and publishes it unless `--dry-run` is given.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=... CATALOG_API_ENDPOINT=... cargo run --bin mapping_upload --features postgres -- \
//!     <manifestation_id> [--out mapping_payload.json] [--dry-run]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use segment_mapping_publisher::store::postgres::PostgresConfig;
use segment_mapping_publisher::telemetry::{init_tracing, LogFormat};
use segment_mapping_publisher::{
    HttpCatalogPublisher, JobStoreReader, MessageHandler, PostgresJobStore, TracingMetrics,
    UploadSettings,
};

struct Args {
    manifestation_id: String,
    out: PathBuf,
    dry_run: bool,
}

fn parse_args() -> Result<Args, String> {
    let usage = "Usage: mapping_upload <manifestation_id> [--out <path>] [--dry-run]";
    let mut manifestation_id = None;
    let mut out = PathBuf::from("mapping_payload.json");
    let mut dry_run = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out" => {
                out = args.next().map(PathBuf::from).ok_or(usage)?;
            }
            "--dry-run" => dry_run = true,
            "-h" | "--help" => return Err(usage.to_string()),
            _ if manifestation_id.is_none() && !arg.starts_with("--") => {
                manifestation_id = Some(arg);
            }
            _ => return Err(format!("Unexpected argument: {arg}\n{usage}")),
        }
    }

    Ok(Args {
        manifestation_id: manifestation_id.ok_or(usage)?,
        out,
        dry_run,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(LogFormat::from_env());

    let args = parse_args()?;
    let settings = UploadSettings::from_env()?;

    let store = PostgresJobStore::new(PostgresConfig::from_env(settings.database_url.clone())).await?;
    let publisher = HttpCatalogPublisher::new(settings.catalog)?;
    let handler = MessageHandler::new(
        JobStoreReader::new(Arc::new(store), settings.store_timeout),
        Arc::new(publisher),
        Arc::new(TracingMetrics),
    );

    let upload = handler.prepare(&args.manifestation_id).await?;

    let json = serde_json::to_string_pretty(&upload.payload)?;
    tokio::fs::write(&args.out, json).await?;
    info!(
        path = %args.out.display(),
        text_mappings = upload.payload.text_mappings.len(),
        "Mapping payload written"
    );

    if args.dry_run {
        info!("Dry run, skipping upload");
        return Ok(());
    }

    let outcome = handler.publish(upload).await?;
    info!(
        manifestation_id = %outcome.upload.manifestation_id,
        job_id = %outcome.upload.job_id,
        response = %outcome.response,
        "Mapping uploaded to catalog"
    );

    Ok(())
}
