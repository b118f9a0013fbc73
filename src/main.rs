use chrono::Utc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use polymarket_ingest::capture::capture_snapshots;
use polymarket_ingest::config::Config;
use polymarket_ingest::db::{self, Writer};
use polymarket_ingest::error::Result;
use polymarket_ingest::fetcher::{run_endpoint, ApiClient};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let conn = db::connect(&cfg.db_path).await?;
    let version = db::ingest_version(Utc::now());
    let mut writer = Writer::new(conn, version);
    info!("Database ready at {} (version {})", cfg.db_path, version.date_naive());

    // --- Paginated ingestion, one endpoint at a time ---
    let client = ApiClient::new(&cfg)?;
    let pagination = cfg.pagination();

    for (i, kind) in cfg.endpoints.iter().copied().enumerate() {
        if i > 0 && !cfg.endpoint_pause.is_zero() {
            info!("Pausing {}s before {kind}", cfg.endpoint_pause.as_secs());
            tokio::time::sleep(cfg.endpoint_pause).await;
        }
        let stats = run_endpoint(&client, &mut writer, kind, &pagination).await?;
        info!(
            endpoint = %kind,
            requests = stats.requests,
            processed = stats.processed,
            failed = stats.failed,
            next_offset = stats.next_offset,
            "{kind} ingestion complete",
        );
    }

    // --- Optional snapshot capture ---
    if cfg.capture_snapshots {
        capture_snapshots(&client, &mut writer, &cfg.snapshots()).await?;
    }

    writer.close().await?;
    info!("Ingestion run finished");
    Ok(())
}
