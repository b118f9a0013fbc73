use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use polymarket_ingest::api::routes::{router, ApiState};
use polymarket_ingest::config::Config;
use polymarket_ingest::db;
use polymarket_ingest::error::Result;

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

    if let Err(e) = serve(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let pool = db::connect_pool(&cfg.db_path).await?;
    info!("Reading from {}", cfg.db_path);

    let app = router(ApiState { pool });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Read API listening on {bind_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
