mod broadcast;
mod classify;
mod cluster;
mod config;
mod dedup;
mod enrich;
mod error;
mod geo;
mod http;
mod model;
mod persist;
mod streams;
mod supervisor;

use config::Config;
use supervisor::Supervisor;
use tracing::error;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "holycluster_core=info,tower_http=info".into()),
        )
        .json()
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = Supervisor::new(config).run().await {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}
