//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! BOT_TOKEN=... cargo run -p switchboard-gateway
//! ```
//!
//! Configuration is loaded from environment variables (and `.env`).

use switchboard_common::{
    try_init_tracing, try_init_tracing_with_config, AppConfig, AppError, TracingConfig,
};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, code = e.error_code(), "Gateway failed");
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<(), AppError> {
    // The output format depends on APP_ENV, so tracing starts once the config is known
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_or_warn(try_init_tracing());
            error!(error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };
    init_or_warn(try_init_tracing_with_config(TracingConfig::for_environment(
        config.app.env,
    )));

    info!(
        env = ?config.app.env,
        shard_ids = ?config.sharding.shard_ids,
        shard_count = ?config.sharding.shard_count,
        "Configuration loaded"
    );

    switchboard_gateway::run(config).await
}

fn init_or_warn(result: Result<(), switchboard_common::TracingError>) {
    if let Err(e) = result {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }
}
