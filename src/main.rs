use std::path::PathBuf;

use certplane::{
    api::{build_router, shutdown_signal, start_api_server, AppState},
    observability::{init_observability, log_config_info},
    startup::build_services,
    AppConfig, Result, APP_NAME, VERSION,
};
use clap::Parser;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "certplane", version, about = "Certificate authority control plane")]
struct Args {
    /// Configuration file (YAML, TOML or JSON); overrides CERTPLANE_CONFIG
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn install_rustls_provider() {
    use rustls::crypto::{ring, CryptoProvider};

    if CryptoProvider::get_default().is_none()
        && ring::default_provider().install_default().is_err()
    {
        // Lost a race with another installer; either provider works.
        eprintln!("Warning: rustls crypto provider was already installed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    install_rustls_provider();

    // Must happen before any config is read from the environment
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let args = Args::parse();
    let config = match args.config.as_deref() {
        Some(path) => AppConfig::load_from(Some(path))?,
        None => AppConfig::load()?,
    };

    init_observability(&config.observability).await?;
    info!(app_name = APP_NAME, version = VERSION, "Starting certificate authority");
    log_config_info(&config);

    let services = build_services(&config, None).await?;
    let router = build_router(AppState { authority: services.authority.clone() });

    let served = start_api_server(&config.server, router, shutdown_signal()).await;
    if let Err(e) = &served {
        error!(error = %e, "API server terminated with error");
    }

    services.authority.shutdown().await?;
    info!("Certificate authority stopped");
    served
}
