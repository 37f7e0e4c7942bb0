use std::path::PathBuf;

use clap::Parser;
use maki_core::bootstrap::BootstrapError;
use maki_router::admin::AdminState;
use maki_router::potluck::PotluckRouterState;

const EXIT_FATAL_INIT: i32 = 1;
const EXIT_CREDENTIAL_DIR: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "maki", about = "Aggregating reverse-proxy gateway for LLM providers")]
struct Cli {
    #[arg(long, env = "HOST")]
    host: Option<String>,
    #[arg(long, env = "PORT")]
    port: Option<u16>,
    #[arg(long, env = "CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = Cli::parse();
    let mut settings = match maki_core::Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(error = %err, "configuration invalid");
            return EXIT_FATAL_INIT;
        }
    };
    if let Some(host) = cli.host {
        settings.host = host;
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(dir) = cli.config_dir {
        settings.config_dir = dir;
    }

    let app = match maki_core::bootstrap::bootstrap(settings).await {
        Ok(app) => app,
        Err(BootstrapError::CredentialDirUnwritable(detail)) => {
            tracing::error!(%detail, "credential directory unwritable");
            return EXIT_CREDENTIAL_DIR;
        }
        Err(err) => {
            tracing::error!(error = %err, "bootstrap failed");
            return EXIT_FATAL_INIT;
        }
    };

    let router = axum::Router::new()
        .merge(maki_router::proxy_router(
            app.engine.clone(),
            app.potluck.clone(),
        ))
        .merge(maki_router::potluck_router(PotluckRouterState {
            potluck: app.potluck.clone(),
            pools: app.pools.clone(),
            store: app.store.clone(),
        }))
        .merge(maki_router::admin_router(AdminState {
            pools: app.pools.clone(),
            risk: app.risk.clone(),
            auth: app.auth.clone(),
            potluck: app.potluck.clone(),
        }));

    let bind = format!("{}:{}", app.settings.host, app.settings.port);
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%bind, error = %err, "bind failed");
            return EXIT_FATAL_INIT;
        }
    };
    tracing::info!(%bind, "maki gateway listening");

    let serve = axum::serve(listener, router).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    });
    if let Err(err) = serve.await {
        tracing::error!(error = %err, "server error");
        app.flush().await;
        return EXIT_FATAL_INIT;
    }

    app.flush().await;
    0
}
