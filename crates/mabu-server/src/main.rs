mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

use mabu_api::conversations::ConversationStore;
use mabu_api::mailer::Mailer;
use mabu_api::session::{SessionConfig, SessionManager};
use mabu_api::uploads::ImageStore;
use mabu_api::{AppState, AppStateInner};
use mabu_auth::AccessTokens;
use mabu_db::Database;
use mabu_gateway::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mabu_server=debug,mabu_api=debug,mabu_gateway=debug,mabu_db=info,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    let sessions = SessionManager::new(
        db.clone(),
        SessionConfig {
            access_tokens: AccessTokens::new(&config.jwt_secret, config.access_token_ttl),
            refresh_ttl: config.refresh_token_ttl,
            require_email_verification: config.require_email_verification,
        },
    );

    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        sessions,
        conversations: ConversationStore::new(db),
        dispatcher: dispatcher.clone(),
        images: ImageStore::new(config.upload_dir.clone()).await?,
        mailer: Mailer::new(&config.smtp)?,
    });

    let app = mabu_api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Mabu server listening on {}", addr);
    info!(
        "Access tokens live {} min, refresh tokens {} days",
        config.access_token_ttl.num_minutes(),
        config.refresh_token_ttl.num_days()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(dispatcher))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM, after closing every live gateway connection.
async fn shutdown_signal(dispatcher: Dispatcher) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }

    dispatcher.shutdown().await;
}
