use crate::config::Config;
use crate::db::Databases;
use crate::leaf::LeafApi;
use crate::state::{AppState, ServiceStatus};
use crate::sync::SyncService;
use crate::web::create_router;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Main application struct containing all necessary components.
pub struct App {
    config: Config,
    app_state: AppState,
}

impl App {
    /// Connect every data store, run migrations, and build shared state.
    pub async fn new(config: Config) -> Result<Self> {
        let db = Databases::connect(&config).await?;

        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&db.app)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed successfully");

        let leaf_api = match &config.leaf_api {
            Some(leaf_config) => Some(Arc::new(
                LeafApi::new(leaf_config).context("Failed to create LEAF API client")?,
            )),
            None => {
                info!("LEAF API not configured, activity streams carry no page images");
                None
            }
        };

        let app_state = AppState::new(db, leaf_api, &config);
        Ok(App { config, app_state })
    }

    /// Run the web server and background sync until a shutdown signal
    /// arrives, then drain both within the configured timeout.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let sync_handle = tokio::spawn({
            let sync = SyncService::new(
                self.app_state.clone(),
                self.config.holiday_years_back,
                self.config.holiday_years_ahead,
            );
            let shutdown_rx = shutdown_tx.subscribe();
            async move { sync.run(shutdown_rx).await }
        });

        let router = create_router(self.app_state.clone());
        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        info!(addr, "web server listening");
        self.app_state
            .service_statuses
            .set("web", ServiceStatus::Active);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Web server error")?;

        // The server has stopped accepting connections; give the sync loop
        // a bounded window to finish its current cycle.
        let _ = shutdown_tx.send(());
        let grace = Duration::from_secs(self.config.shutdown_timeout);
        if tokio::time::timeout(grace, sync_handle).await.is_err() {
            warn!(timeout = ?grace, "Sync service did not stop in time, abandoning");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = ?e, "Failed to register Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = ?e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
