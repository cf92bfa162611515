use clap::Parser;
use core::time::Duration;
use notegen_core::replay::ReplayModel;
use notegen_server::{
    AppState, CliArgs, ServerConfig, SessionCoordinator, router,
    server::telemetry::init_telemetry,
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let model = Arc::new(ReplayModel::with_note_delay(config.note_delay));
    let state = AppState::new(config.clone(), model);
    let coordinator = Arc::clone(&state.coordinator);
    let app = router(state);

    let result = if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            let uds_path = config.server_addr.clone();
            let listener = UnixListener::bind(&uds_path)?;
            log_startup_info(&uds_path, &config);
            let res = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(coordinator, config.shutdown_timeout))
                .await;
            // Best effort; a panic can still leave the socket file behind.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let listener = TcpListener::bind(&config.server_addr).await?;
        log_startup_info(&config.server_addr, &config);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(coordinator, config.shutdown_timeout))
            .await
    };

    providers.shutdown();
    result?;

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(_addr: &str, _config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting notegen server on {} with full config: {:#?}",
            _addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting notegen server on {} serving {}",
            _addr,
            _config.frontend_dir.display()
        );
    }
}

async fn shutdown_signal(coordinator: Arc<SessionCoordinator>, drain_timeout: Duration) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");

    coordinator.shutdown(drain_timeout).await;
}
