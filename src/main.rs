use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use slotcheck::config::{EngineConfig, ServerConfig};
use slotcheck::engine::{Engine, SystemClock};
use slotcheck::{reaper, service};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = ServerConfig::from_env();
    let config = EngineConfig::from_env()?;
    slotcheck::observability::init(server.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&server.data_dir)?;

    let window_minutes = config.reservation_window_minutes;
    let engine = Arc::new(Engine::open(&server.wal_path(), config, Arc::new(SystemClock)).await?);
    tokio::spawn(reaper::run_reaper(engine.clone(), Duration::from_secs(5)));
    tokio::spawn(reaper::run_compactor(
        engine.clone(),
        server.compact_threshold,
        Duration::from_secs(30),
    ));

    let max_connections = server.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{}:{}", server.bind, server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("slotcheck listening on {addr}");
    info!("  data_dir: {}", server.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  reservation window: {window_minutes} min");
    info!(
        "  metrics: {}",
        server
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(slotcheck::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(slotcheck::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(slotcheck::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = service::process_connection(socket, engine).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(slotcheck::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    if let Err(e) = engine.compact_log().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("slotcheck stopped");
    Ok(())
}
