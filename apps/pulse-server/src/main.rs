use std::time::Duration;

use tracing::{error, info};

mod api;
mod app_state;
mod bootstrap;
mod config;
mod openapi;
mod responses;
mod router;
mod synthetic;
mod tasks;
#[cfg(test)]
mod test_support;
mod ticker;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() {
    match bootstrap::ensure_openapi_export() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(err) => {
            eprintln!("error: failed to write generated OPENAPI_OUT: {err}");
            std::process::exit(2);
        }
    }

    pulse_otel::init();
    let cfg = match config::load_runtime_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    let http_cfg = match bootstrap::http_config(&cfg) {
        Ok(http) => http,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let bootstrap::BootstrapOutput {
        router,
        state,
        background_tasks,
    } = bootstrap::build(cfg);

    let app = bootstrap::attach_http_layers(
        router.with_state::<()>(state),
        http_cfg.concurrency_limit,
    );

    let listener = match tokio::net::TcpListener::bind(http_cfg.addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(addr = %http_cfg.addr, "failed to bind server socket: {err}");
            background_tasks.shutdown_with_grace(Duration::ZERO).await;
            std::process::exit(1);
        }
    };
    info!(addr = %http_cfg.addr, "pulse-server listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }

    if !background_tasks.is_empty() {
        info!(tasks = background_tasks.len(), "shutting down background tasks");
        background_tasks
            .shutdown_with_grace(Duration::from_secs(5))
            .await;
    }
}

async fn shutdown_signal() {
    info!("shutdown signal listener active");
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}
