//! HTTP surface of the hostel allocation service.

extern crate alloc;

pub mod error;
pub mod router;
pub mod routes;
pub mod session;

use alloc::sync::Arc;
use core::convert::Infallible;
use core::future::Future;

use error::{AppError, HttpResponse};
use futures_util::pin_mut;
use hostel_allocation_config::Config;
use hostel_allocation_core::seeder::SeedPlan;
use hostel_allocation_core::RosterStore;
use hostel_allocation_optimizer::AllocationEngine;
use http::Request;
use http_body_util::{BodyExt as _, Limited};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Request bodies are small JSON documents.
const MAX_BODY_BYTES: usize = 64 * 1024;

pub struct AppState<S> {
    pub store: S,
    pub engine: AllocationEngine,
    pub seed: SeedPlan,
    pub warden_token: String,
}

impl<S> AppState<S> {
    pub fn from_config(store: S, config: &Config) -> Self {
        Self {
            store,
            engine: AllocationEngine::new(config.allocation.policy),
            seed: config.seed.clone(),
            warden_token: config.warden_token.clone(),
        }
    }
}

async fn serve<S: RosterStore>(state: &AppState<S>, request: Request<Incoming>) -> HttpResponse {
    let (parts, body) = request.into_parts();
    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            debug!("failed to read request body: {err}");
            return AppError::InvalidRequest("unreadable or oversized body").into_response();
        }
    };
    router::handle(state, Request::from_parts(parts, body)).await
}

/// Binds the listener and returns the accept loop. The loop finishes once a
/// shutdown signal arrived and every open connection drained.
pub async fn run_server<S: RosterStore + 'static>(
    state: Arc<AppState<S>>,
    listen_address: &str,
) -> Result<impl Future<Output = Result<(), AppError>>, AppError> {
    let listener = TcpListener::bind(listen_address).await?;
    info!(address = %listener.local_addr()?, "started up server...");

    // tell the connections to shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let shutdown_tx = Arc::new(shutdown_tx);

    // wait for the connections to finish shutdown
    let (closed_tx, closed_rx) = watch::channel(());

    Ok(async move {
        let shutdown = shutdown_signal();
        pin_mut!(shutdown);

        #[allow(clippy::redundant_pub_crate)]
        loop {
            select! {
                accept = listener.accept() => {
                    let (socket, remote_addr) = match accept {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!("failed to accept connection: {err}");
                            continue;
                        }
                    };
                    let state = Arc::clone(&state);
                    let shutdown_tx = Arc::clone(&shutdown_tx);
                    let closed_rx = closed_rx.clone();

                    tokio::spawn(async move {
                        let socket = TokioIo::new(socket);
                        let service = hyper::service::service_fn(move |request: Request<Incoming>| {
                            let state = Arc::clone(&state);
                            async move { Ok::<_, Infallible>(serve(&state, request).await) }
                        });

                        let builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
                        let connection = builder.serve_connection_with_upgrades(socket, service);
                        pin_mut!(connection);

                        let result = select! {
                            result = connection.as_mut() => result,
                            () = shutdown_tx.closed() => {
                                connection.as_mut().graceful_shutdown();
                                connection.as_mut().await
                            }
                        };
                        if let Err(err) = result {
                            debug!(%remote_addr, "failed to serve connection: {err:#}");
                        }

                        drop(closed_rx);
                    });
                }
                () = &mut shutdown => {
                    warn!("shutting down, draining open connections");
                    drop(shutdown_rx);
                    drop(closed_rx);
                    closed_tx.closed().await;
                    break;
                }
            }
        }

        Ok(())
    })
}

#[allow(clippy::redundant_pub_crate)]
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {err}");
            core::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("failed to install signal handler: {err}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
