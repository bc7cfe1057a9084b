//! Minimal keel host: the full interceptor stack behind a hyper server with
//! graceful shutdown.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/users/42
//!   curl -i -H 'x-request-id: abcd' http://localhost:3000/users/42
//!   curl -i -H 'x-forwarded-for: 203.0.113.9' http://localhost:3000/users/42
//!   curl -i http://localhost:3000/panic

use std::net::SocketAddr;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use keel::middleware::{CorrelationId, Observer, Recovery, logging};
use keel::{Pipeline, Request, Response};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let app = Pipeline::new(
        Observer::new(CorrelationId::new(
            Recovery::new(route).on_recovered(logging::on_recovered),
        ))
        .on_start(logging::on_start)
        .on_end(logging::on_end),
    );

    let addr: SocketAddr = "0.0.0.0:3000".parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "keel demo listening");

    // JoinSet tracks every connection task so shutdown can wait for them.
    let mut tasks = tokio::task::JoinSet::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            // Check shutdown first so a SIGTERM stops accepting immediately.
            biased;

            () = &mut shutdown => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };
                let service = app.clone().into_service(peer);
                tasks.spawn(async move {
                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        error!(%peer, "connection error: {e}");
                    }
                });
            }

            // Reap finished connection tasks so the set stays small.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}
    info!("keel demo stopped");
    Ok(())
}

// Routing is the host's job; a match is enough here.
async fn route(req: Request) -> Response {
    let span = logging::request_span(&req);
    let _guard = span.enter();

    match req.path() {
        "/panic" => panic!("I died"),
        path if path.starts_with("/users/") => {
            let id = &path["/users/".len()..];
            info!(user = id, "fetching user");
            Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes())
        }
        _ => Response::builder()
            .status(http::StatusCode::NOT_FOUND)
            .text("Not found!"),
    }
}

/// Resolves on SIGTERM (Kubernetes) or Ctrl-C (local dev).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
