//! Bridge between a composed handler stack and hyper.
//!
//! keel does not accept connections: the host owns the listener, TLS and
//! shutdown. It hands each accepted connection a service built by
//! [`Pipeline::into_service`], which reads the request, runs the stack and
//! converts the response back.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::{Service, service_fn};
use tracing::warn;

use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::response::Response;

/// A composed handler stack, cheap to clone and share across connections.
#[derive(Clone)]
pub struct Pipeline {
    handler: BoxedHandler,
}

impl Pipeline {
    pub fn new(handler: impl Handler) -> Self {
        Self { handler: handler.into_boxed_handler() }
    }

    /// Runs one request through the stack.
    pub async fn handle(&self, req: Request) -> Response {
        self.handler.call(req).await
    }

    /// A hyper service for one connection from `remote_addr`.
    pub fn into_service(
        self,
        remote_addr: SocketAddr,
    ) -> impl Service<
        hyper::Request<Incoming>,
        Response = http::Response<Full<Bytes>>,
        Error = Infallible,
        Future = impl Future<Output = Result<http::Response<Full<Bytes>>, Infallible>> + Send,
    > {
        let peer = remote_addr.to_string();
        service_fn(move |req| {
            let handler = Arc::clone(&self.handler);
            let peer = peer.clone();
            async move { Ok::<_, Infallible>(dispatch(handler, req, &peer).await) }
        })
    }
}

/// Core hot path: reads one request and produces one response.
///
/// Failures are answered here, hyper never sees an error.
async fn dispatch(
    handler: BoxedHandler,
    req: hyper::Request<Incoming>,
    peer: &str,
) -> http::Response<Full<Bytes>> {
    let request = match Request::from_http(req, peer).await {
        Ok(request) => request,
        Err(e) => {
            warn!(peer, "failed to read request: {e}");
            return Response::status(StatusCode::BAD_REQUEST).into_http();
        }
    };
    handler.call(request).await.into_http()
}
