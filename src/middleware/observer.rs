//! Request timing and status observation.
//!
//! [`Observer`] brackets the wrapped handler with two callbacks:
//!
//! | Callback | When | Sees |
//! |---|---|---|
//! | `on_start` | before the handler runs | the request (mutable), start time, remote address |
//! | `on_end` | after the handler's response is final | request head, response, the completed [`RequestMetadata`] |
//!
//! The head `on_end` sees is the one the innermost handler was called with,
//! so headers added by layers underneath (a generated correlation id) show
//! up there. If the request never reached a handler it is the head as it
//! left `on_start`.
//!
//! Time comes from an injectable clock, `Utc::now` by default. If the
//! handler panics and nothing below catches it, `on_end` does not run; put a
//! [`Recovery`](super::Recovery) underneath to time failing requests too.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use http::StatusCode;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, erased_handler};
use crate::request::{Request, RequestHead, ServedHead};
use crate::response::Response;

/// Header set by proxies with the original client address.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Lifecycle data for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestMetadata {
    pub start_timestamp: DateTime<Utc>,
    /// `None` until the handler has returned.
    pub end_timestamp: Option<DateTime<Utc>>,
    /// `end - start`, zero until the handler has returned.
    pub elapsed: Duration,
    pub remote_addr: String,
    /// `None` until the handler has returned.
    pub status: Option<StatusCode>,
}

impl RequestMetadata {
    fn started(start_timestamp: DateTime<Utc>, remote_addr: String) -> Self {
        Self {
            start_timestamp,
            end_timestamp: None,
            elapsed: Duration::ZERO,
            remote_addr,
            status: None,
        }
    }

    fn finish(&mut self, end_timestamp: DateTime<Utc>, status: StatusCode) {
        self.end_timestamp = Some(end_timestamp);
        // A clock that steps backwards yields zero rather than a negative span.
        self.elapsed = (end_timestamp - self.start_timestamp).to_std().unwrap_or_default();
        self.status = Some(status);
    }
}

type StartFn = dyn Fn(&mut Request, &RequestMetadata) + Send + Sync;
type EndFn = dyn Fn(&RequestHead, &Response, &RequestMetadata) + Send + Sync;
type Clock = dyn Fn() -> DateTime<Utc> + Send + Sync;

/// Times requests and reports their outcome. See the [module docs](self).
#[derive(Clone)]
pub struct Observer {
    inner: BoxedHandler,
    on_start: Option<Arc<StartFn>>,
    on_end: Option<Arc<EndFn>>,
    clock: Arc<Clock>,
}

impl Observer {
    pub fn new(inner: impl Handler) -> Self {
        Self {
            inner: inner.into_boxed_handler(),
            on_start: None,
            on_end: None,
            clock: Arc::new(Utc::now),
        }
    }

    /// Called before the handler with start time and remote address set.
    /// The request may be modified, e.g. to attach extensions.
    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Request, &RequestMetadata) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(f));
        self
    }

    /// Called once the handler's response is final, with every field of the
    /// metadata populated.
    pub fn on_end<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestHead, &Response, &RequestMetadata) + Send + Sync + 'static,
    {
        self.on_end = Some(Arc::new(f));
        self
    }

    /// Replaces the time source. Called exactly twice per request.
    pub fn clock<F>(mut self, f: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(f);
        self
    }
}

impl ErasedHandler for Observer {
    fn call(&self, mut req: Request) -> BoxFuture {
        let this = self.clone();
        Box::pin(async move {
            let mut metadata = RequestMetadata::started((this.clock)(), remote_addr(req.head()));
            if let Some(on_start) = &this.on_start {
                on_start(&mut req, &metadata);
            }
            // Nested observers share one slot.
            let served = this.on_end.as_ref().map(|_| {
                let served = req.extensions().get::<ServedHead>().cloned().unwrap_or_default();
                req.extensions_mut().insert(served.clone());
                (served, req.head().clone())
            });

            let response = this.inner.call(req).await;

            metadata.finish((this.clock)(), response.status_code());
            if let (Some(on_end), Some((served, snapshot))) = (&this.on_end, &served) {
                on_end(served.get().unwrap_or(snapshot), &response, &metadata);
            }
            response
        })
    }
}

erased_handler!(Observer);

/// Client address for logging.
///
/// A non-empty `X-Forwarded-For` wins and is taken verbatim, port and proxy
/// chain included. Otherwise the transport peer with its port removed.
pub fn remote_addr(head: &RequestHead) -> String {
    if let Some(forwarded) = head.header(X_FORWARDED_FOR).filter(|v| !v.is_empty()) {
        return forwarded.to_owned();
    }
    let peer = head.remote_addr.as_str();
    peer.rsplit_once(':').map_or(peer, |(host, _port)| host).to_owned()
}
