//! Correlation ids.
//!
//! [`CorrelationId`] guarantees every request reaching the wrapped handler
//! carries a non-empty [`REQUEST_ID_HEADER`]. An id set by the client or by an
//! upstream proxy is kept as is; otherwise one is generated (a random UUID v4
//! unless another generator is configured) and written into the request.
//! The response is never touched.

use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};
use tracing::trace;
use uuid::Uuid;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, erased_handler};
use crate::request::Request;

/// Header carrying the correlation id.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

type IdGenerator = dyn Fn() -> String + Send + Sync;

/// Ensures a correlation id on every request. See the [module docs](self).
#[derive(Clone)]
pub struct CorrelationId {
    inner: BoxedHandler,
    generator: Arc<IdGenerator>,
}

impl CorrelationId {
    pub fn new(inner: impl Handler) -> Self {
        Self { inner: inner.into_boxed_handler(), generator: Arc::new(uuid_v4) }
    }

    /// Replaces the id generator. It is called once for every request that
    /// arrives without an id, possibly from many threads at once.
    pub fn generator<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.generator = Arc::new(f);
        self
    }

    /// # Panics
    ///
    /// Panics if the generator returns a string that is not a valid header
    /// value. A generator that panics propagates as well.
    fn ensure_id(&self, req: &mut Request) {
        let present = req
            .headers()
            .get(&REQUEST_ID_HEADER)
            .is_some_and(|id| !id.is_empty());
        if present {
            return;
        }

        let id = (self.generator)();
        let value = HeaderValue::try_from(id)
            .unwrap_or_else(|e| panic!("correlation id generator returned an invalid header value: {e}"));
        trace!(request_id = ?value, "generated correlation id");
        req.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
}

impl ErasedHandler for CorrelationId {
    fn call(&self, mut req: Request) -> BoxFuture {
        self.ensure_id(&mut req);
        self.inner.call(req)
    }
}

erased_handler!(CorrelationId);

fn uuid_v4() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::response::Response;

    /// Echoes the id it saw as the body.
    async fn echo_id(req: Request) -> Response {
        Response::text(req.header("x-request-id").unwrap_or_default().to_owned())
    }

    #[tokio::test]
    async fn generates_an_id_when_absent() {
        let handler = CorrelationId::new(echo_id);

        let res = handler.call(Request::builder().uri("/test").build()).await;

        let id = std::str::from_utf8(res.body()).unwrap();
        assert!(Uuid::parse_str(id).is_ok(), "not a uuid: {id}");
    }

    #[tokio::test]
    async fn treats_an_empty_header_as_absent() {
        let handler = CorrelationId::new(echo_id).generator(|| "fresh".to_owned());

        let res = handler
            .call(Request::builder().header("x-request-id", "").build())
            .await;

        assert_eq!(res.body(), b"fresh");
    }

    #[tokio::test]
    async fn keeps_an_existing_id() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handler = CorrelationId::new(echo_id).generator(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            "generated".to_owned()
        });

        let res = handler
            .call(Request::builder().header("X-Request-Id", "abcd").build())
            .await;

        assert_eq!(res.body(), b"abcd");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stacking_twice_never_changes_the_id() {
        let counter = Arc::new(AtomicUsize::new(0));
        let next = move || counter.fetch_add(1, Ordering::SeqCst).to_string();
        let handler = CorrelationId::new(CorrelationId::new(echo_id).generator(next.clone()))
            .generator(next);

        let res = handler.call(Request::builder().build()).await;

        assert_eq!(res.body(), b"0");
    }

    #[test]
    fn default_generator_does_not_repeat() {
        let ids: HashSet<String> = (0..5_000).map(|_| uuid_v4()).collect();
        assert_eq!(ids.len(), 5_000);
    }

    #[test]
    #[should_panic(expected = "invalid header value")]
    fn invalid_generated_ids_panic() {
        let handler = CorrelationId::new(echo_id).generator(|| "line\nbreak".to_owned());
        let _ = handler.call(Request::builder().build());
    }
}
