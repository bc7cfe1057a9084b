//! Panic recovery.
//!
//! [`Recovery`] wraps a handler so that a panic while serving one request is
//! contained to that request: the unwind is caught, a [`PanicReport`] with the
//! stack at the panic site is built, and the configured callback decides the
//! response.
//!
//! ```rust
//! use http::StatusCode;
//! use keel::middleware::{PanicReport, Recovery};
//! use keel::{Request, RequestHead, Response};
//!
//! async fn app(_req: Request) -> Response {
//!     panic!("I died")
//! }
//!
//! let handler = Recovery::new(app).on_recovered(|_head: &RequestHead, report: PanicReport| {
//!     eprintln!("{} [{}]\n{}", report.payload, report.incident_id, report.trace);
//!     Response::status(StatusCode::INTERNAL_SERVER_ERROR)
//! });
//! ```
//!
//! The callback itself runs outside the protected region: a panic there
//! propagates to whoever awaits this layer.

use std::any::Any;
use std::fmt;
use std::future::poll_fn;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::debug;

use super::diagnostic::{self, DiagnosticTrace, Scope};
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, erased_handler};
use crate::request::{Request, RequestHead};
use crate::response::Response;

/// The value a handler panicked with.
pub enum PanicPayload {
    /// `panic!("...")` with or without format arguments.
    Message(String),
    /// Anything else, e.g. from [`std::panic::panic_any`].
    Other(Box<dyn Any + Send>),
}

impl PanicPayload {
    fn from_box(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<&'static str>() {
            Ok(message) => return Self::Message((*message).to_owned()),
            Err(payload) => payload,
        };
        match payload.downcast::<String>() {
            Ok(message) => Self::Message(*message),
            Err(payload) => Self::Other(payload),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Message(message) => Some(message),
            Self::Other(_) => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Message(message) => (message as &dyn Any).downcast_ref(),
            Self::Other(value) => value.downcast_ref(),
        }
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(message) => f.write_str(message),
            Self::Other(_) => f.write_str("<non-string panic payload>"),
        }
    }
}

impl fmt::Debug for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Other(_) => f.debug_tuple("Other").finish_non_exhaustive(),
        }
    }
}

/// Everything known about one recovered panic. Handed to the callback by
/// value and dropped when it returns.
#[derive(Debug)]
pub struct PanicReport {
    pub payload: PanicPayload,
    /// Stack at the panic site, innermost frame first.
    pub trace: DiagnosticTrace,
    /// `file:line:column` of the `panic!`, when known.
    pub location: Option<String>,
    /// 14 random hex characters identifying this incident.
    pub incident_id: String,
}

type RecoverFn = dyn Fn(&RequestHead, PanicReport) -> Response + Send + Sync;

/// Catches panics from the wrapped handler. See the [module docs](self).
#[derive(Clone)]
pub struct Recovery {
    inner: BoxedHandler,
    on_recovered: Option<Arc<RecoverFn>>,
}

impl Recovery {
    pub fn new(inner: impl Handler) -> Self {
        diagnostic::install_hook();
        Self { inner: inner.into_boxed_handler(), on_recovered: None }
    }

    /// Sets the reporting callback. Its response becomes the response of the
    /// failed request. Without one, a recovered request gets
    /// [`Response::empty`].
    pub fn on_recovered<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestHead, PanicReport) -> Response + Send + Sync + 'static,
    {
        self.on_recovered = Some(Arc::new(f));
        self
    }
}

impl ErasedHandler for Recovery {
    fn call(&self, req: Request) -> BoxFuture {
        let head = self.on_recovered.as_ref().map(|_| req.head().clone());
        let on_recovered = self.on_recovered.clone();
        let inner = Arc::clone(&self.inner);

        // The inner call happens on first poll so a handler that panics while
        // building its future is covered too.
        let mut served = Box::pin(async move { inner.call(req).await });
        let guarded = poll_fn(move |cx| {
            let _scope = Scope::enter();
            served.as_mut().poll(cx)
        });

        Box::pin(async move {
            let payload = match AssertUnwindSafe(guarded).catch_unwind().await {
                Ok(response) => return response,
                Err(payload) => PanicPayload::from_box(payload),
            };
            let captured = diagnostic::take();
            let report = PanicReport {
                payload,
                trace: captured.trace,
                location: captured.location,
                incident_id: incident_id(),
            };
            debug!(incident = %report.incident_id, frames = report.trace.len(), "recovered panic");

            match (on_recovered, head) {
                (Some(on_recovered), Some(head)) => on_recovered(&head, report),
                _ => Response::empty(),
            }
        })
    }
}

erased_handler!(Recovery);

/// Seven random bytes, hex encoded, from the thread-local CSPRNG.
fn incident_id() -> String {
    hex::encode(rand::random::<[u8; 7]>())
}
