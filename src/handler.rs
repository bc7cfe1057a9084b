//! Handler trait and type erasure.
//!
//! # How handlers and interceptors nest
//!
//! An interceptor has to hold "whatever comes next" without knowing whether
//! that is an application `async fn` or another interceptor. Every handler is
//! therefore erased to the same trait object (`dyn ErasedHandler`) and held
//! behind an `Arc`:
//!
//! ```text
//! async fn hello(req: Request) -> Response { … }     ← user writes this
//!        ↓ Recovery::new(hello)
//! hello.into_boxed_handler()                         ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                         ← stored as BoxedHandler
//!        ↓ Observer::new(recovery)
//! Arc::new(recovery)                                 ← interceptors erase the same way
//!        ↓
//! handler.call(req)  at request time                 ← one vtable dispatch per layer
//! ```
//!
//! The per-request cost of a layer is one virtual call and one boxed future.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::{Request, ServedHead};
use crate::response::{IntoResponse, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future that resolves to a [`Response`].
///
/// `Send + 'static` let the host runtime move the future across threads.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid handler.
///
/// You never implement this yourself. It is satisfied by:
///
/// - any `async fn name(req: Request) -> impl IntoResponse`, and
/// - every interceptor in [`middleware`](crate::middleware), so interceptors
///   wrap each other in any order.
///
/// The trait is **sealed** (via the crate-private `Sealed` supertrait).
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

pub(crate) mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Erases an interceptor type: implements the sealing trait and [`Handler`]
/// for a type that already implements [`ErasedHandler`].
macro_rules! erased_handler {
    ($ty:ty) => {
        impl $crate::handler::private::Sealed for $ty {}

        impl $crate::handler::Handler for $ty {
            fn into_boxed_handler(self) -> $crate::handler::BoxedHandler {
                ::std::sync::Arc::new(self)
            }
        }
    };
}

pub(crate) use erased_handler;

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`ErasedHandler`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        if let Some(served) = req.extensions().get::<ServedHead>() {
            served.fill(req.head());
        }
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
