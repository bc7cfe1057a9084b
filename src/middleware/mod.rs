//! Interceptors.
//!
//! Each interceptor wraps a [`Handler`](crate::Handler), does its one job on
//! the way in and/or out, and awaits the handler inline on the same task:
//!
//! - [`Recovery`]: contains panics and reports them with a stack trace.
//! - [`CorrelationId`]: guarantees an `x-request-id` header.
//! - [`Observer`]: times requests and reports status and client address.
//!
//! They know nothing of each other and nest in any order. The usual stack,
//! outermost first:
//!
//! ```text
//! Observer → CorrelationId → Recovery → application
//! ```
//!
//! With `Recovery` innermost, panicking requests are still timed and logged
//! with their correlation id. [`logging`] has callbacks that report through
//! `tracing`.

mod correlation;
mod diagnostic;
mod observer;
mod recovery;

pub mod logging;

pub use correlation::{CorrelationId, REQUEST_ID_HEADER};
pub use diagnostic::{DiagnosticFrame, DiagnosticTrace};
pub use observer::{Observer, RequestMetadata, X_FORWARDED_FOR, remote_addr};
pub use recovery::{PanicPayload, PanicReport, Recovery};
