//! Ready-made callbacks that report through `tracing`.
//!
//! ```rust
//! use keel::middleware::{CorrelationId, Observer, Recovery, logging};
//! use keel::{Request, Response};
//!
//! async fn app(_req: Request) -> Response { Response::text("ok") }
//!
//! let handler = Observer::new(CorrelationId::new(
//!     Recovery::new(app).on_recovered(logging::on_recovered),
//! ))
//! .on_start(logging::on_start)
//! .on_end(logging::on_end);
//! ```
//!
//! [`on_start`] also attaches a request-scoped [`Span`] to the request's
//! extensions. Handlers log inside it to get the correlation id on every line:
//!
//! ```rust
//! # use keel::{Request, Response};
//! # use keel::middleware::logging;
//! async fn handler(req: Request) -> Response {
//!     let span = logging::request_span(&req);
//!     let _guard = span.enter();
//!     tracing::info!("handling");
//!     Response::text("ok")
//! }
//! ```

use chrono::{DateTime, Utc};
use http::StatusCode;
use tracing::{Span, error, field, info, info_span};

use super::correlation::REQUEST_ID_HEADER;
use super::observer::RequestMetadata;
use super::recovery::PanicReport;
use crate::request::{Request, RequestHead};
use crate::response::Response;

/// `strftime` layout of the timestamp fields. Timestamps are always UTC.
pub const ISO8601_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Start callback for [`Observer`](super::Observer): opens the request span.
pub fn on_start(req: &mut Request, _metadata: &RequestMetadata) {
    let span = info_span!(
        "request",
        request_id = field::Empty,
        method = %req.method(),
        path = %req.path(),
    );
    if let Some(id) = req.head().header(REQUEST_ID_HEADER.as_str()) {
        span.record("request_id", id);
    }
    req.extensions_mut().insert(span);
}

/// End callback for [`Observer`](super::Observer): one `info` event per
/// request, message `"<METHOD> <URI>"`.
pub fn on_end(head: &RequestHead, _res: &Response, metadata: &RequestMetadata) {
    let end = metadata.end_timestamp.unwrap_or(metadata.start_timestamp);
    let status = metadata.status.map_or(0, |s| s.as_u16());
    info!(
        start_timestamp = %iso8601(metadata.start_timestamp),
        end_timestamp = %iso8601(end),
        runtime = ?metadata.elapsed,
        remote_addr = %metadata.remote_addr,
        status,
        proto = %head.proto(),
        referer = head.referer(),
        user_agent = head.user_agent(),
        method = %head.method,
        request_id = head.header(REQUEST_ID_HEADER.as_str()),
        "{} {}",
        head.method,
        head.uri,
    );
}

/// Recovery callback for [`Recovery`](super::Recovery): one `error` event
/// with the payload, incident id and trace, answered with an empty
/// `500 Internal Server Error`.
pub fn on_recovered(head: &RequestHead, report: PanicReport) -> Response {
    error!(
        panic = %report.payload,
        incident = %report.incident_id,
        location = report.location.as_deref(),
        method = %head.method,
        path = %head.path(),
        request_id = head.header(REQUEST_ID_HEADER.as_str()),
        "panic while serving request\n{}",
        report.trace,
    );
    Response::status(StatusCode::INTERNAL_SERVER_ERROR)
}

fn iso8601(t: DateTime<Utc>) -> String {
    t.format(ISO8601_FORMAT).to_string()
}

/// The span [`on_start`] attached, or a disabled one.
pub fn request_span(req: &Request) -> Span {
    req.extensions().get::<Span>().cloned().unwrap_or_else(Span::none)
}
