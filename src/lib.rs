//! # keel
//!
//! Request interceptors for Rust services: contain panics, stamp correlation
//! ids, observe timing and status. Nothing more.
//!
//! ## The contract
//!
//! The host owns the listener, routing and business logic. keel owns what
//! happens *around* a handler:
//!
//! - [`Recovery`](middleware::Recovery): a panic in one request is caught,
//!   reported with a stack trace, and answered by your callback.
//! - [`CorrelationId`](middleware::CorrelationId): every request carries an
//!   `x-request-id`, generated when the client sent none.
//! - [`Observer`](middleware::Observer): start/end callbacks with timestamps,
//!   elapsed time, client address and final status.
//!
//! Interceptors only observe and report. None retries, times out or changes
//! control flow, except `Recovery` swallowing a panic.
//!
//! ## Quick start
//!
//! ```rust
//! use keel::middleware::{CorrelationId, Observer, Recovery, logging};
//! use keel::{Pipeline, Request, Response};
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.header("x-request-id").unwrap_or_default();
//!     Response::json(format!(r#"{{"request":"{id}"}}"#).into_bytes())
//! }
//!
//! let app = Pipeline::new(
//!     Observer::new(CorrelationId::new(
//!         Recovery::new(get_user).on_recovered(logging::on_recovered),
//!     ))
//!     .on_start(logging::on_start)
//!     .on_end(logging::on_end),
//! );
//! // per accepted connection: app.clone().into_service(peer_addr)
//! ```

mod error;
mod handler;
mod pipeline;
mod request;
mod response;

pub mod middleware;

pub use error::{BoxError, Error};
pub use handler::Handler;
pub use pipeline::Pipeline;
pub use request::{Request, RequestBuilder, RequestHead};
pub use response::{IntoResponse, Response, ResponseBuilder};
