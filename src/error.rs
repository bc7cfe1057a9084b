//! Unified error type.

/// Boxed error used for foreign body errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by keel's fallible operations.
///
/// Handler-level failures (404, 500, etc.) are expressed as
/// [`Response`](crate::Response) values, not as `Error`s, and panics are the
/// business of [`Recovery`](crate::middleware::Recovery). This type surfaces
/// the adapter failures around them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request body could not be read from the transport.
    #[error("body: {0}")]
    Body(#[source] BoxError),

    #[error("invalid header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),
}
