//! Incoming request type.
//!
//! A [`Request`] is split into a cloneable [`RequestHead`] and the body.
//! Interceptors that need to look at the request after it was handed to the
//! next handler keep a clone of the head. The observer also leaves a
//! `ServedHead` in the extensions so it sees the head as the innermost
//! handler received it, with every header the layers in between added.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Extensions, Method, Uri, Version};
use http_body_util::BodyExt;
use hyper::body::Body;

use crate::error::{BoxError, Error};

/// Method, URI, version, headers and transport peer of a request.
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    /// Transport-level peer as `host:port`, empty when unknown.
    pub remote_addr: String,
}

impl RequestHead {
    /// Case-insensitive header lookup. Values that are not visible ASCII read
    /// as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn path(&self) -> &str { self.uri.path() }
    pub fn referer(&self) -> &str { self.header("referer").unwrap_or_default() }
    pub fn user_agent(&self) -> &str { self.header("user-agent").unwrap_or_default() }

    /// Protocol version as written on the wire, e.g. `HTTP/1.1`.
    pub fn proto(&self) -> String {
        format!("{:?}", self.version)
    }
}

impl Default for RequestHead {
    fn default() -> Self {
        Self {
            method: Method::GET,
            uri: Uri::from_static("/"),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            remote_addr: String::new(),
        }
    }
}

/// Slot filled with the head the innermost handler was called with.
#[derive(Clone, Debug, Default)]
pub(crate) struct ServedHead(Arc<OnceLock<RequestHead>>);

impl ServedHead {
    /// The first fill wins; later ones are ignored.
    pub(crate) fn fill(&self, head: &RequestHead) {
        if self.0.get().is_none() {
            let _ = self.0.set(head.clone());
        }
    }

    pub(crate) fn get(&self) -> Option<&RequestHead> {
        self.0.get()
    }
}

/// An incoming HTTP request.
#[derive(Debug, Default)]
pub struct Request {
    head: RequestHead,
    body: Bytes,
    extensions: Extensions,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder { head: RequestHead::default(), body: Bytes::new() }
    }

    pub fn from_parts(head: RequestHead, body: Bytes) -> Self {
        Self { head, body, extensions: Extensions::new() }
    }

    /// Reads a hyper/http request to the end, recording `remote_addr` as the
    /// transport peer.
    pub async fn from_http<B>(req: http::Request<B>, remote_addr: &str) -> Result<Self, Error>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| Error::Body(e.into()))?
            .to_bytes();
        let head = RequestHead {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            remote_addr: remote_addr.to_owned(),
        };
        Ok(Self { head, body, extensions: parts.extensions })
    }

    pub fn head(&self) -> &RequestHead { &self.head }
    pub fn method(&self) -> &Method { &self.head.method }
    pub fn uri(&self) -> &Uri { &self.head.uri }
    pub fn path(&self) -> &str { self.head.path() }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.head.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> &str { &self.head.remote_addr }
    pub fn extensions(&self) -> &Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }

    /// Replaces every value of `name` with `value`.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        self.head.headers.insert(name, value);
        Ok(())
    }
}

/// Fluent builder for [`Request`], for hosts that do not come from hyper and
/// for tests. Defaults to `GET /` over HTTP/1.1 with no peer.
pub struct RequestBuilder {
    head: RequestHead,
    body: Bytes,
}

impl RequestBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.head.method = method;
        self
    }

    /// # Panics
    ///
    /// Panics if `uri` is not a valid request target.
    pub fn uri(mut self, uri: &str) -> Self {
        self.head.uri = uri
            .parse()
            .unwrap_or_else(|e| panic!("invalid uri `{uri}`: {e}"));
        self
    }

    /// Appends a header.
    ///
    /// # Panics
    ///
    /// Panics if `name` or `value` is not a valid header name or value.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let name = HeaderName::try_from(name)
            .unwrap_or_else(|e| panic!("invalid header name `{name}`: {e}"));
        let value = HeaderValue::try_from(value)
            .unwrap_or_else(|e| panic!("invalid value for header `{name}`: {e}"));
        self.head.headers.append(name, value);
        self
    }

    pub fn remote_addr(mut self, addr: &str) -> Self {
        self.head.remote_addr = addr.to_owned();
        self
    }

    pub fn body(self, body: impl Into<Bytes>) -> Request {
        Request::from_parts(self.head, body.into())
    }

    pub fn build(self) -> Request {
        Request::from_parts(self.head, Bytes::new())
    }
}
