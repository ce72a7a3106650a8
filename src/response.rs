//! Buffered response sink.
//!
//! Handlers never talk to the socket. They write into a [`ResponseWriter`]
//! owned by the request [`Context`](crate::Context), and the dispatcher turns
//! whatever is buffered into a single `http::Response` once the handler
//! returns. That is what lets an error envelope replace a half-written body.

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use serde::Serialize;
use tracing::debug;

use crate::error::Error;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for [`ResponseWriter::content_type`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
        }
    }
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// The outbound half of a request.
///
/// Mirrors the usual status-then-body discipline: the first
/// [`write_header`](Self::write_header) fixes the status and later calls are
/// ignored; [`write`](Self::write) appends to the body and implies `200 OK`
/// when no status was set yet.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_header(&mut self, status: StatusCode) {
        match self.status {
            None => self.status = Some(status),
            Some(prev) => debug!(%prev, ignored = %status, "superfluous write_header"),
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.body.extend_from_slice(bytes);
    }

    pub fn content_type(&mut self, content_type: ContentType) {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Status that will be sent. `200 OK` if nothing was written yet.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serializes `value` as the JSON body with `status`.
    ///
    /// Encoding happens before anything is written, so a failed encode leaves
    /// the writer untouched.
    pub fn json<T: Serialize + ?Sized>(&mut self, status: StatusCode, value: &T) -> Result<(), Error> {
        let bytes = serde_json::to_vec(value)?;
        self.content_type(ContentType::Json);
        self.write_header(status);
        self.write(&bytes);
        Ok(())
    }

    /// Drops everything buffered so far.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body.freeze()));
        *res.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *res.headers_mut() = self.headers;
        res
    }
}
