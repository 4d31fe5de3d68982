//! Response streaming back to the client.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers from the upstream response
//! - Re-announce trailers in a `Trailer` header
//! - Choose a flush policy and stream the body under it
//! - Log bodies that fail mid-stream (nothing else can be sent by then)
//!
//! # Design Decisions
//! - Immediate flush for unknown-length, chunked or event-stream responses;
//!   otherwise data is coalesced into a 32 KiB copy buffer
//! - Buffered data is flushed before a trailers frame
//! - The body is owned by the relay and dropped exactly once

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRAILER, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Response};
use bytes::{Bytes, BytesMut};
use http_body::{Body as HttpBody, Frame, SizeHint};

use crate::error::ErrorKind;
use crate::http::request::{has_token, remove_hop_by_hop};

/// Size of the relay copy buffer.
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// How response data is handed to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Forward every frame as soon as it is read.
    Immediate,
    /// Coalesce data up to the copy buffer size.
    Buffered,
}

/// Flush policy for an upstream response, from its headers as received.
pub fn flush_policy(headers: &HeaderMap) -> FlushPolicy {
    let unknown_length = !headers.contains_key(CONTENT_LENGTH);
    let event_stream = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/event-stream"));
    let chunked = has_token(headers, &TRANSFER_ENCODING, "chunked");

    if unknown_length || event_stream || chunked {
        FlushPolicy::Immediate
    } else {
        FlushPolicy::Buffered
    }
}

/// Trailer names announced by the upstream.
pub fn announced_trailers(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(TRAILER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|t| HeaderName::from_bytes(t.trim().as_bytes()).ok())
        .collect()
}

/// Rewrite an upstream response for the client.
pub fn relay_response(res: Response<Body>, upstream: &str) -> Response<Body> {
    let (mut parts, body) = res.into_parts();

    let policy = flush_policy(&parts.headers);
    let trailers = announced_trailers(&parts.headers);
    remove_hop_by_hop(&mut parts.headers);

    if !trailers.is_empty() {
        let names: Vec<&str> = trailers.iter().map(HeaderName::as_str).collect();
        if let Ok(value) = HeaderValue::from_str(&names.join(", ")) {
            parts.headers.insert(TRAILER, value);
        }
    }

    let body = RelayBody::new(body, policy, upstream);
    Response::from_parts(parts, Body::new(body))
}

/// Upstream body streamed under a flush policy.
#[derive(Debug)]
pub struct RelayBody {
    inner: Body,
    policy: FlushPolicy,
    buffer: BytesMut,
    pending: Option<Frame<Bytes>>,
    upstream: String,
}

impl RelayBody {
    pub fn new(inner: Body, policy: FlushPolicy, upstream: impl Into<String>) -> Self {
        let capacity = match policy {
            FlushPolicy::Buffered => COPY_BUFFER_SIZE,
            FlushPolicy::Immediate => 0,
        };
        Self {
            inner,
            policy,
            buffer: BytesMut::with_capacity(capacity),
            pending: None,
            upstream: upstream.into(),
        }
    }

    fn flush(&mut self) -> Frame<Bytes> {
        Frame::data(self.buffer.split().freeze())
    }
}

impl HttpBody for RelayBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;

        if let Some(frame) = this.pending.take() {
            return Poll::Ready(Some(Ok(frame)));
        }

        loop {
            let frame = match Pin::new(&mut this.inner).poll_frame(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    if this.buffer.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Ok(this.flush())));
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::warn!(
                        upstream = %this.upstream,
                        kind = ErrorKind::ProxyNoRecovery.as_str(),
                        error = %e,
                        "Response body aborted"
                    );
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Some(Ok(frame))) => frame,
            };

            if this.policy == FlushPolicy::Immediate {
                return Poll::Ready(Some(Ok(frame)));
            }

            match frame.into_data() {
                Ok(data) => {
                    this.buffer.extend_from_slice(&data);
                    if this.buffer.len() >= COPY_BUFFER_SIZE {
                        return Poll::Ready(Some(Ok(this.flush())));
                    }
                }
                Err(trailers) => {
                    if this.buffer.is_empty() {
                        return Poll::Ready(Some(Ok(trailers)));
                    }
                    this.pending = Some(trailers);
                    return Poll::Ready(Some(Ok(this.flush())));
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.pending.is_none() && self.buffer.is_empty() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        let buffered = self.buffer.len() as u64;
        let inner = self.inner.size_hint();
        let mut hint = SizeHint::new();
        hint.set_lower(inner.lower() + buffered);
        if let Some(upper) = inner.upper() {
            hint.set_upper(upper + buffered);
        }
        hint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use http_body_util::{BodyExt, StreamBody};

    type Frames = Vec<Result<Frame<Bytes>, std::io::Error>>;

    fn body(frames: Frames) -> Body {
        Body::new(StreamBody::new(stream::iter(frames)))
    }

    fn data(s: &str) -> Result<Frame<Bytes>, std::io::Error> {
        Ok(Frame::data(Bytes::copy_from_slice(s.as_bytes())))
    }

    fn trailers(name: &'static str, value: &'static str) -> Result<Frame<Bytes>, std::io::Error> {
        let mut map = HeaderMap::new();
        map.insert(name, HeaderValue::from_static(value));
        Ok(Frame::trailers(map))
    }

    async fn frames(mut body: RelayBody) -> Vec<Frame<Bytes>> {
        let mut out = Vec::new();
        while let Some(frame) = body.frame().await {
            out.push(frame.unwrap());
        }
        out
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_flush_policy() {
        assert_eq!(flush_policy(&headers(&[])), FlushPolicy::Immediate);
        assert_eq!(
            flush_policy(&headers(&[("content-length", "10")])),
            FlushPolicy::Buffered
        );
        assert_eq!(
            flush_policy(&headers(&[
                ("content-length", "10"),
                ("content-type", "text/event-stream; charset=utf-8")
            ])),
            FlushPolicy::Immediate
        );
        assert_eq!(
            flush_policy(&headers(&[
                ("content-length", "10"),
                ("transfer-encoding", "gzip, chunked")
            ])),
            FlushPolicy::Immediate
        );
    }

    #[tokio::test]
    async fn test_buffered_coalesces_data() {
        let relay = RelayBody::new(
            body(vec![data("ab"), data("cd"), data("ef")]),
            FlushPolicy::Buffered,
            "http://a",
        );
        let out = frames(relay).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data_ref().unwrap().as_ref(), b"abcdef");
    }

    #[tokio::test]
    async fn test_buffered_flushes_at_buffer_size() {
        let chunk = "x".repeat(20 * 1024);
        let relay = RelayBody::new(
            body(vec![data(&chunk), data(&chunk), data(&chunk)]),
            FlushPolicy::Buffered,
            "http://a",
        );
        let sizes: Vec<_> = frames(relay)
            .await
            .iter()
            .map(|f| f.data_ref().unwrap().len())
            .collect();
        assert_eq!(sizes, [40 * 1024, 20 * 1024]);
    }

    #[tokio::test]
    async fn test_immediate_passes_frames_through() {
        let relay = RelayBody::new(
            body(vec![data("ab"), data("cd")]),
            FlushPolicy::Immediate,
            "http://a",
        );
        assert_eq!(frames(relay).await.len(), 2);
    }

    #[tokio::test]
    async fn test_data_flushed_before_trailers() {
        let relay = RelayBody::new(
            body(vec![data("ab"), trailers("x-checksum", "abc")]),
            FlushPolicy::Buffered,
            "http://a",
        );
        let out = frames(relay).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].data_ref().unwrap().as_ref(), b"ab");
        assert_eq!(out[1].trailers_ref().unwrap()["x-checksum"], "abc");
    }

    #[tokio::test]
    async fn test_body_error_surfaces() {
        let mut relay = RelayBody::new(
            body(vec![data("ab"), Err(std::io::Error::other("reset"))]),
            FlushPolicy::Immediate,
            "http://a",
        );
        assert!(relay.frame().await.unwrap().is_ok());
        assert!(relay.frame().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_relay_response_headers() {
        let res = Response::builder()
            .header("connection", "close, x-hop")
            .header("x-hop", "1")
            .header("keep-alive", "timeout=5")
            .header("transfer-encoding", "chunked")
            .header("trailer", "x-checksum, x-count")
            .header("x-kept", "1")
            .body(body(vec![data("hi"), trailers("x-checksum", "abc")]))
            .unwrap();

        let res = relay_response(res, "http://a");
        let h = res.headers();
        assert!(!h.contains_key("connection"));
        assert!(!h.contains_key("x-hop"));
        assert!(!h.contains_key("keep-alive"));
        assert!(!h.contains_key("transfer-encoding"));
        assert_eq!(h["trailer"], "x-checksum, x-count");
        assert_eq!(h["x-kept"], "1");

        let collected = res.into_body().collect().await.unwrap();
        assert_eq!(collected.trailers().unwrap()["x-checksum"], "abc");
        assert_eq!(collected.to_bytes().as_ref(), b"hi");
    }
}
