//! Tee-style body capture.
//!
//! [`TeeStream`] forwards every chunk unchanged and copies up to a fixed
//! number of bytes into a shared buffer. Bytes are only captured as the
//! consumer polls, so observation never blocks and never reads ahead.

use crate::domain::error::{ProxyError, UpstreamBody};
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Complete,
    Failed(String),
    /// Stream dropped before reaching its end
    Abandoned,
}

#[derive(Default)]
struct CaptureState {
    buf: BytesMut,
    seen: usize,
    truncated: bool,
    outcome: Option<Outcome>,
}

struct Shared {
    limit: usize,
    state: Mutex<CaptureState>,
    done: Notify,
}

impl Shared {
    fn record(&self, chunk: &[u8]) {
        let mut state = self.state.lock();
        state.seen += chunk.len();
        let room = self.limit.saturating_sub(state.buf.len());
        if chunk.len() > room {
            state.truncated = true;
        }
        let take = chunk.len().min(room);
        state.buf.extend_from_slice(&chunk[..take]);
    }

    fn finish(&self, outcome: Outcome) {
        {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return;
            }
            state.outcome = Some(outcome);
        }
        self.done.notify_waiters();
    }
}

pin_project! {
    /// Stream adapter that copies what flows through it.
    pub struct TeeStream<S> {
        #[pin]
        inner: S,
        shared: Arc<Shared>,
    }

    impl<S> PinnedDrop for TeeStream<S> {
        fn drop(this: Pin<&mut Self>) {
            this.shared.finish(Outcome::Abandoned);
        }
    }
}

impl<S> TeeStream<S> {
    pub fn new(inner: S, limit: usize) -> (Self, BodyCapture) {
        let shared = Arc::new(Shared {
            limit,
            state: Mutex::new(CaptureState::default()),
            done: Notify::new(),
        });
        let capture = BodyCapture {
            shared: Arc::clone(&shared),
        };
        (Self { inner, shared }, capture)
    }
}

impl<S, E> Stream for TeeStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(chunk)) => {
                this.shared.record(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                this.shared.finish(Outcome::Failed(e.to_string()));
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.shared.finish(Outcome::Complete);
                Poll::Ready(None)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Read side of a [`TeeStream`].
#[derive(Clone)]
pub struct BodyCapture {
    shared: Arc<Shared>,
}

impl BodyCapture {
    /// Captured bytes so far, lossily decoded as UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.shared.state.lock().buf).into_owned()
    }

    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.shared.state.lock().buf)
    }

    /// Total bytes that passed through, captured or not.
    pub fn bytes_seen(&self) -> usize {
        self.shared.state.lock().seen
    }

    pub fn truncated(&self) -> bool {
        self.shared.state.lock().truncated
    }

    /// The stream reached its end without error.
    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().outcome == Some(Outcome::Complete)
    }

    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    pub fn error(&self) -> Option<String> {
        match &self.shared.state.lock().outcome {
            Some(Outcome::Failed(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Resolves once the stream ends, fails or is dropped.
    pub async fn finished(&self) {
        loop {
            let notified = self.shared.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }
}

/// Wrap `body` so that up to `limit` bytes are observable while it streams.
pub fn capture(body: Body, limit: usize) -> (BodyCapture, Body) {
    let (tee, capture) = TeeStream::new(body.into_data_stream(), limit);
    (capture, Body::from_stream(tee))
}

/// Consume a body nobody else will read, returning its length.
pub async fn drain(body: Body) -> Result<usize, axum::Error> {
    let mut stream = std::pin::pin!(body.into_data_stream());
    let mut total = 0;
    while let Some(chunk) = stream.next().await {
        total += chunk?.len();
    }
    Ok(total)
}

/// Status, headers and body of one failed attempt.
#[derive(Debug)]
pub struct CapturedExchange {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

impl CapturedExchange {
    /// Read `response` through a tee until `limit` bytes are captured.
    ///
    /// Reading stops at the limit. The unread remainder stays attached to
    /// the exchange, and is either replayed to the client or dropped
    /// (closing the upstream stream) when the attempt is retried.
    pub async fn observe(response: Response, limit: usize) -> Self {
        let (parts, body) = response.into_parts();
        let (capture, tee) = capture(body, limit);
        let mut stream = Box::pin(tee.into_data_stream());
        let mut head = BytesMut::new();

        let rest = loop {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    head.extend_from_slice(&chunk);
                    if capture.truncated() {
                        break Some(Body::from_stream(stream));
                    }
                }
                Some(Err(e)) => {
                    debug!(status = %parts.status, error = %e, "Upstream body ended early");
                    break None;
                }
                None => break None,
            }
        };

        let body = match rest {
            Some(rest) => UpstreamBody::partial(capture.bytes(), head.freeze(), rest),
            None => UpstreamBody::complete(head.freeze()),
        };
        Self {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }

    pub fn truncated(&self) -> bool {
        self.body.is_partial()
    }

    /// Synthesised error whose message starts with the numeric status.
    pub fn into_error(self) -> ProxyError {
        ProxyError::UpstreamStatus {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}
