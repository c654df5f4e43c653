//! The streaming engine: drives an adapter's chunk transformer across a
//! live upstream SSE body and emits the Claude event sequence downstream.
//!
//! The line parser is hand-rolled rather than an off-the-shelf SSE decoder
//! because the error policy requires forwarding the original bytes of any
//! chunk that fails to transform, and a decoder that consumes framing
//! cannot hand them back.

use std::{convert::Infallible, sync::Arc};

use bytes::Bytes;
use futures::{Stream, StreamExt, stream::BoxStream};

use crate::{
    messages::claude::StreamEvent,
    provider::{Provider, StreamState, shared::frame_event},
};

/// Wrap an upstream byte stream into the downstream Claude SSE stream.
///
/// One line is processed at a time and each event group is yielded as soon
/// as it is complete, so downstream backpressure stalls upstream reads
/// naturally. Dropping the returned stream (client disconnect) drops the
/// upstream body with it.
pub(crate) fn claude_sse_stream<S, E>(
    body: S,
    provider: Arc<dyn Provider>,
    state: StreamState,
) -> impl Stream<Item = Result<Bytes, Infallible>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let engine = Engine {
        body: body.boxed(),
        buffer: Vec::new(),
        provider,
        state,
        done: false,
    };

    futures::stream::unfold(engine, |mut engine| async move {
        loop {
            if engine.done {
                return None;
            }

            if let Some(line) = engine.next_line() {
                match engine.process_line(&line) {
                    Some(bytes) => return Some((Ok(bytes), engine)),
                    None => continue,
                }
            }

            match engine.body.next().await {
                Some(Ok(chunk)) => engine.buffer.extend_from_slice(&chunk),
                Some(Err(error)) => {
                    // No recovery mid-stream: close the downstream response.
                    log::error!("Upstream read error mid-stream: {error}");
                    engine.done = true;
                    return None;
                }
                None => {
                    engine.done = true;

                    if engine.buffer.is_empty() {
                        return None;
                    }

                    // Trailing bytes without a final newline still form a line.
                    let line = String::from_utf8_lossy(&engine.buffer).into_owned();
                    engine.buffer.clear();

                    return engine.process_line(&line).map(|bytes| (Ok(bytes), engine));
                }
            }
        }
    })
}

struct Engine<E> {
    body: BoxStream<'static, Result<Bytes, E>>,
    buffer: Vec<u8>,
    provider: Arc<dyn Provider>,
    state: StreamState,
    done: bool,
}

impl<E> Engine<E> {
    /// Pop the next complete line from the buffer, stripping the trailing
    /// `\n` / `\r\n`.
    fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|&byte| byte == b'\n')?;

        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn process_line(&mut self, line: &str) -> Option<Bytes> {
        if line.is_empty() {
            return Some(Bytes::from_static(b"\n"));
        }

        // Keepalive comments, e.g. OpenRouter's ": OPENROUTER PROCESSING".
        if line.starts_with(':') {
            return None;
        }

        let Some(payload) = data_payload(line) else {
            // `event:` lines from a native Anthropic upstream, and anything
            // else unrecognized, pass through untouched.
            return Some(Bytes::from(format!("{line}\n")));
        };

        if payload == "[DONE]" {
            self.done = true;

            let mut out = Vec::new();

            // The adapter emits message_stop on the finish chunk; cover for
            // upstreams that jump straight to [DONE].
            if self.state.message_start_sent && !self.state.message_stop_sent {
                out.extend_from_slice(&frame_event(&StreamEvent::MessageStop));
                self.state.message_stop_sent = true;
            }

            out.extend_from_slice(b"data: [DONE]\n\n");
            return Some(Bytes::from(out));
        }

        match self.provider.transform_chunk(payload, &mut self.state) {
            Ok(bytes) if bytes.is_empty() => None,
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(error) => {
                log::warn!("Failed to transform stream chunk, forwarding raw line: {error}");
                Some(Bytes::from(format!("{line}\n")))
            }
        }
    }
}

fn data_payload(line: &str) -> Option<&str> {
    let payload = line.strip_prefix("data:")?;
    Some(payload.strip_prefix(' ').unwrap_or(payload))
}
