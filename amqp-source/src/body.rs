//! Event payloads
//!
//! Streamed payloads are wrapped in a [`BodyReader`]; declared-type binary
//! bodies travel as one materialized buffer.

use bytes::Bytes;
use futures::Stream;
use std::io::{self, Read};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Sequential byte source over a single buffer
///
/// Reads advance an offset and return `Ok(0)` once everything has been
/// handed out. As a [`Stream`] it yields the unread remainder as one chunk.
#[derive(Debug, Clone)]
pub struct BodyReader {
    data: Bytes,
    offset: usize,
}

impl BodyReader {
    /// Reader positioned at the start of `data`
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            offset: 0,
        }
    }

    /// Total length of the underlying buffer
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.remaining().min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

impl Stream for BodyReader {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.remaining() == 0 {
            return Poll::Ready(None);
        }
        let chunk = self.data.slice(self.offset..);
        self.offset = self.data.len();
        Poll::Ready(Some(Ok(chunk)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let chunks = usize::from(self.remaining() > 0);
        (chunks, Some(chunks))
    }
}

/// Payload handed to the sink alongside the envelope
#[derive(Debug, Clone)]
pub enum Payload {
    /// Attached to the request as a streaming body
    Streamed(BodyReader),
    /// Attached as-is
    Materialized(Bytes),
}

impl Payload {
    /// Whether this payload is streamed
    pub fn is_streamed(&self) -> bool {
        matches!(self, Payload::Streamed(_))
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Streamed(reader) => reader.len(),
            Payload::Materialized(bytes) => bytes.len(),
        }
    }

    /// Whether the payload carries no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain into a single buffer
    pub fn into_bytes(self) -> Bytes {
        match self {
            Payload::Streamed(reader) => reader.data.slice(reader.offset..),
            Payload::Materialized(bytes) => bytes,
        }
    }
}
