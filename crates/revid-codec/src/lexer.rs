// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Lexers split a raw input byte stream (or a stream of already-framed
//! packets) into whole access units.
//!
//! Every lexer is pull-based: the capture task calls [`Lexer::next_unit`]
//! in a loop and hands each returned [`Chunk`] to the filter chain. `Ok(None)`
//! means clean end of stream; `Err` is a framing error the capture task logs
//! before retrying or shutting down, per the lex/framing-error taxonomy
//! entry.

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use revid_core::{Chunk, RevidError};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::scan;

/// H.264/H.265 bytestream start code (matches both the 3- and 4-byte forms,
/// since the 4-byte form `00 00 00 01` always contains this 3-byte suffix).
pub const H26X_START_CODE: &[u8] = &[0x00, 0x00, 0x01];

/// JPEG Start-Of-Image marker; frames run from one SOI to the next.
pub const JPEG_SOI: &[u8] = &[0xFF, 0xD8];

/// A stage that produces whole access units, pulled one at a time by the
/// capture task.
#[async_trait]
pub trait Lexer: Send {
    /// Returns the next access unit, or `Ok(None)` on clean EOF.
    async fn next_unit(&mut self) -> Result<Option<Chunk>, RevidError>;
}

/// Delimiter-based lexer for H.264/H.265 bytestreams and MJPEG: splits the
/// source on a fixed marker, retaining the marker as the prefix of the unit
/// it introduces (the H.264 bytestream convention).
pub struct DelimiterLexer<R> {
    src: R,
    delim: &'static [u8],
    buf: BytesMut,
    read_chunk: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin + Send> DelimiterLexer<R> {
    #[must_use]
    pub fn new(src: R, delim: &'static [u8]) -> Self {
        Self { src, delim, buf: BytesMut::with_capacity(4096), read_chunk: 4096, eof: false }
    }

    async fn fill(&mut self) -> std::io::Result<usize> {
        let start = self.buf.len();
        self.buf.resize(start + self.read_chunk, 0);
        let n = self.src.read(&mut self.buf[start..]).await?;
        self.buf.truncate(start + n);
        Ok(n)
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> Lexer for DelimiterLexer<R> {
    async fn next_unit(&mut self) -> Result<Option<Chunk>, RevidError> {
        loop {
            if let Some(first) = scan::find_from(&self.buf, self.delim, 0) {
                if first > 0 {
                    // Junk preceding the first marker: drop it and rescan.
                    self.buf.advance(first);
                    continue;
                }
                if let Some(second) = scan::find_from(&self.buf, self.delim, self.delim.len()) {
                    let unit = self.buf.split_to(second);
                    return Ok(Some(unit.freeze()));
                }
            }

            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let rest = self.buf.split_to(self.buf.len());
                return Ok(Some(rest.freeze()));
            }

            match self.fill().await {
                Ok(0) => self.eof = true,
                Ok(_) => {},
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => self.eof = true,
                Err(e) => {
                    tracing::warn!(error = %e, "lexer read error, retrying");
                },
            }
        }
    }
}

/// Fixed-rate byte lexer for audio (PCM/ADPCM): copies exactly `chunk_size`
/// bytes per tick of `period`. A zero `period` disables rate limiting
/// (reads proceed back-to-back).
pub struct ByteRateLexer<R> {
    src: R,
    chunk_size: usize,
    period: Duration,
}

impl<R: AsyncRead + Unpin + Send> ByteRateLexer<R> {
    /// # Errors
    /// Returns [`RevidError::Configuration`] if `chunk_size` is zero.
    pub fn new(src: R, chunk_size: usize, period: Duration) -> Result<Self, RevidError> {
        if chunk_size == 0 {
            return Err(RevidError::Configuration(
                "byte lexer chunk size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { src, chunk_size, period })
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> Lexer for ByteRateLexer<R> {
    async fn next_unit(&mut self) -> Result<Option<Chunk>, RevidError> {
        if self.period > Duration::ZERO {
            tokio::time::sleep(self.period).await;
        }

        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            match self.src.read(&mut buf[filled..]).await {
                Ok(0) => {
                    return if filled == 0 {
                        Ok(None)
                    } else {
                        buf.truncate(filled);
                        Ok(Some(Chunk::from(buf)))
                    };
                },
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return if filled == 0 {
                        Ok(None)
                    } else {
                        buf.truncate(filled);
                        Ok(Some(Chunk::from(buf)))
                    };
                },
                Err(e) => {
                    tracing::warn!(error = %e, "byte lexer read error, retrying");
                },
            }
        }
        Ok(Some(Chunk::from(buf)))
    }
}

/// Pass-through lexer for inputs that already deliver discrete access units
/// (H.264 access units from RTSP, manual input).
pub struct NoopLexer {
    rx: mpsc::Receiver<Chunk>,
}

impl NoopLexer {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Chunk>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl Lexer for NoopLexer {
    async fn next_unit(&mut self) -> Result<Option<Chunk>, RevidError> {
        Ok(self.rx.recv().await)
    }
}

/// Pass-through lexer with a bounded ring and a proportional-controlled
/// drain delay, for bursty inputs (MPEG-TS-over-HTTP) that deliver many
/// frames at once rather than at a steady pace.
pub struct NoopQueueLexer {
    rx: mpsc::Receiver<Chunk>,
    queue: VecDeque<Chunk>,
    ring_cap: usize,
    element_cap: usize,
    target_len: i64,
    delay_us: i64,
}

impl NoopQueueLexer {
    const DEFAULT_RING_CAP: usize = 1000;
    const DEFAULT_ELEMENT_CAP: usize = 250 * 1024;
    const DEFAULT_TARGET_LEN: i64 = 500;
    const DEFAULT_DELAY_US: i64 = 40_000;
    const GAIN: f64 = 0.05;
    const MIN_DELAY_US: i64 = 1;
    const MAX_DELAY_US: i64 = 1_000_000;

    #[must_use]
    pub fn new(rx: mpsc::Receiver<Chunk>) -> Self {
        Self {
            rx,
            queue: VecDeque::new(),
            ring_cap: Self::DEFAULT_RING_CAP,
            element_cap: Self::DEFAULT_ELEMENT_CAP,
            target_len: Self::DEFAULT_TARGET_LEN,
            delay_us: Self::DEFAULT_DELAY_US,
        }
    }

    fn enqueue(&mut self, frame: Chunk) {
        if frame.len() > self.element_cap {
            tracing::warn!(len = frame.len(), cap = self.element_cap, "dropping oversized frame");
            return;
        }
        if self.queue.len() >= self.ring_cap {
            self.queue.pop_front();
        }
        self.queue.push_back(frame);
    }

    fn update_delay(&mut self) {
        #[allow(clippy::cast_possible_wrap)]
        let queue_len = self.queue.len() as i64;
        let error = self.target_len - queue_len;
        #[allow(clippy::cast_possible_truncation)]
        let delta = (Self::GAIN * error as f64).round() as i64;
        self.delay_us = (self.delay_us + delta).clamp(Self::MIN_DELAY_US, Self::MAX_DELAY_US);
    }

    /// Current drain delay, for diagnostics/tests.
    #[must_use]
    pub fn delay(&self) -> Duration {
        #[allow(clippy::cast_sign_loss)]
        Duration::from_micros(self.delay_us as u64)
    }
}

#[async_trait]
impl Lexer for NoopQueueLexer {
    async fn next_unit(&mut self) -> Result<Option<Chunk>, RevidError> {
        while let Ok(frame) = self.rx.try_recv() {
            self.enqueue(frame);
        }
        if self.queue.is_empty() {
            match self.rx.recv().await {
                Some(frame) => self.enqueue(frame),
                None => return Ok(None),
            }
        }
        self.update_delay();
        tokio::time::sleep(self.delay()).await;
        Ok(self.queue.pop_front())
    }
}
