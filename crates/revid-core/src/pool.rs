// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The bounded pool buffer that decouples a producer (capture/lex/encode
//! chain) from a sender's background worker.
//!
//! This is deliberately not a plain `tokio::mpsc` channel: a sender must be
//! able to absorb a slow or stalled downstream transport without ever
//! blocking the capture routine indefinitely, and without growing memory
//! without bound. [`PoolBuffer`] gives both knobs at once:
//!
//! - a bounded **blocking** write with a timeout (backpressure), and
//! - **drop-oldest** behavior once that timeout expires (loss instead of
//!   unbounded growth).
//!
//! Element size is not fixed for the crate's lifetime: a write larger than
//! the current element size triggers a resize (§3 of the design doc this
//! crate implements), discarding whatever was previously buffered. This
//! mirrors the bucketed, `Mutex`-guarded pool pattern used elsewhere for
//! buffer reuse, extended with the blocking/timeout/drop-oldest protocol the
//! pipeline needs on its hot path.

use crate::types::Chunk;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// Outcome of a successful [`PoolBuffer::write`] call.
///
/// All three variants represent "the call returned cleanly" — even
/// [`WriteOutcome::TooLong`] and [`WriteOutcome::Dropped`] are non-fatal and
/// expected under backpressure; only a closed buffer is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The chunk was copied into a free slot.
    Written,
    /// The chunk exceeded the current element size. The buffer was rebuilt
    /// with `2 * len` element size and the oversized chunk itself was
    /// dropped; the caller should retry with the next chunk.
    TooLong,
    /// The ring was full and `write_timeout` elapsed; the oldest buffered
    /// chunk was dropped to make room for this one.
    Dropped,
}

/// Why [`PoolBuffer::next`] did not return a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextError {
    /// No chunk became available before the requested timeout elapsed.
    Timeout,
    /// The buffer is closed and fully drained; no further chunks will
    /// arrive.
    Eof,
}

struct PoolInner {
    element_size: usize,
    num_slots: usize,
    capacity_bytes: usize,
    ring: std::collections::VecDeque<Chunk>,
    closed: bool,
}

impl PoolInner {
    fn slots_for(capacity_bytes: usize, element_size: usize) -> usize {
        (capacity_bytes / element_size.max(1)).max(1)
    }
}

/// A bounded ring of byte chunks with drop-oldest overflow and growable
/// element size.
///
/// Cloning is cheap (`Arc`-backed internally is not needed: the type is
/// shared via `&PoolBuffer`/`Arc<PoolBuffer>` at the call site, matching how
/// senders share their pool between the write-side caller and their
/// background worker).
pub struct PoolBuffer {
    inner: Mutex<PoolInner>,
    /// Signalled whenever a chunk becomes available to read.
    readable: Notify,
    /// Signalled whenever a slot frees up (read or resize) or the buffer
    /// is closed or flushed.
    writable: Notify,
    write_timeout: Duration,
}

impl PoolBuffer {
    /// Creates a new pool buffer.
    ///
    /// `capacity_bytes` is the overall byte budget (`PoolCapacity`);
    /// `start_element_size` is the initial per-slot size (`PoolStartElementSize`).
    /// The initial slot count is `capacity_bytes / start_element_size` (at
    /// least one slot, per the `0 < N` invariant).
    #[must_use]
    pub fn new(capacity_bytes: usize, start_element_size: usize, write_timeout: Duration) -> Self {
        let element_size = start_element_size.max(1);
        let num_slots = PoolInner::slots_for(capacity_bytes, element_size);
        Self {
            inner: Mutex::new(PoolInner {
                element_size,
                num_slots,
                capacity_bytes,
                ring: std::collections::VecDeque::with_capacity(num_slots),
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
            write_timeout,
        }
    }

    /// Writes a chunk into the pool.
    ///
    /// Returns `Ok(WriteOutcome::TooLong)` (without writing) if the data
    /// exceeds the current element size; the pool is rebuilt with double the
    /// size for subsequent writes. Returns `Ok(WriteOutcome::Dropped)` if the
    /// ring was full and `write_timeout` elapsed, in which case the oldest
    /// buffered chunk was evicted. Returns `Err` only if the pool is closed.
    pub async fn write(&self, d: Chunk) -> Result<WriteOutcome, crate::error::RevidError> {
        let len = d.len();

        {
            let mut guard = self.inner.lock().await;
            if guard.closed {
                return Err(crate::error::RevidError::Runtime(
                    "write to closed pool buffer".to_string(),
                ));
            }
            if len > guard.element_size {
                let new_size = (len * 2).max(1);
                guard.element_size = new_size;
                guard.num_slots = PoolInner::slots_for(guard.capacity_bytes, new_size);
                guard.ring.clear();
                drop(guard);
                self.writable.notify_waiters();
                return Ok(WriteOutcome::TooLong);
            }
            if guard.ring.len() < guard.num_slots {
                guard.ring.push_back(d);
                drop(guard);
                self.readable.notify_one();
                return Ok(WriteOutcome::Written);
            }
        }

        // Ring is full: wait up to write_timeout for a slot to free, else
        // drop the oldest entry and install this one.
        if self.write_timeout > Duration::ZERO {
            let waited = tokio::time::timeout(self.write_timeout, self.writable.notified()).await;
            if waited.is_ok() {
                let mut guard = self.inner.lock().await;
                if !guard.closed && guard.ring.len() < guard.num_slots {
                    guard.ring.push_back(d);
                    drop(guard);
                    self.readable.notify_one();
                    return Ok(WriteOutcome::Written);
                }
            }
        }

        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(crate::error::RevidError::Runtime(
                "write to closed pool buffer".to_string(),
            ));
        }
        guard.ring.pop_front();
        guard.ring.push_back(d);
        drop(guard);
        self.readable.notify_one();
        Ok(WriteOutcome::Dropped)
    }

    /// Blocks until a chunk is available or `timeout` elapses.
    ///
    /// Returns `Err(NextError::Eof)` once the buffer is closed and drained;
    /// `Err(NextError::Timeout)` if no chunk arrived in time.
    pub async fn next(&self, timeout: Duration) -> Result<Chunk, NextError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut guard = self.inner.lock().await;
                if let Some(chunk) = guard.ring.pop_front() {
                    drop(guard);
                    self.writable.notify_waiters();
                    return Ok(chunk);
                }
                if guard.closed {
                    return Err(NextError::Eof);
                }
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(NextError::Timeout);
            }
            let remaining = deadline - now;
            if tokio::time::timeout(remaining, self.readable.notified()).await.is_err() {
                return Err(NextError::Timeout);
            }
        }
    }

    /// Wakes any consumer currently blocked in [`PoolBuffer::next`] without
    /// necessarily having written anything. Used by senders to ensure a
    /// just-flushed clip is picked up promptly.
    pub fn flush(&self) {
        self.readable.notify_waiters();
    }

    /// Prevents further writes. Readers continue to drain buffered chunks
    /// and then observe `Eof`. Idempotent.
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        guard.closed = true;
        drop(guard);
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Current element size in bytes (for diagnostics/tests).
    pub async fn element_size(&self) -> usize {
        self.inner.lock().await.element_size
    }

    /// Current number of buffered (unread) chunks.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.ring.len()
    }

    /// True if no chunks are currently buffered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunk(len: usize) -> Chunk {
        Bytes::from(vec![0u8; len])
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let pool = PoolBuffer::new(1000, 100, Duration::from_secs(1));
        let outcome = pool.write(chunk(50)).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
        let read = pool.next(Duration::from_millis(100)).await.unwrap();
        assert_eq!(read.len(), 50);
    }

    #[tokio::test]
    async fn drop_oldest_on_overflow_with_no_reader() {
        // N=2, S=100, effectively zero write timeout so the test doesn't wait.
        let pool = PoolBuffer::new(200, 100, Duration::from_micros(1));
        assert_eq!(pool.write(Bytes::from_static(b"a")).await.unwrap(), WriteOutcome::Written);
        assert_eq!(pool.write(Bytes::from_static(b"b")).await.unwrap(), WriteOutcome::Written);
        assert_eq!(pool.write(Bytes::from_static(b"c")).await.unwrap(), WriteOutcome::Dropped);

        let second = pool.next(Duration::from_secs(1)).await.unwrap();
        assert_eq!(second, Bytes::from_static(b"b"));
        let third = pool.next(Duration::from_secs(1)).await.unwrap();
        assert_eq!(third, Bytes::from_static(b"c"));
    }

    #[tokio::test]
    async fn oversized_write_grows_pool_and_drops_itself() {
        let pool = PoolBuffer::new(200, 100, Duration::from_secs(1));
        let outcome = pool.write(chunk(300)).await.unwrap();
        assert_eq!(outcome, WriteOutcome::TooLong);
        assert_eq!(pool.element_size().await, 600);

        let outcome = pool.write(chunk(150)).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
        let read = pool.next(Duration::from_millis(100)).await.unwrap();
        assert_eq!(read.len(), 150);
    }

    #[tokio::test]
    async fn next_times_out_when_empty() {
        let pool = PoolBuffer::new(200, 100, Duration::from_secs(1));
        let err = pool.next(Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, NextError::Timeout);
    }

    #[tokio::test]
    async fn next_returns_eof_once_closed_and_drained() {
        let pool = PoolBuffer::new(200, 100, Duration::from_secs(1));
        pool.write(chunk(10)).await.unwrap();
        pool.close().await;
        let first = pool.next(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.len(), 10);
        let err = pool.next(Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, NextError::Eof);
    }

    #[tokio::test]
    async fn write_after_close_errors() {
        let pool = PoolBuffer::new(200, 100, Duration::from_secs(1));
        pool.close().await;
        assert!(pool.write(chunk(10)).await.is_err());
    }
}
