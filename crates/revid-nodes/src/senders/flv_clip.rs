// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Forwards already-encoded FLV tags through a pool buffer to an RTMP
//! transport, treating a malformed tag as a non-fatal skip rather than a
//! connection-tearing error.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use revid_codec::flv::validate_tag;
use revid_core::pool::{NextError, PoolBuffer, WriteOutcome};
use revid_core::{Chunk, RevidError, Sender};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::transport::ClipTransport;

const WORKER_NEXT_TIMEOUT: Duration = Duration::from_secs(1);

/// Pool-buffers FLV tags and hands them, in order, to an RTMP transport.
pub struct FlvClipSender {
    name: &'static str,
    pool: PoolBuffer,
    worker: StdMutex<Option<JoinHandle<()>>>,
    errors: mpsc::Sender<RevidError>,
}

impl FlvClipSender {
    #[must_use]
    pub fn new(
        name: &'static str,
        pool_capacity_bytes: u64,
        pool_start_element_size: u64,
        pool_write_timeout: Duration,
        errors: mpsc::Sender<RevidError>,
    ) -> Self {
        Self {
            name,
            pool: PoolBuffer::new(pool_capacity_bytes as usize, pool_start_element_size as usize, pool_write_timeout),
            worker: StdMutex::new(None),
            errors,
        }
    }

    /// Spawns the background worker that drains the pool into `transport`.
    /// Must be called once, immediately after construction, with the sender
    /// held behind an `Arc`.
    pub fn spawn(self: &std::sync::Arc<Self>, transport: Box<dyn ClipTransport>) {
        let this = std::sync::Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_worker(transport).await });
        *self.worker.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    async fn run_worker(&self, mut transport: Box<dyn ClipTransport>) {
        loop {
            match self.pool.next(WORKER_NEXT_TIMEOUT).await {
                Ok(tag) => {
                    if !validate_tag(&tag) {
                        let _ = self
                            .errors
                            .send(RevidError::Runtime(format!("{}: skipping malformed FLV tag", self.name)))
                            .await;
                        continue;
                    }
                    if let Err(err) = transport.send(&tag).await {
                        let _ = self
                            .errors
                            .send(RevidError::Runtime(format!("{}: FLV transport write failed: {err}", self.name)))
                            .await;
                    }
                },
                Err(NextError::Timeout) => continue,
                Err(NextError::Eof) => break,
            }
        }
        transport.close().await;
    }
}

#[async_trait]
impl Sender for FlvClipSender {
    async fn write(&self, chunk: Chunk) -> Result<(), RevidError> {
        match self.pool.write(chunk).await {
            Ok(WriteOutcome::Written | WriteOutcome::Dropped) => {
                self.pool.flush();
                Ok(())
            },
            Ok(WriteOutcome::TooLong) => {
                let _ = self
                    .errors
                    .send(RevidError::ResourceExhausted(format!(
                        "{}: FLV tag exceeded pool element size, dropped",
                        self.name
                    )))
                    .await;
                Ok(())
            },
            Err(err) => Err(err),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
        let handle = self.worker.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use revid_codec::flv::{FlvCodecId, FlvEncoder};
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    fn error_sender() -> mpsc::Sender<RevidError> {
        mpsc::channel(16).0
    }

    struct RecordingTransport {
        tags: Arc<AsyncMutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl ClipTransport for RecordingTransport {
        async fn send(&mut self, clip: &[u8]) -> Result<(), RevidError> {
            self.tags.lock().await.push(clip.to_vec());
            Ok(())
        }

        async fn close(&mut self) {}

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test]
    async fn forwards_valid_tags_to_the_transport() {
        let tags = Arc::new(AsyncMutex::new(Vec::new()));
        let sender =
            Arc::new(FlvClipSender::new("flv_test", 10_000, 2000, Duration::from_secs(1), error_sender()));
        sender.spawn(Box::new(RecordingTransport { tags: Arc::clone(&tags) }));

        let mut encoder = FlvEncoder::new(FlvCodecId::Avc, 25);
        let tag = encoder.encode_frame(&[0xAA; 16], true);
        sender.write(Bytes::from(tag)).await.unwrap();
        sender.close().await;

        assert_eq!(tags.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn skips_malformed_tags_without_erroring() {
        let tags = Arc::new(AsyncMutex::new(Vec::new()));
        let sender =
            Arc::new(FlvClipSender::new("flv_test", 10_000, 2000, Duration::from_secs(1), error_sender()));
        sender.spawn(Box::new(RecordingTransport { tags: Arc::clone(&tags) }));

        sender.write(Bytes::from_static(b"not a tag")).await.unwrap();
        sender.close().await;

        assert!(tags.lock().await.is_empty());
    }
}
