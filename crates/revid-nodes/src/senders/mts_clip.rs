// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Segments encoded MPEG-TS packets into PAT-aligned clips and forwards
//! each one, in order, through a pool buffer to a [`ClipTransport`].

use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use revid_core::discontinuity::DiscontinuityRepairer;
use revid_core::mts::{PacketView, PACKET_SIZE};
use revid_core::pool::{NextError, PoolBuffer, WriteOutcome};
use revid_core::{Chunk, RevidError, Sender};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::transport::ClipTransport;

const WORKER_NEXT_TIMEOUT: Duration = Duration::from_secs(1);

struct Accumulator {
    buf: BytesMut,
    clip_started_at: Instant,
}

/// Segments a stream of 188-byte MTS packets into clips that each begin
/// with a PAT packet and span at least `clip_duration`, then forwards
/// completed clips through a pool buffer to a background worker that
/// writes them to `transport` and repairs continuity across send failures.
pub struct MtsClipSender {
    name: &'static str,
    clip_duration: Duration,
    accumulator: StdMutex<Accumulator>,
    pool: PoolBuffer,
    worker: StdMutex<Option<JoinHandle<()>>>,
    errors: mpsc::Sender<RevidError>,
}

impl MtsClipSender {
    #[must_use]
    pub fn new(
        name: &'static str,
        clip_duration: Duration,
        pool_capacity_bytes: u64,
        pool_start_element_size: u64,
        pool_write_timeout: Duration,
        errors: mpsc::Sender<RevidError>,
    ) -> Self {
        let pool = PoolBuffer::new(pool_capacity_bytes as usize, pool_start_element_size as usize, pool_write_timeout);
        Self {
            name,
            clip_duration,
            accumulator: StdMutex::new(Accumulator { buf: BytesMut::new(), clip_started_at: Instant::now() }),
            pool,
            worker: StdMutex::new(None),
            errors,
        }
    }

    /// Spawns the background worker that drains the pool into `transport`.
    /// Must be called once, immediately after construction, with the sender
    /// held behind an `Arc` so the worker can keep calling `next` on its
    /// pool after the constructor returns.
    pub fn spawn(self: &std::sync::Arc<Self>, transport: Box<dyn ClipTransport>) {
        let this = std::sync::Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_worker(transport).await });
        *self.worker.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    async fn run_worker(&self, mut transport: Box<dyn ClipTransport>) {
        let mut repairer = DiscontinuityRepairer::new();
        loop {
            match self.pool.next(WORKER_NEXT_TIMEOUT).await {
                Ok(mut clip) => {
                    let mut owned = clip.to_vec();
                    repairer.repair(&mut owned);
                    clip = Bytes::from(owned);
                    if let Err(err) = transport.send(&clip).await {
                        repairer.fail();
                        let _ = self
                            .errors
                            .send(RevidError::Runtime(format!(
                                "{}: clip transport write failed, next clip will carry a discontinuity: {err}",
                                self.name
                            )))
                            .await;
                    }
                },
                Err(NextError::Timeout) => continue,
                Err(NextError::Eof) => break,
            }
        }
        transport.close().await;
    }

    fn is_pat(packet: &[u8]) -> bool {
        PacketView::new(packet).is_pat()
    }
}

#[async_trait]
impl Sender for MtsClipSender {
    async fn write(&self, chunk: Chunk) -> Result<(), RevidError> {
        if chunk.len() < PACKET_SIZE {
            return Err(RevidError::Runtime(format!(
                "MTSClipSender requires whole packets of at least {PACKET_SIZE} bytes, got {}",
                chunk.len()
            )));
        }

        let clip_to_flush = {
            let mut acc = self.accumulator.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let is_pat = Self::is_pat(&chunk[..PACKET_SIZE]);
            let elapsed = acc.clip_started_at.elapsed();
            let ready = !acc.buf.is_empty() && is_pat && elapsed >= self.clip_duration;

            let flushed = if ready {
                let clip = acc.buf.split().freeze();
                acc.clip_started_at = Instant::now();
                Some(clip)
            } else {
                None
            };
            acc.buf.extend_from_slice(&chunk);
            flushed
        };

        if let Some(clip) = clip_to_flush {
            match self.pool.write(clip).await {
                Ok(WriteOutcome::Written | WriteOutcome::Dropped) => self.pool.flush(),
                Ok(WriteOutcome::TooLong) => {
                    let _ = self
                        .errors
                        .send(RevidError::ResourceExhausted(format!(
                            "{}: clip exceeded pool element size, dropped",
                            self.name
                        )))
                        .await;
                },
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    async fn close(&self) {
        // Flush whatever remains buffered as one final clip before closing.
        let remainder = {
            let mut acc = self.accumulator.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if acc.buf.is_empty() { None } else { Some(acc.buf.split().freeze()) }
        };
        if let Some(clip) = remainder {
            let _ = self.pool.write(clip).await;
            self.pool.flush();
        }

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
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    fn error_sender() -> mpsc::Sender<RevidError> {
        mpsc::channel(16).0
    }

    fn packet(pid: u16, cc: u8) -> Bytes {
        let mut p = vec![0u8; PACKET_SIZE];
        p[0] = 0x47;
        p[1] = ((pid >> 8) as u8) & 0x1F;
        p[2] = (pid & 0xFF) as u8;
        p[3] = 0x10 | (cc & 0x0F);
        Bytes::from(p)
    }

    struct RecordingTransport {
        clips: Arc<AsyncMutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl ClipTransport for RecordingTransport {
        async fn send(&mut self, clip: &[u8]) -> Result<(), RevidError> {
            self.clips.lock().await.push(clip.to_vec());
            Ok(())
        }

        async fn close(&mut self) {}

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test]
    async fn flushes_a_clip_once_duration_elapses_and_pat_arrives() {
        let clips = Arc::new(AsyncMutex::new(Vec::new()));
        let sender = Arc::new(MtsClipSender::new(
            "mts_test",
            Duration::from_millis(0),
            10_000,
            2000,
            Duration::from_secs(1),
            error_sender(),
        ));
        let transport_for_worker = Box::new(RecordingTransport { clips: Arc::clone(&clips) });
        sender.spawn(transport_for_worker);

        sender.write(packet(0, 0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        sender.write(packet(256, 0)).await.unwrap();
        sender.write(packet(0, 1)).await.unwrap(); // second PAT flushes the first clip
        sender.close().await;

        let recorded = clips.lock().await;
        assert!(!recorded.is_empty(), "expected at least one clip to have been flushed");
        assert_eq!(&recorded[0][..4], &packet(0, 0)[..4]);
    }

    #[tokio::test]
    async fn rejects_writes_shorter_than_one_packet() {
        let sender = Arc::new(MtsClipSender::new(
            "mts_test",
            Duration::from_secs(10),
            10_000,
            2000,
            Duration::from_secs(1),
            error_sender(),
        ));
        let err = sender.write(Bytes::from_static(b"short")).await.unwrap_err();
        assert!(matches!(err, RevidError::Runtime(_)));
    }

    #[tokio::test]
    async fn segments_a_hundred_access_units_at_a_psi_cadence_of_ten() {
        use revid_codec::mts::{extract_video_payload, MtsEncoder};
        use revid_core::mts::StreamType;

        let clips = Arc::new(AsyncMutex::new(Vec::new()));
        let sender = Arc::new(MtsClipSender::new(
            "mts_e1",
            Duration::from_secs(0),
            1_000_000,
            4_000,
            Duration::from_secs(1),
            error_sender(),
        ));
        sender.spawn(Box::new(RecordingTransport { clips: Arc::clone(&clips) }));

        let mut encoder = MtsEncoder::new(StreamType::H264, 10);
        for byte in 0u8..100 {
            let unit = encoder.encode_unit(&[byte]);
            sender.write(Bytes::from(unit)).await.unwrap();
        }
        sender.close().await;

        let recorded = clips.lock().await;
        // 100 access units at one PAT/PMT pair per 10 units makes for 10
        // complete PSI cycles; each carries its own PAT+PMT plus the 10
        // access units that followed it.
        assert_eq!(recorded.len(), 10);

        let mut payload = Vec::new();
        for clip in recorded.iter() {
            assert_eq!(clip.len(), 12 * PACKET_SIZE);
            assert!(MtsClipSender::is_pat(&clip[..PACKET_SIZE]), "every clip must start with a PAT packet");
            payload.extend_from_slice(&extract_video_payload(clip));
        }
        let expected: Vec<u8> = (0u8..100).collect();
        assert_eq!(payload, expected, "access unit bytes must come out in write order");
    }
}
