// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! RTP/UDP clip transport: wraps a UDP socket with a minimal RTP
//! packetizer, pacing packets at the configured fps.
//!
//! The reference implementation treats the RTP encoder itself as an
//! external collaborator (§1); this module plays that role with a
//! deliberately small, standards-shaped packetizer (a 12-byte fixed RTP
//! header per datagram, one marker-bit-terminated datagram run per clip)
//! rather than a full jitter-buffered RTP stack, since nothing downstream
//! of this crate's test suite depacketizes it.

use async_trait::async_trait;
use revid_core::RevidError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;

use super::ClipTransport;

const RTP_VERSION: u8 = 2;
/// Dynamic payload type, per RFC 3551 §6 (96-127 reserved for
/// dynamically-assigned formats).
const PAYLOAD_TYPE_DYNAMIC: u8 = 96;
/// Maximum UDP payload this transport will emit per datagram; larger clips
/// are split across multiple RTP packets with the marker bit set only on
/// the last.
const MAX_RTP_PAYLOAD: usize = 1400;

pub struct RtpTransport {
    socket: UdpSocket,
    dest: SocketAddr,
    ssrc: u32,
    sequence: AtomicU16,
    timestamp: AtomicU32,
    /// Clock-rate ticks to advance the RTP timestamp by per clip, derived
    /// from the configured fps (90 kHz clock, the RTP video convention).
    timestamp_step: u32,
    frame_pace: Duration,
}

impl RtpTransport {
    /// Binds an ephemeral local UDP socket and resolves `dest` (`host:port`).
    ///
    /// # Errors
    /// Returns [`RevidError::Network`] if the address cannot be resolved or
    /// the socket cannot be bound.
    pub async fn connect(dest: &str, fps: u32) -> Result<Self, RevidError> {
        let addr: SocketAddr = tokio::net::lookup_host(dest)
            .await
            .map_err(|e| RevidError::Network(format!("cannot resolve RTP destination {dest}: {e}")))?
            .next()
            .ok_or_else(|| RevidError::Network(format!("no address found for {dest}")))?;

        let bind_addr = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| RevidError::Network(format!("cannot bind RTP socket: {e}")))?;

        let fps = fps.max(1);
        Ok(Self {
            socket,
            dest: addr,
            ssrc: Self::initial_ssrc(),
            sequence: AtomicU16::new(0),
            timestamp: AtomicU32::new(0),
            timestamp_step: 90_000 / fps,
            frame_pace: Duration::from_millis(1000 / u64::from(fps)),
        })
    }

    /// Process-wide varying seed so concurrent sessions in the same test
    /// binary don't collide on the same SSRC.
    fn initial_ssrc() -> u32 {
        static COUNTER: AtomicU32 = AtomicU32::new(0x5245_5649); // "REVI"
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    fn build_header(&self, marker: bool) -> [u8; 12] {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let ts = self.timestamp.load(Ordering::Relaxed);
        let mut header = [0u8; 12];
        header[0] = (RTP_VERSION << 6) & 0xC0;
        header[1] = (u8::from(marker) << 7) | (PAYLOAD_TYPE_DYNAMIC & 0x7F);
        header[2..4].copy_from_slice(&seq.to_be_bytes());
        header[4..8].copy_from_slice(&ts.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }
}

#[async_trait]
impl ClipTransport for RtpTransport {
    async fn send(&mut self, clip: &[u8]) -> Result<(), RevidError> {
        tokio::time::sleep(self.frame_pace).await;

        let mut datagram = Vec::with_capacity(12 + MAX_RTP_PAYLOAD);
        let chunks: Vec<&[u8]> =
            if clip.is_empty() { vec![&[][..]] } else { clip.chunks(MAX_RTP_PAYLOAD).collect() };
        let last = chunks.len().saturating_sub(1);
        for (i, payload) in chunks.into_iter().enumerate() {
            datagram.clear();
            datagram.extend_from_slice(&self.build_header(i == last));
            datagram.extend_from_slice(payload);
            self.socket
                .send_to(&datagram, self.dest)
                .await
                .map_err(|e| RevidError::Network(format!("RTP send failed: {e}")))?;
        }
        self.timestamp.fetch_add(self.timestamp_step, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&mut self) {}

    fn name(&self) -> &'static str {
        "rtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sends_a_well_formed_rtp_header() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut transport = RtpTransport::connect(&server_addr.to_string(), 25).await.unwrap();
        transport.send(b"frame-payload").await.unwrap();

        let mut buf = [0u8; 1500];
        let (n, _) = server.recv_from(&mut buf).await.unwrap();
        assert!(n > 12);
        assert_eq!((buf[0] >> 6) & 0x03, RTP_VERSION);
        assert_eq!(buf[1] & 0x80, 0x80, "single-datagram clip must set the marker bit");
        assert_eq!(&buf[12..n], b"frame-payload");
    }

    #[tokio::test]
    async fn sequence_number_advances_per_datagram() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let mut transport = RtpTransport::connect(&server_addr.to_string(), 25).await.unwrap();

        transport.send(b"one").await.unwrap();
        transport.send(b"two").await.unwrap();

        let mut buf = [0u8; 1500];
        let (n1, _) = server.recv_from(&mut buf).await.unwrap();
        let seq1 = u16::from_be_bytes([buf[2], buf[3]]);
        let _ = n1;
        let (n2, _) = server.recv_from(&mut buf).await.unwrap();
        let seq2 = u16::from_be_bytes([buf[2], buf[3]]);
        let _ = n2;
        assert_eq!(seq2, seq1.wrapping_add(1));
    }
}
