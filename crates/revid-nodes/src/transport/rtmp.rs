// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! RTMP clip transport: dials an RTMP URL and republishes already-encoded
//! FLV tags (produced upstream by [`revid_codec::flv::FlvEncoder`]) as
//! video/audio data on a published stream.
//!
//! The handshake/session bookkeeping here follows the same shape as other
//! RTMP *client* publishers built on `rml_rtmp`: a `Handshake` exchange
//! followed by a `ClientSession` request/response dance
//! (`request_connection` → `request_publishing` → `publish_metadata` →
//! steady-state `publish_video_data`/`publish_audio_data`), with the actual
//! socket I/O split into a background task so the publish calls never block
//! on the read side.

use async_trait::async_trait;
use bytes::Bytes;
use revid_codec::flv;
use revid_core::RevidError;
use rml_rtmp::chunk_io::Packet;
use rml_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use rml_rtmp::sessions::{
    ClientSession, ClientSessionConfig, ClientSessionError, ClientSessionEvent,
    ClientSessionResult, PublishRequestType,
};
use rml_rtmp::time::RtmpTimestamp;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::ClipTransport;

const AUDIO_TAG_TYPE: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disconnected,
    Connecting,
    Connected,
    PublishingMetadata,
    Publishing,
}

struct StreamKey {
    app: String,
    key: String,
}

pub struct RtmpTransport {
    url: String,
    max_tries: u32,
    state: State,
    session: Option<ClientSession>,
    out_tx: Option<UnboundedSender<ClientSessionResult>>,
    in_rx: Option<UnboundedReceiver<Vec<u8>>>,
    io_task: Option<JoinHandle<()>>,
}

impl RtmpTransport {
    #[must_use]
    pub fn new(url: impl Into<String>, max_tries: u32) -> Self {
        Self {
            url: url.into(),
            max_tries: max_tries.max(1),
            state: State::Disconnected,
            session: None,
            out_tx: None,
            in_rx: None,
            io_task: None,
        }
    }

    fn stream_key(&self) -> Result<StreamKey, RevidError> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| RevidError::Configuration(format!("invalid RTMP URL {}: {e}", self.url)))?;
        let mut segments = url
            .path_segments()
            .ok_or_else(|| RevidError::Configuration(format!("RTMP URL missing path: {}", self.url)))?;
        let key = segments
            .next_back()
            .ok_or_else(|| RevidError::Configuration("RTMP URL missing stream key".to_string()))?
            .to_string();
        let app = segments
            .next_back()
            .ok_or_else(|| RevidError::Configuration("RTMP URL missing application name".to_string()))?
            .to_string();
        Ok(StreamKey { app, key })
    }

    /// Dials the socket and runs the handshake, logging between tries and
    /// giving up after `max_tries` attempts.
    async fn dial_with_retries(&mut self) -> Result<(), RevidError> {
        let mut last_err = None;
        for attempt in 1..=self.max_tries {
            match self.dial_once().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, max_tries = self.max_tries, error = %e, "RTMP connect attempt failed");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                },
            }
        }
        Err(last_err.unwrap_or_else(|| RevidError::Network("RTMP connect exhausted retries".to_string())))
    }

    async fn dial_once(&mut self) -> Result<(), RevidError> {
        let cfg = ClientSessionConfig::new();
        let (session, _initial) = ClientSession::new(cfg)
            .map_err(|e| RevidError::Network(format!("failed to start RTMP session: {e}")))?;

        let host = url::Url::parse(&self.url)
            .map_err(|e| RevidError::Configuration(format!("invalid RTMP URL: {e}")))?;
        let addr = format!("{}:{}", host.host_str().unwrap_or("localhost"), host.port().unwrap_or(1935));

        let mut socket = TcpStream::connect(&addr)
            .await
            .map_err(|e| RevidError::Network(format!("RTMP connect to {addr} failed: {e}")))?;

        let mut handshake = Handshake::new(PeerType::Client);
        let p0_p1 = handshake
            .generate_outbound_p0_and_p1()
            .map_err(|e| RevidError::Network(format!("RTMP handshake init failed: {e}")))?;
        socket.write_all(&p0_p1).await.map_err(RevidError::Io)?;

        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.map_err(RevidError::Io)?;
            if n == 0 {
                return Err(RevidError::Network("RTMP peer closed during handshake".to_string()));
            }
            match handshake
                .process_bytes(&buf[..n])
                .map_err(|e| RevidError::Network(format!("RTMP handshake failed: {e}")))?
            {
                HandshakeProcessResult::InProgress { response_bytes } => {
                    socket.write_all(&response_bytes).await.map_err(RevidError::Io)?;
                },
                HandshakeProcessResult::Completed { response_bytes, remaining_bytes } => {
                    socket.write_all(&response_bytes).await.map_err(RevidError::Io)?;
                    let (out_tx, in_rx, io_task) = Self::spawn_socket_io(socket);
                    self.session = Some(session);
                    self.out_tx = Some(out_tx);
                    self.in_rx = Some(in_rx);
                    self.io_task = Some(io_task);
                    self.state = State::Connecting;
                    if !remaining_bytes.is_empty() {
                        self.feed_input(&remaining_bytes)?;
                    }
                    return Ok(());
                },
            }
        }
    }

    fn spawn_socket_io(
        socket: TcpStream,
    ) -> (UnboundedSender<ClientSessionResult>, UnboundedReceiver<Vec<u8>>, JoinHandle<()>) {
        let (in_tx, in_rx) = unbounded_channel();
        let (out_tx, mut out_rx) = unbounded_channel::<ClientSessionResult>();

        let task = tokio::spawn(async move {
            let (mut read_half, mut write_half) = socket.into_split();
            let mut buf = [0u8; 4096];
            loop {
                tokio::select! {
                    read = read_half.read(&mut buf) => {
                        match read {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if in_tx.send(buf[..n].to_vec()).is_err() {
                                    break;
                                }
                            },
                        }
                    },
                    Some(result) = out_rx.recv() => {
                        if let ClientSessionResult::OutboundResponse(Packet { bytes, .. }) = result {
                            if write_half.write_all(&bytes).await.is_err() {
                                break;
                            }
                        }
                    },
                    else => break,
                }
            }
        });

        (out_tx, in_rx, task)
    }

    fn feed_input(&mut self, data: &[u8]) -> Result<(), RevidError> {
        let session = self.session.as_mut().ok_or_else(|| RevidError::Network("RTMP session not connected".to_string()))?;
        let results = session
            .handle_input(data)
            .map_err(|e| RevidError::Network(format!("RTMP input handling failed: {e}")))?;
        for result in results {
            self.handle_session_result(Ok(result))?;
        }
        Ok(())
    }

    fn handle_session_result(
        &mut self,
        result: Result<ClientSessionResult, ClientSessionError>,
    ) -> Result<(), RevidError> {
        match result {
            Ok(ClientSessionResult::RaisedEvent(event)) => {
                match event {
                    ClientSessionEvent::ConnectionRequestAccepted => self.state = State::Connected,
                    ClientSessionEvent::ConnectionRequestRejected { description } => {
                        return Err(RevidError::Network(format!("RTMP connection rejected: {description}")));
                    },
                    ClientSessionEvent::PublishRequestAccepted => self.state = State::PublishingMetadata,
                    _ => {},
                }
                Ok(())
            },
            Ok(data) => {
                let tx = self.out_tx.as_ref().ok_or_else(|| {
                    RevidError::Network("RTMP outbound channel missing".to_string())
                })?;
                tx.send(data)
                    .map_err(|_| RevidError::Network("RTMP outbound channel closed".to_string()))
            },
            Err(e) => Err(RevidError::Network(format!("RTMP session error: {e}"))),
        }
    }

    fn drain_input(&mut self) -> Result<(), RevidError> {
        let Some(rx) = self.in_rx.as_mut() else { return Ok(()) };
        let mut pending = Vec::new();
        while let Ok(data) = rx.try_recv() {
            pending.push(data);
        }
        for data in pending {
            self.feed_input(&data)?;
        }
        Ok(())
    }

    /// Drives the connect → publish handshake to completion, polling the
    /// read side for responses. Bounded so a peer that never responds
    /// cannot hang the sender's worker forever.
    async fn ensure_publishing(&mut self) -> Result<(), RevidError> {
        if self.state == State::Disconnected {
            self.dial_with_retries().await?;
        }

        for _ in 0..200 {
            self.drain_input()?;
            match self.state {
                State::Connecting => {
                    let key = self.stream_key()?;
                    let session = self.session.as_mut().ok_or_else(|| {
                        RevidError::Network("RTMP session not connected".to_string())
                    })?;
                    let data = session
                        .request_connection(key.app)
                        .map_err(|e| RevidError::Network(format!("RTMP connect request failed: {e}")))?;
                    self.handle_session_result(Ok(data))?;
                },
                State::Connected => {
                    let key = self.stream_key()?;
                    let session = self.session.as_mut().ok_or_else(|| {
                        RevidError::Network("RTMP session not connected".to_string())
                    })?;
                    let data = session
                        .request_publishing(key.key, PublishRequestType::Live)
                        .map_err(|e| RevidError::Network(format!("RTMP publish request failed: {e}")))?;
                    self.handle_session_result(Ok(data))?;
                },
                State::PublishingMetadata => {
                    let session = self.session.as_mut().ok_or_else(|| {
                        RevidError::Network("RTMP session not connected".to_string())
                    })?;
                    let metadata = rml_rtmp::sessions::StreamMetadata::new();
                    let data = session
                        .publish_metadata(&metadata)
                        .map_err(|e| RevidError::Network(format!("RTMP metadata publish failed: {e}")))?;
                    self.handle_session_result(Ok(data))?;
                    self.state = State::Publishing;
                    return Ok(());
                },
                State::Publishing => return Ok(()),
                State::Disconnected => return Err(RevidError::Network("RTMP session dropped mid-handshake".to_string())),
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Err(RevidError::Network("RTMP publish handshake did not complete in time".to_string()))
    }

    async fn restart(&mut self) {
        self.close().await;
        self.state = State::Disconnected;
    }
}

#[async_trait]
impl ClipTransport for RtmpTransport {
    async fn send(&mut self, clip: &[u8]) -> Result<(), RevidError> {
        if !flv::validate_tag(clip) {
            tracing::debug!("dropping invalid FLV tag");
            return Ok(());
        }

        if let Err(e) = self.ensure_publishing().await {
            self.restart().await;
            return Err(e);
        }

        let timestamp = RtmpTimestamp::new(flv::tag_timestamp_ms(clip));
        let payload = Bytes::copy_from_slice(clip);
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| RevidError::Network("RTMP session not connected".to_string()))?;

        let result = if flv::tag_type(clip) == AUDIO_TAG_TYPE {
            session.publish_audio_data(payload, timestamp, false)
        } else {
            session.publish_video_data(payload, timestamp, false)
        };

        match result {
            Ok(r) => self.handle_session_result(Ok(r)),
            Err(e) => {
                let err = RevidError::Network(format!("RTMP publish failed: {e}"));
                self.restart().await;
                Err(err)
            },
        }
    }

    async fn close(&mut self) {
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
        self.session = None;
        self.out_tx = None;
        self.in_rx = None;
        self.state = State::Disconnected;
    }

    fn name(&self) -> &'static str {
        "rtmp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_splits_app_and_key_from_url() {
        let transport = RtmpTransport::new("rtmp://example.com/live/streamkey123", 3);
        let key = transport.stream_key().unwrap();
        assert_eq!(key.app, "live");
        assert_eq!(key.key, "streamkey123");
    }

    #[test]
    fn stream_key_rejects_url_with_only_one_path_segment() {
        let transport = RtmpTransport::new("rtmp://example.com/live", 3);
        let err = transport.stream_key().unwrap_err();
        assert!(matches!(err, RevidError::Configuration(_)));
    }
}
