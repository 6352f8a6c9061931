// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Builds the [`Lexer`] that feeds a session's capture loop, from a
//! [`SessionConfig`]'s `Input`/`InputCodec` pair.
//!
//! Three shapes of input exist:
//!
//! - **File**: reads a local bytestream, optionally looping at EOF and
//!   paced to `FileFPS`.
//! - **Process-backed** (`Raspivid`, `Raspistill`, `V4l`): spawns the
//!   capture binary as a child process and delimiter-lexes its stdout. The
//!   child is kept alive for the session's lifetime and killed on close.
//! - **Push-fed** (`Rtsp`, `Audio`, `Manual`): the actual RTSP
//!   depacketization or ALSA capture is an external collaborator outside
//!   this crate's scope; [`build`] instead returns a channel the caller
//!   feeds already-framed access units into, behind a [`NoopLexer`] (or
//!   [`NoopQueueLexer`] for the bursty RTSP-over-HTTP case).

use std::process::Stdio;
use std::time::Duration;

use revid_codec::lexer::{
    ByteRateLexer, DelimiterLexer, Lexer, NoopQueueLexer, H26X_START_CODE, JPEG_SOI,
};
use revid_core::config::SessionConfig;
use revid_core::types::{Input, InputCodec};
use revid_core::{Chunk, RevidError};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// A fully assembled input: the lexer the capture loop pulls from, the
/// child process to keep alive and kill on shutdown (if any), and the feed
/// handle external code pushes frames into (if any).
pub struct BuiltInput {
    pub lexer: Box<dyn Lexer>,
    pub child: Option<Child>,
    pub feed: Option<mpsc::Sender<Chunk>>,
}

/// Queue depth for push-fed inputs; generous enough that a momentary stall
/// in the capture loop doesn't back-pressure the external feeder.
const FEED_CHANNEL_CAPACITY: usize = 64;

pub async fn build(cfg: &SessionConfig) -> Result<BuiltInput, RevidError> {
    match cfg.input {
        Input::File => build_file(cfg).await,
        Input::Raspivid | Input::Raspistill | Input::V4l => build_process(cfg).await,
        Input::Rtsp | Input::Audio | Input::Manual => Ok(build_pushed(cfg)),
    }
}

async fn build_file(cfg: &SessionConfig) -> Result<BuiltInput, RevidError> {
    let path = cfg
        .input_path
        .as_ref()
        .ok_or_else(|| RevidError::Configuration("file input requires input_path".to_string()))?;
    let file = File::open(path).await.map_err(RevidError::Io)?;
    let reader: Box<dyn AsyncRead + Unpin + Send> =
        if cfg.input_loop { Box::new(LoopingReader::new(path.clone())) } else { Box::new(file) };

    let inner: Box<dyn Lexer> = match cfg.input_codec {
        InputCodec::H264 | InputCodec::H264Au => Box::new(DelimiterLexer::new(reader, H26X_START_CODE)),
        InputCodec::Mjpeg | InputCodec::Jpeg => Box::new(DelimiterLexer::new(reader, JPEG_SOI)),
        InputCodec::Pcm | InputCodec::Adpcm => {
            let bytes_per_period = audio_chunk_bytes(cfg);
            let period = Duration::from_millis(u64::from(cfg.audio.rec_period_ms));
            Box::new(ByteRateLexer::new(reader, bytes_per_period, period)?)
        },
        InputCodec::H265 => {
            return Err(RevidError::Configuration(
                "H.265 bytestream input requires RTSP-delivered access units".to_string(),
            ));
        },
    };

    let lexer: Box<dyn Lexer> =
        if cfg.file_fps > 0 { Box::new(PacedLexer::new(inner, cfg.file_fps)) } else { inner };

    Ok(BuiltInput { lexer, child: None, feed: None })
}

fn audio_chunk_bytes(cfg: &SessionConfig) -> usize {
    let bytes_per_sample = usize::from(cfg.audio.bit_depth.div_ceil(8).max(1));
    let samples_per_period =
        (cfg.audio.sample_rate as u64 * u64::from(cfg.audio.rec_period_ms) / 1000).max(1);
    (samples_per_period as usize) * bytes_per_sample * usize::from(cfg.audio.channels.max(1))
}

async fn build_process(cfg: &SessionConfig) -> Result<BuiltInput, RevidError> {
    let (program, args) = process_command(cfg);
    let mut child = Command::new(program)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(RevidError::Io)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RevidError::Runtime(format!("{program} produced no stdout pipe")))?;

    let inner: Box<dyn Lexer> = match cfg.input_codec {
        InputCodec::H264 | InputCodec::H264Au => Box::new(DelimiterLexer::new(stdout, H26X_START_CODE)),
        InputCodec::Mjpeg | InputCodec::Jpeg => Box::new(DelimiterLexer::new(stdout, JPEG_SOI)),
        _ => {
            return Err(RevidError::Configuration(format!(
                "{:?} input only supports H.264/MJPEG/JPEG codecs",
                cfg.input
            )));
        },
    };

    Ok(BuiltInput { lexer: inner, child: Some(child), feed: None })
}

/// Fixed, conventional invocations for the well-known capture binaries;
/// these are thin adapters, not full CLI surfaces — no attempt is made to
/// expose every raspivid/raspistill flag through `SessionConfig`.
fn process_command(cfg: &SessionConfig) -> (&'static str, Vec<String>) {
    match cfg.input {
        Input::Raspivid => {
            ("raspivid", vec!["-t".into(), "0".into(), "-fps".into(), cfg.frame_rate.to_string(), "-o".into(), "-".into()])
        },
        Input::Raspistill => ("raspistill", vec!["-t".into(), "0".into(), "-s".into(), "-o".into(), "-".into()]),
        Input::V4l => {
            let device = cfg.input_path.clone().unwrap_or_else(|| "/dev/video0".to_string());
            ("ffmpeg", vec![
                "-f".into(),
                "v4l2".into(),
                "-i".into(),
                device,
                "-f".into(),
                "h264".into(),
                "-".into(),
            ])
        },
        _ => unreachable!("process_command only called for process-backed inputs"),
    }
}

fn build_pushed(cfg: &SessionConfig) -> BuiltInput {
    let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
    let lexer: Box<dyn Lexer> = if cfg.input.is_rtsp() {
        Box::new(NoopQueueLexer::new(rx))
    } else {
        Box::new(revid_codec::lexer::NoopLexer::new(rx))
    };
    BuiltInput { lexer, child: None, feed: Some(tx) }
}

/// Reopens the underlying file from the start whenever a read hits EOF,
/// for `InputLoop`. The reader yields `Ok(0)` exactly once per lap while
/// the reopen is in flight (via the poll-based `AsyncRead` contract), then
/// resumes from byte zero.
struct LoopingReader {
    path: String,
    state: LoopState,
}

enum LoopState {
    Idle,
    Opening(std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<File>> + Send>>),
    Reading(File),
}

impl LoopingReader {
    fn new(path: String) -> Self {
        Self { path, state: LoopState::Idle }
    }
}

impl AsyncRead for LoopingReader {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                LoopState::Idle => {
                    let path = this.path.clone();
                    this.state = LoopState::Opening(Box::pin(async move { File::open(path).await }));
                },
                LoopState::Opening(fut) => match fut.as_mut().poll(cx) {
                    std::task::Poll::Ready(Ok(file)) => this.state = LoopState::Reading(file),
                    std::task::Poll::Ready(Err(e)) => return std::task::Poll::Ready(Err(e)),
                    std::task::Poll::Pending => return std::task::Poll::Pending,
                },
                LoopState::Reading(file) => {
                    let before = buf.filled().len();
                    let result = std::pin::Pin::new(file).poll_read(cx, buf);
                    return match result {
                        std::task::Poll::Ready(Ok(())) if buf.filled().len() == before => {
                            // EOF: loop back to the start on the next call.
                            this.state = LoopState::Idle;
                            std::task::Poll::Ready(Ok(()))
                        },
                        other => other,
                    };
                },
            }
        }
    }
}

/// Paces `next_unit` calls at a fixed rate, for `FileFPS` playback of a
/// file input that has no natural pacing of its own.
struct PacedLexer {
    inner: Box<dyn Lexer>,
    period: Duration,
}

impl PacedLexer {
    fn new(inner: Box<dyn Lexer>, fps: u32) -> Self {
        Self { inner, period: Duration::from_millis(1000 / u64::from(fps.max(1))) }
    }
}

#[async_trait::async_trait]
impl Lexer for PacedLexer {
    async fn next_unit(&mut self) -> Result<Option<Chunk>, RevidError> {
        tokio::time::sleep(self.period).await;
        self.inner.next_unit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revid_core::config::SessionConfig;

    #[tokio::test]
    async fn manual_input_builds_a_push_fed_lexer() {
        let cfg = SessionConfig { input: Input::Manual, ..SessionConfig::default() };
        let mut built = build(&cfg).await.unwrap();
        let feed = built.feed.take().expect("manual input must expose a feed handle");
        feed.send(Chunk::from_static(b"frame")).await.unwrap();
        drop(feed);
        assert_eq!(built.lexer.next_unit().await.unwrap(), Some(Chunk::from_static(b"frame")));
    }

    #[tokio::test]
    async fn rtsp_input_uses_the_queueing_lexer() {
        let cfg = SessionConfig { input: Input::Rtsp, input_codec: InputCodec::H264Au, ..SessionConfig::default() };
        let built = build(&cfg).await.unwrap();
        assert!(built.feed.is_some());
        assert!(built.child.is_none());
    }

    #[tokio::test]
    async fn file_input_without_path_is_a_configuration_error() {
        let cfg = SessionConfig { input: Input::File, ..SessionConfig::default() };
        let err = build(&cfg).await.unwrap_err();
        assert!(matches!(err, RevidError::Configuration(_)));
    }
}
