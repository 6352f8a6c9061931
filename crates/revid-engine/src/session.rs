// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The session host: owns a [`SessionConfig`], assembles and runs the
//! pipeline it describes, and exposes `Start`/`Stop`/`Update` lifecycle
//! operations.
//!
//! Shutdown is driven by a single [`CancellationToken`] observed by the
//! capture loop's `tokio::select!`, the same shape the teacher's node
//! runtime uses for its own per-node cancellation signal. `Stop` is
//! idempotent — calling it when nothing is running is a no-op — and always
//! joins the capture task before returning, so a caller that follows `Stop`
//! with `Update`/`Start` never races the outgoing pipeline's senders.
//! `Update` is implemented as `Stop` then `Start`: a full pipeline restart
//! rather than a hot patch, since individual stages (encoders, senders,
//! the lexer) aren't safely reconfigurable in place once running.

use revid_core::config::SessionConfig;
use revid_core::{Chunk, MtsMetadata, RevidError};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assembler::{self, Pipeline};

struct RunningSession {
    cancellation: CancellationToken,
    task: JoinHandle<()>,
    error_fanin: JoinHandle<()>,
    feed: Option<mpsc::Sender<Chunk>>,
}

struct SessionState {
    cfg: SessionConfig,
    running: Option<RunningSession>,
}

/// Owns a session's configuration and, while running, its live pipeline.
pub struct Session {
    state: Mutex<SessionState>,
    metadata: MtsMetadata,
}

impl Session {
    /// Builds a session from `cfg`, clamping out-of-range values
    /// immediately (mirroring the ambient "validate once at session
    /// start" behavior rather than deferring it to `start`).
    #[must_use]
    pub fn new(mut cfg: SessionConfig) -> Self {
        cfg.validate_and_clamp();
        Self { state: Mutex::new(SessionState { cfg, running: None }), metadata: MtsMetadata::default() }
    }

    /// The shared MTS metadata table this session's HTTP sender (if any)
    /// updates and its encoder reads from.
    #[must_use]
    pub fn metadata(&self) -> MtsMetadata {
        self.metadata.clone()
    }

    /// Assembles the pipeline and spawns its capture loop. A no-op if the
    /// session is already running.
    pub async fn start(&self) -> Result<(), RevidError> {
        let mut state = self.state.lock().await;
        if state.running.is_some() {
            return Ok(());
        }

        let (error_tx, error_rx) = mpsc::channel(64);
        let error_fanin = tokio::spawn(run_error_fanin(error_rx));

        let pipeline = assembler::assemble(&state.cfg, &self.metadata, error_tx.clone()).await?;
        let feed = pipeline.feed.clone();
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let task = tokio::spawn(run_capture_loop(pipeline, token, error_tx));

        state.running = Some(RunningSession { cancellation, task, error_fanin, feed });
        Ok(())
    }

    /// Signals the capture loop to stop, closes every sender, and joins the
    /// capture task. Idempotent: calling `stop` when nothing is running
    /// does nothing.
    pub async fn stop(&self) {
        let running = {
            let mut state = self.state.lock().await;
            state.running.take()
        };
        if let Some(running) = running {
            running.cancellation.cancel();
            let _ = running.task.await;
            // Every error_tx clone lives inside the capture task's pipeline
            // (or was held by the capture task itself), so once it's joined
            // the channel has no senders left and the fan-in task's recv
            // loop drains to completion on its own.
            let _ = running.error_fanin.await;
        }
    }

    /// Stops the running pipeline (if any), applies `mutate` to the stored
    /// configuration, re-clamps it, and starts a fresh pipeline from the
    /// result.
    pub async fn update<F: FnOnce(&mut SessionConfig)>(&self, mutate: F) -> Result<(), RevidError> {
        self.stop().await;
        {
            let mut state = self.state.lock().await;
            mutate(&mut state.cfg);
            state.cfg.validate_and_clamp();
        }
        self.start().await
    }

    /// Returns a clone of the currently stored configuration.
    pub async fn config(&self) -> SessionConfig {
        self.state.lock().await.cfg.clone()
    }

    /// Pushes an externally-framed access unit into the running pipeline's
    /// input feed — the entry point for the `Rtsp`, `Audio`, and `Manual`
    /// input modes, whose actual capture/depacketization is an external
    /// collaborator outside this crate.
    ///
    /// # Errors
    /// Returns [`RevidError::Runtime`] if the session isn't running, and
    /// [`RevidError::Configuration`] if the configured input doesn't accept
    /// pushed frames (it reads from a file, or spawns its own process).
    pub async fn feed_external(&self, chunk: Chunk) -> Result<(), RevidError> {
        let state = self.state.lock().await;
        let running = state.running.as_ref().ok_or_else(|| RevidError::Runtime("session is not running".to_string()))?;
        let feed = running
            .feed
            .as_ref()
            .ok_or_else(|| RevidError::Configuration("configured input does not accept pushed frames".to_string()))?;
        feed.send(chunk).await.map_err(|_| RevidError::Runtime("input feed is closed".to_string()))
    }
}

async fn run_capture_loop(mut pipeline: Pipeline, token: CancellationToken, errors: mpsc::Sender<RevidError>) {
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            unit = pipeline.lexer.next_unit() => match unit {
                Ok(Some(chunk)) => match pipeline.filters.process(chunk).await {
                    Ok(Some(chunk)) => pipeline.emit(chunk).await,
                    Ok(None) => {},
                    Err(err) => {
                        let _ = errors.send(RevidError::Runtime(format!("filter chain error, dropping chunk: {err}"))).await;
                    },
                },
                Ok(None) => break,
                Err(err) => {
                    let _ = errors.send(RevidError::Runtime(format!("lexer framing error, continuing: {err}"))).await;
                },
            },
        }
    }
    pipeline.close().await;
}

/// Consumes the session's error-fan-in channel, logging every reported
/// error, until every sender half (held by the pipeline's senders and the
/// capture loop) has dropped and the channel closes.
async fn run_error_fanin(mut errors: mpsc::Receiver<RevidError>) {
    while let Some(err) = errors.recv().await {
        tracing::warn!(error = %err, "pipeline reported an error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revid_core::types::{Input, InputCodec, Output};

    fn manual_file_config(path: &std::path::Path) -> SessionConfig {
        SessionConfig {
            input: Input::Manual,
            input_codec: InputCodec::H264Au,
            outputs: vec![Output::File],
            output_path: Some(path.to_string_lossy().into_owned()),
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn start_stop_is_idempotent_and_joins_the_capture_task() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(manual_file_config(&dir.path().join("out.ts")));

        session.start().await.unwrap();
        session.start().await.unwrap(); // already running: no-op
        session.stop().await;
        session.stop().await; // already stopped: no-op
    }

    #[tokio::test]
    async fn feed_external_delivers_into_a_running_manual_session() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(manual_file_config(&dir.path().join("out.ts")));
        session.start().await.unwrap();

        session.feed_external(Chunk::from_static(b"\x00\x00\x01\x65idr")).await.unwrap();
        session.stop().await;
    }

    #[tokio::test]
    async fn feed_external_before_start_is_a_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(manual_file_config(&dir.path().join("out.ts")));
        let err = session.feed_external(Chunk::from_static(b"frame")).await.unwrap_err();
        assert!(matches!(err, RevidError::Runtime(_)));
    }

    #[tokio::test]
    async fn update_restarts_with_the_mutated_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(manual_file_config(&dir.path().join("out.ts")));
        session.start().await.unwrap();

        session.update(|cfg| cfg.frame_rate = 15).await.unwrap();
        assert_eq!(session.config().await.frame_rate, 15);
        session.stop().await;
    }
}
