// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Builds a runnable [`Pipeline`] from a validated [`SessionConfig`]:
//! constructs the sender fan-out for each configured output, wires an
//! `MtsEncoder` and/or `FlvEncoder` in front of the matching senders, builds
//! the filter chain, and selects the input lexer.
//!
//! Construction-time validation rejects two combinations outright, per the
//! recognised-key table: an audio input paired with a non-audio codec (or
//! vice versa), and an H.265 codec used outside RTSP (this crate has no
//! H.265 bytestream lexer — only RTSP delivers pre-framed H.265 access
//! units).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use revid_codec::flv::{FlvCodecId, FlvEncoder};
use revid_codec::lexer::Lexer;
use revid_codec::mts::MtsEncoder;
use revid_core::config::SessionConfig;
use revid_core::mts::StreamType;
use revid_core::types::{InputCodec, Output};
use revid_core::{Chunk, FilterChain, MtsMetadata, RevidError, Sender};
use revid_nodes::build_filter_chain;
use revid_nodes::senders::{FlvClipSender, MtsClipSender};
use revid_nodes::transport::{ClipTransport, FileTransport, HttpTransport, RtmpTransport, RtpTransport};
use tokio::sync::mpsc;

use crate::input::{self, BuiltInput};

/// RTMP connect attempts before a sender gives up on a destination for one
/// dial; there is no recognised config key for this, so the assembler uses
/// the same default the transport's own constructor falls back to.
const RTMP_MAX_TRIES: u32 = 3;

struct MtsStage {
    encoder: MtsEncoder,
    senders: Vec<Arc<dyn Sender>>,
}

struct FlvStage {
    encoder: FlvEncoder,
    codec: InputCodec,
    senders: Vec<Arc<dyn Sender>>,
}

/// A fully wired pipeline: pull a [`Chunk`] from `lexer`, run it through
/// `filters`, and hand whatever survives to [`Pipeline::emit`].
pub struct Pipeline {
    pub lexer: Box<dyn Lexer>,
    pub filters: FilterChain,
    pub child: Option<tokio::process::Child>,
    pub feed: Option<tokio::sync::mpsc::Sender<Chunk>>,
    mts: Option<MtsStage>,
    flv: Option<FlvStage>,
    errors: mpsc::Sender<RevidError>,
}

impl Pipeline {
    /// Encodes `chunk` into every configured wire format and fans it out to
    /// every sender of that format. A single sender failing to write is
    /// reported on the error-fan-in channel and does not stop delivery to
    /// the others.
    pub async fn emit(&mut self, chunk: Chunk) {
        if let Some(stage) = &mut self.mts {
            let clip = Bytes::from(stage.encoder.encode_unit(&chunk));
            for sender in &stage.senders {
                if let Err(err) = sender.write(clip.clone()).await {
                    let _ = self
                        .errors
                        .send(RevidError::Runtime(format!("{}: MTS sender write failed: {err}", sender.name())))
                        .await;
                }
            }
        }
        if let Some(stage) = &mut self.flv {
            let keyframe = is_keyframe(stage.codec, &chunk);
            let tag = Bytes::from(stage.encoder.encode_frame(&chunk, keyframe));
            for sender in &stage.senders {
                if let Err(err) = sender.write(tag.clone()).await {
                    let _ = self
                        .errors
                        .send(RevidError::Runtime(format!("{}: FLV sender write failed: {err}", sender.name())))
                        .await;
                }
            }
        }
    }

    /// Closes every sender (flushing buffered data and joining its worker)
    /// and, if the input was process-backed, kills the child.
    pub async fn close(&mut self) {
        if let Some(stage) = &self.mts {
            for sender in &stage.senders {
                sender.close().await;
            }
        }
        if let Some(stage) = &self.flv {
            for sender in &stage.senders {
                sender.close().await;
            }
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}

fn validate(cfg: &SessionConfig) -> Result<(), RevidError> {
    if cfg.input.is_audio() != cfg.input_codec.is_audio() {
        return Err(RevidError::Configuration(format!(
            "input {:?} is incompatible with input codec {:?}",
            cfg.input, cfg.input_codec
        )));
    }
    if cfg.input_codec == InputCodec::H265 && !cfg.input.is_rtsp() {
        return Err(RevidError::Configuration(
            "H.265 input is only supported over RTSP".to_string(),
        ));
    }
    if cfg.outputs.is_empty() {
        return Err(RevidError::Configuration("at least one output must be configured".to_string()));
    }
    Ok(())
}

fn frames_per_second(cfg: &SessionConfig) -> u32 {
    if cfg.input_codec.is_audio() {
        (1000 / cfg.audio.rec_period_ms.max(1)).max(1)
    } else {
        cfg.frame_rate.max(1)
    }
}

/// PSI must be supplied at least every `PSITime` for JPEG/MJPEG/audio
/// streams (no reliable frame-count cadence exists for those); H.264/H.265
/// use the simpler access-unit-count cadence instead.
fn psi_cadence(cfg: &SessionConfig) -> u32 {
    match cfg.input_codec {
        InputCodec::Mjpeg | InputCodec::Jpeg | InputCodec::Pcm | InputCodec::Adpcm => {
            (cfg.psi_time_secs * frames_per_second(cfg)).max(1)
        },
        InputCodec::H264 | InputCodec::H264Au | InputCodec::H265 => cfg.min_frames,
    }
}

fn pool_write_timeout(cfg: &SessionConfig) -> Duration {
    Duration::from_secs(u64::from(cfg.pool_write_timeout_secs))
}

fn clip_duration(cfg: &SessionConfig) -> Duration {
    Duration::from_secs(u64::from(cfg.clip_duration_secs))
}

fn spawn_mts_sender(
    name: &'static str,
    cfg: &SessionConfig,
    transport: Box<dyn ClipTransport>,
    errors: mpsc::Sender<RevidError>,
) -> Arc<MtsClipSender> {
    let sender = Arc::new(MtsClipSender::new(
        name,
        clip_duration(cfg),
        cfg.pool_capacity_bytes,
        cfg.pool_start_element_size,
        pool_write_timeout(cfg),
        errors,
    ));
    sender.spawn(transport);
    sender
}

fn spawn_flv_sender(
    name: &'static str,
    cfg: &SessionConfig,
    transport: Box<dyn ClipTransport>,
    errors: mpsc::Sender<RevidError>,
) -> Arc<FlvClipSender> {
    let sender = Arc::new(FlvClipSender::new(
        name,
        cfg.pool_capacity_bytes,
        cfg.pool_start_element_size,
        pool_write_timeout(cfg),
        errors,
    ));
    sender.spawn(transport);
    sender
}

async fn build_mts_senders(
    cfg: &SessionConfig,
    metadata: &MtsMetadata,
    errors: &mpsc::Sender<RevidError>,
) -> Result<Vec<Arc<dyn Sender>>, RevidError> {
    let mut senders: Vec<Arc<dyn Sender>> = Vec::new();
    for output in cfg.outputs.iter().filter(|o| o.wants_mts()) {
        let sender: Arc<dyn Sender> = match output {
            Output::File | Output::Files => {
                let path = cfg.output_path.clone().ok_or_else(|| {
                    RevidError::Configuration(format!("{output:?} output requires output_path"))
                })?;
                let multi_file = matches!(output, Output::Files);
                let transport = Box::new(FileTransport::new(path, cfg.max_file_size_bytes, multi_file));
                spawn_mts_sender("file", cfg, transport, errors.clone())
            },
            Output::Http => {
                let url = cfg.http_address.clone().ok_or_else(|| {
                    RevidError::Configuration("Http output requires http_address".to_string())
                })?;
                let transport = Box::new(HttpTransport::new(url, cfg.input.is_audio(), Some(metadata.clone())));
                spawn_mts_sender("http", cfg, transport, errors.clone())
            },
            Output::Rtp => {
                let transport = Box::new(RtpTransport::connect(&cfg.rtp_address, cfg.frame_rate).await?);
                spawn_mts_sender("rtp", cfg, transport, errors.clone())
            },
            Output::Rtmp => unreachable!("Rtmp does not want_mts"),
        };
        senders.push(sender);
    }
    Ok(senders)
}

fn build_flv_senders(
    cfg: &SessionConfig,
    errors: &mpsc::Sender<RevidError>,
) -> Result<Vec<Arc<dyn Sender>>, RevidError> {
    if !cfg.outputs.iter().any(|o| o.wants_flv()) {
        return Ok(Vec::new());
    }
    if cfg.rtmp_url.is_empty() {
        return Err(RevidError::Configuration("Rtmp output requires at least one rtmp_url".to_string()));
    }
    Ok(cfg
        .rtmp_url
        .iter()
        .map(|url| {
            let transport = Box::new(RtmpTransport::new(url.clone(), RTMP_MAX_TRIES));
            spawn_flv_sender("rtmp", cfg, transport, errors.clone()) as Arc<dyn Sender>
        })
        .collect())
}

fn flv_codec_id(codec: InputCodec) -> Result<FlvCodecId, RevidError> {
    match codec {
        InputCodec::H264 | InputCodec::H264Au => Ok(FlvCodecId::Avc),
        InputCodec::H265 => Ok(FlvCodecId::Hevc),
        InputCodec::Mjpeg | InputCodec::Jpeg => Ok(FlvCodecId::Mjpeg),
        InputCodec::Pcm | InputCodec::Adpcm => {
            Err(RevidError::Configuration("Rtmp output does not support audio-only input codecs".to_string()))
        },
    }
}

/// Finds an IDR/keyframe NAL inside an H.264/H.265 access unit, or reports
/// every frame as a keyframe for formats that have no inter-frame concept
/// (MJPEG/JPEG).
fn is_keyframe(codec: InputCodec, payload: &[u8]) -> bool {
    match codec {
        InputCodec::Mjpeg | InputCodec::Jpeg => true,
        InputCodec::H264 | InputCodec::H264Au => scan_nal_units(payload).any(|nal| (nal[0] & 0x1F) == 5),
        InputCodec::H265 => {
            scan_nal_units(payload).any(|nal| nal.len() >= 2 && matches!((nal[0] >> 1) & 0x3F, 19 | 20))
        },
        InputCodec::Pcm | InputCodec::Adpcm => false,
    }
}

fn scan_nal_units(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= payload.len() {
        if payload[i..i + 3] == [0, 0, 1] {
            starts.push(i + 3);
        }
        i += 1;
    }
    starts.into_iter().filter_map(move |start| payload.get(start..))
}

/// Assembles a runnable pipeline from `cfg`, validating the combination
/// and opening every configured output's transport.
///
/// `errors` is the session's error-fan-in channel: every sender's worker
/// task, and [`Pipeline::emit`] itself, report recoverable per-write
/// failures on it instead of logging inline, so one task can be
/// responsible for observing every error the pipeline produces.
///
/// # Errors
/// Returns [`RevidError::Configuration`] for an invalid input/codec/output
/// combination or a missing required field, and whatever error the
/// transport construction itself raises (e.g. DNS/socket failures for RTP).
pub async fn assemble(
    cfg: &SessionConfig,
    metadata: &MtsMetadata,
    errors: mpsc::Sender<RevidError>,
) -> Result<Pipeline, RevidError> {
    validate(cfg)?;

    let mts_senders = build_mts_senders(cfg, metadata, &errors).await?;
    let flv_senders = build_flv_senders(cfg, &errors)?;

    let mts = if mts_senders.is_empty() {
        None
    } else {
        Some(MtsStage {
            encoder: MtsEncoder::new(StreamType::from(cfg.input_codec), psi_cadence(cfg)),
            senders: mts_senders,
        })
    };

    let flv = if flv_senders.is_empty() {
        None
    } else {
        Some(FlvStage {
            encoder: FlvEncoder::new(flv_codec_id(cfg.input_codec)?, cfg.frame_rate.max(1)),
            codec: cfg.input_codec,
            senders: flv_senders,
        })
    };

    let filters = build_filter_chain(&cfg.filters, &cfg.motion)?;

    let BuiltInput { lexer, child, feed } = input::build(cfg).await?;

    Ok(Pipeline { lexer, filters, child, feed, mts, flv, errors })
}
