// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core data types that flow through a revid pipeline.

use bytes::Bytes;
use std::time::Duration;

/// An opaque, immutable access unit flowing between pipeline stages.
///
/// One access unit for video (a NAL unit, a JPEG frame), one recording
/// period for audio (a fixed-size PCM/ADPCM chunk). `Bytes` gives cheap
/// `clone()` fan-out to multiple senders without copying the payload.
pub type Chunk = Bytes;

/// The codec/format of the raw input stream, selected by `InputCodec`.
///
/// Determines both which lexer splits the byte stream into [`Chunk`]s and
/// which MTS stream type the encoder tags packets with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputCodec {
    H264,
    /// H.264 already split into access units by the capture device (e.g. RTSP).
    H264Au,
    H265,
    Mjpeg,
    Jpeg,
    Pcm,
    Adpcm,
}

impl InputCodec {
    /// True for the audio codecs, which are only valid with `Input::Audio`.
    #[must_use]
    pub const fn is_audio(self) -> bool {
        matches!(self, Self::Pcm | Self::Adpcm)
    }
}

/// Where the raw stream originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    Raspivid,
    Raspistill,
    Rtsp,
    V4l,
    File,
    Audio,
    Manual,
}

impl Input {
    #[must_use]
    pub const fn is_rtsp(self) -> bool {
        matches!(self, Self::Rtsp)
    }

    #[must_use]
    pub const fn is_audio(self) -> bool {
        matches!(self, Self::Audio)
    }
}

/// A destination a clip can be forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Output {
    File,
    Files,
    Http,
    Rtmp,
    Rtp,
}

impl Output {
    /// Outputs that consume MPEG-TS clips (as opposed to FLV).
    #[must_use]
    pub const fn wants_mts(self) -> bool {
        matches!(self, Self::File | Self::Files | Self::Http | Self::Rtp)
    }

    #[must_use]
    pub const fn wants_flv(self) -> bool {
        matches!(self, Self::Rtmp)
    }
}

/// Optional timing metadata attached to a chunk for pacing and PTS bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkMeta {
    /// Wall-clock duration represented by this chunk, if known.
    pub duration: Option<Duration>,
    /// Monotonically increasing sequence number, for loss detection.
    pub sequence: Option<u64>,
}
