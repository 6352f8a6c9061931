// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The session's configuration schema: every recognised key, its default,
//! and the range validation/clamping the pipeline applies at session start.
//!
//! Values are layered (defaults, then a TOML file, then `REVID_`-prefixed
//! environment overrides) by the `apps/revid` binary before this struct is
//! deserialized; this module only owns the schema and the post-deserialize
//! clamp pass, mirroring how a node's own `Config` owns its serde defaults.

use crate::types::{Input, InputCodec, Output};
use serde::{Deserialize, Serialize};

fn default_input() -> Input {
    Input::Raspivid
}

fn default_input_codec() -> InputCodec {
    InputCodec::H264
}

fn default_outputs() -> Vec<Output> {
    vec![Output::Http]
}

const fn default_frame_rate() -> u32 {
    25
}

const fn default_min_frames() -> u32 {
    100
}

const fn default_psi_time_secs() -> u32 {
    2
}

const fn default_clip_duration_secs() -> u32 {
    0
}

const fn default_burst_period_secs() -> u32 {
    10
}

const fn default_pool_capacity_bytes() -> u64 {
    50 * 1024 * 1024
}

const fn default_pool_start_element_size() -> u64 {
    1000
}

const fn default_pool_write_timeout_secs() -> u32 {
    5
}

const fn default_max_file_size_bytes() -> u64 {
    0
}

const fn default_file_fps() -> u32 {
    0
}

fn default_filters() -> Vec<FilterKind> {
    vec![FilterKind::NoOp]
}

fn default_rtp_address() -> String {
    "localhost:6970".to_string()
}

fn default_logging() -> LogLevel {
    LogLevel::Info
}

/// Motion/variable-fps/filter chain selector, one entry per configured
/// stage (order matters: filters run in the order listed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FilterKind {
    NoOp,
    #[serde(rename = "MOG")]
    Mog,
    VariableFPS,
    #[serde(rename = "KNN")]
    Knn,
    Difference,
    Basic,
}

/// Minimum severity passed through to the logging subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

/// Motion-filter tuning parameters, grouped since they only apply when
/// `Filters` selects one of the motion variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub min_fps: u32,
    pub motion_interval: u32,
    pub motion_padding: u32,
    pub motion_downscaling: u32,
    pub motion_threshold: f64,
    pub motion_history: u32,
    pub motion_kernel: u32,
    pub motion_min_area: u32,
    pub motion_pixels: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            min_fps: 1,
            motion_interval: 1,
            motion_padding: 0,
            motion_downscaling: 1,
            motion_threshold: 25.0,
            motion_history: 500,
            motion_kernel: 3,
            motion_min_area: 500,
            motion_pixels: 0,
        }
    }
}

/// Audio capture parameters, consulted only when `Input` is `audio`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
    pub rec_period_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            bit_depth: 16,
            rec_period_ms: 20,
        }
    }
}

/// The complete, validated session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(default = "default_input")]
    pub input: Input,
    #[serde(default = "default_input_codec")]
    pub input_codec: InputCodec,
    pub input_path: Option<String>,
    pub output_path: Option<String>,
    #[serde(default = "default_outputs")]
    pub outputs: Vec<Output>,
    pub rtmp_url: Vec<String>,
    #[serde(default = "default_rtp_address")]
    pub rtp_address: String,
    pub http_address: Option<String>,

    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_min_frames")]
    pub min_frames: u32,
    #[serde(default = "default_psi_time_secs")]
    pub psi_time_secs: u32,
    #[serde(default = "default_clip_duration_secs")]
    pub clip_duration_secs: u32,
    #[serde(default = "default_burst_period_secs")]
    pub burst_period_secs: u32,

    #[serde(default = "default_pool_capacity_bytes")]
    pub pool_capacity_bytes: u64,
    #[serde(default = "default_pool_start_element_size")]
    pub pool_start_element_size: u64,
    #[serde(default = "default_pool_write_timeout_secs")]
    pub pool_write_timeout_secs: u32,

    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_file_fps")]
    pub file_fps: u32,

    #[serde(default = "default_filters")]
    pub filters: Vec<FilterKind>,
    pub motion: MotionConfig,
    pub audio: AudioConfig,

    #[serde(default = "default_logging")]
    pub logging: LogLevel,
    pub input_loop: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input: default_input(),
            input_codec: default_input_codec(),
            input_path: None,
            output_path: None,
            outputs: default_outputs(),
            rtmp_url: Vec::new(),
            rtp_address: default_rtp_address(),
            http_address: None,
            frame_rate: default_frame_rate(),
            min_frames: default_min_frames(),
            psi_time_secs: default_psi_time_secs(),
            clip_duration_secs: default_clip_duration_secs(),
            burst_period_secs: default_burst_period_secs(),
            pool_capacity_bytes: default_pool_capacity_bytes(),
            pool_start_element_size: default_pool_start_element_size(),
            pool_write_timeout_secs: default_pool_write_timeout_secs(),
            max_file_size_bytes: default_max_file_size_bytes(),
            file_fps: default_file_fps(),
            filters: default_filters(),
            motion: MotionConfig::default(),
            audio: AudioConfig::default(),
            logging: default_logging(),
            input_loop: false,
        }
    }
}

impl SessionConfig {
    /// Clamps every out-of-range field to its default and logs a warning
    /// for each one, per the "configuration out-of-range" error taxonomy
    /// entry. Called once at session start, after layered loading.
    pub fn validate_and_clamp(&mut self) {
        let defaults = Self::default();

        macro_rules! clamp_range {
            ($field:ident, $range:expr) => {
                if !$range.contains(&self.$field) {
                    tracing::warn!(
                        field = stringify!($field),
                        value = ?self.$field,
                        default = ?defaults.$field,
                        "configuration value out of range, using default"
                    );
                    self.$field = defaults.$field;
                }
            };
        }

        clamp_range!(frame_rate, 1..=60);
        clamp_range!(min_frames, 1..=1000);
        clamp_range!(psi_time_secs, 1..=u32::MAX);

        if self.audio.channels == 0 {
            tracing::warn!(field = "audio.channels", "configuration value out of range, using default");
            self.audio.channels = defaults.audio.channels;
        }

        // For audio input, ClipDuration is forced to 10s regardless of config.
        if self.input.is_audio() && self.clip_duration_secs != 10 {
            tracing::warn!(
                clip_duration_secs = self.clip_duration_secs,
                "audio input forces ClipDuration to 10s"
            );
            self.clip_duration_secs = 10;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recognised_key_table() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.frame_rate, 25);
        assert_eq!(cfg.min_frames, 100);
        assert_eq!(cfg.psi_time_secs, 2);
        assert_eq!(cfg.clip_duration_secs, 0);
        assert_eq!(cfg.pool_capacity_bytes, 50 * 1024 * 1024);
        assert_eq!(cfg.pool_start_element_size, 1000);
        assert_eq!(cfg.pool_write_timeout_secs, 5);
    }

    #[test]
    fn out_of_range_frame_rate_clamps_to_default() {
        let mut cfg = SessionConfig {
            frame_rate: 200,
            ..SessionConfig::default()
        };
        cfg.validate_and_clamp();
        assert_eq!(cfg.frame_rate, 25);
    }

    #[test]
    fn audio_input_forces_clip_duration() {
        let mut cfg = SessionConfig {
            input: Input::Audio,
            clip_duration_secs: 30,
            ..SessionConfig::default()
        };
        cfg.validate_and_clamp();
        assert_eq!(cfg.clip_duration_secs, 10);
    }
}
