// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! [`revid_core::Sender`] implementations that sit between the encoders and
//! the raw [`crate::transport::ClipTransport`] leaves.

pub mod flv_clip;
pub mod mts_clip;

pub use flv_clip::FlvClipSender;
pub use mts_clip::MtsClipSender;
