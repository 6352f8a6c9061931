// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Raw clip transports: the leaves a clip sender's background worker writes
//! into. Unlike [`revid_core::Sender`], these are not pool-buffered — the
//! clip sender already did that — and are driven exclusively by that single
//! worker task, so `send`/`close` take `&mut self`.

pub mod file;
pub mod http;
pub mod rtmp;
pub mod rtp;

use async_trait::async_trait;
use revid_core::RevidError;

/// A destination that accepts one already-encoded clip (MTS) or tag (FLV)
/// at a time.
#[async_trait]
pub trait ClipTransport: Send {
    async fn send(&mut self, clip: &[u8]) -> Result<(), RevidError>;
    async fn close(&mut self);
    fn name(&self) -> &'static str;
}

pub use file::FileTransport;
pub use http::HttpTransport;
pub use rtmp::RtmpTransport;
pub use rtp::RtpTransport;
