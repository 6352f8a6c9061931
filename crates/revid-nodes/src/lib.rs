// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! revid-nodes — built-in filters, senders, and clip transports that
//! implement the trait seams declared in `revid-core`.
//!
//! ## Modules
//!
//! - [`filter`]: the `NoOp`, `VariableFPS`, and motion-detector filters,
//!   plus a factory that assembles the configured chain.
//! - [`senders`]: [`senders::MtsClipSender`] and [`senders::FlvClipSender`],
//!   the pool-buffered `Sender` implementations that segment encoder output
//!   into clips/tags and hand them to a background worker.
//! - [`transport`]: the raw, single-worker-owned leaves a clip sender's
//!   worker writes into (file, HTTP, RTMP, RTP).

pub mod filter;
pub mod senders;
pub mod transport;

pub use filter::build_filter_chain;
pub use senders::{FlvClipSender, MtsClipSender};
pub use transport::{ClipTransport, FileTransport, HttpTransport, RtmpTransport, RtpTransport};
