// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The [`Sender`] trait implemented by every clip/chunk destination
//! (MTSClipSender, FLVClipSender/RTMPSender, FileSender, HTTPSender,
//! RTPSender).
//!
//! Every sender owns a [`crate::pool::PoolBuffer`] and a background worker
//! task: the pipeline's hot path calls [`Sender::write`], which only ever
//! touches the pool (never the transport directly), and the worker drains
//! the pool and performs the actual I/O. `close` stops accepting new writes,
//! signals the worker to drain and exit, and joins it.

use crate::error::RevidError;
use crate::types::Chunk;
use async_trait::async_trait;

/// A destination that accepts encoded chunks (clips, in the MTS/FLV case;
/// individual frames for RTP) and forwards them to a transport.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Hands a chunk to the sender's pool buffer. Never performs I/O
    /// directly; see the module docs for why.
    async fn write(&self, chunk: Chunk) -> Result<(), RevidError>;

    /// Stops accepting writes, drains the background worker, and releases
    /// any transport resources (sockets, file handles).
    async fn close(&self);

    /// Human-readable name, used in logs.
    fn name(&self) -> &'static str;
}
