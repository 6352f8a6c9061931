// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! revid-codec — lexers that split a raw input stream into access units,
//! and the MPEG-TS/FLV encoders that packetize those units for their clip
//! senders.
//!
//! ## Modules
//!
//! - [`scan`]: delimiter scanning shared by the NAL and JPEG lexers.
//! - [`lexer`]: the [`lexer::Lexer`] trait and its framing strategies
//!   (delimiter-based, fixed-rate, pass-through, pass-through-with-queue).
//! - [`mts`]: the MPEG-TS [`mts::MtsEncoder`].
//! - [`flv`]: the simplified FLV [`flv::FlvEncoder`].

pub mod flv;
pub mod lexer;
pub mod mts;
pub mod scan;

pub use lexer::{ByteRateLexer, DelimiterLexer, Lexer, NoopLexer, NoopQueueLexer};
pub use mts::MtsEncoder;
