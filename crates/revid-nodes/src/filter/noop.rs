// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The identity filter: forwards every chunk unchanged.

use async_trait::async_trait;
use revid_core::{Chunk, Filter, RevidError};

/// Passes every chunk through untouched. Useful as the default chain
/// (a session with no motion/rate filtering configured) and as the inner
/// filter for `VariableFPS` when no motion detector follows it.
pub struct NoOpFilter;

#[async_trait]
impl Filter for NoOpFilter {
    async fn process(&mut self, chunk: Chunk) -> Result<Option<Chunk>, RevidError> {
        Ok(Some(chunk))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn forwards_the_chunk_unchanged() {
        let mut filter = NoOpFilter;
        let out = filter.process(Bytes::from_static(b"frame")).await.unwrap();
        assert_eq!(out, Some(Bytes::from_static(b"frame")));
    }
}
