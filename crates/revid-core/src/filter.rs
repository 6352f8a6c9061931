// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The [`Filter`] trait and the linear [`FilterChain`] that strings filters
//! together between the lexer and the encoder.

use crate::error::RevidError;
use crate::types::Chunk;
use async_trait::async_trait;

/// One stage in the filter chain.
///
/// Filters are synchronous-feeling but `async` so that a motion filter
/// backed by an external detection library can yield without blocking the
/// pipeline's executor. A filter may drop a chunk entirely (returning
/// `Ok(None)`) — a motion filter between motion events, or `VariableFPS`
/// thinning frames to hit its target rate.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Processes one chunk, returning the (possibly transformed) chunk to
    /// pass downstream, or `None` to drop it.
    async fn process(&mut self, chunk: Chunk) -> Result<Option<Chunk>, RevidError>;

    /// Human-readable name, used in logs.
    fn name(&self) -> &'static str;
}

/// A linear sequence of [`Filter`]s applied in order.
///
/// An empty chain passes chunks through unchanged, matching the `NoOp`
/// filter's behavior without needing a special case at the call site.
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    #[must_use]
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// Number of stages in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Runs `chunk` through every filter in order, stopping early if any
    /// filter drops it.
    pub async fn process(&mut self, chunk: Chunk) -> Result<Option<Chunk>, RevidError> {
        let mut current = Some(chunk);
        for filter in &mut self.filters {
            let Some(c) = current.take() else {
                break;
            };
            match filter.process(c).await {
                Ok(next) => current = next,
                Err(err) => {
                    tracing::warn!(filter = filter.name(), error = %err, "filter error, dropping chunk");
                    return Err(err);
                }
            }
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct Double;

    #[async_trait]
    impl Filter for Double {
        async fn process(&mut self, chunk: Chunk) -> Result<Option<Chunk>, RevidError> {
            let mut out = chunk.to_vec();
            out.extend_from_slice(&chunk);
            Ok(Some(Bytes::from(out)))
        }

        fn name(&self) -> &'static str {
            "double"
        }
    }

    struct DropAll;

    #[async_trait]
    impl Filter for DropAll {
        async fn process(&mut self, _chunk: Chunk) -> Result<Option<Chunk>, RevidError> {
            Ok(None)
        }

        fn name(&self) -> &'static str {
            "drop_all"
        }
    }

    #[tokio::test]
    async fn empty_chain_passes_through() {
        let mut chain = FilterChain::new(vec![]);
        let out = chain.process(Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(out, Some(Bytes::from_static(b"hi")));
    }

    #[tokio::test]
    async fn chain_applies_filters_in_order() {
        let mut chain = FilterChain::new(vec![Box::new(Double)]);
        let out = chain.process(Bytes::from_static(b"ab")).await.unwrap();
        assert_eq!(out, Some(Bytes::from_static(b"abab")));
    }

    #[tokio::test]
    async fn dropped_chunk_short_circuits_remaining_filters() {
        let mut chain = FilterChain::new(vec![Box::new(DropAll), Box::new(Double)]);
        let out = chain.process(Bytes::from_static(b"ab")).await.unwrap();
        assert_eq!(out, None);
    }
}
