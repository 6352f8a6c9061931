// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Rate-thinning filter that keeps at least `min_fps` frames per second
//! flowing regardless of what the nested motion filter decides.

use async_trait::async_trait;
use revid_core::{Chunk, Filter, RevidError};

const NOMINAL_FPS: u32 = 25;

/// Forwards every Nth frame unconditionally (guaranteeing `min_fps` keeps
/// flowing even with no motion), and routes every other frame through a
/// nested filter — typically one of the motion detectors — so that motion
/// can still push extra frames through between the guaranteed ones.
pub struct VariableFpsFilter {
    every_nth: u32,
    count: u32,
    inner: Box<dyn Filter>,
}

impl VariableFpsFilter {
    #[must_use]
    pub fn new(min_fps: u32, inner: Box<dyn Filter>) -> Self {
        let every_nth = (NOMINAL_FPS / min_fps.max(1)).max(1);
        Self { every_nth, count: 0, inner }
    }
}

#[async_trait]
impl Filter for VariableFpsFilter {
    async fn process(&mut self, chunk: Chunk) -> Result<Option<Chunk>, RevidError> {
        let is_guaranteed = self.count % self.every_nth == 0;
        self.count = self.count.wrapping_add(1);

        if is_guaranteed {
            // Still feed the nested filter so its internal model keeps
            // tracking the guaranteed frames too, but force this one
            // through regardless of its verdict. A real error (not just a
            // drop) still has to surface: the caller can't tell a decode
            // failure from a quiet motion-filter "no event" otherwise.
            self.inner.process(chunk.clone()).await?;
            return Ok(Some(chunk));
        }

        self.inner.process(chunk).await
    }

    fn name(&self) -> &'static str {
        "variable_fps"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::noop::NoOpFilter;
    use bytes::Bytes;

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
    async fn guaranteed_frames_pass_even_when_inner_drops_everything() {
        let mut filter = VariableFpsFilter::new(5, Box::new(DropAll));
        // every_nth = 25/5 = 5; frame 0 is guaranteed.
        let out = filter.process(Bytes::from_static(b"f")).await.unwrap();
        assert!(out.is_some());
    }

    #[tokio::test]
    async fn non_guaranteed_frames_follow_the_inner_filter() {
        let mut filter = VariableFpsFilter::new(5, Box::new(NoOpFilter));
        let _ = filter.process(Bytes::from_static(b"0")).await.unwrap(); // guaranteed
        let out = filter.process(Bytes::from_static(b"1")).await.unwrap(); // delegated to NoOp
        assert!(out.is_some());
    }

    struct AlwaysErrors;

    #[async_trait]
    impl Filter for AlwaysErrors {
        async fn process(&mut self, _chunk: Chunk) -> Result<Option<Chunk>, RevidError> {
            Err(RevidError::Runtime("decode failure".to_string()))
        }

        fn name(&self) -> &'static str {
            "always_errors"
        }
    }

    #[tokio::test]
    async fn inner_error_on_a_guaranteed_frame_still_propagates() {
        let mut filter = VariableFpsFilter::new(5, Box::new(AlwaysErrors));
        let err = filter.process(Bytes::from_static(b"f")).await.unwrap_err();
        assert!(matches!(err, RevidError::Runtime(_)));
    }
}
