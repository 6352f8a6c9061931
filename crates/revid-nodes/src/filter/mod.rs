// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Built-in [`revid_core::Filter`] implementations: the motion detectors,
//! `VariableFPS`, and `NoOp`, plus a factory that builds the configured
//! chain in the order the config lists them.

pub mod motion;
pub mod noop;
pub mod variable_fps;

pub use motion::{MotionDetectorKind, MotionFilter};
pub use noop::NoOpFilter;
pub use variable_fps::VariableFpsFilter;

use revid_core::config::{FilterKind, MotionConfig};
use revid_core::{Filter, FilterChain, RevidError};

/// Builds a [`FilterChain`] from the configured filter list, in order.
///
/// `VariableFPS` wraps whatever motion filter immediately follows it in the
/// list (per §4.3: "forward all other frames through a nested motion
/// filter"); a `VariableFPS` entry with no following motion entry wraps a
/// `NoOp`.
///
/// # Errors
/// Returns [`RevidError::Configuration`] if the list names an unknown
/// combination (currently unreachable given [`FilterKind`]'s closed set,
/// kept for forward compatibility with the fallible assembler contract).
pub fn build_filter_chain(kinds: &[FilterKind], motion: &MotionConfig) -> Result<FilterChain, RevidError> {
    let mut filters: Vec<Box<dyn Filter>> = Vec::new();
    let mut i = 0;
    while i < kinds.len() {
        match kinds[i] {
            FilterKind::NoOp => filters.push(Box::new(NoOpFilter)),
            FilterKind::VariableFPS => {
                let inner: Box<dyn Filter> = match kinds.get(i + 1) {
                    Some(FilterKind::Mog) => Box::new(MotionFilter::new(MotionDetectorKind::Mog, motion)),
                    Some(FilterKind::Knn) => Box::new(MotionFilter::new(MotionDetectorKind::Knn, motion)),
                    Some(FilterKind::Difference) => {
                        Box::new(MotionFilter::new(MotionDetectorKind::Difference, motion))
                    },
                    Some(FilterKind::Basic) => Box::new(MotionFilter::new(MotionDetectorKind::Basic, motion)),
                    _ => Box::new(NoOpFilter),
                };
                if matches!(
                    kinds.get(i + 1),
                    Some(FilterKind::Mog | FilterKind::Knn | FilterKind::Difference | FilterKind::Basic)
                ) {
                    i += 1; // the motion entry was consumed as VariableFPS's nested filter
                }
                filters.push(Box::new(VariableFpsFilter::new(motion.min_fps, inner)));
            },
            FilterKind::Mog => filters.push(Box::new(MotionFilter::new(MotionDetectorKind::Mog, motion))),
            FilterKind::Knn => filters.push(Box::new(MotionFilter::new(MotionDetectorKind::Knn, motion))),
            FilterKind::Difference => {
                filters.push(Box::new(MotionFilter::new(MotionDetectorKind::Difference, motion)));
            },
            FilterKind::Basic => filters.push(Box::new(MotionFilter::new(MotionDetectorKind::Basic, motion))),
        }
        i += 1;
    }
    Ok(FilterChain::new(filters))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_fps_consumes_the_following_motion_entry() {
        let kinds = vec![FilterKind::VariableFPS, FilterKind::Knn];
        let chain = build_filter_chain(&kinds, &MotionConfig::default()).unwrap();
        // One VariableFPS stage wrapping the KNN filter, not two stages.
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn plain_list_builds_one_stage_per_entry() {
        let kinds = vec![FilterKind::NoOp, FilterKind::Difference];
        let chain = build_filter_chain(&kinds, &MotionConfig::default()).unwrap();
        assert_eq!(chain.len(), 2);
    }
}
