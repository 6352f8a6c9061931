// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-PID continuity-counter tracking across clip boundaries.
//!
//! Every [`crate::pool::PoolBuffer`]-backed sender owns one
//! [`DiscontinuityRepairer`]. A failed transport write does not stop the
//! pipeline; it instead arms the repairer so the *next* clip gets its
//! discontinuity indicator set, telling downstream decoders to drop their
//! continuity-counter expectations rather than report an error.

use crate::mts::{self, PacketView, PACKET_SIZE};
use std::collections::HashMap;

/// Tracks expected continuity counters per PID and whether the next clip
/// must be marked discontinuous regardless of counter alignment.
#[derive(Debug, Default)]
pub struct DiscontinuityRepairer {
    expected: HashMap<u16, u8>,
    force_next: bool,
}

impl DiscontinuityRepairer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the repairer to force a discontinuity indicator on the next
    /// clip's PAT packet, regardless of whether continuity counters still
    /// line up. Called after a transport write failure.
    pub fn fail(&mut self) {
        self.force_next = true;
    }

    /// Repairs one clip in place.
    ///
    /// `clip` is a whole number of 188-byte packets; the first MUST be a
    /// PAT packet (the caller's segmentation guarantees this). If a prior
    /// `fail()` is pending, or the PAT packet's continuity counter does not
    /// match what was expected for its PID, a discontinuity indicator is
    /// inserted on that PAT packet. Every tracked PID's expected counter is
    /// then advanced across the whole clip.
    ///
    /// # Panics
    /// Panics if `clip.len()` is not a multiple of [`PACKET_SIZE`], since
    /// that would mean the caller handed over a malformed segmentation.
    pub fn repair(&mut self, clip: &mut [u8]) {
        assert_eq!(clip.len() % PACKET_SIZE, 0, "clip must be whole MTS packets");
        assert!(!clip.is_empty(), "clip must contain at least a PAT packet");

        {
            let first = PacketView::new(&clip[..PACKET_SIZE]);
            debug_assert!(first.is_pat(), "clip must begin with a PAT packet");
            let pid = first.pid();
            let observed_cc = first.continuity_counter();
            let expected_cc = self.expected.get(&pid).copied();
            let mismatched = expected_cc.is_some_and(|e| e != observed_cc);

            if self.force_next || mismatched {
                let packet: &mut [u8; PACKET_SIZE] = (&mut clip[..PACKET_SIZE]).try_into().unwrap();
                mts::set_discontinuity_indicator(packet);
                self.force_next = false;
            }
        }

        for packet in clip.chunks_exact(PACKET_SIZE) {
            let view = PacketView::new(packet);
            let pid = view.pid();
            let next_cc = (view.continuity_counter() + 1) % 16;
            self.expected.insert(pid, next_cc);
        }
    }

    /// True if a discontinuity is currently pending for the next `repair`
    /// call (diagnostics/tests only).
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.force_next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mts::{PID_PAT, PID_VIDEO};

    fn packet(pid: u16, cc: u8) -> [u8; PACKET_SIZE] {
        let mut p = [0u8; PACKET_SIZE];
        p[0] = 0x47;
        p[1] = ((pid >> 8) as u8) & 0x1F;
        p[2] = (pid & 0xFF) as u8;
        p[3] = 0x10 | (cc & 0x0F);
        p
    }

    #[test]
    fn advances_expected_counter_without_failure() {
        let mut repairer = DiscontinuityRepairer::new();
        let mut clip = packet(PID_PAT, 0).to_vec();
        clip.extend_from_slice(&packet(PID_VIDEO, 0));
        repairer.repair(&mut clip);
        assert!(!PacketView::new(&clip[..PACKET_SIZE]).discontinuity_indicator().unwrap_or(false));

        let mut next_clip = packet(PID_PAT, 1).to_vec();
        next_clip.extend_from_slice(&packet(PID_VIDEO, 1));
        repairer.repair(&mut next_clip);
        assert!(!PacketView::new(&next_clip[..PACKET_SIZE]).discontinuity_indicator().unwrap_or(false));
    }

    #[test]
    fn marks_discontinuity_after_fail() {
        let mut repairer = DiscontinuityRepairer::new();
        let mut clip = packet(PID_PAT, 0).to_vec();
        repairer.repair(&mut clip);
        repairer.fail();
        assert!(repairer.is_failed());

        let mut next_clip = packet(PID_PAT, 1).to_vec();
        repairer.repair(&mut next_clip);
        assert_eq!(PacketView::new(&next_clip[..PACKET_SIZE]).discontinuity_indicator(), Some(true));
        assert!(!repairer.is_failed());
    }

    #[test]
    fn marks_discontinuity_on_counter_gap() {
        let mut repairer = DiscontinuityRepairer::new();
        let mut clip = packet(PID_PAT, 0).to_vec();
        repairer.repair(&mut clip);

        // Skip from expected 1 straight to 5: a gap caused by dropped packets.
        let mut next_clip = packet(PID_PAT, 5).to_vec();
        repairer.repair(&mut next_clip);
        assert_eq!(PacketView::new(&next_clip[..PACKET_SIZE]).discontinuity_indicator(), Some(true));
    }
}
