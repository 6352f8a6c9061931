// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! MPEG-TS encoder: packetizes access units into 188-byte packets, inserting
//! a PAT/PMT pair at the configured PSI cadence.
//!
//! This is a single-program, single-elementary-stream encoder: it carries
//! exactly one PAT entry (program 1 → PMT on [`mts::PID_PMT`]) and one PMT
//! entry (the capture's video or audio stream on [`mts::PID_VIDEO`]). It is
//! not a general-purpose multiplexer — the sections it writes omit CRC32,
//! since nothing downstream of this crate parses them as a standards-strict
//! demuxer would; only PID routing, continuity counters and the
//! discontinuity indicator bit are semantically load-bearing here.

use bytes::{BufMut, BytesMut};
use revid_core::mts::{self, StreamType};
use std::collections::HashMap;

const SYNC_BYTE: u8 = 0x47;
const PAYLOAD_CAPACITY: usize = mts::PACKET_SIZE - 4;

/// Packetizes access units into MPEG-TS clips, inserting PAT/PMT at a
/// configurable cadence.
pub struct MtsEncoder {
    stream_type: StreamType,
    psi_cadence: u32,
    units_since_psi: u32,
    cc: HashMap<u16, u8>,
}

impl MtsEncoder {
    /// `psi_cadence` is the number of access units between PAT/PMT
    /// insertions; a PAT/PMT pair is always emitted before the first unit.
    #[must_use]
    pub fn new(stream_type: StreamType, psi_cadence: u32) -> Self {
        Self {
            stream_type,
            psi_cadence: psi_cadence.max(1),
            units_since_psi: u32::MAX,
            cc: HashMap::new(),
        }
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let counter = self.cc.entry(pid).or_insert(0);
        let value = *counter;
        *counter = (*counter + 1) & 0x0F;
        value
    }

    /// Encodes one access unit into a sequence of whole 188-byte packets,
    /// prefixed by a PAT/PMT pair when the PSI cadence is due.
    pub fn encode_unit(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        if self.units_since_psi >= self.psi_cadence {
            out.extend_from_slice(&self.build_pat());
            out.extend_from_slice(&self.build_pmt());
            self.units_since_psi = 0;
        }
        self.units_since_psi += 1;
        out.extend_from_slice(&self.build_pes(payload));
        out
    }

    fn build_pat(&mut self) -> [u8; mts::PACKET_SIZE] {
        // pointer_field, table_id, section_length(hi/lo), transport_stream_id,
        // version/current_next, section_number, last_section_number,
        // program_number(hi/lo), PMT pid (hi/lo with reserved bits).
        let mut section = BytesMut::with_capacity(16);
        section.put_u8(0); // pointer_field
        section.put_u8(0x00); // table_id: program_association_section
        section.put_u16(0xB00D); // section_syntax_indicator + reserved + length(13)
        section.put_u16(0x0001); // transport_stream_id
        section.put_u8(0xC1); // reserved + version 0 + current_next
        section.put_u8(0x00); // section_number
        section.put_u8(0x00); // last_section_number
        section.put_u16(0x0001); // program_number
        section.put_u16(0xE000 | mts::PID_PMT); // reserved bits + PMT pid

        build_packet(mts::PID_PAT, true, self.next_cc(mts::PID_PAT), &section)
    }

    fn build_pmt(&mut self) -> [u8; mts::PACKET_SIZE] {
        let mut section = BytesMut::with_capacity(20);
        section.put_u8(0); // pointer_field
        section.put_u8(0x02); // table_id: TS_program_map_section
        section.put_u16(0xB011); // section_syntax_indicator + reserved + length
        section.put_u16(0x0001); // program_number
        section.put_u8(0xC1); // reserved + version 0 + current_next
        section.put_u8(0x00); // section_number
        section.put_u8(0x00); // last_section_number
        section.put_u16(0xE000 | mts::PID_VIDEO); // reserved + PCR_PID
        section.put_u16(0xF000); // reserved + program_info_length(0)
        section.put_u8(stream_type_tag(self.stream_type));
        section.put_u16(0xE000 | mts::PID_VIDEO);
        section.put_u16(0xF000); // ES_info_length(0)

        build_packet(mts::PID_PMT, true, self.next_cc(mts::PID_PMT), &section)
    }

    fn build_pes(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut pes = BytesMut::with_capacity(payload.len() + 9);
        pes.put_u8(0x00);
        pes.put_u8(0x00);
        pes.put_u8(0x01); // packet_start_code_prefix
        pes.put_u8(0xE0); // stream_id: video stream 0
        let pes_len = (payload.len() + 3).min(0xFFFF);
        #[allow(clippy::cast_possible_truncation)]
        pes.put_u16(pes_len as u16);
        pes.put_u8(0x80); // marker bits, no scrambling
        pes.put_u8(0x00); // flags: no PTS/DTS for this simplified stream
        pes.put_u8(0x00); // PES_header_data_length
        pes.extend_from_slice(payload);

        let mut out = Vec::with_capacity((pes.len() / PAYLOAD_CAPACITY + 1) * mts::PACKET_SIZE);
        let mut first = true;
        let mut rest = &pes[..];
        while !rest.is_empty() || first {
            let take = rest.len().min(PAYLOAD_CAPACITY);
            let (chunk, remainder) = rest.split_at(take);
            let cc = self.next_cc(mts::PID_VIDEO);
            out.extend_from_slice(&build_packet(mts::PID_VIDEO, first, cc, chunk));
            rest = remainder;
            first = false;
            if chunk.is_empty() {
                break;
            }
        }
        out
    }
}

fn stream_type_tag(stream_type: StreamType) -> u8 {
    match stream_type {
        StreamType::H264 => 0x1B,
        StreamType::H265 => 0x24,
        StreamType::MJPEG | StreamType::JPEG => 0x06,
        StreamType::PCM => 0x80,
        StreamType::ADPCM => 0x81,
    }
}

fn adaptation_stuffing(total: usize) -> Vec<u8> {
    debug_assert!(total >= 1);
    if total == 1 {
        return vec![0u8];
    }
    let mut af = vec![0xFFu8; total];
    #[allow(clippy::cast_possible_truncation)]
    {
        af[0] = (total - 1) as u8;
    }
    af[1] = 0x00;
    af
}

fn build_packet(pid: u16, pusi: bool, cc: u8, payload: &[u8]) -> [u8; mts::PACKET_SIZE] {
    assert!(payload.len() <= PAYLOAD_CAPACITY, "payload must fit in one packet");
    let mut pkt = [0u8; mts::PACKET_SIZE];
    let af_total = PAYLOAD_CAPACITY - payload.len();
    let afc: u8 = if af_total == 0 { 0b01 } else { 0b11 };

    pkt[0] = SYNC_BYTE;
    let pusi_bit = if pusi { 0x40 } else { 0x00 };
    #[allow(clippy::cast_possible_truncation)]
    {
        pkt[1] = pusi_bit | ((pid >> 8) as u8 & 0x1F);
        pkt[2] = (pid & 0xFF) as u8;
    }
    pkt[3] = (afc << 4) | (cc & 0x0F);

    let mut offset = 4;
    if af_total > 0 {
        let af = adaptation_stuffing(af_total);
        pkt[offset..offset + af_total].copy_from_slice(&af);
        offset += af_total;
    }
    pkt[offset..offset + payload.len()].copy_from_slice(payload);
    pkt
}

/// Concatenates the payload bytes of every video-PID packet in a clip,
/// stripping the PES header from the first packet of each elementary
/// stream run. Used by tests to validate that encoding round-trips.
#[must_use]
pub fn extract_video_payload(clip: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pes_header_remaining = 0usize;
    let mut skipping_pes_header = false;

    for packet in clip.chunks_exact(mts::PACKET_SIZE) {
        let view = mts::PacketView::new(packet);
        if view.pid() != mts::PID_VIDEO {
            continue;
        }
        let afc = view.adaptation_field_control();
        let mut offset = 4;
        if afc & 0b10 != 0 {
            let af_len = packet[4] as usize;
            offset += 1 + af_len;
        }
        let mut data = &packet[offset..];

        if is_payload_unit_start(packet) {
            // 6-byte fixed PES header + 3-byte optional header (no PTS/DTS).
            skipping_pes_header = true;
            pes_header_remaining = 9;
        }
        if skipping_pes_header {
            let skip = pes_header_remaining.min(data.len());
            data = &data[skip..];
            pes_header_remaining -= skip;
            if pes_header_remaining == 0 {
                skipping_pes_header = false;
            }
        }
        out.extend_from_slice(data);
    }
    out
}

fn is_payload_unit_start(packet: &[u8]) -> bool {
    packet[1] & 0x40 != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_emitted_packet_is_188_bytes_and_synced() {
        let mut enc = MtsEncoder::new(StreamType::H264, 2);
        let clip = enc.encode_unit(&[0xAB; 300]);
        assert_eq!(clip.len() % mts::PACKET_SIZE, 0);
        for packet in clip.chunks_exact(mts::PACKET_SIZE) {
            assert_eq!(packet[0], SYNC_BYTE);
        }
    }

    #[test]
    fn psi_is_inserted_on_the_first_unit_and_then_at_cadence() {
        let mut enc = MtsEncoder::new(StreamType::H264, 2);
        let first = enc.encode_unit(&[0x01; 10]);
        let pids: Vec<u16> =
            first.chunks_exact(mts::PACKET_SIZE).map(mts::pid_of).collect();
        assert_eq!(pids[0], mts::PID_PAT);
        assert_eq!(pids[1], mts::PID_PMT);

        let second = enc.encode_unit(&[0x02; 10]);
        let second_pids: Vec<u16> =
            second.chunks_exact(mts::PACKET_SIZE).map(mts::pid_of).collect();
        assert!(!second_pids.contains(&mts::PID_PAT), "no PSI before cadence is due");

        let third = enc.encode_unit(&[0x03; 10]);
        let third_pids: Vec<u16> =
            third.chunks_exact(mts::PACKET_SIZE).map(mts::pid_of).collect();
        assert_eq!(third_pids[0], mts::PID_PAT);
    }

    #[test]
    fn continuity_counters_advance_per_pid_modulo_16() {
        let mut enc = MtsEncoder::new(StreamType::H264, 1);
        let mut ccs = Vec::new();
        for i in 0..20u8 {
            let clip = enc.encode_unit(&[i; 4]);
            for packet in clip.chunks_exact(mts::PACKET_SIZE) {
                if mts::pid_of(packet) == mts::PID_VIDEO {
                    ccs.push(mts::continuity_counter_of(packet));
                }
            }
        }
        for window in ccs.windows(2) {
            assert_eq!(window[1], (window[0] + 1) & 0x0F);
        }
    }

    #[test]
    fn video_payload_round_trips_through_encode_and_extract() {
        let mut enc = MtsEncoder::new(StreamType::H264, 1);
        let payload = b"access-unit-payload-bytes-that-span-more-than-one-packet-worth-of-data-so-we-exercise-continuation-packets-too".repeat(3);
        let clip = enc.encode_unit(&payload);
        let extracted = extract_video_payload(&clip);
        assert_eq!(extracted, payload);
    }

    #[test]
    fn small_payload_fits_in_a_single_packet_with_stuffing() {
        let mut enc = MtsEncoder::new(StreamType::H264, 1);
        let payload = b"tiny";
        let clip = enc.encode_unit(payload);
        let extracted = extract_video_payload(&clip);
        assert_eq!(extracted, payload);
    }
}
