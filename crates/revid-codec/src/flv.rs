// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Simplified FLV tag encoder for the FLV/RTMP clip sender.
//!
//! Produces a file header once per stream and one video tag per access
//! unit, at a configured fixed frame duration. `validate_tag` is the
//! counterpart used by the FLV clip sender to recognise a malformed tag
//! (`ErrInvalidFlvTag`) without tearing down the connection, per the
//! sender's non-fatal-malformed-tag handling.

const VIDEO_TAG_TYPE: u8 = 0x09;
const FRAME_TYPE_KEY: u8 = 1;
const FRAME_TYPE_INTER: u8 = 2;
const AVC_PACKET_TYPE_NALU: u8 = 1;

/// Codec id carried in the first nibble of a video tag's payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvCodecId {
    Avc,
    Hevc,
    Mjpeg,
}

impl FlvCodecId {
    const fn tag(self) -> u8 {
        match self {
            Self::Avc => 7,
            Self::Hevc => 12,
            Self::Mjpeg => 6,
        }
    }
}

/// Builds the 9-byte FLV file header followed by the mandatory
/// `PreviousTagSize0` field.
#[must_use]
pub fn file_header() -> Vec<u8> {
    let mut out = Vec::with_capacity(13);
    out.extend_from_slice(b"FLV");
    out.push(1); // version
    out.push(0x01); // flags: video present, no audio
    out.extend_from_slice(&9u32.to_be_bytes()); // header size
    out.extend_from_slice(&0u32.to_be_bytes()); // PreviousTagSize0
    out
}

/// Encodes access units into FLV video tags at a fixed frame duration.
pub struct FlvEncoder {
    codec: FlvCodecId,
    frame_duration_ms: u32,
    timestamp_ms: u32,
}

impl FlvEncoder {
    #[must_use]
    pub fn new(codec: FlvCodecId, fps: u32) -> Self {
        let frame_duration_ms = if fps == 0 { 0 } else { 1000 / fps.max(1) };
        Self { codec, frame_duration_ms, timestamp_ms: 0 }
    }

    /// Encodes one access unit into a single FLV tag (11-byte tag header +
    /// payload + 4-byte trailing tag size).
    pub fn encode_frame(&mut self, payload: &[u8], keyframe: bool) -> Vec<u8> {
        let frame_type = if keyframe { FRAME_TYPE_KEY } else { FRAME_TYPE_INTER };
        let mut data = Vec::with_capacity(payload.len() + 5);
        data.push((frame_type << 4) | self.codec.tag());
        data.push(AVC_PACKET_TYPE_NALU);
        data.extend_from_slice(&[0, 0, 0]); // composition time, not used
        data.extend_from_slice(payload);

        let mut tag = Vec::with_capacity(11 + data.len() + 4);
        tag.push(VIDEO_TAG_TYPE);
        #[allow(clippy::cast_possible_truncation)]
        let data_len = data.len() as u32;
        tag.extend_from_slice(&data_len.to_be_bytes()[1..]);
        let ts = self.timestamp_ms;
        tag.extend_from_slice(&ts.to_be_bytes()[1..]);
        tag.push(0); // timestamp extended byte, unused below 2^24 ms
        tag.extend_from_slice(&[0, 0, 0]); // stream id, always 0
        tag.extend_from_slice(&data);
        #[allow(clippy::cast_possible_truncation)]
        let tag_size = tag.len() as u32;
        tag.extend_from_slice(&tag_size.to_be_bytes());

        self.timestamp_ms = self.timestamp_ms.wrapping_add(self.frame_duration_ms);
        tag
    }
}

/// Reads the FLV tag type byte (`0x08` audio, `0x09` video) from an
/// already-validated tag.
#[must_use]
pub fn tag_type(tag: &[u8]) -> u8 {
    tag[0]
}

/// Reads the 24-bit timestamp (plus extended byte) from an already-validated
/// tag, in milliseconds.
#[must_use]
pub fn tag_timestamp_ms(tag: &[u8]) -> u32 {
    let ext = u32::from(tag[7]);
    (ext << 24) | (u32::from(tag[4]) << 16) | (u32::from(tag[5]) << 8) | u32::from(tag[6])
}

/// Checks the structural validity of a single encoded tag (11-byte header,
/// declared data size matches the buffer, trailing tag size matches).
/// Returns `false` rather than an error type: the caller treats an invalid
/// tag as a skip-and-continue condition, not a fatal one.
#[must_use]
pub fn validate_tag(tag: &[u8]) -> bool {
    if tag.len() < 11 + 4 {
        return false;
    }
    let data_size = (u32::from(tag[1]) << 16) | (u32::from(tag[2]) << 8) | u32::from(tag[3]);
    let expected_len = 11 + data_size as usize + 4;
    if tag.len() != expected_len {
        return false;
    }
    let trailing = u32::from_be_bytes([
        tag[tag.len() - 4],
        tag[tag.len() - 3],
        tag[tag.len() - 2],
        tag[tag.len() - 1],
    ]);
    trailing as usize == 11 + data_size as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_starts_with_flv_signature() {
        let header = file_header();
        assert_eq!(&header[..3], b"FLV");
        assert_eq!(header.len(), 13);
    }

    #[test]
    fn encoded_tag_passes_validation() {
        let mut enc = FlvEncoder::new(FlvCodecId::Avc, 25);
        let tag = enc.encode_frame(&[0xAA; 40], true);
        assert!(validate_tag(&tag));
        assert_eq!(tag[0], VIDEO_TAG_TYPE);
    }

    #[test]
    fn timestamps_advance_by_frame_duration() {
        let mut enc = FlvEncoder::new(FlvCodecId::Avc, 25);
        let first = enc.encode_frame(&[0x00; 4], true);
        let second = enc.encode_frame(&[0x00; 4], false);
        let ts = |tag: &[u8]| (u32::from(tag[4]) << 16) | (u32::from(tag[5]) << 8) | u32::from(tag[6]);
        assert_eq!(ts(&first), 0);
        assert_eq!(ts(&second), 40);
    }

    #[test]
    fn tag_type_and_timestamp_helpers_match_the_encoded_fields() {
        let mut enc = FlvEncoder::new(FlvCodecId::Avc, 25);
        let _first = enc.encode_frame(&[0x00; 4], true);
        let second = enc.encode_frame(&[0x00; 4], false);
        assert_eq!(tag_type(&second), VIDEO_TAG_TYPE);
        assert_eq!(tag_timestamp_ms(&second), 40);
    }

    #[test]
    fn truncated_tag_fails_validation() {
        let mut enc = FlvEncoder::new(FlvCodecId::Avc, 25);
        let mut tag = enc.encode_frame(&[0xAA; 40], true);
        tag.truncate(tag.len() - 2);
        assert!(!validate_tag(&tag));
    }
}
