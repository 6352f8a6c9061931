// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Delimiter scanning shared by the H.264/H.265 NAL lexer and the JPEG
//! lexer: both split a byte stream on a codec-specific marker rather than a
//! length prefix.

/// Finds the next occurrence of `delim` in `buf` at or after `from`.
#[must_use]
pub fn find_from(buf: &[u8], delim: &[u8], from: usize) -> Option<usize> {
    if delim.is_empty() || from >= buf.len() {
        return None;
    }
    buf[from..].windows(delim.len()).position(|w| w == delim).map(|p| p + from)
}

/// Splits `buf` on every occurrence of `delim`, retaining `delim` as the
/// prefix of each sub-slice that follows it (mirrors the H.264 bytestream
/// convention where the start code belongs to the NAL unit it introduces).
///
/// The region of `buf` before the first delimiter, if non-empty, is
/// returned as a leading slice with no delimiter prefix.
#[must_use]
pub fn scan_until<'a>(buf: &'a [u8], delim: &[u8]) -> Vec<&'a [u8]> {
    let mut out = Vec::new();
    let mut starts = Vec::new();
    let mut pos = 0;
    while let Some(idx) = find_from(buf, delim, pos) {
        starts.push(idx);
        pos = idx + delim.len();
    }

    if starts.is_empty() {
        if !buf.is_empty() {
            out.push(buf);
        }
        return out;
    }

    if starts[0] > 0 {
        out.push(&buf[..starts[0]]);
    }
    for window in starts.windows(2) {
        out.push(&buf[window[0]..window[1]]);
    }
    if let Some(&last) = starts.last() {
        out.push(&buf[last..]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference split that keeps the delimiter attached to what follows,
    /// implemented independently (via repeated `split_at`) so the test
    /// isn't just re-deriving `scan_until` from itself.
    fn reference_split<'a>(buf: &'a [u8], delim: &[u8]) -> Vec<&'a [u8]> {
        let mut pieces = Vec::new();
        let mut rest = buf;
        let mut leading = true;
        loop {
            match find_from(rest, delim, 0) {
                Some(idx) => {
                    if idx > 0 {
                        pieces.push(&rest[..idx]);
                    } else if !leading {
                        // consecutive delimiter with nothing between: empty piece, skip
                    }
                    rest = &rest[idx..];
                    leading = false;
                    // advance past this occurrence to find the *next* one, but keep
                    // `rest` starting at the delimiter so it stays attached.
                    let next = find_from(&rest[delim.len()..], delim, 0);
                    match next {
                        Some(rel) => {
                            let abs = rel + delim.len();
                            pieces.push(&rest[..abs]);
                            rest = &rest[abs..];
                        },
                        None => {
                            pieces.push(rest);
                            rest = &[];
                            break;
                        },
                    }
                },
                None => {
                    if !rest.is_empty() {
                        pieces.push(rest);
                    }
                    break;
                },
            }
        }
        pieces
    }

    #[test]
    fn split_matches_reference_with_leading_data() {
        let buf = b"junk\x00\x00\x01frame-one\x00\x00\x01frame-two";
        let delim = b"\x00\x00\x01";
        assert_eq!(scan_until(buf, delim), reference_split(buf, delim));
    }

    #[test]
    fn split_matches_reference_without_leading_data() {
        let buf = b"\x00\x00\x01a\x00\x00\x01bb\x00\x00\x01ccc";
        let delim = b"\x00\x00\x01";
        assert_eq!(scan_until(buf, delim), reference_split(buf, delim));
    }

    #[test]
    fn no_delimiter_returns_whole_buffer() {
        let buf = b"no delimiter here";
        assert_eq!(scan_until(buf, b"\x00\x00\x01"), vec![&buf[..]]);
    }

    #[test]
    fn empty_buffer_returns_nothing() {
        let buf: &[u8] = b"";
        assert!(scan_until(buf, b"\x00\x00\x01").is_empty());
    }

    #[test]
    fn finds_four_byte_start_code() {
        let buf = b"\x00\x00\x00\x01nal-one\x00\x00\x00\x01nal-two";
        let pieces = scan_until(buf, b"\x00\x00\x00\x01");
        assert_eq!(pieces, vec![&b"\x00\x00\x00\x01nal-one"[..], &b"\x00\x00\x00\x01nal-two"[..]]);
    }
}
