// SPDX-License-Identifier: Apache-2.0
//! NUL-padded fixed-width string codec.

use bytes::BufMut;

/// Append `text` as a fixed `width`-byte buffer, NUL-padded, always leaving
/// room for at least one terminating NUL.
pub fn put_fixed_string(out: &mut Vec<u8>, text: &str, width: usize) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(width - 1);
    out.put_slice(&bytes[..len]);
    out.put_bytes(0, width - len);
}

/// Read a fixed `width`-byte buffer back into a string, stopping at the
/// first NUL. Returns `None` when the buffer is too short.
#[must_use]
pub fn get_fixed_string(buf: &mut &[u8], width: usize) -> Option<String> {
    if buf.len() < width {
        return None;
    }
    let raw = &buf[..width];
    let end = raw.iter().position(|b| *b == 0).unwrap_or(width);
    let text = String::from_utf8_lossy(&raw[..end]).into_owned();
    *buf = &buf[width..];
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_pads() {
        let mut out = Vec::new();
        put_fixed_string(&mut out, "tex", 8);
        assert_eq!(out.len(), 8);
        assert_eq!(&out[..4], b"tex\0");
        let mut slice = out.as_slice();
        assert_eq!(get_fixed_string(&mut slice, 8).as_deref(), Some("tex"));
        assert!(slice.is_empty());
    }

    #[test]
    fn overlong_input_is_truncated_with_terminator() {
        let mut out = Vec::new();
        put_fixed_string(&mut out, "abcdefgh", 4);
        assert_eq!(out, b"abc\0");
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut slice = [1u8, 2].as_slice();
        assert_eq!(get_fixed_string(&mut slice, 8), None);
    }
}
