//! Modified UTF-8 codec.
//!
//! MUTF-8 differs from standard UTF-8 in two ways: `U+0000` is encoded as
//! the two-byte overlong sequence `0xC0 0x80` instead of a single zero
//! byte (so a decoded string can be `\0`-terminated without truncating
//! at an embedded NUL), and code points above `U+FFFF` are encoded as a
//! surrogate pair of three-byte sequences rather than one four-byte
//! sequence.

use alloc::string::String;
use core::fmt;

/// A MUTF-8 string failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutf8Error {
    /// Ran out of bytes mid-sequence.
    Truncated,
    /// A continuation byte didn't have the `10xxxxxx` pattern.
    BadContinuation,
    /// A leading byte didn't start any recognized sequence length.
    BadLeader,
    /// A high surrogate wasn't immediately followed by a matching low surrogate.
    UnpairedSurrogate,
}

impl fmt::Display for Mutf8Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Mutf8Error::Truncated => "truncated multi-byte sequence",
            Mutf8Error::BadContinuation => "invalid continuation byte",
            Mutf8Error::BadLeader => "invalid leading byte",
            Mutf8Error::UnpairedSurrogate => "unpaired surrogate half",
        };
        f.write_str(msg)
    }
}

/// Decodes a MUTF-8 byte slice into a `String`, validating as it goes.
///
/// Surrogate pairs are reassembled into their single supplementary code
/// point; lone surrogates are rejected rather than silently passed through,
/// matching the member-name validator's "surrogate pairs well-formed"
/// requirement.
pub fn decode(bytes: &[u8]) -> Result<String, Mutf8Error> {
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        if b0 & 0x80 == 0 {
            // Plain ASCII, excluding the overlong-NUL case which also starts
            // with a zero high bit if misencoded as a raw 0x00 byte: treat a
            // raw 0x00 as an error, DEX never emits it.
            if b0 == 0 {
                return Err(Mutf8Error::BadLeader);
            }
            out.push(b0 as char);
            i += 1;
        } else if b0 & 0xE0 == 0xC0 {
            let b1 = cont(bytes, i + 1)?;
            let cp = (((b0 & 0x1F) as u32) << 6) | (b1 as u32);
            if cp == 0 {
                out.push('\0');
            } else {
                out.push(char::from_u32(cp).ok_or(Mutf8Error::BadLeader)?);
            }
            i += 2;
        } else if b0 & 0xF0 == 0xE0 {
            let b1 = cont(bytes, i + 1)?;
            let b2 = cont(bytes, i + 2)?;
            let cp = (((b0 & 0x0F) as u32) << 12) | ((b1 as u32) << 6) | (b2 as u32);
            if (0xD800..=0xDBFF).contains(&cp) {
                // High surrogate: must be followed by a matching low surrogate
                // three-byte sequence, which we splice into one code point.
                let (lo, consumed) = decode_surrogate_pair(bytes, i + 3, cp)?;
                out.push(lo);
                i += 3 + consumed;
            } else if (0xDC00..=0xDFFF).contains(&cp) {
                return Err(Mutf8Error::UnpairedSurrogate);
            } else {
                out.push(char::from_u32(cp).ok_or(Mutf8Error::BadLeader)?);
                i += 3;
            }
        } else {
            return Err(Mutf8Error::BadLeader);
        }
    }
    Ok(out)
}

fn decode_surrogate_pair(bytes: &[u8], at: usize, high: u32) -> Result<(char, usize), Mutf8Error> {
    if at + 2 >= bytes.len() {
        return Err(Mutf8Error::Truncated);
    }
    if bytes[at] != 0xED {
        return Err(Mutf8Error::UnpairedSurrogate);
    }
    let b1 = cont(bytes, at + 1)?;
    let b2 = cont(bytes, at + 2)?;
    let low = (0xEu32 << 12) | ((b1 as u32) << 6) | (b2 as u32);
    if !(0xDC00..=0xDFFF).contains(&low) {
        return Err(Mutf8Error::UnpairedSurrogate);
    }
    let cp = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
    let ch = char::from_u32(cp).ok_or(Mutf8Error::UnpairedSurrogate)?;
    Ok((ch, 3))
}

fn cont(bytes: &[u8], at: usize) -> Result<u8, Mutf8Error> {
    let b = *bytes.get(at).ok_or(Mutf8Error::Truncated)?;
    if b & 0xC0 != 0x80 {
        return Err(Mutf8Error::BadContinuation);
    }
    Ok(b & 0x3F)
}

/// True if `bytes` is well-formed MUTF-8 with no embedded raw NUL.
pub fn is_valid(bytes: &[u8]) -> bool {
    decode(bytes).is_ok()
}

/// Encodes a `&str` to MUTF-8: `\0` as the overlong two-byte form, and
/// supplementary-plane code points as a surrogate pair of three-byte
/// sequences, mirroring [`decode`].
pub fn encode(s: &str) -> alloc::vec::Vec<u8> {
    let mut out = alloc::vec::Vec::with_capacity(s.len());
    for ch in s.chars() {
        let cp = ch as u32;
        if cp == 0 {
            out.push(0xC0);
            out.push(0x80);
        } else if cp < 0x80 {
            out.push(cp as u8);
        } else if cp < 0x800 {
            out.push(0xC0 | (cp >> 6) as u8);
            out.push(0x80 | (cp & 0x3F) as u8);
        } else if cp < 0x10000 {
            out.push(0xE0 | (cp >> 12) as u8);
            out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
            out.push(0x80 | (cp & 0x3F) as u8);
        } else {
            let adjusted = cp - 0x10000;
            let high = 0xD800 + (adjusted >> 10);
            let low = 0xDC00 + (adjusted & 0x3FF);
            for half in [high, low] {
                out.push(0xE0 | (half >> 12) as u8);
                out.push(0x80 | ((half >> 6) & 0x3F) as u8);
                out.push(0x80 | (half & 0x3F) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ascii() {
        assert_eq!(decode(b"hello").unwrap(), "hello");
    }

    #[test]
    fn decodes_overlong_nul() {
        assert_eq!(decode(&[0xC0, 0x80]).unwrap(), "\0");
    }

    #[test]
    fn rejects_raw_nul() {
        assert!(decode(&[0x00]).is_err());
    }

    #[test]
    fn decodes_surrogate_pair_as_one_codepoint() {
        // U+1F600 "grinning face" split into D83D DE00, each wrapped as a
        // MUTF-8 3-byte sequence.
        let bytes = [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80];
        let s = decode(&bytes).unwrap();
        assert_eq!(s.chars().count(), 1);
        assert_eq!(s.chars().next().unwrap() as u32, 0x1F600);
    }

    #[test]
    fn rejects_unpaired_low_surrogate() {
        let bytes = [0xED, 0xB8, 0x80];
        assert_eq!(decode(&bytes), Err(Mutf8Error::UnpairedSurrogate));
    }

    #[test]
    fn rejects_truncated_sequence() {
        assert_eq!(decode(&[0xE0, 0x80]), Err(Mutf8Error::Truncated));
    }

    #[test]
    fn encode_decode_round_trips_ascii() {
        assert_eq!(decode(&encode("hello, world")).unwrap(), "hello, world");
    }

    #[test]
    fn encode_produces_overlong_nul() {
        assert_eq!(encode("\0"), [0xC0, 0x80]);
    }

    #[test]
    fn encode_decode_round_trips_supplementary_plane() {
        let s = "\u{1F600}";
        let encoded = encode(s);
        assert_eq!(encoded.len(), 6);
        assert_eq!(decode(&encoded).unwrap(), s);
    }
}
