//-
// Copyright (c) 2026, Mailfront Developers
//
// This file is part of Mailfront.
//
// Mailfront is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailfront is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailfront. If not, see <http://www.gnu.org/licenses/>.

//! IMAP's "modified UTF-7" mailbox name encoding (RFC 3501 § 5.1.3).
//!
//! Mailbox names are kept as UTF-8 internally. Names are decoded when they
//! come off the wire and re-encoded when they are reported back.

use std::borrow::Cow;

const SHIFT: u8 = b'&';

fn is_b64(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || b'+' == ch || b',' == ch
}

fn is_direct(ch: u8) -> bool {
    ch >= b' ' && ch < 0x7F && SHIFT != ch
}

/// Decode a wire-format mailbox name.
///
/// Decoding never fails. Anything that is not a well-formed encoded run is
/// passed through as-is, which includes 8-bit text from clients that send
/// raw UTF-8. A missing `-` terminator is tolerated.
pub fn decode(s: &str) -> Cow<'_, str> {
    if !s.as_bytes().contains(&SHIFT) {
        return Cow::Borrowed(s);
    }

    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut units = Vec::<u16>::new();
    let mut ix = 0;
    while ix < bytes.len() {
        let start = match memchr::memchr(SHIFT, &bytes[ix..]) {
            None => {
                out.push_str(&s[ix..]);
                break;
            }
            Some(off) => ix + off,
        };
        out.push_str(&s[ix..start]);

        let run_start = start + 1;
        let run_end = bytes[run_start..]
            .iter()
            .position(|&ch| !is_b64(ch))
            .map_or(bytes.len(), |off| run_start + off);
        let next = if bytes.get(run_end) == Some(&b'-') {
            run_end + 1
        } else {
            run_end
        };

        if run_start == run_end {
            // "&-", or a lone '&'
            out.push('&');
        } else {
            match base64::decode_config(
                &bytes[run_start..run_end],
                base64::IMAP_MUTF7.decode_allow_trailing_bits(true),
            ) {
                Ok(raw) => {
                    units.clear();
                    units.extend(
                        raw.chunks_exact(2)
                            .map(|c| u16::from_be_bytes([c[0], c[1]])),
                    );
                    out.push_str(&String::from_utf16_lossy(&units));
                }
                Err(_) => out.push_str(&s[start..next]),
            }
        }

        ix = next;
    }

    Cow::Owned(out)
}

/// Encode a UTF-8 mailbox name into wire format.
///
/// The result is minimal: only characters outside printable ASCII are
/// encoded, and every encoded run ends with an explicit `-`.
pub fn encode(s: &str) -> Cow<'_, str> {
    if s.bytes().all(is_direct) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len() * 2);
    let mut pending = String::new();
    for ch in s.chars() {
        if ch.is_ascii() && is_direct(ch as u8) {
            flush_encoded(&mut out, &mut pending);
            out.push(ch);
        } else if '&' == ch {
            flush_encoded(&mut out, &mut pending);
            out.push_str("&-");
        } else {
            pending.push(ch);
        }
    }
    flush_encoded(&mut out, &mut pending);

    Cow::Owned(out)
}

fn flush_encoded(out: &mut String, pending: &mut String) {
    if pending.is_empty() {
        return;
    }

    let raw: Vec<u8> = pending
        .encode_utf16()
        .flat_map(|unit| unit.to_be_bytes().to_vec())
        .collect();
    out.push('&');
    out.push_str(&base64::encode_config(&raw, base64::IMAP_MUTF7));
    out.push('-');
    pending.clear();
}
