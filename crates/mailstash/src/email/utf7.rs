//! Modified UTF-7 folder-name decoding (RFC 3501 §5.1.3).
//!
//! IMAP LIST responses encode non-ASCII mailbox names in a UTF-7
//! variant: shifted sections are introduced by `&`, terminated by `-`,
//! use `,` instead of `/` in the base64 alphabet, and `&-` encodes a
//! literal ampersand. Decoding failures fall back to the raw input.

use base64::Engine;

/// Decodes a modified UTF-7 mailbox name to Unicode. Returns the input
/// unchanged when it is not valid modified UTF-7.
pub fn decode_modified_utf7(encoded: &str) -> String {
    match try_decode(encoded) {
        Some(decoded) => decoded,
        None => {
            log::debug!("Mailbox name '{}' is not valid modified UTF-7", encoded);
            encoded.to_string()
        }
    }
}

fn try_decode(encoded: &str) -> Option<String> {
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();

    while let Some(c) = chars.next() {
        if c != '&' {
            out.push(c);
            continue;
        }

        let mut shifted = String::new();
        let mut terminated = false;
        for c in chars.by_ref() {
            if c == '-' {
                terminated = true;
                break;
            }
            shifted.push(c);
        }
        if !terminated {
            return None;
        }

        if shifted.is_empty() {
            // "&-" is a literal ampersand.
            out.push('&');
            continue;
        }

        let b64: String = shifted
            .chars()
            .map(|c| if c == ',' { '/' } else { c })
            .collect();
        let bytes = base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(b64.as_bytes())
            .ok()?;
        if bytes.len() % 2 != 0 {
            return None;
        }

        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        out.push_str(&String::from_utf16(&units).ok()?);
    }

    Some(out)
}
