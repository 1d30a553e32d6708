//! Small shared helpers.

const B64_URL: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Return a 22-character URL-safe Base64 rendering of a random UUID4.
///
/// Sixteen random bytes encode to 22 characters once the two trailing
/// padding characters are removed. Used for auto-generated link and demand
/// identifiers.
pub fn new_base64_uuid() -> String {
    encode_compact(uuid::Uuid::new_v4().as_bytes())
}

fn encode_compact(bytes: &[u8; 16]) -> String {
    let mut out = String::with_capacity(22);
    let mut iter = bytes.chunks(3);
    for chunk in &mut iter {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;
        out.push(B64_URL[(triple >> 18) as usize & 0x3f] as char);
        out.push(B64_URL[(triple >> 12) as usize & 0x3f] as char);
        if chunk.len() > 1 {
            out.push(B64_URL[(triple >> 6) as usize & 0x3f] as char);
        }
        if chunk.len() > 2 {
            out.push(B64_URL[triple as usize & 0x3f] as char);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_uuid_length_and_charset() {
        let id = new_base64_uuid();
        assert_eq!(id.len(), 22);
        assert!(id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
    }

    #[test]
    fn test_encode_known_bytes() {
        let id = encode_compact(&[0u8; 16]);
        assert_eq!(id, "AAAAAAAAAAAAAAAAAAAAAA");
        let id = encode_compact(&[0xff; 16]);
        assert_eq!(id, "_____________________w");
    }

    #[test]
    fn test_ids_are_unique() {
        let a = new_base64_uuid();
        let b = new_base64_uuid();
        assert_ne!(a, b);
    }
}
