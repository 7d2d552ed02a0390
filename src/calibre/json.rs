// Minimal byte-oriented JSON field extraction for Calibre messages.
//
// Calibre's smart-device-app wire format is a JSON array `[opcode, {...}]`
// of small, flat objects. A real JSON parser is unnecessary overhead on
// this device and the distilled protocol deliberately stays
// byte-oriented (see the decided Open Question in DESIGN.md): find
// `"key"`, skip whitespace/colon, read a quoted string or a bare
// number. No nesting, no arrays-of-objects support beyond the single
// `"lpaths"` case handled directly in `protocol.rs`.

/// Find `"key": "value"` and copy `value` (JSON-escapes resolved for
/// `\"`, `\\`, `\/`, `\b`, `\f`, `\n`, `\r`, `\t`) into `out`. Returns
/// the number of bytes written, or `None` if the key isn't present.
pub fn extract_string(json: &str, key: &str, out: &mut [u8]) -> Option<usize> {
    let bytes = json.as_bytes();
    let needle_start = find_key(bytes, key)?;
    let mut pos = skip_ws_colon(bytes, needle_start);
    if bytes.get(pos) != Some(&b'"') {
        return None;
    }
    pos += 1;
    let mut written = 0;
    while pos < bytes.len() {
        let c = bytes[pos];
        if c == b'\\' && pos + 1 < bytes.len() {
            let esc = bytes[pos + 1];
            let decoded = match esc {
                b'"' => b'"',
                b'\\' => b'\\',
                b'/' => b'/',
                b'b' => 0x08,
                b'f' => 0x0c,
                b'n' => b'\n',
                b'r' => b'\r',
                b't' => b'\t',
                other => other,
            };
            if written < out.len() {
                out[written] = decoded;
                written += 1;
            }
            pos += 2;
        } else if c == b'"' {
            return Some(written);
        } else {
            if written < out.len() {
                out[written] = c;
                written += 1;
            }
            pos += 1;
        }
    }
    None
}

/// Find `"key": N` (a bare decimal integer, optionally negative).
pub fn extract_int(json: &str, key: &str) -> Option<i64> {
    let bytes = json.as_bytes();
    let needle_start = find_key(bytes, key)?;
    let pos = skip_ws_colon(bytes, needle_start);
    let mut end = pos;
    if bytes.get(end) == Some(&b'-') {
        end += 1;
    }
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    core::str::from_utf8(&bytes[pos..end]).ok()?.parse().ok()
}

pub fn extract_bool(json: &str, key: &str) -> Option<bool> {
    let bytes = json.as_bytes();
    let needle_start = find_key(bytes, key)?;
    let pos = skip_ws_colon(bytes, needle_start);
    if bytes[pos..].starts_with(b"true") {
        Some(true)
    } else if bytes[pos..].starts_with(b"false") {
        Some(false)
    } else {
        None
    }
}

/// Locate `"key"` and return the index just past its closing quote.
fn find_key(bytes: &[u8], key: &str) -> Option<usize> {
    let key = key.as_bytes();
    if bytes.len() < key.len() + 2 {
        return None;
    }
    let mut i = 0;
    while i + key.len() + 2 <= bytes.len() {
        if bytes[i] == b'"' && &bytes[i + 1..i + 1 + key.len()] == key && bytes[i + 1 + key.len()] == b'"' {
            return Some(i + 2 + key.len());
        }
        i += 1;
    }
    None
}

fn skip_ws_colon(bytes: &[u8], mut pos: usize) -> usize {
    while matches!(bytes.get(pos), Some(b' ') | Some(b':') | Some(b'\t')) {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_string_field() {
        let json = r#"{"lpath": "book.epub", "title": "A Tale"}"#;
        let mut buf = [0u8; 64];
        let n = extract_string(json, "lpath", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"book.epub");
        let n = extract_string(json, "title", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"A Tale");
    }

    #[test]
    fn missing_key_returns_none() {
        let json = r#"{"lpath": "book.epub"}"#;
        let mut buf = [0u8; 64];
        assert!(extract_string(json, "uuid", &mut buf).is_none());
    }

    #[test]
    fn extracts_negative_and_positive_ints() {
        let json = r#"{"length": 12345, "calibre_id": -7}"#;
        assert_eq!(extract_int(json, "length"), Some(12345));
        assert_eq!(extract_int(json, "calibre_id"), Some(-7));
        assert_eq!(extract_int(json, "missing"), None);
    }

    #[test]
    fn extracts_bool() {
        let json = r#"{"willStream": true, "willScan": false}"#;
        assert_eq!(extract_bool(json, "willStream"), Some(true));
        assert_eq!(extract_bool(json, "willScan"), Some(false));
    }

    #[test]
    fn decodes_escaped_quotes_in_string() {
        let json = r#"{"title": "Alice's \"Book\""}"#;
        let mut buf = [0u8; 64];
        let n = extract_string(json, "title", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"Alice's \"Book\"");
    }
}
