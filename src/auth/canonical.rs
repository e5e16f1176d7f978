//! Canonical request construction per SigV4
//!
//! All components are joined with LF only; the blank line between the
//! header block and the signed-headers list comes from the outer template,
//! not from the header block itself.

/// Hex lookup table for zero-allocation percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// URI encode a string (RFC 3986) using the hex lookup table.
///
/// With `encode_slash` false, `/` passes through unchanged (path segments);
/// with it true, every reserved byte is encoded (query names and values).
pub fn uri_encode(s: &str, encode_slash: bool) -> String {
    let mut result = String::with_capacity(s.len() + 16);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            b'/' if !encode_slash => {
                result.push('/');
            }
            _ => {
                result.push('%');
                result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
    result
}

/// Canonical URI: the URL path with an empty path normalized to `/`.
///
/// Callers pass decoded key segments through [`uri_encode`] when building
/// URLs, so the path arrives here already percent-encoded; it is not
/// encoded a second time.
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Canonical query string: pairs decoded, re-encoded, sorted by name with
/// ties broken by value, missing values normalized to `name=`.
pub fn canonical_query(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(String, String)> = Vec::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        if let Some(pos) = pair.find('=') {
            let key = &pair[..pos];
            let value = &pair[pos + 1..];
            let decoded_key = urlencoding::decode(key).unwrap_or_else(|_| key.into());
            let decoded_value = urlencoding::decode(value).unwrap_or_else(|_| value.into());
            params.push((
                uri_encode(&decoded_key, true),
                uri_encode(&decoded_value, true),
            ));
        } else {
            let decoded = urlencoding::decode(pair).unwrap_or_else(|_| pair.into());
            params.push((uri_encode(&decoded, true), String::new()));
        }
    }

    params.sort_unstable();

    let mut result = String::with_capacity(query.len() + 16);
    for (ii, (k, v)) in params.iter().enumerate() {
        if ii > 0 {
            result.push('&');
        }
        result.push_str(k);
        result.push('=');
        result.push_str(v);
    }
    result
}

/// Trim a header value: outer whitespace removed, inner runs of spaces
/// collapsed to a single space.
pub fn trim_header_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut in_run = false;
    for ch in value.trim().chars() {
        if ch == ' ' {
            if !in_run {
                result.push(' ');
            }
            in_run = true;
        } else {
            result.push(ch);
            in_run = false;
        }
    }
    result
}

/// Canonical header block: `lowercase-name:trimmed-value\n` per header, in
/// the order given. The terminal newline is included.
pub fn canonical_headers(headers: &[(String, String)]) -> String {
    let mut result = String::with_capacity(headers.len() * 64);
    for (name, value) in headers {
        result.push_str(name);
        result.push(':');
        result.push_str(&trim_header_value(value));
        result.push('\n');
    }
    result
}

/// Semicolon-joined lowercase header names, same order as the header block.
pub fn signed_headers(headers: &[(String, String)]) -> String {
    let mut result = String::with_capacity(headers.len() * 20);
    for (ii, (name, _)) in headers.iter().enumerate() {
        if ii > 0 {
            result.push(';');
        }
        result.push_str(name);
    }
    result
}

/// Assemble the full canonical request.
///
/// `headers` must already be the ordered signed-header set.
pub fn canonical_request(
    method: &str,
    path: &str,
    query: &str,
    headers: &[(String, String)],
    payload_hash: &str,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        canonical_uri(path),
        canonical_query(query),
        canonical_headers(headers),
        signed_headers(headers),
        payload_hash
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("hello world", true), "hello%20world");
        assert_eq!(uri_encode("hello/world", true), "hello%2Fworld");
        assert_eq!(uri_encode("hello/world", false), "hello/world");
        assert_eq!(uri_encode("test@example.com", true), "test%40example.com");
    }

    #[test]
    fn test_canonical_uri_empty_path() {
        assert_eq!(canonical_uri(""), "/");
        assert_eq!(canonical_uri("/key/name"), "/key/name");
    }

    #[test]
    fn test_canonical_query_sorting() {
        assert_eq!(canonical_query(""), "");
        assert_eq!(canonical_query("key=value"), "key=value");
        assert_eq!(canonical_query("zebra=1&alpha=2"), "alpha=2&zebra=1");
        // Ties broken by value
        assert_eq!(canonical_query("a=2&a=1"), "a=1&a=2");
        // Missing value normalized to name=
        assert_eq!(canonical_query("uploads"), "uploads=");
    }

    #[test]
    fn test_canonical_query_encodes_values() {
        assert_eq!(canonical_query("k=a/b"), "k=a%2Fb");
        assert_eq!(canonical_query("k=a%20b"), "k=a%20b");
    }

    #[test]
    fn test_trim_header_value() {
        assert_eq!(trim_header_value("  a  b  "), "a b");
        assert_eq!(trim_header_value("plain"), "plain");
    }

    #[test]
    fn test_canonical_request_layout() {
        let headers = vec![
            ("host".to_string(), "example.com".to_string()),
            ("x-amz-date".to_string(), "20230730T133730Z".to_string()),
        ];
        let out = canonical_request("GET", "/", "", &headers, "UNSIGNED-PAYLOAD");
        assert_eq!(
            out,
            "GET\n/\n\nhost:example.com\nx-amz-date:20230730T133730Z\n\nhost;x-amz-date\nUNSIGNED-PAYLOAD"
        );
    }
}
