#![allow(missing_docs, dead_code)]
//! Shared benchmark support: request payloads and collection keys.

use rand::RngExt;

/// Known SQL injection test payloads.
pub fn sqli_payloads() -> Vec<String> {
    vec![
        "' OR '1'='1".into(),
        "1; DROP TABLE users--".into(),
        "' UNION SELECT * FROM passwords--".into(),
        "admin'--".into(),
        "1' AND SLEEP(5)--".into(),
        "' UNION SELECT username,password FROM users--".into(),
    ]
}

/// Known XSS test payloads.
pub fn xss_payloads() -> Vec<String> {
    vec![
        "<script>alert('xss')</script>".into(),
        "<img src=x onerror=alert(1)>".into(),
        "<svg onload=alert(1)>".into(),
        "javascript:alert(document.cookie)".into(),
        "\"><script>alert(String.fromCharCode(88,83,83))</script>".into(),
    ]
}

/// Benign payloads for false-positive paths.
pub fn benign_payloads() -> Vec<String> {
    vec![
        "Hello, world!".into(),
        "The quick brown fox jumps over the lazy dog".into(),
        "SELECT your favorite color from the dropdown".into(),
        "O'Brien's restaurant serves great food".into(),
        "/api/v1/users/123/profile".into(),
        "user@example.com".into(),
    ]
}

/// Percent-encode a payload for use as a query string value.
pub fn url_encode(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len() * 3);
    for byte in payload.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            },
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Build a query string with `count` parameters, the last carrying `payload`.
pub fn query_with_payload(count: usize, payload: &str) -> String {
    let mut params: Vec<String> = (0..count.saturating_sub(1))
        .map(|i| format!("p{i}=value{i}"))
        .collect();
    params.push(format!("q={}", url_encode(payload)));
    params.join("&")
}

/// Generate `count` random IPv4 addresses in 10.0.0.0/8.
pub fn random_ipv4_addresses(count: usize) -> Vec<String> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| {
            format!(
                "10.{}.{}.{}",
                rng.random_range(0..=255u8),
                rng.random_range(0..=255u8),
                rng.random_range(1..=254u8)
            )
        })
        .collect()
}

/// Generate `count` distinct collection keys.
pub fn collection_keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("counter_{i:05}")).collect()
}
