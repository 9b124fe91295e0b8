//! Transformations applied to values before an operator sees them

use super::error::{WafError, WafResult};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// A normalization step.
///
/// Implementations must be pure: the output depends only on the input.
pub trait Transformation: Send + Sync {
    /// Name as written in rules, without the `t:` prefix
    fn name(&self) -> &'static str;

    /// Transform `input` (zero-copy when nothing changes)
    fn apply<'a>(&self, input: &'a str) -> Cow<'a, str>;
}

/// Built-in transformations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Lowercase
    Lowercase,
    /// Uppercase
    Uppercase,
    /// URL decode
    UrlDecode,
    /// URL decode, including `%uXXXX`
    UrlDecodeUni,
    /// HTML entity decode
    HtmlEntityDecode,
    /// Remove whitespace
    RemoveWhitespace,
    /// Compress whitespace
    CompressWhitespace,
    /// Remove comments (SQL/HTML)
    RemoveComments,
    /// Remove null bytes
    RemoveNulls,
    /// Normalize path
    NormalizePath,
    /// Base64 decode
    Base64Decode,
    /// Hex decode
    HexDecode,
    /// Trim surrounding whitespace
    Trim,
    /// Replace the value with its length in bytes
    Length,
    /// None (clears the pipeline at load time)
    None,
}

impl Transform {
    /// Parse from string
    pub fn parse(s: &str) -> WafResult<Self> {
        match s.to_lowercase().as_str() {
            "lowercase" | "lower" => Ok(Self::Lowercase),
            "uppercase" | "upper" => Ok(Self::Uppercase),
            "urldecode" | "url_decode" => Ok(Self::UrlDecode),
            "urldecodeuni" | "url_decode_uni" => Ok(Self::UrlDecodeUni),
            "htmlentitydecode" | "html_entity_decode" => Ok(Self::HtmlEntityDecode),
            "removewhitespace" | "remove_whitespace" => Ok(Self::RemoveWhitespace),
            "compresswhitespace" | "compress_whitespace" => Ok(Self::CompressWhitespace),
            "removecomments" | "remove_comments" => Ok(Self::RemoveComments),
            "removenulls" | "remove_nulls" => Ok(Self::RemoveNulls),
            "normalizepath" | "normalize_path" => Ok(Self::NormalizePath),
            "base64decode" | "base64_decode" => Ok(Self::Base64Decode),
            "hexdecode" | "hex_decode" => Ok(Self::HexDecode),
            "trim" => Ok(Self::Trim),
            "length" => Ok(Self::Length),
            "none" => Ok(Self::None),
            _ => Err(WafError::UnknownTransform(s.to_string())),
        }
    }

    pub(crate) fn url_decode(input: &str) -> String {
        let bytes = input.as_bytes();
        let mut result = Vec::with_capacity(bytes.len());
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'%' if i + 2 < bytes.len() => {
                    match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                        (Some(hi), Some(lo)) => {
                            result.push(hi << 4 | lo);
                            i += 3;
                        },
                        _ => {
                            result.push(b'%');
                            i += 1;
                        },
                    }
                },
                b'+' => {
                    result.push(b' ');
                    i += 1;
                },
                b => {
                    result.push(b);
                    i += 1;
                },
            }
        }
        String::from_utf8_lossy(&result).into_owned()
    }

    fn url_decode_uni(input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut rest = input;

        // %uXXXX first, the remainder goes through the plain decoder
        while let Some(pos) = rest.find("%u").or_else(|| rest.find("%U")) {
            let code = rest
                .get(pos + 2..pos + 6)
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .and_then(char::from_u32);
            match code {
                Some(c) => {
                    result.push_str(&Self::url_decode(&rest[..pos]));
                    result.push(c);
                    rest = &rest[pos + 6..];
                },
                None => {
                    result.push_str(&Self::url_decode(&rest[..pos + 2]));
                    rest = &rest[pos + 2..];
                },
            }
        }
        result.push_str(&Self::url_decode(rest));
        result
    }

    fn html_entity_decode(input: &str) -> String {
        let mut result = input.to_string();
        let entities = [
            ("&lt;", "<"),
            ("&gt;", ">"),
            ("&quot;", "\""),
            ("&apos;", "'"),
            ("&nbsp;", " "),
            ("&amp;", "&"),
        ];

        for (entity, replacement) in &entities {
            result = result.replace(entity, replacement);
        }

        // numeric entities &#NNN; and &#xHH;
        let mut decoded = String::with_capacity(result.len());
        let mut rest = result.as_str();
        while let Some(start) = rest.find("&#") {
            decoded.push_str(&rest[..start]);
            let tail = &rest[start + 2..];
            let parsed = tail.find(';').and_then(|end| {
                let num = &tail[..end];
                let code = match num.strip_prefix(['x', 'X']) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => num.parse::<u32>().ok(),
                };
                code.and_then(char::from_u32).map(|c| (c, end))
            });
            match parsed {
                Some((c, end)) => {
                    decoded.push(c);
                    rest = &tail[end + 1..];
                },
                None => {
                    decoded.push_str("&#");
                    rest = tail;
                },
            }
        }
        decoded.push_str(rest);
        decoded
    }

    fn compress_whitespace(input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut prev_ws = false;

        for c in input.chars() {
            if c.is_whitespace() {
                if !prev_ws {
                    result.push(' ');
                    prev_ws = true;
                }
            } else {
                result.push(c);
                prev_ws = false;
            }
        }
        result
    }

    fn remove_comments(input: &str) -> String {
        let mut result = input.to_string();

        // /* ... */ and <!-- ... -->
        for (open, close) in [("/*", "*/"), ("<!--", "-->")] {
            while let Some(start) = result.find(open) {
                match result[start..].find(close) {
                    Some(end) => {
                        result.replace_range(start..start + end + close.len(), "");
                    },
                    None => {
                        result.truncate(start);
                        break;
                    },
                }
            }
        }

        // -- and # run to end of line
        for marker in ["--", "#"] {
            if let Some(pos) = result.find(marker) {
                match result[pos..].find('\n') {
                    Some(nl) => result.replace_range(pos..pos + nl, ""),
                    None => result.truncate(pos),
                }
            }
        }

        result
    }

    fn normalize_path(input: &str) -> String {
        let mut parts: Vec<&str> = Vec::new();

        for part in input.split('/') {
            match part {
                "" | "." => {},
                ".." => {
                    parts.pop();
                },
                _ => parts.push(part),
            }
        }

        let mut normalized = if input.starts_with('/') {
            format!("/{}", parts.join("/"))
        } else {
            parts.join("/")
        };
        if input.ends_with('/') && !normalized.ends_with('/') {
            normalized.push('/');
        }
        normalized
    }

    fn base64_decode(input: &str) -> Option<String> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(input.trim())
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    fn hex_decode(input: &str) -> String {
        let bytes = input.as_bytes();
        let mut result = Vec::with_capacity(bytes.len() / 2);
        for pair in bytes.chunks(2) {
            match pair {
                [hi, lo] => match (hex_value(*hi), hex_value(*lo)) {
                    (Some(hi), Some(lo)) => result.push(hi << 4 | lo),
                    _ => result.extend_from_slice(pair),
                },
                _ => result.extend_from_slice(pair),
            }
        }
        String::from_utf8_lossy(&result).into_owned()
    }
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

fn owned_if_changed(input: &str, output: String) -> Cow<'_, str> {
    if output == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(output)
    }
}

impl Transformation for Transform {
    fn name(&self) -> &'static str {
        match self {
            Self::Lowercase => "lowercase",
            Self::Uppercase => "uppercase",
            Self::UrlDecode => "urlDecode",
            Self::UrlDecodeUni => "urlDecodeUni",
            Self::HtmlEntityDecode => "htmlEntityDecode",
            Self::RemoveWhitespace => "removeWhitespace",
            Self::CompressWhitespace => "compressWhitespace",
            Self::RemoveComments => "removeComments",
            Self::RemoveNulls => "removeNulls",
            Self::NormalizePath => "normalizePath",
            Self::Base64Decode => "base64Decode",
            Self::HexDecode => "hexDecode",
            Self::Trim => "trim",
            Self::Length => "length",
            Self::None => "none",
        }
    }

    fn apply<'a>(&self, input: &'a str) -> Cow<'a, str> {
        match self {
            Self::None => Cow::Borrowed(input),
            Self::Lowercase => owned_if_changed(input, input.to_lowercase()),
            Self::Uppercase => owned_if_changed(input, input.to_uppercase()),
            Self::UrlDecode => owned_if_changed(input, Self::url_decode(input)),
            Self::UrlDecodeUni => owned_if_changed(input, Self::url_decode_uni(input)),
            Self::HtmlEntityDecode => owned_if_changed(input, Self::html_entity_decode(input)),
            Self::RemoveWhitespace => {
                owned_if_changed(input, input.chars().filter(|c| !c.is_whitespace()).collect())
            },
            Self::CompressWhitespace => owned_if_changed(input, Self::compress_whitespace(input)),
            Self::RemoveComments => owned_if_changed(input, Self::remove_comments(input)),
            Self::RemoveNulls => owned_if_changed(input, input.replace('\0', "")),
            Self::NormalizePath => owned_if_changed(input, Self::normalize_path(input)),
            Self::Base64Decode => match Self::base64_decode(input) {
                Some(decoded) => owned_if_changed(input, decoded),
                None => Cow::Borrowed(input),
            },
            Self::HexDecode => owned_if_changed(input, Self::hex_decode(input)),
            Self::Trim => Cow::Borrowed(input.trim()),
            Self::Length => Cow::Owned(input.len().to_string()),
        }
    }
}

/// Ordered transformations of one rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformPipeline {
    steps: Vec<Transform>,
}

impl TransformPipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step; `none` clears every step added so far.
    pub fn push(&mut self, transform: Transform) {
        if transform == Transform::None {
            self.steps.clear();
        } else {
            self.steps.push(transform);
        }
    }

    /// Configured steps.
    pub fn steps(&self) -> &[Transform] {
        &self.steps
    }

    /// Whether no step is configured.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the pipeline.
    ///
    /// Yields `(value, reference)` pairs where the reference lists the
    /// applied steps as `t:a,t:b`. Without `multi_match` only the final value
    /// is yielded. With it, the untransformed value comes first, followed by
    /// every intermediate value that differs from the previous one.
    pub fn execute(&self, value: &str, multi_match: bool) -> Vec<(String, String)> {
        let mut results = Vec::new();
        if multi_match {
            results.push((value.to_string(), String::new()));
        }

        let mut current = value.to_string();
        let mut reference = String::new();
        for step in &self.steps {
            let next = step.apply(&current).into_owned();
            if !reference.is_empty() {
                reference.push(',');
            }
            reference.push_str("t:");
            reference.push_str(step.name());

            if multi_match && next != current {
                results.push((next.clone(), reference.clone()));
            }
            current = next;
        }

        if !multi_match {
            results.push((current, reference));
        }
        results
    }
}

impl FromIterator<Transform> for TransformPipeline {
    fn from_iter<I: IntoIterator<Item = Transform>>(iter: I) -> Self {
        let mut pipeline = Self::new();
        for transform in iter {
            pipeline.push(transform);
        }
        pipeline
    }
}
