//! Minimal XML field extraction for vendor list responses.
//!
//! Aliyun OSS and Tencent COS answer `ListObjects`-style calls with flat,
//! fixed-schema XML (`ListBucketResult` with repeated `Contents` blocks).
//! The payloads carry no attributes, namespaces, or nesting beyond one
//! level, so a tag scanner is sufficient; keys with embedded markup are not
//! a concern because both vendors entity-encode text nodes.

/// Extract the text of the first `<tag>...</tag>` occurrence in `input`.
pub fn text_of<'a>(input: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = input.find(&open)? + open.len();
    let end = input[start..].find(&close)? + start;
    Some(&input[start..end])
}

/// Extract every `<tag>...</tag>` block body, in document order.
pub fn blocks_of<'a>(input: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut blocks = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find(&open) {
        let body_start = start + open.len();
        let Some(body_len) = rest[body_start..].find(&close) else {
            break;
        };
        blocks.push(&rest[body_start..body_start + body_len]);
        rest = &rest[body_start + body_len + close.len()..];
    }

    blocks
}

/// Decode the five XML entities both vendors emit in text nodes.
pub fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
