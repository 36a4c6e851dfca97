//! Destination filename derivation and Linux-safe sanitization.
//!
//! A task's filename is fixed at creation: the caller-supplied name wins,
//! otherwise the last path segment of the URL, otherwise a generic fallback.

/// Fallback when neither the caller nor the URL yields a usable name.
const DEFAULT_FILENAME: &str = "transfer.bin";

/// Maximum filename length in bytes (Linux NAME_MAX).
const NAME_MAX: usize = 255;

/// Derives a safe filename for a new task.
///
/// Prefers `requested` (caller-supplied), otherwise the last path segment of
/// `url`. The result is sanitized: no `/`, NUL, or control characters, no
/// leading/trailing dots or spaces, length capped at 255 bytes.
pub fn derive_file_name(url: &str, requested: Option<&str>) -> String {
    let candidate = requested
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| last_url_segment(url));

    let raw = match candidate {
        Some(c) => c,
        None => return DEFAULT_FILENAME.to_string(),
    };

    let sanitized = sanitize(&raw);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        DEFAULT_FILENAME.to_string()
    } else {
        sanitized
    }
}

/// Last non-empty path segment of the URL, percent-decoded.
fn last_url_segment(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()?
        .to_string();
    if segment.is_empty() {
        return None;
    }
    // Percent-decode so "my%20file.iso" becomes "my file.iso" before sanitizing.
    let decoded = percent_decode(&segment);
    Some(decoded)
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(v) = u8::from_str_radix(hex, 16) {
                    out.push(v);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Sanitizes a candidate filename for safe use on Linux:
/// separators, NUL, control characters, and whitespace become `_`;
/// runs of `_` collapse; leading/trailing dots, spaces, and underscores are
/// trimmed; length is capped at NAME_MAX on a char boundary.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let mapped = if c == '\0' || c == '/' || c == '\\' || c.is_control() || c.is_whitespace() {
            '_'
        } else {
            c
        };
        if mapped == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(mapped);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_' || c == ' ');
    if trimmed.len() <= NAME_MAX {
        return trimmed.to_string();
    }
    let mut take = NAME_MAX;
    while take > 0 && !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take].to_string()
}
