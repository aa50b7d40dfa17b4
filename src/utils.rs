//! Utility functions for file naming and path manipulation

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Maximum number of suffix attempts when resolving file collisions
const MAX_SUFFIX_ATTEMPTS: u32 = 9999;

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Everything outside a conservative portable set becomes '_'
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9()._\- ]").unwrap_or_else(|_| unreachable!()))
}

/// Sanitize a user-declared filename for use inside a stage directory
///
/// Strips any path components, replaces unsafe characters, and trims leading
/// dots so a submission can never escape its directory or hide itself.
/// Returns `None` when nothing usable remains.
///
/// # Examples
///
/// ```
/// use chat_ingest::utils::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("../../etc/passwd"), Some("passwd".to_string()));
/// assert_eq!(sanitize_file_name("dump (1).zip"), Some("dump (1).zip".to_string()));
/// assert_eq!(sanitize_file_name("..."), None);
/// ```
pub fn sanitize_file_name(declared: &str) -> Option<String> {
    // Take only the final component; declared names may carry separators
    let base = Path::new(declared)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let cleaned = unsafe_chars().replace_all(base, "_");
    let trimmed = cleaned.trim().trim_start_matches('.').to_string();

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Get a collision-free destination path inside a directory
///
/// Returns `dir/name` untouched when it is free; otherwise appends a
/// monotonic ` (n)` suffix before the extension until a free name is found.
/// Both colliding files are preserved.
///
/// # Examples
///
/// ```no_run
/// use chat_ingest::utils::unique_path;
/// use std::path::Path;
///
/// let dest = unique_path(Path::new("/data/txt"), "dump.txt").unwrap();
/// // If /data/txt/dump.txt exists, returns /data/txt/dump (1).txt, and so on.
/// ```
pub fn unique_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let extension = Path::new(name).extension().and_then(|e| e.to_str());

    for i in 1..=MAX_SUFFIX_ATTEMPTS {
        let suffixed = match extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };
        let path = dir.join(suffixed);
        if !path.exists() {
            return Ok(path);
        }
    }

    Err(Error::Other(format!(
        "could not find a free name for '{}' in {} after {} attempts",
        name,
        dir.display(),
        MAX_SUFFIX_ATTEMPTS
    )))
}

/// Extract a filename from an HTTP response
///
/// Tries the Content-Disposition header first (both plain and RFC 5987
/// encoded forms), then falls back to the last URL path segment, then to
/// "download" as a last resort. The result is sanitized.
pub fn filename_from_response(response: &reqwest::Response, url: &str) -> String {
    if let Some(content_disposition) = response.headers().get("content-disposition")
        && let Ok(value) = content_disposition.to_str()
    {
        for part in value.split(';') {
            let part = part.trim();
            if let Some(raw) = part.strip_prefix("filename=") {
                let name = raw.trim_matches('"');
                if let Some(sanitized) = sanitize_file_name(name) {
                    return sanitized;
                }
            } else if let Some(raw) = part.strip_prefix("filename*=") {
                // RFC 5987: charset'lang'percent-encoded-name
                if let Some(idx) = raw.rfind('\'')
                    && let Ok(decoded) = urlencoding::decode(&raw[idx + 1..])
                    && let Some(sanitized) = sanitize_file_name(&decoded)
                {
                    return sanitized;
                }
            }
        }
    }

    if let Ok(parsed_url) = url::Url::parse(url)
        && let Some(mut segments) = parsed_url.path_segments()
        && let Some(last_segment) = segments.next_back()
        && let Some(sanitized) = sanitize_file_name(last_segment)
    {
        return sanitized;
    }

    "download".to_string()
}
