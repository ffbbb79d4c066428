//! Filename resolution and sanitization.
//!
//! Picks a local filename for a download with the precedence: explicit
//! request name, then Content-Disposition, then the URL's last path segment,
//! then a timestamped fallback. Results are sanitized for Linux filesystems.

mod content_disposition;
mod path;
mod sanitize;

pub use content_disposition::parse_content_disposition_filename;
pub use path::filename_from_url_path;
pub use sanitize::sanitize_filename;

/// Resolve the filename for a new download.
///
/// `server_name` is the (already parsed) Content-Disposition suggestion.
/// `now_ms` feeds the `download_<ts>` fallback so callers control the clock.
pub fn resolve_filename(
    requested: Option<&str>,
    server_name: Option<&str>,
    url: &str,
    now_ms: u64,
) -> String {
    let candidate = requested
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| {
            server_name
                .map(str::to_string)
                .filter(|s| !s.trim().is_empty())
        })
        .or_else(|| filename_from_url_path(url));

    let fallback = || format!("download_{}", now_ms);

    let raw = match candidate {
        Some(c) => c,
        None => return fallback(),
    };

    let sanitized = sanitize_filename(&raw);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        fallback()
    } else {
        sanitized
    }
}

/// Returns a filename that does not collide with any in `existing`:
/// `stem (1).ext`, `stem (2).ext`, … (or `stem (1)` without an extension).
pub fn unique_filename_among(candidate: &str, existing: &[String]) -> String {
    if !existing.iter().any(|s| s == candidate) {
        return candidate.to_string();
    }
    let (stem, ext) = match candidate.rfind('.') {
        Some(i) if i > 0 => candidate.split_at(i),
        _ => (candidate, ""),
    };
    for n in 1.. {
        let name = if ext.is_empty() {
            format!("{} ({})", stem, n)
        } else {
            format!("{} ({}){}", stem, n, ext)
        };
        if !existing.iter().any(|s| s == &name) {
            return name;
        }
    }
    unreachable!("unique_filename_among: exhausted counter")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_name_wins() {
        assert_eq!(
            resolve_filename(
                Some("wanted.iso"),
                Some("other.iso"),
                "https://example.com/third.iso",
                0,
            ),
            "wanted.iso"
        );
    }

    #[test]
    fn server_name_beats_url_tail() {
        assert_eq!(
            resolve_filename(
                None,
                Some("report.pdf"),
                "https://example.com/archive.zip",
                0,
            ),
            "report.pdf"
        );
    }

    #[test]
    fn url_tail_fallback() {
        assert_eq!(
            resolve_filename(None, None, "https://cdn.example.com/a/b/image-12.iso", 0),
            "image-12.iso"
        );
    }

    #[test]
    fn timestamped_default() {
        assert_eq!(
            resolve_filename(None, None, "https://example.com/", 1_700_000_000_000),
            "download_1700000000000"
        );
    }

    #[test]
    fn empty_request_falls_through() {
        assert_eq!(
            resolve_filename(Some("  "), None, "https://example.com/file.bin", 0),
            "file.bin"
        );
    }

    #[test]
    fn unique_no_collision() {
        assert_eq!(unique_filename_among("file.iso", &[]), "file.iso");
        assert_eq!(
            unique_filename_among("file.iso", &["other.zip".to_string()]),
            "file.iso"
        );
    }

    #[test]
    fn unique_counts_up() {
        assert_eq!(
            unique_filename_among("file.iso", &["file.iso".to_string()]),
            "file (1).iso"
        );
        assert_eq!(
            unique_filename_among(
                "file.iso",
                &["file.iso".to_string(), "file (1).iso".to_string()]
            ),
            "file (2).iso"
        );
        assert_eq!(
            unique_filename_among("download", &["download".to_string()]),
            "download (1)"
        );
    }
}
