//! Parse HTTP response header lines into probe fields.

/// Header fields a probe cares about.
#[derive(Debug, Default)]
pub(crate) struct ParsedHeaders {
    pub content_length: Option<u64>,
    /// Raw `Accept-Ranges` value; `None` when the header is absent.
    pub accept_ranges: Option<String>,
    pub content_disposition: Option<String>,
    /// `Content-Type` with parameters stripped (`text/html; charset=..` → `text/html`).
    pub mime: Option<String>,
}

pub(crate) fn parse_headers(lines: &[String]) -> ParsedHeaders {
    let mut out = ParsedHeaders::default();

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            if let Ok(n) = value.parse::<u64>() {
                out.content_length = Some(n);
            }
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            out.accept_ranges = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-disposition") {
            out.content_disposition = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-type") {
            let mime = value.split(';').next().unwrap_or(value).trim();
            if !mime.is_empty() {
                out.mime = Some(mime.to_string());
            }
        }
    }

    out
}

/// Total size from a `Content-Range: bytes a-b/total` line, if present.
pub(crate) fn content_range_total(lines: &[String]) -> Option<u64> {
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("content-range") {
            continue;
        }
        let (_, total) = value.trim().split_once('/')?;
        let total = total.trim();
        if total == "*" {
            return None;
        }
        return total.parse::<u64>().ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn length_and_ranges() {
        let p = parse_headers(&lines(&[
            "HTTP/1.1 200 OK",
            "Content-Length: 12345",
            "Accept-Ranges: bytes",
        ]));
        assert_eq!(p.content_length, Some(12345));
        assert_eq!(p.accept_ranges.as_deref(), Some("bytes"));
    }

    #[test]
    fn ranges_none_kept_verbatim() {
        let p = parse_headers(&lines(&["Accept-Ranges: none"]));
        assert_eq!(p.accept_ranges.as_deref(), Some("none"));
    }

    #[test]
    fn mime_strips_parameters() {
        let p = parse_headers(&lines(&["Content-Type: application/zip; charset=binary"]));
        assert_eq!(p.mime.as_deref(), Some("application/zip"));
    }

    #[test]
    fn disposition_captured() {
        let p = parse_headers(&lines(&[
            "Content-Disposition: attachment; filename=\"report.pdf\"",
        ]));
        assert!(p.content_disposition.as_deref().unwrap().contains("report.pdf"));
    }

    #[test]
    fn content_range_total_variants() {
        assert_eq!(
            content_range_total(&lines(&["Content-Range: bytes 0-0/5000"])),
            Some(5000)
        );
        assert_eq!(
            content_range_total(&lines(&["content-range: bytes */777"])),
            Some(777)
        );
        assert_eq!(content_range_total(&lines(&["Content-Range: bytes 0-0/*"])), None);
        assert_eq!(content_range_total(&lines(&["Content-Length: 5"])), None);
    }
}
