//! Filename extraction from a URL path.

/// Last non-empty path segment of `url`, as a filename hint.
/// `None` when the URL cannot be parsed or the path is empty/root.
pub fn filename_from_url_path(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_segment() {
        assert_eq!(
            filename_from_url_path("https://example.com/a/b/file.iso").as_deref(),
            Some("file.iso")
        );
        assert_eq!(
            filename_from_url_path("https://example.com/single").as_deref(),
            Some("single")
        );
    }

    #[test]
    fn root_or_empty() {
        assert_eq!(filename_from_url_path("https://example.com/"), None);
        assert_eq!(filename_from_url_path("https://example.com"), None);
        assert_eq!(filename_from_url_path("not a url"), None);
    }

    #[test]
    fn query_ignored() {
        assert_eq!(
            filename_from_url_path("https://example.com/file.zip?token=abc").as_deref(),
            Some("file.zip")
        );
    }
}
