//! Linux-safe filename sanitization.

const NAME_MAX: usize = 255;

/// Sanitizes a candidate filename for safe use on Linux.
///
/// - Replaces NUL, `/`, `\`, whitespace, and control characters with `_`
/// - Collapses runs of underscores
/// - Trims leading/trailing spaces, dots, and underscores
/// - Truncates to 255 bytes on a char boundary (NAME_MAX)
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let bad = c == '\0' || c == '/' || c == '\\' || c.is_control() || c == ' ' || c == '\t';
        if bad {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '.' || c == '_');

    if trimmed.len() > NAME_MAX {
        let mut take = NAME_MAX;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].to_string()
    } else {
        trimmed.to_string()
    }
}
