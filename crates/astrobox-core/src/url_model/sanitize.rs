//! Sanitizing of user-supplied name fragments.

/// Characters that may not appear in a filename prefix.
fn is_reserved(c: char) -> bool {
    matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control()
}

/// Sanitizes a custom filename prefix.
///
/// - Each run of path separators / reserved characters becomes one `_`
/// - Whitespace runs collapse to one space
/// - Leading and trailing whitespace is trimmed
pub fn sanitize_prefix(value: Option<&str>) -> String {
    #[derive(PartialEq)]
    enum Last {
        Reserved,
        Space,
        Other,
    }

    let raw = value.unwrap_or("").trim();
    let mut out = String::with_capacity(raw.len());
    let mut last = Last::Other;

    for c in raw.chars() {
        if c.is_whitespace() {
            if last != Last::Space {
                out.push(' ');
            }
            last = Last::Space;
        } else if is_reserved(c) {
            if last != Last::Reserved {
                out.push('_');
            }
            last = Last::Reserved;
        } else {
            out.push(c);
            last = Last::Other;
        }
    }

    out.trim().to_string()
}

/// Returns `value` if it is a plain template, else `fallback`.
///
/// Templates containing `..`, `:` or a path separator could escape the
/// target directory and are rejected.
pub fn sanitize_template(value: Option<&str>, fallback: &str) -> String {
    let raw = value.unwrap_or("").trim();
    if raw.is_empty() || raw.contains("..") || raw.contains(':') || raw.contains(['/', '\\']) {
        return fallback.to_string();
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_reserved_runs_become_one_underscore() {
        assert_eq!(sanitize_prefix(Some("a/b\\c")), "a_b_c");
        assert_eq!(sanitize_prefix(Some("what?*<>|now")), "what_now");
        assert_eq!(sanitize_prefix(Some("../../etc")), ".._.._etc");
    }

    #[test]
    fn prefix_whitespace_collapses_and_trims() {
        assert_eq!(sanitize_prefix(Some("  My   Show \t S01 ")), "My Show S01");
        assert_eq!(sanitize_prefix(None), "");
        assert_eq!(sanitize_prefix(Some("   ")), "");
    }

    #[test]
    fn template_fallbacks() {
        let fallback = "%(title)s.%(ext)s";
        assert_eq!(sanitize_template(None, fallback), fallback);
        assert_eq!(sanitize_template(Some("  "), fallback), fallback);
        assert_eq!(sanitize_template(Some("../%(title)s"), fallback), fallback);
        assert_eq!(sanitize_template(Some("sub/%(title)s"), fallback), fallback);
        assert_eq!(sanitize_template(Some("C:%(title)s"), fallback), fallback);
        assert_eq!(
            sanitize_template(Some("%(section_number)02d %(section_title)s.%(ext)s"), fallback),
            "%(section_number)02d %(section_title)s.%(ext)s"
        );
    }
}
