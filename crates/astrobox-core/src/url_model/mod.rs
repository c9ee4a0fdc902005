//! Output path policy.
//!
//! Everything the extractor writes must land below the download root, and
//! every file the API serves must still be there when it is requested.

mod path;
mod sanitize;

pub use path::{resolve_target_dir, resolve_within_root, title_from_path};
pub use sanitize::{sanitize_prefix, sanitize_template};

/// Output file template with an optional sanitized prefix: `<prefix> - <template>`.
pub fn prefixed_template(prefix: &str, template: &str) -> String {
    if prefix.is_empty() {
        template.to_string()
    } else {
        format!("{prefix} - {template}")
    }
}

/// Remove surrounding double quotes the extractor puts around some paths.
pub fn strip_quotes(path: &str) -> &str {
    path.trim().trim_matches('"')
}
