//! Parsing of the `FILES` declaration section from change metadata.
//!
//! Change authors declare the paths they intend to modify inside the patch
//! source itself: a `FILES:` header followed by one path per line, either in a
//! dedicated `FILES` bundle entry, in the preamble of a unified diff, or in a
//! generator script's comments. Comment markers (`#`, `//`) and list dashes
//! are stripped so the same section works in any of those carriers.

use std::collections::BTreeSet;

/// Extract the declared path set from metadata text.
///
/// Multiple `FILES:` sections accumulate. A section ends at a blank line, at a
/// diff header, or at another `NAME:` metadata header.
pub fn parse_declaration(text: &str) -> BTreeSet<String> {
    let mut declared = BTreeSet::new();
    let mut in_section = false;

    for raw in text.lines() {
        let line = strip_markers(raw);
        if let Some(rest) = line.strip_prefix("FILES:") {
            in_section = true;
            collect_paths(rest, &mut declared);
            continue;
        }
        if !in_section {
            continue;
        }
        if line.is_empty() || is_diff_header(line) || is_metadata_header(line) {
            in_section = false;
            continue;
        }
        collect_paths(line, &mut declared);
    }
    declared
}

fn strip_markers(line: &str) -> &str {
    let mut s = line.trim();
    for marker in ["#", "//"] {
        if let Some(rest) = s.strip_prefix(marker) {
            s = rest.trim();
            break;
        }
    }
    s
}

fn collect_paths(fragment: &str, out: &mut BTreeSet<String>) {
    // A lone "-" is a markdown list dash; a leading "-" glued to a token is
    // stripped for the same reason.
    for token in fragment.split_whitespace() {
        let path = token.strip_prefix('-').unwrap_or(token);
        let path = path.trim_start_matches("./");
        if !path.is_empty() {
            out.insert(path.to_string());
        }
    }
}

fn is_diff_header(line: &str) -> bool {
    line.starts_with("diff --git")
        || line.starts_with("--- ")
        || line.starts_with("+++ ")
        || line.starts_with("@@")
        || line.starts_with("index ")
}

fn is_metadata_header(line: &str) -> bool {
    let Some((head, _)) = line.split_once(':') else {
        return false;
    };
    !head.is_empty()
        && head
            .chars()
            .all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_block_section() {
        let text = "FILES:\nsrc/a.rs\nsrc/b.rs\n\nunrelated\n";
        assert_eq!(parse_declaration(text), set(&["src/a.rs", "src/b.rs"]));
    }

    #[test]
    fn parses_inline_section() {
        let text = "FILES: x.txt y.txt\n";
        assert_eq!(parse_declaration(text), set(&["x.txt", "y.txt"]));
    }

    #[test]
    fn strips_comment_markers_and_dot_slash() {
        let text = "# FILES:\n# ./src/a.rs\n// src/b.rs\n";
        assert_eq!(parse_declaration(text), set(&["src/a.rs", "src/b.rs"]));
    }

    #[test]
    fn section_ends_at_diff_header() {
        let text = "FILES:\nx.txt\ndiff --git a/x.txt b/x.txt\n+y.txt\n";
        assert_eq!(parse_declaration(text), set(&["x.txt"]));
    }

    #[test]
    fn section_ends_at_other_metadata_header() {
        let text = "FILES:\nx.txt\nNOTES: something\ny.txt\n";
        assert_eq!(parse_declaration(text), set(&["x.txt"]));
    }

    #[test]
    fn multiple_sections_accumulate() {
        let text = "FILES: a.txt\n\nFILES:\nb.txt\n";
        assert_eq!(parse_declaration(text), set(&["a.txt", "b.txt"]));
    }

    #[test]
    fn no_section_means_empty_declaration() {
        assert!(parse_declaration("just a script\necho hi\n").is_empty());
    }
}
