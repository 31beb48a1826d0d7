//! The `Source:` backlink convention. The first non-empty line of a paired
//! issue's description points at its counterpart on the other platform:
//!
//! ```text
//! Source: https://gitlab.example.com/team/app/-/issues/3
//!
//! <payload>
//! ```
//!
//! All description writes go through [`compose_description`], and all
//! comparisons go through [`payload_of`], so the payload converges while each
//! side keeps a backlink pointing the right way.

use std::sync::OnceLock;

use regex::Regex;

fn backlink_regex() -> &'static Regex {
    static BACKLINK: OnceLock<Regex> = OnceLock::new();
    BACKLINK.get_or_init(|| {
        Regex::new(r"(?i)^source:\s+(\S+)\s*$").expect("backlink pattern compiles")
    })
}

fn line_starts_backlink(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.len() >= 7 && trimmed[..7].eq_ignore_ascii_case("source:")
}

/// Extracts the counterpart URL from the first non-empty line, if that line
/// is a well-formed backlink.
pub fn parse_backlink(description: &str) -> Option<String> {
    let first = description.lines().find(|line| !line.trim().is_empty())?;
    backlink_regex()
        .captures(first.trim())
        .map(|captures| captures[1].to_owned())
}

/// Removes leading backlink lines (and their blank-line separators) from a
/// description, collapsing accidental duplicates. Text without a leading
/// backlink passes through unchanged.
pub fn strip_backlink(description: &str) -> String {
    let lines = description.split('\n').collect::<Vec<_>>();
    let mut index = 0;

    // A backlink may sit after stray blank lines; only consume those blanks
    // when a backlink actually follows.
    let mut probe = index;
    while probe < lines.len() && lines[probe].trim().is_empty() {
        probe += 1;
    }
    if probe >= lines.len() || !line_starts_backlink(lines[probe]) {
        return description.to_owned();
    }
    index = probe;

    while index < lines.len() && line_starts_backlink(lines[index]) {
        index += 1;
        while index < lines.len() && lines[index].trim().is_empty() {
            index += 1;
        }
    }

    lines[index..].join("\n")
}

/// The backlink-stripped payload, with an empty result normalized to `None`
/// so an absent description and a backlink-only description compare equal.
pub fn payload_of(description: Option<&str>) -> Option<String> {
    let stripped = strip_backlink(description?);
    if stripped.trim().is_empty() {
        None
    } else {
        Some(stripped)
    }
}

/// Renders the full description for one side: a fresh backlink to the
/// counterpart, a blank separator when a body remains, then the payload.
pub fn compose_description(payload: Option<&str>, counterpart_url: &str) -> String {
    match payload {
        Some(body) if !body.trim().is_empty() => {
            format!("Source: {counterpart_url}\n\n{body}")
        }
        _ => format!("Source: {counterpart_url}"),
    }
}

/// Rewrites a raw remote description with the canonical backlink, preserving
/// the payload. Applying this any number of times yields the same text.
pub fn normalize_description(raw: Option<&str>, counterpart_url: &str) -> String {
    let payload = payload_of(raw);
    compose_description(payload.as_deref(), counterpart_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://gitlab.example.com/team/app/-/issues/3";

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            None,
            Some(""),
            Some("plain body"),
            Some("Source: https://old.example.com/issues/9\n\nbody"),
            Some("SOURCE: https://old.example.com/issues/9\nbody without separator"),
            Some("first paragraph\n\nsecond paragraph"),
        ];

        for input in inputs {
            let once = normalize_description(input, URL);
            let twice = normalize_description(Some(once.as_str()), URL);
            let thrice = normalize_description(Some(twice.as_str()), URL);
            assert_eq!(once, twice, "input {input:?}");
            assert_eq!(twice, thrice, "input {input:?}");
        }
    }

    #[test]
    fn duplicate_backlinks_collapse() {
        let raw = format!("Source: {URL}\nSource: {URL}\n\nSource: {URL}\n\nbody");
        assert_eq!(strip_backlink(&raw), "body");
        assert_eq!(
            normalize_description(Some(raw.as_str()), URL),
            format!("Source: {URL}\n\nbody")
        );
    }

    #[test]
    fn payload_survives_rewrite() {
        let raw = "Source: https://stale.example.com/issues/1\n\nkeep\n\nme";
        assert_eq!(payload_of(Some(raw)).as_deref(), Some("keep\n\nme"));
        assert_eq!(
            normalize_description(Some(raw), URL),
            format!("Source: {URL}\n\nkeep\n\nme")
        );
    }

    #[test]
    fn text_without_backlink_is_untouched_by_strip() {
        let raw = "Sources are listed below\nSource code attached";
        assert_eq!(strip_backlink(raw), raw);
        assert_eq!(parse_backlink(raw), None);
    }

    #[test]
    fn backlink_only_description_has_no_payload() {
        let raw = format!("Source: {URL}");
        assert_eq!(payload_of(Some(raw.as_str())), None);
        assert_eq!(normalize_description(Some(raw.as_str()), URL), raw);
    }

    #[test]
    fn parse_recognizes_first_non_empty_line() {
        let raw = format!("\n  \nSource: {URL}\n\nbody");
        assert_eq!(parse_backlink(&raw).as_deref(), Some(URL));
        assert_eq!(parse_backlink("body first\nSource: x"), None);
    }
}
