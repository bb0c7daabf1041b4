//! Header Value Extraction
//!
//! Pulls a header value out of a fetched response body using a
//! user-supplied expression, JS-style flag characters and an optional
//! placement template. Every failure path falls open: an empty or invalid
//! pattern, or a pattern that simply does not match, yields the original
//! text so the header is always set to *something*.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use tracing::warn;

lazy_static! {
    /// `$<index>` placement tokens inside a template.
    static ref PLACEMENT_TOKEN: Regex = Regex::new(r"\$(\d+)").unwrap();
}

/// Compile `pattern` with JS-style flag characters applied.
///
/// `i`, `m` and `s` map onto the corresponding regex options; `g` and `u`
/// are meaningless for a first-match extraction and are accepted as no-ops.
/// Unknown flag characters are ignored with a warning.
fn compile(pattern: &str, flags: &str) -> Option<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'g' | 'u' => {}
            other => {
                warn!("Ignoring unsupported pattern flag '{}'", other);
            }
        }
    }
    match builder.build() {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Invalid extraction pattern '{}': {}", pattern, e);
            None
        }
    }
}

/// Extract a value from `text`.
///
/// - Empty or invalid `pattern`, or no match: `text` unchanged.
/// - Empty `template`: the first full match.
/// - Otherwise: `template` with `$<index>` tokens substituted by capture
///   groups (`$0` is the whole match). Tokens naming a group that does not
///   exist or did not participate in the match are left literal.
pub fn match_result(text: &str, pattern: &str, flags: &str, template: &str) -> String {
    if pattern.is_empty() {
        return text.to_string();
    }

    let Some(re) = compile(pattern, flags) else {
        return text.to_string();
    };

    let Some(caps) = re.captures(text) else {
        return text.to_string();
    };

    if template.is_empty() {
        return caps[0].to_string();
    }

    PLACEMENT_TOKEN
        .replace_all(template, |token: &regex::Captures<'_>| {
            let index: usize = token[1].parse().unwrap_or(usize::MAX);
            match caps.get(index) {
                Some(group) => group.as_str().to_string(),
                None => token[0].to_string(),
            }
        })
        .into_owned()
}
