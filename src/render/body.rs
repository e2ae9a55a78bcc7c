//! Body extraction: flattens a MIME tree into plain-text and HTML bodies.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::FilterRule;
use crate::error::FilterError;
use crate::model::mail::BodyResult;
use crate::parser::mime::{Disposition, MimeTree};
use crate::render::html::{strip_remote_background, strip_xml_prolog, Sanitizer};

/// Compiled `pattern -> replacement` rewrites, keyed by MIME type.
#[derive(Debug, Clone, Default)]
pub struct ContentFilters {
    rules: BTreeMap<String, Vec<(Regex, String)>>,
}

impl ContentFilters {
    /// Compile the configured rules. Rules that do not compile are logged
    /// and left out.
    pub fn compile(config: &BTreeMap<String, Vec<FilterRule>>) -> Self {
        let mut rules: BTreeMap<String, Vec<(Regex, String)>> = BTreeMap::new();
        for (content_type, list) in config {
            for rule in list {
                match Regex::new(&rule.pattern) {
                    Ok(re) => rules
                        .entry(content_type.to_ascii_lowercase())
                        .or_default()
                        .push((re, rule.replacement.clone())),
                    Err(source) => {
                        let err = FilterError {
                            content_type: content_type.clone(),
                            pattern: rule.pattern.clone(),
                            source,
                        };
                        warn!(error = %err, "Skipping content filter");
                    }
                }
            }
        }
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule configured for `content_type`, in order.
    pub fn apply(&self, content_type: &str, text: &str) -> String {
        let Some(rules) = self.rules.get(content_type) else {
            return text.to_string();
        };
        rules.iter().fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, replacement.as_str()).into_owned()
        })
    }
}

/// Flatten `tree` into its display bodies.
///
/// Every `text/plain` and `text/html` leaf that is not an attachment
/// contributes to its accumulator in traversal order, including leaves
/// decoded out of CMS containers.
pub fn extract(tree: &MimeTree, filters: &ContentFilters, sanitizer: &dyn Sanitizer) -> BodyResult {
    let mut plain = String::new();
    let mut html = String::new();

    for (id, part) in tree.walk() {
        let Some(body) = &part.body else {
            continue;
        };
        if part.disposition == Disposition::Attachment {
            continue;
        }
        let accumulator = match part.content_type.as_str() {
            "text/plain" => &mut plain,
            "text/html" => &mut html,
            _ => continue,
        };
        debug!(
            part = id,
            content_type = %part.content_type,
            synthesized = part.synthesized,
            "Collecting body part"
        );
        if !accumulator.is_empty() && !accumulator.ends_with('\n') {
            accumulator.push('\n');
        }
        accumulator.push_str(&body.to_text());
    }

    let plain = filters.apply("text/plain", &plain);
    let html = filters.apply("text/html", &html);

    let plain = if contains_html_marker(&plain) {
        sanitizer.strip_tags(&plain)
    } else if plain.trim().is_empty() {
        sanitizer.strip_tags(&html)
    } else {
        plain
    };

    let html = (!html.trim().is_empty()).then(|| clean_html(&html, sanitizer));

    BodyResult { plain, html }
}

/// Sanitizing plus removal of remote background images.
pub fn clean_html(html: &str, sanitizer: &dyn Sanitizer) -> String {
    let html = strip_xml_prolog(html);
    let html = sanitizer.sanitize(&html);
    strip_remote_background(&html)
}

/// Plain-text bodies that are really HTML carry an `<html` tag.
fn contains_html_marker(text: &str) -> bool {
    text.as_bytes()
        .windows(5)
        .any(|w| w.eq_ignore_ascii_case(b"<html"))
}
