//! HTML handling: sanitizing (including remote-attribute stripping) and HTML-to-text.
//!
//! Message HTML is attacker-controlled. The sanitizer rebuilds the document
//! from an html5ever parse tree (via `scraper`) keeping only an allowlist of
//! elements and attributes, so nothing the parser did not understand can
//! survive into the output.

use std::collections::HashSet;
use std::sync::LazyLock;

use ego_tree::NodeRef;
use regex::Regex;
use scraper::{Html, Node};

/// HTML rendering capabilities used by the body extractor.
pub trait Sanitizer: Send + Sync {
    /// Return HTML free of scripts, styles, event handlers, embedded
    /// documents and structural tags. Attributes other than `href` that
    /// point at `http` resources are removed as well.
    fn sanitize(&self, html: &str) -> String;

    /// Render HTML as readable plain text.
    fn strip_tags(&self, html: &str) -> String;
}

/// Elements kept (with their allowed attributes).
const ALLOWED_TAGS: &[&str] = &[
    "a", "abbr", "address", "b", "big", "blockquote", "br", "caption", "center", "cite", "code",
    "col", "colgroup", "dd", "del", "dfn", "div", "dl", "dt", "em", "figcaption", "figure", "font",
    "h1", "h2", "h3", "h4", "h5", "h6", "hr", "i", "img", "ins", "kbd", "li", "mark", "ol", "p",
    "pre", "q", "s", "samp", "small", "span", "strike", "strong", "sub", "sup", "table", "tbody",
    "td", "tfoot", "th", "thead", "tr", "tt", "u", "ul", "var", "wbr",
];

/// Elements removed together with everything inside them.
const DROPPED_TAGS: &[&str] = &[
    "applet", "audio", "button", "embed", "frame", "frameset", "head", "iframe", "input", "math",
    "noembed", "noframes", "noscript", "object", "option", "script", "select", "style", "svg",
    "template", "textarea", "title", "video",
];

const ALLOWED_ATTRIBUTES: &[&str] = &[
    "align", "alt", "bgcolor", "border", "cellpadding", "cellspacing", "cite", "class", "color",
    "cols", "colspan", "datetime", "dir", "face", "height", "href", "hspace", "lang", "rows",
    "rowspan", "size", "span", "src", "start", "style", "summary", "title", "type", "valign",
    "vspace", "width",
];

const VOID_TAGS: &[&str] = &["br", "col", "hr", "img", "wbr"];

/// Allowlist sanitizer built on `scraper`.
#[derive(Debug, Clone)]
pub struct HtmlSanitizer {
    allowed_tags: HashSet<&'static str>,
    dropped_tags: HashSet<&'static str>,
    allowed_attributes: HashSet<&'static str>,
}

impl Default for HtmlSanitizer {
    fn default() -> Self {
        Self {
            allowed_tags: ALLOWED_TAGS.iter().copied().collect(),
            dropped_tags: DROPPED_TAGS.iter().copied().collect(),
            allowed_attributes: ALLOWED_ATTRIBUTES.iter().copied().collect(),
        }
    }
}

impl Sanitizer for HtmlSanitizer {
    fn sanitize(&self, html: &str) -> String {
        let fragment = Html::parse_fragment(html);
        let mut out = String::with_capacity(html.len());
        for child in fragment.root_element().children() {
            self.write_node(child, &mut out);
        }
        out
    }

    fn strip_tags(&self, html: &str) -> String {
        html_to_text(html)
    }
}

impl HtmlSanitizer {
    fn write_node(&self, node: NodeRef<'_, Node>, out: &mut String) {
        match node.value() {
            Node::Text(text) => out.push_str(&html_escape::encode_text(&**text)),
            Node::Element(element) => {
                let name = element.name();
                if self.dropped_tags.contains(name) {
                    return;
                }
                if !self.allowed_tags.contains(name) {
                    // html, body, font wrappers of unknown kinds, ...: keep the content only
                    for child in node.children() {
                        self.write_node(child, out);
                    }
                    return;
                }

                out.push('<');
                out.push_str(name);
                let mut wrote_href = false;
                for (attr, value) in element.attrs() {
                    let attr = attr.to_ascii_lowercase();
                    if !self.keep_attribute(name, &attr, value) {
                        continue;
                    }
                    wrote_href |= attr == "href";
                    out.push(' ');
                    out.push_str(&attr);
                    out.push_str("=\"");
                    out.push_str(&html_escape::encode_double_quoted_attribute(value));
                    out.push('"');
                }
                if name == "a" && wrote_href {
                    out.push_str(" rel=\"noopener noreferrer\"");
                }
                out.push('>');

                if VOID_TAGS.contains(&name) {
                    return;
                }
                for child in node.children() {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
            Node::Document | Node::Fragment => {
                for child in node.children() {
                    self.write_node(child, out);
                }
            }
            _ => {}
        }
    }

    fn keep_attribute(&self, tag: &str, attr: &str, value: &str) -> bool {
        if !self.allowed_attributes.contains(attr) {
            return false;
        }
        // Values arrive entity-decoded, so `&#104;ttp:` is caught here too
        if attr != "href" && mentions_http(value) {
            return false;
        }
        match attr {
            "href" | "cite" => is_safe_url(value, false),
            "src" => tag == "img" && is_safe_url(value, true),
            "style" => {
                let lower = value.to_ascii_lowercase();
                !(lower.contains("expression(")
                    || lower.contains("javascript:")
                    || lower.contains("behavior:")
                    || lower.contains("-moz-binding"))
            }
            _ => true,
        }
    }
}

fn mentions_http(value: &str) -> bool {
    value
        .as_bytes()
        .windows(4)
        .any(|w| w.eq_ignore_ascii_case(b"http"))
}

/// Accept web, mail and inline-content URLs; reject script schemes.
fn is_safe_url(value: &str, allow_data_image: bool) -> bool {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();

    let Some(colon) = compact.find(':') else {
        return true;
    };
    if compact[..colon].contains(['/', '?', '#']) {
        // Relative reference whose path happens to contain a colon
        return true;
    }
    match &compact[..colon] {
        "http" | "https" | "mailto" | "cid" | "tel" => true,
        "data" => allow_data_image && compact.starts_with("data:image/"),
        _ => false,
    }
}

static XML_PROLOG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<\?xml.*?\?>").expect("valid regex"));

static BACKGROUND_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)background-image\s*:[^;]*?http[^;]*;?").expect("valid regex")
});

/// Remove an `<?xml ...?>` prolog.
pub fn strip_xml_prolog(html: &str) -> String {
    XML_PROLOG.replace_all(html, "").into_owned()
}

/// Drop `background-image: ... http ...;` declarations.
pub fn strip_remote_background(html: &str) -> String {
    BACKGROUND_IMAGE.replace_all(html, "").into_owned()
}

/// Convert HTML to plain text for display.
///
/// - Preserves line breaks from `<br>`, `<p>`, `<div>`, table rows and list items
/// - Unwraps inline formatting (`<a>`, `<span>`, `<em>`, `<b>`, ...)
/// - Removes scripts and styles
/// - Decodes HTML entities
/// - Collapses runs of spaces and blank lines
pub fn html_to_text(html: &str) -> String {
    let mut text = strip_xml_prolog(html);

    for tag in ["script", "style", "head", "title"] {
        text = remove_tag_block(&text, tag);
    }

    static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)<\s*/?\s*(br|p|div|tr|li|h[1-6]|table|blockquote|pre|hr)\b[^>]*>")
            .expect("valid regex")
    });
    static ANY_TAG: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

    let text = BLOCK_TAG.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, "");
    let text = html_escape::decode_html_entities(&text).replace('\u{a0}', " ");

    // Collapse whitespace inside lines and blank lines between them
    let mut prev_was_blank = false;
    let mut cleaned = String::with_capacity(text.len());
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
                prev_was_blank = true;
            }
        } else {
            cleaned.push_str(&collapsed);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }

    cleaned.trim().to_string()
}

/// Remove an entire tag block (e.g. `<script>…</script>`).
///
/// Only the exact element name matches, so `head` leaves `<header>` alone.
/// A block that is never closed loses just its opening tag.
fn remove_tag_block(html: &str, tag: &str) -> String {
    // ASCII lowercasing keeps byte offsets identical
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}");

    let mut result = String::with_capacity(html.len());
    let mut copied = 0;
    let mut search = 0;
    while let Some(start) = find_tag(&lower, &open, search) {
        result.push_str(&html[copied..start]);
        let body = start + open.len();
        copied = match find_tag(&lower, &close, body) {
            Some(end) => tag_end(&lower, end + close.len()),
            None => tag_end(&lower, body),
        };
        search = copied;
    }
    result.push_str(&html[copied..]);
    result
}

/// Position of `<name` (or `</name`) followed by a name boundary.
fn find_tag(lower: &str, needle: &str, mut from: usize) -> Option<usize> {
    while let Some(found) = lower.get(from..)?.find(needle) {
        let start = from + found;
        let next = lower.as_bytes().get(start + needle.len());
        match next {
            None | Some(b'>') | Some(b'/') => return Some(start),
            Some(b) if b.is_ascii_whitespace() => return Some(start),
            _ => from = start + needle.len(),
        }
    }
    None
}

/// Offset just past the `>` closing the tag that continues at `from`.
fn tag_end(lower: &str, from: usize) -> usize {
    lower[from..].find('>').map_or(lower.len(), |gt| from + gt + 1)
}
