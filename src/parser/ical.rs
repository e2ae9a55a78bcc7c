//! iCalendar (RFC 5545) content-line parser.
//!
//! Produces a plain component tree; interpreting properties is left to
//! [`crate::render::calendar`].

use crate::error::CalendarError;

/// A single content line: `NAME;PARAM=value:value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Uppercase property name.
    pub name: String,
    /// Parameters with uppercase names and unquoted values.
    pub params: Vec<(String, String)>,
    /// Raw value (still escaped for TEXT properties).
    pub value: String,
}

impl Property {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Value of a TEXT property with escapes resolved.
    pub fn text(&self) -> String {
        unescape_text(&self.value)
    }
}

/// `BEGIN:NAME` ... `END:NAME` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub properties: Vec<Property>,
    pub components: Vec<Component>,
}

impl Component {
    /// First property with the given name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties_named(name).next()
    }

    pub fn properties_named<'a, 'b>(
        &'a self,
        name: &'b str,
    ) -> impl Iterator<Item = &'a Property> + use<'a, 'b> {
        self.properties
            .iter()
            .filter(move |p| p.name.eq_ignore_ascii_case(name))
    }

    /// First direct sub-component with the given name.
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Unfold continuation lines (RFC 5545 §3.1).
pub fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        match line.as_bytes().first() {
            Some(b' ') | Some(b'\t') => {
                if let Some(last) = lines.last_mut() {
                    last.push_str(&line[1..]);
                }
            }
            _ if line.trim().is_empty() => {}
            _ => lines.push(line.to_string()),
        }
    }
    lines
}

/// Close components left open by a truncated calendar.
///
/// Some producers cut the body short after the last property, dropping the
/// closing `END:` lines. The missing markers are appended in nesting order.
pub fn repair(ics: &str) -> String {
    let mut open: Vec<String> = Vec::new();
    for line in unfold(ics) {
        let Some(prop) = parse_line(&line) else {
            continue;
        };
        match prop.name.as_str() {
            "BEGIN" => open.push(prop.value.trim().to_ascii_uppercase()),
            "END" => {
                let name = prop.value.trim().to_ascii_uppercase();
                if let Some(pos) = open.iter().rposition(|n| *n == name) {
                    open.truncate(pos);
                }
            }
            _ => {}
        }
    }

    let mut repaired = ics.trim_end().to_string();
    if open.is_empty() {
        return repaired;
    }
    tracing::debug!(missing = open.len(), "Repairing truncated calendar");
    for name in open.iter().rev() {
        repaired.push_str("\r\nEND:");
        repaired.push_str(name);
    }
    repaired
}

/// Parse the first `VCALENDAR` object of `ics`.
pub fn parse(ics: &str) -> Result<Component, CalendarError> {
    let mut stack: Vec<Component> = Vec::new();

    for line in unfold(ics) {
        let Some(prop) = parse_line(&line) else {
            continue;
        };
        match prop.name.as_str() {
            "BEGIN" => stack.push(Component {
                name: prop.value.trim().to_ascii_uppercase(),
                ..Component::default()
            }),
            "END" => {
                let name = prop.value.trim().to_ascii_uppercase();
                let component = match stack.pop() {
                    Some(c) if c.name == name => c,
                    _ => return Err(CalendarError::UnbalancedEnd(name)),
                };
                match stack.last_mut() {
                    Some(parent) => parent.components.push(component),
                    None if component.name == "VCALENDAR" => return Ok(component),
                    None => {}
                }
            }
            _ => {
                if let Some(current) = stack.last_mut() {
                    current.properties.push(prop);
                }
            }
        }
    }

    match stack.first() {
        Some(open) => Err(CalendarError::Unterminated(open.name.clone())),
        None => Err(CalendarError::NotACalendar),
    }
}

/// Split a content line into name, parameters and value.
///
/// Colons and semicolons inside quoted parameter values do not split.
pub fn parse_line(line: &str) -> Option<Property> {
    let mut in_quotes = false;
    let mut value_start = None;
    let mut segments: Vec<&str> = Vec::new();
    let mut seg_start = 0;

    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                segments.push(&line[seg_start..i]);
                seg_start = i + 1;
            }
            ':' if !in_quotes => {
                segments.push(&line[seg_start..i]);
                value_start = Some(i + 1);
                break;
            }
            _ => {}
        }
    }

    let value = &line[value_start?..];
    let mut segments = segments.into_iter();
    let name = segments.next()?.trim().to_ascii_uppercase();
    if name.is_empty() {
        return None;
    }

    let params = segments
        .filter_map(|seg| {
            let (k, v) = seg.split_once('=')?;
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(v);
            Some((k.trim().to_ascii_uppercase(), v.to_string()))
        })
        .collect();

    Some(Property {
        name,
        params,
        value: value.to_string(),
    })
}

/// Resolve TEXT escapes (`\n`, `\,`, `\;`, `\\`).
pub fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVITE: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
METHOD:REQUEST\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:Planning\\, Q4\r\n\
ORGANIZER;CN=\"Doe; Jane\":mailto:jane@example.com\r\n\
DESCRIPTION:Line one\\nline\r\n  two\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn test_parse_tree() {
        let cal = parse(INVITE).unwrap();
        assert_eq!(cal.name, "VCALENDAR");
        assert_eq!(cal.property("method").unwrap().value, "REQUEST");
        let event = cal.component("VEVENT").unwrap();
        assert_eq!(event.property("SUMMARY").unwrap().text(), "Planning, Q4");
        assert_eq!(
            event.property("DESCRIPTION").unwrap().text(),
            "Line one\nline two"
        );
    }

    #[test]
    fn test_property_lookup_outlives_name() {
        let cal = parse(INVITE).unwrap();
        let event = cal.component("VEVENT").unwrap();
        let summary = {
            let name = "summary".to_ascii_uppercase();
            event.property(&name)
        };
        assert_eq!(summary.map(Property::text).as_deref(), Some("Planning, Q4"));
    }

    #[test]
    fn test_quoted_parameter() {
        let prop = parse_line("ORGANIZER;CN=\"Doe; Jane: PM\";ROLE=CHAIR:mailto:j@x.org").unwrap();
        assert_eq!(prop.name, "ORGANIZER");
        assert_eq!(prop.param("cn"), Some("Doe; Jane: PM"));
        assert_eq!(prop.param("ROLE"), Some("CHAIR"));
        assert_eq!(prop.value, "mailto:j@x.org");
    }

    #[test]
    fn test_line_without_value_is_skipped() {
        assert!(parse_line("garbage").is_none());
        assert!(parse_line(":value").is_none());
    }

    #[test]
    fn test_repair_truncated() {
        let truncated = INVITE.split("END:VEVENT").next().unwrap();
        assert!(matches!(
            parse(truncated),
            Err(CalendarError::Unterminated(_))
        ));
        let repaired = repair(truncated);
        assert!(repaired.ends_with("END:VEVENT\r\nEND:VCALENDAR"));
        assert_eq!(parse(&repaired).unwrap(), parse(INVITE).unwrap());
    }

    #[test]
    fn test_repair_leaves_complete_calendar_alone() {
        assert_eq!(repair(INVITE), INVITE.trim_end());
    }

    #[test]
    fn test_not_a_calendar() {
        assert_eq!(parse("hello\r\n"), Err(CalendarError::NotACalendar));
        assert!(matches!(
            parse("BEGIN:VCALENDAR\r\nEND:VEVENT\r\n"),
            Err(CalendarError::UnbalancedEnd(_))
        ));
    }
}
