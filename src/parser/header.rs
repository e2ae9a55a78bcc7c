//! RFC 5322 header parsing: folding, encoded-words (RFC 2047), parameters and dates.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

/// Ordered header multimap with case-insensitive lookup.
///
/// Names keep the spelling found on the wire; values are unfolded but
/// otherwise raw (no RFC 2047 decoding).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Parse a raw header block (everything before the first blank line).
    ///
    /// Lines that are neither `Name: value` nor continuations are skipped.
    pub fn parse(raw: &[u8]) -> Self {
        let text = decode_header_bytes(raw);
        let mut entries: Vec<(String, String)> = Vec::new();

        for line in text.lines() {
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some(last) = entries.last_mut() {
                    last.1.push(' ');
                    last.1.push_str(line.trim());
                }
            } else if let Some(colon_pos) = line.find(':') {
                let name = line[..colon_pos].trim();
                if name.is_empty() || name.contains(' ') {
                    continue;
                }
                entries.push((name.to_string(), line[colon_pos + 1..].trim().to_string()));
            }
        }

        Self { entries }
    }

    /// First value for a header name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    /// All values for a header name, in order of appearance.
    pub fn get_all<'a, 'b>(
        &'a self,
        name: &'b str,
    ) -> impl Iterator<Item = &'a str> + use<'a, 'b> {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First value, RFC 2047 decoded with whitespace collapsed.
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name)
            .map(|v| normalize_whitespace(&decode_encoded_words(v)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split the raw header block off a message or part.
///
/// Returns `(headers, body)`. Without a blank line the whole input is
/// treated as headers.
pub fn split_header_block(data: &[u8]) -> (&[u8], &[u8]) {
    for i in 0..data.len() {
        if data[i..].starts_with(b"\r\n\r\n") {
            return (&data[..i], &data[i + 4..]);
        }
        if data[i..].starts_with(b"\n\n") {
            return (&data[..i], &data[i + 2..]);
        }
    }
    (data, &[])
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Collapse tabs and runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a structured header value such as `Content-Type` into its
/// lowercase main value and its `name=value` parameters.
///
/// Parameter names are lowercased; quoted values are unquoted.
pub fn parse_parameters(value: &str) -> (String, Vec<(String, String)>) {
    let mut parts = split_unquoted(value, ';').into_iter();
    let main = parts.next().unwrap_or_default().trim().to_ascii_lowercase();

    let params = parts
        .filter_map(|p| {
            let (name, val) = p.split_once('=')?;
            let val = val.trim();
            let val = val
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .map(|v| v.replace("\\\"", "\"").replace("\\\\", "\\"))
                .unwrap_or_else(|| val.to_string());
            Some((name.trim().to_ascii_lowercase(), val))
        })
        .collect();

    (main, params)
}

/// Split on `sep` outside of double-quoted strings.
pub fn split_unquoted(value: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in value.chars() {
        if escaped {
            escaped = false;
        } else if ch == '\\' && in_quotes {
            escaped = true;
        } else if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == sep && !in_quotes {
            out.push(std::mem::take(&mut current));
            continue;
        }
        current.push(ch);
    }
    out.push(current);
    out
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// If decoding fails for any token, the original text is preserved.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two encoded words is dropped (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];
        match try_decode_one_word(after_start) {
            Some((text, consumed)) => {
                result.push_str(&text);
                remaining = &after_start[consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = after_start;
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    result
}

/// Decode `charset?encoding?text?=`; returns the text and the bytes consumed.
fn try_decode_one_word(s: &str) -> Option<(String, usize)> {
    use base64::Engine;

    let (charset, rest) = s.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let encoded_text = &rest[..end];
    let consumed = charset.len() + 1 + encoding.len() + 1 + end + 2;

    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);

    let bytes = match encoding {
        "B" | "b" => {
            let cleaned: String = encoded_text.chars().filter(|c| !c.is_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(cleaned.as_bytes())
                .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(cleaned.trim_end_matches('=')))
                .ok()?
        }
        "Q" | "q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    Some((decode_charset(charset, &bytes), consumed))
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => result.push(b' '),
            b'=' => {
                let hex = bytes.get(i + 1..i + 3).and_then(|h| std::str::from_utf8(h).ok());
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                        continue;
                    }
                    None => result.push(b'='),
                }
            }
            b => result.push(b),
        }
        i += 1;
    }
    result
}

/// Decode bytes using a named charset, falling back to lossy UTF-8.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8") {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    match encoding_rs::Encoding::for_label(charset.trim().as_bytes()) {
        Some(encoding) => encoding.decode(bytes).0.into_owned(),
        None => {
            warn!(charset, "Unknown charset, falling back to UTF-8 lossy");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Extract content between `<` and `>` (for Message-ID, In-Reply-To).
pub fn extract_angle_bracket(s: &str) -> String {
    let trimmed = s.trim();
    if let Some(start) = trimmed.find('<') {
        if let Some(end) = trimmed[start..].find('>') {
            return trimmed[start..start + end + 1].to_string();
        }
    }
    trimmed.to_string()
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, and common broken real-world variants.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    // Drop a day-of-week prefix and any trailing "(CET)" comment
    let core = trimmed
        .split_once(',')
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let core = core.split('(').next().unwrap_or(core).trim();
    let core = replace_named_tz(core);

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
    ];
    for fmt in &formats {
        if let Ok(dt) = DateTime::parse_from_str(&core, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&core, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Replace well-known timezone abbreviations with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    let tzs = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("UT", "+0000"),
        ("CET", "+0100"),
        ("CEST", "+0200"),
    ];
    for (name, offset) in &tzs {
        if let Some(stripped) = s.strip_suffix(name) {
            if stripped.ends_with(' ') {
                return format!("{stripped}{offset}");
            }
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive_multimap() {
        let raw = b"Received: one\r\nSubject: This is a long\r\n\tsubject line\r\nreceived: two\r\n";
        let headers = Headers::parse(raw);
        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get("SUBJECT"), Some("This is a long subject line"));
        let received: Vec<_> = headers.get_all("Received").collect();
        assert_eq!(received, vec!["one", "two"]);
    }

    #[test]
    fn test_lookup_outlives_name() {
        let headers = Headers::parse(b"Content-Type: text/plain\r\n");
        let value = {
            let name = String::from("content-type");
            headers.get(&name)
        };
        assert_eq!(value, Some("text/plain"));
    }

    #[test]
    fn test_split_header_block() {
        let (h, b) = split_header_block(b"A: 1\r\nB: 2\r\n\r\nbody\r\n");
        assert_eq!(h, b"A: 1\r\nB: 2");
        assert_eq!(b, b"body\r\n");
        let (h, b) = split_header_block(b"A: 1\n\nbody");
        assert_eq!(h, b"A: 1");
        assert_eq!(b, b"body");
    }

    #[test]
    fn test_parse_parameters() {
        let (main, params) = parse_parameters(
            "Multipart/Signed; protocol=\"application/pkcs7-signature\"; micalg=sha-256;\r\n boundary=\"a;b\"",
        );
        assert_eq!(main, "multipart/signed");
        assert_eq!(params[0], ("protocol".into(), "application/pkcs7-signature".into()));
        assert_eq!(params[1], ("micalg".into(), "sha-256".into()));
        assert_eq!(params[2], ("boundary".into(), "a;b".into()));
    }

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_decode_adjacent_encoded_words() {
        let input = "Re: =?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?= there";
        assert_eq!(decode_encoded_words(input), "Re: Hola mundo there");
    }

    #[test]
    fn test_get_decoded_collapses_tabs() {
        let headers = Headers::parse(b"Subject: Weekly\t\tsync\r\n   notes\r\n");
        assert_eq!(headers.get_decoded("subject").as_deref(), Some("Weekly sync notes"));
    }

    #[test]
    fn test_parse_date_variants() {
        for input in [
            "Thu, 04 Jan 2024 10:00:00 +0000",
            "04 Jan 2024 10:00:00 +0000",
            "Thu, 04 Jan 2024 10:00:00 EST",
            "Thu, 4 Jan 2024 10:00:00 +0100 (CET)",
            "2024-01-04T10:00:00Z",
        ] {
            let dt = parse_date(input);
            assert!(dt.is_some(), "failed to parse {input}");
            assert_eq!(dt.unwrap().format("%Y-%m-%d").to_string(), "2024-01-04");
        }
        assert!(parse_date("not a date").is_none());
    }

    #[test]
    fn test_extract_angle_bracket() {
        assert_eq!(extract_angle_bracket(" <msg001@example.com> (x)"), "<msg001@example.com>");
    }
}
