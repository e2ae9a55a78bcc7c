//! Email address parsing (RFC 5322 §3.4) and identity matching.

/// A parsed email address.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `display_name = "Juan García"`, `address = "juan@ejemplo.com"`
/// - `"mailto:user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`).
    pub address: String,
}

impl EmailAddress {
    /// Parse a single email address from a header value or calendar URI.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    /// - `"mailto:user@domain.com"` (any case)
    ///
    /// If parsing fails, the raw string is stored as `address`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    display_name: strip_quotes(&trimmed[..open]),
                    address: strip_mailto(trimmed[open + 1..close].trim()).to_string(),
                };
            }
        }

        Self {
            display_name: String::new(),
            address: strip_mailto(trimmed).to_string(),
        }
    }

    /// Parse a comma-separated list of addresses.
    ///
    /// Handles quoted commas: `"Last, First" <a@b.com>, other@c.com`
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut in_angle = false;

        for ch in raw.chars() {
            match ch {
                '"' => in_quotes = !in_quotes,
                '<' if !in_quotes => in_angle = true,
                '>' if !in_quotes => in_angle = false,
                ',' if !in_quotes && !in_angle => {
                    results.push(Self::parse(&current));
                    current.clear();
                    continue;
                }
                _ => {}
            }
            current.push(ch);
        }
        results.push(Self::parse(&current));

        results.retain(|a| !a.address.is_empty());
        results
    }

    /// Case-insensitive comparison of the bare address.
    pub fn is(&self, address: &str) -> bool {
        !self.address.is_empty() && self.address.eq_ignore_ascii_case(strip_mailto(address.trim()))
    }

    /// The display name, or the address when there is none.
    pub fn name_or_address(&self) -> &str {
        if self.display_name.is_empty() {
            &self.address
        } else {
            &self.display_name
        }
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

fn strip_mailto(s: &str) -> &str {
    match s.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("mailto:") => &s[7..],
        _ => s,
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_address() {
        let addr = EmailAddress::parse("user@example.com");
        assert_eq!(addr.address, "user@example.com");
        assert_eq!(addr.display_name, "");
    }

    #[test]
    fn test_parse_name_and_address() {
        let addr = EmailAddress::parse("User One <user1@example.com>");
        assert_eq!(addr.address, "user1@example.com");
        assert_eq!(addr.display_name, "User One");
    }

    #[test]
    fn test_parse_quoted_name() {
        let addr = EmailAddress::parse("\"Last, First\" <user@example.com>");
        assert_eq!(addr.address, "user@example.com");
        assert_eq!(addr.display_name, "Last, First");
    }

    #[test]
    fn test_parse_mailto() {
        let addr = EmailAddress::parse("MAILTO:Bob@Example.org");
        assert_eq!(addr.address, "Bob@Example.org");
        assert!(addr.is("bob@example.org"));
        assert!(addr.is("mailto:bob@example.org"));
    }

    #[test]
    fn test_parse_list_with_quoted_comma() {
        let list = EmailAddress::parse_list("\"Last, First\" <a@b.com>, other@c.com, ");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].display_name, "Last, First");
        assert_eq!(list[0].address, "a@b.com");
        assert_eq!(list[1].address, "other@c.com");
    }

    #[test]
    fn test_name_or_address() {
        assert_eq!(EmailAddress::parse("a@b.com").name_or_address(), "a@b.com");
        assert_eq!(EmailAddress::parse("Ann <a@b.com>").name_or_address(), "Ann");
    }

    #[test]
    fn test_empty_never_matches() {
        assert!(!EmailAddress::parse("").is(""));
    }
}
