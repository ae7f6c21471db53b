//! Host, mask and nickname matching helpers

use ipnet::IpNet;
use std::net::IpAddr;

/// RFC 1459 case folding of a single character
pub fn irc_lower_char(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        _ => c.to_ascii_lowercase(),
    }
}

/// RFC 1459 case folding, used as the key for nickname and channel lookups
pub fn irc_casefold(s: &str) -> String {
    s.chars().map(irc_lower_char).collect()
}

/// Case-insensitive glob match supporting `*` and `?`
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().map(irc_lower_char).collect();
    let text: Vec<char> = text.chars().map(irc_lower_char).collect();

    let mut p = 0;
    let mut t = 0;
    let mut star_p = None;
    let mut star_t = 0;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star_p = Some(p);
            star_t = t;
            p += 1;
        } else if let Some(sp) = star_p {
            p = sp + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}

/// Match `value` against a connect-class host pattern.
///
/// Patterns in CIDR notation are compared as networks when `value` is a literal
/// address; everything else falls back to glob matching.
pub fn match_cidr(value: &str, pattern: &str) -> bool {
    if let (Ok(net), Ok(addr)) = (pattern.parse::<IpNet>(), value.parse::<IpAddr>()) {
        return net.contains(&addr);
    }

    wildcard_match(pattern, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("*.example.com", "USER.Example.COM"));
        assert!(wildcard_match("h?st", "host"));
        assert!(!wildcard_match("*.example.com", "example.org"));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(!wildcard_match("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_cidr() {
        assert!(match_cidr("10.1.2.3", "10.0.0.0/8"));
        assert!(!match_cidr("11.1.2.3", "10.0.0.0/8"));
        assert!(match_cidr("2001:db8::1", "2001:db8::/32"));
        // a hostname never matches a network pattern
        assert!(!match_cidr("host.example.com", "10.0.0.0/8"));
        assert!(match_cidr("10.0.0.1", "10.0.0.*"));
    }

    #[test]
    fn test_casefold() {
        assert_eq!(irc_casefold("Nick[Away]"), "nick{away}");
        assert_eq!(irc_casefold("A\\B~"), "a|b^");
    }
}
