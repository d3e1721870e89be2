//! Text normalisation shared by rendering, reference tracking and renaming.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

static CAMEL_CASE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]+[a-z]+[A-Z]+[A-Za-z0-9]*$").unwrap());

/// Escapes the characters that would otherwise be read as markup.
pub fn escape_html(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Like [`escape_html`], but also safe inside a double-quoted attribute.
pub fn escape_attribute(s: &str) -> String {
    escape_html(s).replace('"', "&quot;")
}

pub fn normalize_line_endings(s: &str) -> Cow<'_, str> {
    if !s.contains('\r') {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.replace("\r\n", "\n").replace('\r', "\n"))
}

pub fn url_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Decodes a percent-encoded string; malformed input comes back unchanged.
pub fn url_decode(s: &str) -> String {
    match urlencoding::decode(s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s.to_string(),
    }
}

/// Folds free-form link text into a canonical page name.
///
/// The text is split on whitespace and underscores, each token loses its
/// non-alphanumeric characters and gets an upper-case first letter, and the
/// tokens are concatenated: `"links to some page"` becomes `"LinksToSomePage"`.
/// Applying it twice gives the same result as applying it once.
pub fn clean_link(link: &str) -> String {
    let mut clean = String::with_capacity(link.len());
    for token in link.split(|c: char| c.is_whitespace() || c == '_') {
        let mut chars = token.chars().filter(|c| c.is_alphanumeric());
        if let Some(first) = chars.next() {
            clean.extend(first.to_uppercase());
            clean.extend(chars);
        }
    }
    clean
}

pub fn is_camel_case(word: &str) -> bool {
    CAMEL_CASE_REGEX.is_match(word)
}

/// The alternate English number of a page name: strips a trailing `s`, or adds one.
pub fn plural_variant(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    match name.strip_suffix('s') {
        Some("") => None,
        Some(singular) => Some(singular.to_string()),
        None => Some(format!("{}s", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_replaces_markup_chars() {
        assert_eq!(escape_html("a < b && c > d"), "a &lt; b &amp;&amp; c &gt; d");
    }

    #[test]
    fn escape_html_borrows_clean_input() {
        assert!(matches!(escape_html("plain text"), Cow::Borrowed(_)));
    }

    #[test]
    fn escape_attribute_handles_quotes() {
        assert_eq!(escape_attribute(r#"say "hi""#), "say &quot;hi&quot;");
    }

    #[test]
    fn line_endings_are_unified() {
        assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn url_encode_round_trips_unicode() {
        let encoded = url_encode("Main Page/é");
        assert_eq!(encoded, "Main%20Page%2F%C3%A9");
        assert_eq!(url_decode(&encoded), "Main Page/é");
    }

    #[test]
    fn url_decode_keeps_invalid_utf8_input() {
        assert_eq!(url_decode("%FF%FE"), "%FF%FE");
    }

    #[test]
    fn clean_link_capitalises_tokens() {
        assert_eq!(clean_link("links to some page"), "LinksToSomePage");
        assert_eq!(clean_link("under_score_name"), "UnderScoreName");
        assert_eq!(clean_link("MainPage"), "MainPage");
    }

    #[test]
    fn clean_link_strips_punctuation() {
        assert_eq!(clean_link("What's new?"), "WhatsNew");
        assert_eq!(clean_link("C++ & Rust"), "CRust");
        assert_eq!(clean_link("  "), "");
        assert_eq!(clean_link("-dash start"), "DashStart");
    }

    #[test]
    fn clean_link_is_idempotent() {
        for input in [
            "links to some page",
            "-dash start",
            "über straße",
            "x_y z",
            "123 go",
            "ALLCAPS word",
            "",
        ] {
            let once = clean_link(input);
            assert_eq!(clean_link(&once), once, "input {:?}", input);
        }
    }

    #[test]
    fn camel_case_detection() {
        assert!(is_camel_case("MainPage"));
        assert!(is_camel_case("HTMLParser"));
        assert!(is_camel_case("WikiName2"));
        assert!(!is_camel_case("Main"));
        assert!(!is_camel_case("mainPage"));
        assert!(!is_camel_case("MAIN"));
        assert!(!is_camel_case("Main Page"));
    }

    #[test]
    fn plural_variant_both_directions() {
        assert_eq!(plural_variant("Cars").as_deref(), Some("Car"));
        assert_eq!(plural_variant("Car").as_deref(), Some("Cars"));
        assert_eq!(plural_variant("s"), None);
        assert_eq!(plural_variant(""), None);
    }
}
