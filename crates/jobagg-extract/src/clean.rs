//! Post-processing for model output: fence stripping, brace repair, token
//! cleanup and HTML sanitizing.

use std::sync::OnceLock;

use jobagg_core::MISSING_TEXT;
use regex::Regex;
use scraper::{ElementRef, Html};

const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "strong", "b", "em", "i", "u", "ul", "ol", "li", "h1", "h2", "h3", "h4", "h5", "h6",
];
const DROPPED_TAGS: &[&str] = &["script", "style", "noscript", "template", "iframe"];
const VOID_TAGS: &[&str] = &["br"];

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").expect("static regex"))
}

fn null_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(null|none)\b").expect("static regex"))
}

fn empty_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*,").expect("static regex"))
}

/// Strips a surrounding markdown code fence, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match fence_re().captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Appends closing braces when the model stopped before finishing the object.
pub fn balance_braces(json: &str) -> String {
    let open = json.matches('{').count();
    let close = json.matches('}').count();
    let mut out = json.to_string();
    if open > close {
        out.push_str(&"}".repeat(open - close));
    }
    out
}

/// Removes literal "null"/"none" tokens and stray commas. Blank results
/// become `None`.
pub fn clean_value(input: Option<&str>) -> Option<String> {
    let input = input?;
    if input.trim().is_empty() {
        return None;
    }
    let cleaned = null_token_re().replace_all(input, "");
    let cleaned = empty_item_re().replace_all(&cleaned, ",");
    let cleaned = cleaned.trim_matches(|c| c == ',' || c == ' ');
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

pub fn logo_url_for(website_url: Option<&str>) -> Option<String> {
    let parsed = url::Url::parse(website_url?).ok()?;
    let host = parsed.host_str()?;
    Some(format!("https://logo.clearbit.com/{host}?size=500"))
}

/// Reduces an HTML fragment to the formatting allowlist. Attributes are
/// dropped, script-like elements removed with their content, and any other
/// element replaced by its children. Empty output yields `"none"`.
pub fn sanitize_html(input: Option<&str>) -> String {
    let Some(input) = input.filter(|s| !s.trim().is_empty()) else {
        return MISSING_TEXT.to_string();
    };
    let fragment = Html::parse_fragment(input);
    let mut out = String::with_capacity(input.len());
    write_children(fragment.root_element(), &mut out);
    let out = out.trim();
    if out.is_empty() {
        MISSING_TEXT.to_string()
    } else {
        out.to_string()
    }
}

fn write_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            let name = child_el.value().name();
            if DROPPED_TAGS.contains(&name) {
                continue;
            }
            if ALLOWED_TAGS.contains(&name) {
                if VOID_TAGS.contains(&name) {
                    out.push_str("<br/>");
                    continue;
                }
                out.push('<');
                out.push_str(name);
                out.push('>');
                write_children(child_el, out);
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            } else {
                write_children(child_el, out);
            }
        } else if let Some(text) = child.value().as_text() {
            escape_into(text, out);
        }
    }
}

fn escape_into(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn appends_missing_braces_only() {
        assert_eq!(balance_braces("{\"a\":{\"b\":1"), "{\"a\":{\"b\":1}}");
        assert_eq!(balance_braces("{}"), "{}");
    }

    #[test]
    fn clean_value_drops_null_tokens_and_commas() {
        assert_eq!(clean_value(Some("Praha, null, Czech Republic")).as_deref(), Some("Praha, Czech Republic"));
        assert_eq!(clean_value(Some("NONE")), None);
        assert_eq!(clean_value(Some(", Brno ,")).as_deref(), Some("Brno"));
        assert_eq!(clean_value(Some("Nonesuch Ltd")).as_deref(), Some("Nonesuch Ltd"));
        assert_eq!(clean_value(Some("   ")), None);
        assert_eq!(clean_value(None), None);
    }

    #[test]
    fn logo_from_website_host() {
        assert_eq!(
            logo_url_for(Some("https://www.acme.cz/about")).as_deref(),
            Some("https://logo.clearbit.com/www.acme.cz?size=500")
        );
        assert_eq!(logo_url_for(Some("not a url")), None);
        assert_eq!(logo_url_for(None), None);
    }

    #[test]
    fn sanitizer_keeps_formatting_and_drops_the_rest() {
        let html = r#"<div class="x"><p style="color:red">Hi <a href="/apply">there</a></p><script>alert(1)</script><ul><li onclick="x()">One</li></ul><button>Apply</button><br></div>"#;
        assert_eq!(
            sanitize_html(Some(html)),
            "<p>Hi there</p><ul><li>One</li></ul>Apply<br/>"
        );
    }

    #[test]
    fn sanitizer_escapes_text_and_defaults_to_none() {
        assert_eq!(sanitize_html(Some("a < b & c")), "a &lt; b &amp; c");
        assert_eq!(sanitize_html(Some("<script>x</script>")), "none");
        assert_eq!(sanitize_html(None), "none");
    }
}
