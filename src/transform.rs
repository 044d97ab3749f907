use crate::binding::{Binding, Style};

/// Build the styled hyperlink fragment that replaces the target phrase
pub fn render_hyperlink(phrase: &str, link: &str, style: Style) -> String {
    let anchor = format!(r#"<a href="{}">{}</a>"#, link, phrase);
    match style {
        Style::Plain => anchor,
        Style::Bold => format!("<b>{}</b>", anchor),
        Style::Italic => format!("<i>{}</i>", anchor),
    }
}

/// Replace the first literal occurrence of the binding's target phrase.
///
/// Returns the rewritten text and whether anything changed. The search is
/// case-sensitive and the output is never re-scanned, so later occurrences
/// stay as they were.
pub fn transform(text: &str, binding: &Binding) -> (String, bool) {
    let phrase = binding.target_phrase.as_str();
    if phrase.is_empty() {
        return (text.to_string(), false);
    }

    match text.find(phrase) {
        Some(start) => {
            let fragment = render_hyperlink(phrase, &binding.link, binding.style);
            let mut out = String::with_capacity(text.len() + fragment.len());
            out.push_str(&text[..start]);
            out.push_str(&fragment);
            out.push_str(&text[start + phrase.len()..]);
            (out, true)
        }
        None => (text.to_string(), false),
    }
}
