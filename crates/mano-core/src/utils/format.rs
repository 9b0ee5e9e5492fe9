/// Tags whose contents are dropped rather than kept as text
const SKIPPED_ELEMENTS: [&str; 2] = ["script", "style"];

/// Remove markup from an HTML fragment, leaving readable text.
///
/// Tags become word breaks, whitespace runs collapse to a single space,
/// the common entities are decoded, and `<script>`/`<style>` bodies are
/// dropped entirely.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut tag = String::new();
    let mut in_tag = false;
    let mut skipping: Option<&str> = None;

    for c in html.chars() {
        match c {
            '<' if !in_tag => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag_name(&tag);
                match skipping {
                    Some(skipped) if tag.starts_with('/') && name == skipped => skipping = None,
                    Some(_) => {}
                    None => {
                        skipping = SKIPPED_ELEMENTS
                            .iter()
                            .copied()
                            .find(|s| !tag.starts_with('/') && *s == name);
                    }
                }
                text.push(' ');
            }
            _ if in_tag => tag.push(c),
            _ if skipping.is_some() => {}
            _ => text.push(c),
        }
    }

    decode_entities(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased element name of a tag body such as `/td` or `a href="x"`.
fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('/')
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}
