use serde::Serialize;

const SELLABLE_STATUSES : &[&str] = &["AVAILABLE", "LISTED"];

/// Escapes `&`, `<`, `>` and `"` for use in html text and attributes.
pub fn escape_html(s : &str) -> String {
    let mut out = String::with_capacity(s.len());

    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }

    out
}

/// Whether an item in this status can be sold. LISTED items count as
/// available.
pub fn is_sellable_status(status : Option<&str>) -> bool {
    let status = status.unwrap_or_default().to_uppercase();
    SELLABLE_STATUSES.contains(&status.as_str())
}

/// json with two space indentation
pub fn pretty_json<T : Serialize + ?Sized>(value : &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(value)
}
