//! Reply cleanup helpers (markdown emphasis stripping, label-echo removal).

use std::sync::OnceLock;

use regex::Regex;

fn blank_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{2,}").expect("valid regex"))
}

fn label_echo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?mi)^(?:Prompt|User|You|AI):.*\n?").expect("valid regex"))
}

/// Strip markdown emphasis characters from a chat reply.
///
/// WhatsApp renders `*`/`_` as its own styling and backticks not at all, so
/// model output is delivered as plain text.
pub fn strip_emphasis(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '*' | '`' | '_'))
        .collect()
}

/// Clean an image-analysis reply before sending it to the user.
///
/// Drops emphasis characters, collapses blank-line runs, and removes any
/// leading "label:" echo lines the model sometimes prepends.
pub fn clean_image_analysis(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '`' | '~'))
        .collect();

    let text = blank_run_re().replace_all(&stripped, "\n").to_string();
    label_echo_re().replace_all(&text, "").trim().to_string()
}

/// Capitalize the first character of a keyword (ASCII).
pub fn capitalize_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_emphasis_removes_markdown_chars() {
        assert_eq!(strip_emphasis("*bold* _it_ `code`"), "bold it code");
        assert_eq!(strip_emphasis("plain"), "plain");
    }

    #[test]
    fn clean_analysis_collapses_blank_lines_and_labels() {
        let raw = "AI: echoed line\n**Judul**\n\n\nIsi analisis.\n\nAkhir.";
        let cleaned = clean_image_analysis(raw);
        assert_eq!(cleaned, "Judul\nIsi analisis.\nAkhir.");
    }

    #[test]
    fn clean_analysis_strips_all_known_labels() {
        let raw = "Prompt: a\nUser: b\nYou: c\nai: d\nkonten asli";
        assert_eq!(clean_image_analysis(raw), "konten asli");
    }

    #[test]
    fn capitalize_first_handles_empty() {
        assert_eq!(capitalize_first("subuh"), "Subuh");
        assert_eq!(capitalize_first(""), "");
    }
}
