//! Text Cleaner
//!
//! Normalizes raw document text before chunking. Total and deterministic:
//! junk-only input yields an empty string, which callers treat as "no content".

use regex::Regex;
use std::sync::OnceLock;

struct CleanPatterns {
    whitespace: Regex,
    non_printable: Regex,
    symbols: Regex,
    punctuation_runs: Regex,
    html_entities: Regex,
}

fn patterns() -> &'static CleanPatterns {
    static PATTERNS: OnceLock<CleanPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| CleanPatterns {
        whitespace: Regex::new(r"\s+").expect("valid whitespace pattern"),
        non_printable: Regex::new(r"[^\x20-\x7E]").expect("valid printable pattern"),
        symbols: Regex::new(r"[/\\|*~`@#$%^&_=+\[\]{}<>]").expect("valid symbol pattern"),
        punctuation_runs: Regex::new(r"([!?.,\-]){2,}").expect("valid punctuation pattern"),
        html_entities: Regex::new(r"&[a-z]+;").expect("valid entity pattern"),
    })
}

/// Clean raw document text. Steps run in a fixed order:
/// collapse whitespace, drop non-printable ASCII, blank out junk symbols,
/// collapse punctuation runs, drop HTML entities, final collapse and trim.
pub fn clean(text: &str) -> String {
    let p = patterns();

    let text = p.whitespace.replace_all(text, " ");
    let text = p.non_printable.replace_all(&text, " ");
    let text = p.symbols.replace_all(&text, " ");
    let text = p.punctuation_runs.replace_all(&text, "$1");
    let text = p.html_entities.replace_all(&text, " ");
    let text = p.whitespace.replace_all(&text, " ");

    text.trim().to_string()
}
