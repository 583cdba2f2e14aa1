//! Sanitizing: deterministic cleanup of raw model output before parsing.
//!
//! Models regularly return things the parser should never see: Windows line
//! endings, zero-width characters, a whole `\documentclass … \begin{document}`
//! envelope around the body, or `\usepackage` lines. These rules fix such
//! quirks without touching content; each is a pure `&str → String` pass.
//!
//! ## Rule Order
//!
//! [`clean_raw`] runs on the whole model response before shape detection,
//! so line endings are normalised before fences are searched for.
//! [`clean_fragment`] runs on the LaTeX fragment only, after it was cut out
//! of its shape.

use once_cell::sync::Lazy;
use regex::Regex;

/// Rules applied to the complete raw response:
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, …)
/// 3. Trim trailing whitespace per line
pub fn clean_raw(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    trim_trailing_whitespace(&s)
}

/// Rules applied to a LaTeX fragment:
/// 1. Strip an outer ```` ```latex ```` / ```` ```tex ```` fence
/// 2. Drop everything up to and including `\begin{document}`
/// 3. Drop `\end{document}` and anything after it
/// 4. Replace `\usepackage` / `\documentclass` / stray envelope markers by `% stripped`
/// 5. Collapse 3+ consecutive blank lines down to 1
pub fn clean_fragment(fragment: &str) -> String {
    let s = strip_code_fence(fragment);
    let s = remove_preamble(&s);
    let s = remove_document_end(&s);
    let s = neutralise_directives(&s);
    collapse_blank_lines(&s).trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Strip an outer code fence ────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?si)^```(?:latex|tex)?[ \t]*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 5: Remove the preamble ──────────────────────────────────────────────

static RE_PREAMBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(?:\\documentclass|%+\s*preamble).*?\\begin\{document\}").unwrap()
});

fn remove_preamble(input: &str) -> String {
    RE_PREAMBLE.replace(input, "").to_string()
}

// ── Rule 6: Remove the document end ──────────────────────────────────────────

static RE_DOCUMENT_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\\end\{document\}.*$").unwrap());

fn remove_document_end(input: &str) -> String {
    RE_DOCUMENT_END.replace(input, "").to_string()
}

// ── Rule 7: Neutralise dangerous directives ──────────────────────────────────

static RE_DIRECTIVES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\\usepackage(?:\[[^\]]*\])?\{[^}]*\}|\\documentclass(?:\[[^\]]*\])?\{[^}]*\}|\\begin\{document\}|\\end\{document\}",
    )
    .unwrap()
});

fn neutralise_directives(input: &str) -> String {
    // Each directive gets its own line so the parser skips it as a comment.
    RE_DIRECTIVES.replace_all(input, "\n% stripped\n").to_string()
}

// ── Rule 8: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("a\u{200B}b\u{FEFF}"), "ab");
    }

    #[test]
    fn test_clean_raw_trims_lines() {
        assert_eq!(clean_raw("x  \r\ny\t\r\n"), "x\ny");
    }

    #[test]
    fn test_strip_latex_fence() {
        assert_eq!(strip_code_fence("```latex\n\\section{A}\n```"), "\\section{A}");
        assert_eq!(strip_code_fence("```tex\nx\n```"), "x");
        assert_eq!(strip_code_fence("plain"), "plain");
    }

    #[test]
    fn test_preamble_and_end_removed() {
        let input = "\\documentclass{article}\n\\usepackage{amsmath}\n\\begin{document}\nBody text.\n\\end{document}\ntrailing";
        assert_eq!(clean_fragment(input), "Body text.");
    }

    #[test]
    fn test_usepackage_is_stripped() {
        let out = clean_fragment("Text.\n\\usepackage[utf8]{inputenc}\nMore.");
        assert!(out.contains("% stripped"), "got: {out}");
        assert!(!out.contains("usepackage"), "got: {out}");
        assert!(out.contains("More."));
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
    }
}
