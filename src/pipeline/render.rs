//! Rendering: node sequence → LaTeX body text.
//!
//! The output is a document *body*: it never carries `\documentclass`,
//! `\begin{document}` or `\end{document}`. The box environments expect the
//! project template's two-slot signature `\begin{<kind>box}{title}{}`.

use crate::config::Language;
use crate::document::{AlignedLine, StructuralNode};
use crate::error::NormalizationError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Render a node sequence, one blank line between nodes.
pub fn render(nodes: &[StructuralNode], language: Language) -> String {
    let body = nodes
        .iter()
        .map(|node| render_node(node, language))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    ensure_final_newline(&body)
}

pub fn render_node(node: &StructuralNode, language: Language) -> String {
    match node {
        StructuralNode::Section { level, text } => format!("\\{}{{{}}}", level.command(), text),
        StructuralNode::Paragraph { text } | StructuralNode::Connective { text } => text.clone(),
        StructuralNode::Equation { latex } => {
            format!("\\[\n{}\n\\]", math_text(latex, language))
        }
        StructuralNode::Aligned { lines } => {
            let rows = lines
                .iter()
                .map(|line| aligned_row(line, language))
                .collect::<Vec<_>>()
                .join(" \\\\\n");
            format!("\\begin{{align*}}\n{rows}\n\\end{{align*}}")
        }
        StructuralNode::ListBlock { style, items } => {
            let env = style.environment();
            let mut out = format!("\\begin{{{env}}}\n");
            for item in items {
                out.push_str("  \\item ");
                out.push_str(item);
                out.push('\n');
            }
            out.push_str(&format!("\\end{{{env}}}"));
            out
        }
        StructuralNode::Figure { path, caption } => {
            let mut out = String::from("\\begin{figure}[h]\n    \\centering\n");
            out.push_str(&format!(
                "    \\includegraphics[width=0.8\\textwidth]{{{path}}}\n"
            ));
            if let Some(caption) = caption {
                out.push_str(&format!("    \\caption{{{caption}}}\n"));
            }
            out.push_str("\\end{figure}");
            out
        }
        StructuralNode::Boxed { kind, title, text } => {
            let env = kind.environment();
            if kind.has_slots() {
                let title = title.as_deref().unwrap_or("");
                format!("\\begin{{{env}}}{{{title}}}{{}}\n{text}\n\\end{{{env}}}")
            } else {
                format!("\\begin{{{env}}}\n{text}\n\\end{{{env}}}")
            }
        }
        StructuralNode::Annotation { text } => text
            .lines()
            .map(|line| format!("% note: {}", line.trim()))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// `lhs &rhs` at the recorded split point.
fn aligned_row(line: &AlignedLine, language: Language) -> String {
    match line.split.filter(|&p| line.latex.is_char_boundary(p)) {
        Some(p) => {
            let (lhs, rhs) = line.latex.split_at(p);
            format!(
                "{} &{}",
                math_text(lhs.trim_end(), language),
                math_text(rhs, language)
            )
        }
        None => math_text(&line.latex, language),
    }
}

static RE_CYRILLIC_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[А-Яа-яЁё]+(?:[ \t]+[А-Яа-яЁё]+)*").unwrap());

/// Commands whose argument is already text mode.
const TEXT_COMMANDS: [&str; 5] = ["\\text{", "\\textrm{", "\\mathrm{", "\\mbox{", "\\textit{"];

/// Wrap bare Cyrillic runs inside math in `\text{…}` for Russian documents.
fn math_text(latex: &str, language: Language) -> String {
    if language != Language::Ru {
        return latex.to_string();
    }
    let mut out = String::with_capacity(latex.len() + 16);
    let mut last = 0;
    for m in RE_CYRILLIC_RUN.find_iter(latex) {
        let before = &latex[..m.start()];
        out.push_str(&latex[last..m.start()]);
        if TEXT_COMMANDS.iter().any(|cmd| before.ends_with(cmd)) {
            out.push_str(m.as_str());
        } else {
            out.push_str("\\text{");
            out.push_str(m.as_str());
            out.push('}');
        }
        last = m.end();
    }
    out.push_str(&latex[last..]);
    out
}

static RE_ENV_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(begin|end)\{([^}]+)\}").unwrap());

/// Verify that every `\begin` in rendered text has a matching `\end`.
///
/// Comment lines are ignored.
pub fn check_environments(text: &str) -> Result<(), NormalizationError> {
    let mut stack: Vec<String> = Vec::new();
    for line in text.lines().filter(|l| !l.trim_start().starts_with('%')) {
        for caps in RE_ENV_MARKER.captures_iter(line) {
            let env = caps[2].to_string();
            if &caps[1] == "begin" {
                stack.push(env);
                continue;
            }
            match stack.pop() {
                Some(open) if open == env => {}
                Some(open) => {
                    return Err(NormalizationError::MismatchedEnvironment {
                        expected: open,
                        found: env,
                    })
                }
                None => {
                    return Err(NormalizationError::MismatchedEnvironment {
                        expected: String::new(),
                        found: env,
                    })
                }
            }
        }
    }
    match stack.pop() {
        Some(env) => Err(NormalizationError::UnclosedEnvironment { env }),
        None => Ok(()),
    }
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{BoxKind, HeadingLevel, ListStyle};

    #[test]
    fn theorem_box_has_two_slots() {
        let node = StructuralNode::Boxed {
            kind: BoxKind::Theorem,
            title: None,
            text: "Theorem: For all x, x=x.".into(),
        };
        assert_eq!(
            render_node(&node, Language::En),
            "\\begin{theorembox}{}{}\nTheorem: For all x, x=x.\n\\end{theorembox}"
        );
    }

    #[test]
    fn proof_has_no_slots() {
        let node = StructuralNode::Boxed {
            kind: BoxKind::Proof,
            title: None,
            text: "Trivial.".into(),
        };
        assert_eq!(
            render_node(&node, Language::En),
            "\\begin{proof}\nTrivial.\n\\end{proof}"
        );
    }

    #[test]
    fn aligned_rows_use_split_point() {
        let node = StructuralNode::Aligned {
            lines: vec![
                AlignedLine { latex: "y'=2x".into(), split: Some(2) },
                AlignedLine { latex: "y''=2".into(), split: Some(3) },
            ],
        };
        assert_eq!(
            render_node(&node, Language::En),
            "\\begin{align*}\ny' &=2x \\\\\ny'' &=2\n\\end{align*}"
        );
    }

    #[test]
    fn sections_lists_and_annotations() {
        let nodes = vec![
            StructuralNode::section(HeadingLevel::Subsection, "Limits"),
            StructuralNode::ListBlock {
                style: ListStyle::Ordered,
                items: vec!["one".into()],
            },
            StructuralNode::Annotation { text: "Lecture 5".into() },
        ];
        assert_eq!(
            render(&nodes, Language::En),
            "\\subsection{Limits}\n\n\\begin{enumerate}\n  \\item one\n\\end{enumerate}\n\n% note: Lecture 5\n"
        );
    }

    #[test]
    fn figure_without_caption() {
        let node = StructuralNode::Figure {
            path: "figures/a.png".into(),
            caption: None,
        };
        let out = render_node(&node, Language::En);
        assert!(out.contains("\\includegraphics[width=0.8\\textwidth]{figures/a.png}"));
        assert!(!out.contains("\\caption"));
    }

    #[test]
    fn cyrillic_in_math_is_wrapped() {
        assert_eq!(math_text("x = 1, где x>0", Language::Ru), "x = 1, \\text{где} x>0");
        assert_eq!(math_text("\\text{если} x", Language::Ru), "\\text{если} x");
        assert_eq!(math_text("где", Language::En), "где");
    }

    #[test]
    fn environment_checks() {
        assert!(check_environments("\\begin{a}\n\\begin{b}\n\\end{b}\n\\end{a}").is_ok());
        assert_eq!(
            check_environments("\\begin{a}\n\\end{b}").unwrap_err(),
            NormalizationError::MismatchedEnvironment {
                expected: "a".into(),
                found: "b".into()
            }
        );
        assert_eq!(
            check_environments("\\begin{a}\n% \\end{a}").unwrap_err(),
            NormalizationError::UnclosedEnvironment { env: "a".into() }
        );
    }

    #[test]
    fn empty_document_is_single_newline() {
        assert_eq!(render(&[], Language::En), "\n");
    }
}
