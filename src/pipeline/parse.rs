//! Structural parser: raw model output → ordered [`StructuralNode`] sequence.
//!
//! The model answers in one of two shapes:
//!
//! * **Blocks object**: a JSON object whose `blocks` array lists typed
//!   blocks (`section`, `paragraph`, `equation`, `list`, `figure`).
//! * **Dual block**: a metadata JSON object plus a free-form LaTeX
//!   fragment, either as two fenced blocks (any order), as a bare JSON
//!   object followed by the fragment, or as `{"meta": {…}, "latex": "…"}`.
//!
//! The shape is decided once, here. Later stages only see nodes and the
//! [`RawMeta`] record.

use crate::config::Language;
use crate::document::{BoxKind, HeadingLevel, ListStyle, StructuralNode};
use crate::error::ParseError;
use crate::pipeline::sanitize;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Which of the two output shapes the model used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawShape {
    Blocks,
    DualBlock,
}

/// Metadata the model reported alongside its output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMeta {
    pub language: Option<Language>,
    /// Notes the model says it left out.
    pub dropped_notes: Vec<String>,
    /// Figure paths from `figures` / `figures_captured`.
    pub figures: Vec<String>,
    /// Equations from the legacy `equations_captured` list.
    pub captured_equations: Vec<String>,
}

/// Parser output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub shape: RawShape,
    pub nodes: Vec<StructuralNode>,
    pub meta: RawMeta,
}

/// Parse raw model output.
///
/// # Errors
/// [`ParseError`] when neither shape is recognised, a block is unknown or
/// incomplete, the metadata object is not JSON, or the LaTeX fragment
/// leaves an environment open.
pub fn parse(raw: &str) -> Result<ParsedDocument, ParseError> {
    let cleaned = sanitize::clean_raw(raw);
    let text = cleaned.trim();
    if text.is_empty() {
        return Err(ParseError::UnrecognizedShape {
            detail: "model output is empty".into(),
        });
    }

    if let Some(object) = blocks_object(text)? {
        let nodes = parse_blocks(&object)?;
        let meta = read_meta(&object);
        debug!("Parsed blocks object: {} nodes", nodes.len());
        return Ok(ParsedDocument {
            shape: RawShape::Blocks,
            nodes,
            meta,
        });
    }

    let (meta, fragment) = split_dual_block(text)?;
    let fragment = sanitize::clean_fragment(&fragment);
    let nodes = scan_fragment(&fragment)?;
    debug!("Parsed dual block: {} nodes", nodes.len());
    Ok(ParsedDocument {
        shape: RawShape::DualBlock,
        nodes,
        meta,
    })
}

// ── Shape detection ──────────────────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```([A-Za-z]*)[ \t]*\n(.*?)```").unwrap());

struct Fence<'a> {
    lang: String,
    body: &'a str,
    start: usize,
    end: usize,
}

fn fences(text: &str) -> Vec<Fence<'_>> {
    RE_FENCE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(Fence {
                lang: caps[1].to_lowercase(),
                body: caps.get(2)?.as_str(),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

fn is_latex_fence(lang: &str) -> bool {
    matches!(lang, "latex" | "tex" | "")
}

/// The JSON object holding a `blocks` array, if the text is one.
fn blocks_object(text: &str) -> Result<Option<Map<String, Value>>, ParseError> {
    let candidate = if text.starts_with('{') {
        text
    } else {
        let fenced = fences(text);
        match fenced.as_slice() {
            [only] if only.lang == "json" => only.body.trim(),
            _ => return Ok(None),
        }
    };
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(candidate) else {
        return Ok(None);
    };
    match object.get("blocks") {
        Some(Value::Array(_)) => Ok(Some(object)),
        Some(other) => Err(ParseError::UnrecognizedShape {
            detail: format!("\"blocks\" must be an array, found {}", json_type(other)),
        }),
        None => Ok(None),
    }
}

/// Split dual-block output into metadata and the LaTeX fragment.
fn split_dual_block(text: &str) -> Result<(RawMeta, String), ParseError> {
    let fenced = fences(text);
    if !fenced.is_empty() {
        let latex = fenced.iter().find(|f| is_latex_fence(&f.lang));
        let json = fenced.iter().find(|f| f.lang == "json");
        let meta = match json {
            Some(f) => parse_meta_text(f.body)?,
            None => RawMeta::default(),
        };
        let fragment = match (latex, json) {
            (Some(f), _) => f.body.to_string(),
            // JSON fence followed (or preceded) by an unfenced fragment.
            (None, Some(f)) => format!("{}\n{}", &text[..f.start], &text[f.end..]),
            (None, None) => {
                return Err(ParseError::UnrecognizedShape {
                    detail: format!("unexpected fence language '{}'", fenced[0].lang),
                })
            }
        };
        return Ok((meta, fragment));
    }

    if text.starts_with('{') {
        let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
        return match stream.next() {
            Some(Ok(Value::Object(object))) => {
                let offset = stream.byte_offset();
                if let Some(Value::String(latex)) = object.get("latex") {
                    let meta = match object.get("meta") {
                        Some(Value::Object(inner)) => read_meta(inner),
                        _ => read_meta(&object),
                    };
                    return Ok((meta, latex.clone()));
                }
                let rest = text[offset..].trim();
                if rest.is_empty() {
                    return Err(ParseError::UnrecognizedShape {
                        detail: "JSON object carries neither blocks nor a LaTeX fragment".into(),
                    });
                }
                Ok((read_meta(&object), rest.to_string()))
            }
            Some(Ok(other)) => Err(ParseError::UnrecognizedShape {
                detail: format!("leading JSON value is {}, not an object", json_type(&other)),
            }),
            Some(Err(e)) => Err(ParseError::InvalidMetadata {
                detail: e.to_string(),
            }),
            None => Err(ParseError::UnrecognizedShape {
                detail: "no JSON value found".into(),
            }),
        };
    }

    // A bare fragment: metadata is optional.
    Ok((RawMeta::default(), text.to_string()))
}

// ── Metadata ─────────────────────────────────────────────────────────────────

fn parse_meta_text(text: &str) -> Result<RawMeta, ParseError> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(object)) => match object.get("meta") {
            Some(Value::Object(inner)) => Ok(read_meta(inner)),
            _ => Ok(read_meta(&object)),
        },
        Ok(other) => Err(ParseError::InvalidMetadata {
            detail: format!("expected an object, found {}", json_type(&other)),
        }),
        Err(e) => Err(ParseError::InvalidMetadata {
            detail: e.to_string(),
        }),
    }
}

/// Read the known metadata keys, ignoring anything unexpected.
fn read_meta(object: &Map<String, Value>) -> RawMeta {
    let language = object
        .get("language")
        .and_then(Value::as_str)
        .and_then(Language::from_tag);

    let dropped_notes = strings_of(object.get("dropped_notes"), &["text", "note"]);

    let mut figures = strings_of(object.get("figures"), &["path", "filename"]);
    if figures.is_empty() {
        figures = strings_of(object.get("figures_captured"), &["path", "filename"]);
    }

    let captured_equations = strings_of(object.get("equations_captured"), &["normalized", "raw"]);

    RawMeta {
        language,
        dropped_notes,
        figures,
        captured_equations,
    }
}

/// Collect strings from an array of strings or of objects carrying one of `keys`.
fn strings_of(value: Option<&Value>, keys: &[&str]) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(o) => keys
                .iter()
                .find_map(|k| o.get(*k).and_then(Value::as_str))
                .map(|s| s.trim().to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Blocks object ────────────────────────────────────────────────────────────

fn parse_blocks(object: &Map<String, Value>) -> Result<Vec<StructuralNode>, ParseError> {
    let blocks = object
        .get("blocks")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    blocks
        .iter()
        .enumerate()
        .map(|(index, block)| parse_block(index, block))
        .collect()
}

fn parse_block(index: usize, block: &Value) -> Result<StructuralNode, ParseError> {
    let Some(fields) = block.as_object() else {
        return Err(ParseError::InvalidBlock {
            index,
            kind: "?".into(),
            detail: format!("block is {}, not an object", json_type(block)),
        });
    };
    let kind = match fields.get("type") {
        None | Some(Value::Null) => return Err(ParseError::MissingKind { index }),
        Some(Value::String(s)) => s.as_str(),
        Some(other) => {
            return Err(ParseError::InvalidBlock {
                index,
                kind: other.to_string(),
                detail: "\"type\" must be a string".into(),
            })
        }
    };
    let block = BlockFields {
        index,
        kind,
        fields,
    };

    match kind {
        "section" | "heading" => {
            let level = match fields.get("level") {
                None | Some(Value::Null) => 1,
                Some(v) => v.as_i64().ok_or_else(|| block.invalid("\"level\" must be an integer"))?,
            };
            Ok(StructuralNode::Section {
                level: HeadingLevel::from_depth(level),
                text: block.required_str("text")?,
            })
        }
        "paragraph" => Ok(StructuralNode::Paragraph {
            text: block.required_str("text")?,
        }),
        "equation" => Ok(StructuralNode::Equation {
            latex: block.required_str("latex")?,
        }),
        "list" => {
            let style = match fields.get("style").and_then(Value::as_str) {
                None => ListStyle::Unordered,
                Some("ordered" | "enumerate" | "numbered") => ListStyle::Ordered,
                Some("unordered" | "itemize" | "bullet" | "bulleted") => ListStyle::Unordered,
                Some(other) => return Err(block.invalid(&format!("unknown list style '{other}'"))),
            };
            let Some(Value::Array(raw_items)) = fields.get("items") else {
                return Err(block.invalid("missing \"items\" array"));
            };
            let items = raw_items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(|s| s.trim().to_string())
                        .ok_or_else(|| block.invalid("list items must be strings"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(StructuralNode::ListBlock { style, items })
        }
        "figure" => {
            let path = block
                .optional_str("path")
                .or_else(|| block.optional_str("filename"))
                .ok_or_else(|| block.invalid("missing \"path\""))?;
            Ok(StructuralNode::Figure {
                path,
                caption: block.optional_str("caption"),
            })
        }
        other => Err(ParseError::UnknownBlockKind {
            index,
            kind: other.to_string(),
        }),
    }
}

struct BlockFields<'a> {
    index: usize,
    kind: &'a str,
    fields: &'a Map<String, Value>,
}

impl BlockFields<'_> {
    fn invalid(&self, detail: &str) -> ParseError {
        ParseError::InvalidBlock {
            index: self.index,
            kind: self.kind.to_string(),
            detail: detail.to_string(),
        }
    }

    fn required_str(&self, name: &str) -> Result<String, ParseError> {
        match self.fields.get(name) {
            Some(Value::String(s)) => Ok(s.trim().to_string()),
            Some(_) => Err(self.invalid(&format!("\"{name}\" must be a string"))),
            None => Err(self.invalid(&format!("missing \"{name}\""))),
        }
    }

    fn optional_str(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

// ── LaTeX fragment ───────────────────────────────────────────────────────────

static RE_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\\(part|chapter|section|subsection|subsubsection)\*?\s*(?:\[[^\]]*\])?\s*\{")
        .unwrap()
});
static RE_BEGIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\\begin\{([^}]+)\}").unwrap());
static RE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\\end\{([^}]+)\}").unwrap());
static RE_INCLUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\includegraphics\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").unwrap()
});
static RE_CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\caption\s*(?:\[[^\]]*\])?\s*\{").unwrap());
static RE_LIST_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:item\b|begin\{|end\{)").unwrap());
static RE_ALIGN_MARK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|[^\\])&").unwrap());

/// Line-based scan of a LaTeX fragment.
fn scan_fragment(fragment: &str) -> Result<Vec<StructuralNode>, ParseError> {
    let mut scanner = Scanner {
        lines: fragment.lines().collect(),
        nodes: Vec::new(),
        paragraph: Vec::new(),
    };
    scanner.run()?;
    Ok(scanner.nodes)
}

struct Scanner<'a> {
    lines: Vec<&'a str>,
    nodes: Vec<StructuralNode>,
    paragraph: Vec<String>,
}

impl<'a> Scanner<'a> {
    fn run(&mut self) -> Result<(), ParseError> {
        let mut i = 0;
        while i < self.lines.len() {
            let raw: &'a str = self.lines[i];
            let line = raw.trim();

            if line.is_empty() {
                self.flush();
                i += 1;
                continue;
            }
            if line.starts_with('%') {
                i += 1;
                continue;
            }

            if let Some(m) = RE_SECTION.captures(line) {
                let open = m.get(0).map_or(0, |g| g.end() - 1);
                if let Some((title, rest)) = brace_group(&line[open..]) {
                    let level = HeadingLevel::from_command(&m[1]).unwrap_or(HeadingLevel::Section);
                    self.flush();
                    self.nodes.push(StructuralNode::section(level, title.trim()));
                    self.push_line(rest);
                    i += 1;
                    continue;
                }
            }

            if let Some(rest) = line.strip_prefix("\\[") {
                let (inner, next, trailing) = self.take_delimited(i, rest, "\\]", "\\[")?;
                self.flush();
                self.nodes.push(StructuralNode::equation(inner.trim()));
                self.push_line(&trailing);
                i = next;
                continue;
            }
            if let Some(rest) = line.strip_prefix("$$") {
                let (inner, next, trailing) = self.take_delimited(i, rest, "$$", "$$")?;
                self.flush();
                self.nodes.push(StructuralNode::equation(inner.trim()));
                self.push_line(&trailing);
                i = next;
                continue;
            }

            if let Some(m) = RE_BEGIN.captures(line) {
                let env = m[1].to_string();
                let rest = &line[m.get(0).map_or(0, |g| g.end())..];
                let (body, next, trailing) = self.take_environment(i, &env, rest)?;
                self.flush();
                let verbatim = self.lines[i..next].join("\n");
                let nodes = environment_nodes(&env, &body, &verbatim);
                self.nodes.extend(nodes);
                self.push_line(&trailing);
                i = next;
                continue;
            }

            if let Some(m) = RE_END.captures(line) {
                return Err(ParseError::UnexpectedEnd {
                    env: m[1].to_string(),
                    line: i + 1,
                });
            }

            self.paragraph.push(line.to_string());
            i += 1;
        }
        self.flush();
        Ok(())
    }

    fn push_line(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.paragraph.push(text.to_string());
        }
    }

    fn flush(&mut self) {
        if !self.paragraph.is_empty() {
            let text = self.paragraph.join("\n");
            self.paragraph.clear();
            self.nodes.push(StructuralNode::Paragraph { text });
        }
    }

    /// Collect text up to `close`, starting with `first` (the rest of line `start`).
    ///
    /// Returns the inner text, the index of the next unread line and any
    /// text after the closing delimiter on its line.
    fn take_delimited(
        &self,
        start: usize,
        first: &str,
        close: &str,
        open_name: &str,
    ) -> Result<(String, usize, String), ParseError> {
        let mut inner = String::new();
        let mut idx = start;
        let mut segment = first;
        loop {
            if let Some(pos) = segment.find(close) {
                inner.push_str(&segment[..pos]);
                let trailing = segment[pos + close.len()..].to_string();
                return Ok((inner, idx + 1, trailing));
            }
            inner.push_str(segment);
            inner.push('\n');
            idx += 1;
            match self.lines.get(idx) {
                Some(line) => segment = *line,
                None => {
                    return Err(ParseError::UnclosedEnvironment {
                        env: open_name.to_string(),
                        line: start + 1,
                    })
                }
            }
        }
    }

    /// Collect the body of `\begin{env}` up to its matching `\end{env}`.
    fn take_environment(
        &self,
        start: usize,
        env: &str,
        first: &str,
    ) -> Result<(String, usize, String), ParseError> {
        let begin = format!("\\begin{{{env}}}");
        let end = format!("\\end{{{env}}}");
        let mut depth = 1usize;
        let mut body = String::new();
        let mut idx = start;
        let mut segment = first;
        loop {
            let mut cursor = 0;
            loop {
                let next_begin = segment[cursor..].find(&begin);
                let next_end = segment[cursor..].find(&end);
                match (next_begin, next_end) {
                    (Some(b), Some(e)) if b < e => {
                        depth += 1;
                        cursor += b + begin.len();
                    }
                    (Some(b), None) => {
                        depth += 1;
                        cursor += b + begin.len();
                    }
                    (_, Some(e)) => {
                        depth -= 1;
                        if depth == 0 {
                            body.push_str(&segment[..cursor + e]);
                            let trailing = segment[cursor + e + end.len()..].to_string();
                            return Ok((body, idx + 1, trailing));
                        }
                        cursor += e + end.len();
                    }
                    (None, None) => break,
                }
            }
            body.push_str(segment);
            body.push('\n');
            idx += 1;
            match self.lines.get(idx) {
                Some(line) => segment = *line,
                None => {
                    return Err(ParseError::UnclosedEnvironment {
                        env: env.to_string(),
                        line: start + 1,
                    })
                }
            }
        }
    }
}

/// Turn one closed environment into nodes.
fn environment_nodes(env: &str, body: &str, verbatim: &str) -> Vec<StructuralNode> {
    let base = env.trim_end_matches('*');
    match base {
        "equation" | "displaymath" | "math" => vec![StructuralNode::equation(body.trim())],
        "align" | "gather" | "multline" | "eqnarray" | "alignat" | "flalign" => {
            let body = if base == "alignat" {
                brace_group(body).map_or(body, |(_, rest)| rest)
            } else {
                body
            };
            body.split("\\\\")
                .map(|row| RE_ALIGN_MARK.replace_all(row, "${1}").trim().to_string())
                .filter(|row| !row.is_empty())
                .map(StructuralNode::equation)
                .collect()
        }
        "itemize" | "enumerate" => {
            let style = if base == "enumerate" {
                ListStyle::Ordered
            } else {
                ListStyle::Unordered
            };
            vec![StructuralNode::ListBlock {
                style,
                items: list_items(body),
            }]
        }
        "figure" => {
            let path = RE_INCLUDE
                .captures(body)
                .map(|c| c[1].trim().to_string())
                .unwrap_or_default();
            let caption = RE_CAPTION
                .find(body)
                .and_then(|m| brace_group(&body[m.end() - 1..]))
                .map(|(inner, _)| inner.trim().to_string())
                .filter(|c| !c.is_empty());
            vec![StructuralNode::Figure { path, caption }]
        }
        _ => match BoxKind::from_environment(base) {
            Some(kind) => {
                let (title, text) = box_arguments(kind, body);
                vec![StructuralNode::Boxed { kind, title, text }]
            }
            None => vec![StructuralNode::paragraph(verbatim.trim())],
        },
    }
}

/// Read `[opt]` and up to two `{…}` groups at the start of a box body.
fn box_arguments(kind: BoxKind, body: &str) -> (Option<String>, String) {
    let mut rest = body.trim_start();
    let mut title: Option<String> = None;
    if let Some((opt, after)) = bracket_group(rest) {
        title = Some(opt.trim().to_string());
        rest = after;
    }
    if kind.has_slots() {
        for slot in 0..2 {
            let Some((group, after)) = brace_group(rest) else {
                break;
            };
            if slot == 0 && title.is_none() {
                title = Some(group.trim().to_string());
            }
            rest = after;
        }
    }
    let text = rest
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();
    (title.filter(|t| !t.is_empty()), text)
}

/// Split a list body on top-level `\item`.
fn list_items(body: &str) -> Vec<String> {
    let mut starts = Vec::new();
    let mut depth = 0usize;
    for m in RE_LIST_TOKEN.find_iter(body) {
        match m.as_str() {
            "\\begin{" => depth += 1,
            "\\end{" => depth = depth.saturating_sub(1),
            _ if depth == 0 => starts.push((m.start(), m.end())),
            _ => {}
        }
    }
    starts
        .iter()
        .enumerate()
        .map(|(n, &(_, text_start))| {
            let text_end = starts.get(n + 1).map_or(body.len(), |&(s, _)| s);
            item_text(&body[text_start..text_end])
        })
        .filter(|item| !item.is_empty())
        .collect()
}

/// `\item[a)] text` is read as `a) text`.
fn item_text(raw: &str) -> String {
    let raw = raw.trim_start();
    let joined = |s: &str| {
        s.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    };
    match bracket_group(raw) {
        Some((label, rest)) => {
            let label = label.trim();
            let rest = joined(rest);
            match (label.is_empty(), rest.is_empty()) {
                (true, _) => rest,
                (false, true) => label.to_string(),
                (false, false) => format!("{label} {rest}"),
            }
        }
        None => joined(raw),
    }
}

/// Split `{inner}rest`, honouring nested and escaped braces.
pub(crate) fn brace_group(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    let mut escaped = false;
    for (pos, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&s[1..pos], &s[pos + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

/// Split `[inner]rest` (no nesting).
fn bracket_group(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    let inner = s.strip_prefix('[')?;
    let close = inner.find(']')?;
    Some((&inner[..close], &inner[close + 1..]))
}
