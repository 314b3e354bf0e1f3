//! Tolerant extraction of a single capability call from model text.
//!
//! The accepted call shapes are `tool: name({...})` anywhere in the reply, or
//! a bare `name({...})` at the start of a line. The scanner tracks quote state
//! and parenthesis depth by hand so that code pasted inside string arguments
//! (parentheses, braces, quotes, raw line breaks) does not end the call early.
//!
//! Only the first complete call is honored; anything after it is ignored.

use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::core::literal::eval_literal;
use crate::core::types::{Arguments, Invocation};

/// Why a reply could not be turned into an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseDiagnostic {
    /// The reply names a capability but never calls it.
    MentionedWithoutCall { name: String },
    /// The call names something that is not registered.
    UnknownCapability { name: String },
    /// Parenthesis depth never returned to zero.
    IncompleteCall {
        name: String,
        depth: i32,
        in_string: bool,
        snippet: String,
    },
    /// The call span holds no `{...}` mapping.
    MissingArguments { name: String },
    /// Every decoding strategy failed (or the value is not a mapping).
    UndecodableArguments { name: String, error: String },
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseDiagnostic::MentionedWithoutCall { name } => write!(
                f,
                "You mentioned '{name}' but didn't call it. Call it now: tool: {name}({{...}})"
            ),
            ParseDiagnostic::UnknownCapability { name } => write!(f, "Unknown tool: {name}"),
            ParseDiagnostic::IncompleteCall {
                name,
                depth,
                in_string,
                snippet,
            } => write!(
                f,
                "Incomplete tool call for '{name}' (missing closing parenthesis). \
                 Debug: depth={depth}, in_string={in_string}, snippet={snippet}"
            ),
            ParseDiagnostic::MissingArguments { name } => write!(
                f,
                "No arguments dict found for '{name}'. Use: tool: {name}({{\"key\": \"value\"}})"
            ),
            ParseDiagnostic::UndecodableArguments { name, error } => write!(
                f,
                "Could not parse arguments for '{name}': {error}. \
                 Use double quotes and \\n for newlines."
            ),
        }
    }
}

/// Result of scanning one model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Exactly one invocation, no diagnostic.
    Call(Invocation),
    /// No invocation; the diagnostic should be fed back to the model.
    Diagnostic(ParseDiagnostic),
    /// Plain conversational text.
    NoCall,
}

impl Extraction {
    pub fn invocation(&self) -> Option<&Invocation> {
        match self {
            Extraction::Call(invocation) => Some(invocation),
            _ => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&ParseDiagnostic> {
        match self {
            Extraction::Diagnostic(diagnostic) => Some(diagnostic),
            _ => None,
        }
    }
}

const SNIPPET_CHARS: usize = 100;

/// Extract the first capability call from `text`.
///
/// `registered` lists capability names in registry order; that order decides
/// which name a "mentioned but not called" diagnostic reports.
pub fn extract_invocation<S: AsRef<str>>(text: &str, registered: &[S]) -> Extraction {
    let cleaned = strip_code_fences(text);
    let cleaned = escape_newlines_in_strings(cleaned.trim());

    let Some(site) = find_call_site(&cleaned) else {
        let lowered = text.to_lowercase();
        for name in registered {
            let name = name.as_ref();
            if lowered.contains(name) {
                return Extraction::Diagnostic(ParseDiagnostic::MentionedWithoutCall {
                    name: name.to_string(),
                });
            }
        }
        return Extraction::NoCall;
    };

    let name = site.name;
    if !registered.iter().any(|n| n.as_ref() == name) {
        return Extraction::Diagnostic(ParseDiagnostic::UnknownCapability {
            name: name.to_string(),
        });
    }

    let span = match scan_call_span(&cleaned, site.open_paren) {
        Ok(span) => span,
        Err(state) => {
            let snippet: String = cleaned[site.open_paren..]
                .chars()
                .take(SNIPPET_CHARS)
                .collect();
            return Extraction::Diagnostic(ParseDiagnostic::IncompleteCall {
                name: name.to_string(),
                depth: state.depth,
                in_string: state.in_string,
                snippet,
            });
        }
    };

    let inner = &cleaned[site.open_paren + 1..span];
    let (Some(start), Some(end)) = (inner.find('{'), inner.rfind('}')) else {
        return Extraction::Diagnostic(ParseDiagnostic::MissingArguments {
            name: name.to_string(),
        });
    };
    if end < start {
        return Extraction::Diagnostic(ParseDiagnostic::MissingArguments {
            name: name.to_string(),
        });
    }

    match decode_arguments(&inner[start..=end]) {
        Ok(arguments) => {
            debug!(capability = name, args = arguments.len(), "extracted invocation");
            Extraction::Call(Invocation::new(name, arguments))
        }
        Err(error) => Extraction::Diagnostic(ParseDiagnostic::UndecodableArguments {
            name: name.to_string(),
            error,
        }),
    }
}

/// Remove markdown code fence markers, keeping the fenced content.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```python", "")
        .replace("```json", "")
        .replace("```", "")
}

/// Replace raw line breaks inside quoted spans with a `\n` escape.
///
/// A backslash always consumes the following character, so escaped quotes
/// never toggle the quote state.
pub fn escape_newlines_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                out.push(ch);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '"' | '\'' => {
                match quote {
                    None => quote = Some(ch),
                    Some(open) if open == ch => quote = None,
                    Some(_) => {}
                }
                out.push(ch);
            }
            '\n' if quote.is_some() => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CallSite<'a> {
    name: &'a str,
    /// Byte offset of the opening parenthesis.
    open_paren: usize,
}

/// Locate `tool: name(` first, falling back to a line starting with `name({`.
fn find_call_site(text: &str) -> Option<CallSite<'_>> {
    find_marked_call(text).or_else(|| find_bare_call(text))
}

fn find_marked_call(text: &str) -> Option<CallSite<'_>> {
    let mut from = 0;
    while let Some(rel) = text[from..].find("tool:") {
        let after_marker = from + rel + "tool:".len();
        let name_start = skip_whitespace(text, after_marker);
        let name_end = scan_identifier(text, name_start);
        if name_end > name_start {
            let paren = skip_whitespace(text, name_end);
            if text[paren..].starts_with('(') {
                return Some(CallSite {
                    name: &text[name_start..name_end],
                    open_paren: paren,
                });
            }
        }
        from = after_marker;
    }
    None
}

fn find_bare_call(text: &str) -> Option<CallSite<'_>> {
    let mut line_start = 0;
    for line in text.split_inclusive('\n') {
        let name_end = scan_identifier(text, line_start);
        if name_end > line_start {
            let paren = skip_whitespace(text, name_end);
            if text[paren..].starts_with('(') {
                let brace = skip_whitespace(text, paren + 1);
                if text[brace..].starts_with('{') {
                    return Some(CallSite {
                        name: &text[line_start..name_end],
                        open_paren: paren,
                    });
                }
            }
        }
        line_start += line.len();
    }
    None
}

fn skip_whitespace(text: &str, from: usize) -> usize {
    text[from..]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map_or(text.len(), |(i, _)| from + i)
}

fn scan_identifier(text: &str, from: usize) -> usize {
    text[from..]
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map_or(text.len(), |(i, _)| from + i)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScanState {
    depth: i32,
    in_string: bool,
}

/// Scan from the opening parenthesis to its matching close.
///
/// Returns the byte offset of the closing parenthesis, or the scanner state
/// at end of input when depth never returns to zero.
fn scan_call_span(text: &str, open_paren: usize) -> Result<usize, ScanState> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut chars = text[open_paren..].char_indices();
    while let Some((i, ch)) = chars.next() {
        if quote.is_some() && ch == '\\' {
            chars.next();
            continue;
        }
        match ch {
            '"' | '\'' => match quote {
                None => quote = Some(ch),
                Some(open) if open == ch => quote = None,
                Some(_) => {}
            },
            '(' if quote.is_none() => depth += 1,
            ')' if quote.is_none() => {
                depth -= 1;
                if depth == 0 {
                    return Ok(open_paren + i);
                }
            }
            _ => {}
        }
    }
    Err(ScanState {
        depth,
        in_string: quote.is_some(),
    })
}

type DecodeStrategy = fn(&str) -> Result<Value, String>;

/// Ordered decode chain; the first strategy to succeed wins.
const DECODE_CHAIN: [(&str, DecodeStrategy); 3] = [
    ("literal", decode_literal),
    ("json", decode_json),
    ("normalized json", decode_quote_normalized),
];

fn decode_literal(src: &str) -> Result<Value, String> {
    eval_literal(src).map_err(|err| err.to_string())
}

fn decode_json(src: &str) -> Result<Value, String> {
    serde_json::from_str(src).map_err(|err| err.to_string())
}

fn decode_quote_normalized(src: &str) -> Result<Value, String> {
    serde_json::from_str(&src.replace('\'', "\"")).map_err(|err| err.to_string())
}

/// Decode argument text, reporting the first strategy's failure when all fail.
pub fn decode_arguments(src: &str) -> Result<Arguments, String> {
    let mut first_error: Option<String> = None;
    for (label, strategy) in DECODE_CHAIN {
        match strategy(src) {
            Ok(Value::Object(map)) => return Ok(map),
            Ok(other) => {
                first_error.get_or_insert_with(|| {
                    format!("arguments must be a mapping, got {}", json_kind(&other))
                });
            }
            Err(err) => {
                debug!(strategy = label, error = %err, "argument decode strategy failed");
                first_error.get_or_insert(err);
            }
        }
    }
    Err(first_error.unwrap_or_else(|| "no decoder accepted the arguments".to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
