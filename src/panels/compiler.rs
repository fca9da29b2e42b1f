//! Rule compiler: panel rules → Gmail search query.
//!
//! Each rule becomes a field-scoped atom. Accept atoms are OR-ed together,
//! reject atoms are OR-ed and negated:
//!
//! ```text
//! (from:@company.com OR to:team) AND -(subject:newsletter)
//! ```
//!
//! A panel without rules compiles to the empty string (no filter), unless it
//! is compiled against sibling queries, in which case it becomes the
//! catch-all `-(q1) AND -(q2) ...`.
//!
//! Gmail has no regex operator, so patterns are translated: anchors and the
//! `(?i)` flag are dropped, top-level `|` becomes `OR`, `.*` and `*` split a
//! term into words that must all appear. Anything else regex-specific is a
//! [`CompileError`] and fails the panel.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{CompileError, Error};
use crate::panels::model::{PanelConfig, PanelKind, Rule, RuleAction, RuleField};

/// A term Gmail accepts without quoting.
static BARE_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[^\s"(){}\-][^\s"(){}]*$"#).expect("bare term regex is valid")
});

/// Words Gmail parses as operators when left bare.
const RESERVED_WORDS: &[&str] = &["OR", "AND", "NOT"];

/// Compile a panel's rules into a search query.
///
/// `negate_against` is only consulted when the panel has no rules.
pub fn compile(panel: &PanelConfig, negate_against: &[String]) -> Result<String, Error> {
    let rules = panel.rules();
    if rules.is_empty() {
        return Ok(negate_all(negate_against));
    }

    let mut accepts = Vec::new();
    let mut rejects = Vec::new();
    for rule in rules {
        let atom = compile_rule(rule).map_err(|source| Error::Compile {
            panel: panel.name.clone(),
            source,
        })?;
        match rule.action {
            RuleAction::Accept => accepts.push(atom),
            RuleAction::Reject => rejects.push(atom),
        }
    }

    let mut clauses = Vec::with_capacity(2);
    if !accepts.is_empty() {
        clauses.push(format!("({})", accepts.join(" OR ")));
    }
    if !rejects.is_empty() {
        clauses.push(format!("-({})", rejects.join(" OR ")));
    }
    Ok(clauses.join(" AND "))
}

/// Conjunction of the negation of every non-empty query.
pub fn negate_all(queries: &[String]) -> String {
    queries
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .map(|q| format!("-({q})"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Compile every panel, in order.
///
/// Catch-all panels negate the compiled queries of all filter panels that
/// have rules. A catch-all with nothing to negate compiles to `""`.
pub fn compile_panels(panels: &[PanelConfig]) -> Result<Vec<String>, Error> {
    let mut compiled = Vec::with_capacity(panels.len());
    for panel in panels {
        match panel.kind {
            PanelKind::Filter { .. } => compiled.push(compile(panel, &[])?),
            PanelKind::CatchAll => compiled.push(String::new()),
        }
    }

    let claimed: Vec<String> = panels
        .iter()
        .zip(&compiled)
        .filter(|(panel, _)| !panel.rules().is_empty())
        .map(|(_, query)| query.clone())
        .collect();

    for (panel, query) in panels.iter().zip(compiled.iter_mut()) {
        if panel.kind == PanelKind::CatchAll {
            *query = compile(panel, &claimed)?;
        }
    }
    Ok(compiled)
}

/// AND a panel query with the active search, if any.
pub fn conjoin_search(query: &str, search: Option<&str>) -> String {
    match search {
        None => query.to_string(),
        Some(search) if query.is_empty() => search.to_string(),
        Some(search) => format!("({query}) AND ({search})"),
    }
}

/// Translate one rule into a field-scoped atom.
pub fn compile_rule(rule: &Rule) -> Result<String, CompileError> {
    let terms = pattern_terms(rule.field, &rule.pattern)?;
    let value = if terms.len() == 1 {
        terms.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", terms.join(" OR "))
    };
    Ok(match rule.field {
        RuleField::Body => value,
        field => format!("{}:{value}", field.as_str()),
    })
}

/// One rendered search term per top-level alternative of the pattern.
fn pattern_terms(field: RuleField, pattern: &str) -> Result<Vec<String>, CompileError> {
    let unsupported = |reason: String| CompileError::UnsupportedPattern {
        field: field.to_string(),
        pattern: pattern.to_string(),
        reason,
    };

    let mut body = pattern.trim();
    if let Some(rest) = body.strip_prefix("(?i)") {
        body = rest.trim_start();
    }
    body = body.strip_prefix('^').unwrap_or(body);
    if body.ends_with('$') && !body.ends_with("\\$") {
        body = &body[..body.len() - 1];
    }
    body = strip_outer_group(body.trim());

    if body.trim().is_empty() {
        return Err(CompileError::EmptyPattern {
            field: field.to_string(),
        });
    }

    let mut terms = Vec::new();
    for alternative in split_alternatives(body) {
        let words = literal_words(alternative).map_err(&unsupported)?;
        let term = match words.as_slice() {
            [] => return Err(unsupported("alternative matches every message".into())),
            [word] => render_word(word),
            words => format!(
                "({})",
                words.iter().map(|w| render_word(w)).collect::<Vec<_>>().join(" ")
            ),
        };
        terms.push(term);
    }
    Ok(terms)
}

/// Unwrap `( ... )` or `(?: ... )` when it encloses the whole pattern.
fn strip_outer_group(s: &str) -> &str {
    if !s.starts_with('(') || !s.ends_with(')') || s.ends_with("\\)") {
        return s;
    }
    let mut depth = 0usize;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if i != s.len() - 1 {
                        return s;
                    }
                    let inner = &s[1..i];
                    return inner.strip_prefix("?:").unwrap_or(inner);
                }
            }
            _ => {}
        }
    }
    s
}

/// Split on unescaped `|`.
fn split_alternatives(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '|' => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Reduce a regex-like alternative to the literal words it requires.
fn literal_words(alternative: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut chars = alternative.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('s') => current.push(' '),
                Some('"') => return Err("double quotes are not allowed".into()),
                Some(e) if e.is_ascii_alphanumeric() => {
                    return Err(format!("escape sequence \\{e} has no search equivalent"));
                }
                Some(e) => current.push(e),
                None => return Err("trailing backslash".into()),
            },
            '.' if matches!(chars.peek(), Some('*' | '+')) => {
                chars.next();
                flush_word(&mut words, &mut current);
            }
            '*' => flush_word(&mut words, &mut current),
            '"' => return Err("double quotes are not allowed".into()),
            '[' | ']' | '{' | '}' | '(' | ')' | '?' | '+' | '^' | '$' => {
                return Err(format!("regex operator '{c}' has no search equivalent"));
            }
            _ => current.push(c),
        }
    }
    flush_word(&mut words, &mut current);
    Ok(words)
}

fn flush_word(words: &mut Vec<String>, current: &mut String) {
    let word = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !word.is_empty() {
        words.push(word);
    }
    current.clear();
}

fn render_word(word: &str) -> String {
    if BARE_TERM.is_match(word) && !RESERVED_WORDS.contains(&word) {
        word.to_string()
    } else {
        format!("\"{word}\"")
    }
}
