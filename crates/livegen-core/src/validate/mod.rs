//! Structural validation of generated source.
//!
//! Validation is a balance-and-shape check, not a parse: a trailing-character
//! heuristic, a set of pluggable [`SourceRule`]s, and a single left-to-right
//! lexical scan that tracks strings, comments and nested template literals.
//! Every function here is pure; the same input always yields the same result.

mod rules;

use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, is_script_path};

pub use rules::{
    DenylistRule, EntryPointRule, HeroBeforeNavRule, RuleScope, RuleViolation, SourceRule,
};

/// Outcome of validating one source buffer or artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: Option<String>,
    /// 1-based line the failure points at, when known.
    pub line: Option<usize>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
            line: None,
        }
    }

    pub fn fail(reason: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            line,
        }
    }

    fn prefixed(self, path: &str) -> Self {
        match self.reason {
            Some(reason) if !self.valid => Self {
                reason: Some(format!("{path}: {reason}")),
                ..self
            },
            _ => self,
        }
    }
}

/// Characters that cannot end a complete program.
const TRUNCATION_TAIL: [char; 12] = ['<', '{', '(', '[', ',', ':', '=', '.', '+', '-', '*', '/'];

/// Returns the offending character when the source looks cut off mid-expression.
pub fn truncated_tail(source: &str) -> Option<char> {
    let trimmed = source.trim_end();
    if trimmed.ends_with("*/") {
        return None;
    }
    trimmed.chars().last().filter(|c| TRUNCATION_TAIL.contains(c))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lex {
    Code,
    Single,
    Double,
    LineComment,
    BlockComment,
}

#[derive(Clone, Copy)]
struct Counter {
    open: char,
    close: char,
    depth: i64,
}

/// Lexical balance scan over the whole buffer.
///
/// Template literals are tracked with a stack of brace depths: the scanner is
/// inside a template body exactly when the top of the stack equals the current
/// brace depth, so `${ ... }` interpolations (and templates nested inside
/// them) re-enter the enclosing body when their braces close.
pub fn scan_structure(source: &str) -> ValidationResult {
    let chars: Vec<char> = source.chars().collect();
    let mut parens = Counter {
        open: '(',
        close: ')',
        depth: 0,
    };
    let mut braces = Counter {
        open: '{',
        close: '}',
        depth: 0,
    };
    let mut brackets = Counter {
        open: '[',
        close: ']',
        depth: 0,
    };
    let mut templates: Vec<(i64, usize)> = Vec::new();
    let mut state = Lex::Code;
    let mut opened_at_line = 0usize;
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let mut step = 1usize;

        match state {
            Lex::Single | Lex::Double => {
                let quote = if state == Lex::Single { '\'' } else { '"' };
                if c == '\\' {
                    step = 2;
                } else if c == quote {
                    state = Lex::Code;
                }
            }
            Lex::LineComment => {
                if c == '\n' {
                    state = Lex::Code;
                }
            }
            Lex::BlockComment => {
                if c == '*' && next == Some('/') {
                    state = Lex::Code;
                    step = 2;
                }
            }
            Lex::Code => {
                let in_template_body = templates
                    .last()
                    .is_some_and(|(depth, _)| *depth == braces.depth);
                if in_template_body {
                    match c {
                        '\\' => step = 2,
                        '`' => {
                            templates.pop();
                        }
                        '$' if next == Some('{') => {
                            braces.depth += 1;
                            step = 2;
                        }
                        _ => {}
                    }
                } else {
                    match c {
                        // An apostrophe right after a letter (`We're`) is prose, not a string.
                        '\'' if i > 0 && chars[i - 1].is_alphanumeric() => {}
                        '\'' => {
                            state = Lex::Single;
                            opened_at_line = line;
                        }
                        '"' => {
                            state = Lex::Double;
                            opened_at_line = line;
                        }
                        '`' => templates.push((braces.depth, line)),
                        '/' if next == Some('/') => {
                            state = Lex::LineComment;
                            step = 2;
                        }
                        '/' if next == Some('*') => {
                            state = Lex::BlockComment;
                            opened_at_line = line;
                            step = 2;
                        }
                        _ => {
                            for counter in [&mut parens, &mut braces, &mut brackets] {
                                if c == counter.open {
                                    counter.depth += 1;
                                } else if c == counter.close {
                                    counter.depth -= 1;
                                    if counter.depth < 0 {
                                        return ValidationResult::fail(
                                            format!(
                                                "unbalanced brackets at position {i}: extra '{}'",
                                                counter.close
                                            ),
                                            Some(line),
                                        );
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        for skipped in &chars[i..(i + step).min(chars.len())] {
            if *skipped == '\n' {
                line += 1;
            }
        }
        i += step;
    }

    match state {
        Lex::Single | Lex::Double => {
            return ValidationResult::fail("unterminated string literal", Some(opened_at_line));
        }
        Lex::BlockComment => {
            return ValidationResult::fail("unterminated block comment", Some(opened_at_line));
        }
        Lex::LineComment | Lex::Code => {}
    }
    if let Some((_, opened)) = templates.last() {
        return ValidationResult::fail("unterminated template literal", Some(*opened));
    }
    for counter in [braces, parens, brackets] {
        if counter.depth > 0 {
            return ValidationResult::fail(
                format!("missing {} closing '{}'", counter.depth, counter.close),
                Some(line),
            );
        }
    }
    ValidationResult::ok()
}

fn last_line(source: &str) -> usize {
    source.trim_end().lines().count().max(1)
}

/// Configured validator: trailing heuristic, source rules, lexical scan.
pub struct Validator {
    rules: Vec<Box<dyn SourceRule>>,
}

impl Validator {
    /// A validator with no source rules; only the heuristic and the scan run.
    pub fn bare() -> Self {
        Self { rules: Vec::new() }
    }

    /// Entry-point, denylist and layout rules.
    pub fn standard() -> Self {
        Self::bare()
            .with_rule(EntryPointRule)
            .with_rule(DenylistRule)
            .with_rule(HeroBeforeNavRule)
    }

    /// Standard rules, with the layout policy only when enabled.
    pub fn with_layout_policy(enabled: bool) -> Self {
        let validator = Self::standard();
        if enabled {
            validator
        } else {
            validator.without_rule("hero-before-nav")
        }
    }

    pub fn with_rule(mut self, rule: impl SourceRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn without_rule(mut self, name: &str) -> Self {
        self.rules.retain(|r| r.name() != name);
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Validates a single source buffer as a primary (entry) file.
    pub fn validate(&self, source: &str) -> ValidationResult {
        self.validate_scoped(source, true)
    }

    fn validate_scoped(&self, source: &str, primary: bool) -> ValidationResult {
        if source.trim().is_empty() {
            return ValidationResult::fail("empty source", None);
        }
        if let Some(c) = truncated_tail(source) {
            return ValidationResult::fail(
                format!("apparently truncated: ends with '{c}'"),
                Some(last_line(source)),
            );
        }
        for rule in &self.rules {
            if !primary && rule.scope() == RuleScope::Primary {
                continue;
            }
            if let Some(violation) = rule.check(source) {
                return ValidationResult::fail(violation.reason, violation.line);
            }
        }
        scan_structure(source)
    }

    /// Validates every script file; primary-scoped rules run on the entry file only.
    pub fn validate_artifact(&self, artifact: &Artifact) -> ValidationResult {
        match artifact {
            Artifact::Single { source } => self.validate(source),
            Artifact::Files { files } => {
                let primary = artifact.primary_path();
                let mut saw_script = false;
                for (path, source) in files {
                    if !is_script_path(path) {
                        continue;
                    }
                    saw_script = true;
                    let result =
                        self.validate_scoped(source, primary == Some(path.as_str()));
                    if !result.valid {
                        return result.prefixed(path);
                    }
                }
                if saw_script {
                    ValidationResult::ok()
                } else {
                    ValidationResult::fail("artifact contains no script files", None)
                }
            }
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("rules", &self.rule_names())
            .finish()
    }
}

static STANDARD: Lazy<Validator> = Lazy::new(Validator::standard);

/// Validates with the standard rule set.
pub fn validate(source: &str) -> ValidationResult {
    STANDARD.validate(source)
}

/// Weaker check for restored or persisted artifacts: non-empty and balanced.
pub fn sanity_check(artifact: &Artifact) -> ValidationResult {
    for (path, source) in artifact.entries() {
        if path.is_some_and(|p| !is_script_path(p)) {
            continue;
        }
        let result = if source.trim().is_empty() {
            ValidationResult::fail("empty source", None)
        } else {
            scan_structure(source)
        };
        if !result.valid {
            return match path {
                Some(p) => result.prefixed(p),
                None => result,
            };
        }
    }
    if artifact.is_empty() {
        return ValidationResult::fail("empty artifact", None);
    }
    ValidationResult::ok()
}
