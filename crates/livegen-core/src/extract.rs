//! Code extraction from a noisy raw buffer.
//!
//! Producers do not always honor the raw-text contract: the buffer may carry
//! type markers, live-log tokens, code fences, a summary section, or a whole
//! JSON envelope around the real source. Everything that decides "is this
//! actually an envelope" goes through [`unwrap_envelope`].

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::artifact::Artifact;
use crate::markers;

/// Result of one extraction pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Extraction {
    /// Multi-file output (envelope or legacy file blocks).
    Files(Artifact),
    /// A single source unit starting at its program start.
    Source(String),
    /// No recognizable program start.
    Empty,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        matches!(self, Extraction::Empty)
    }

    pub fn into_artifact(self) -> Option<Artifact> {
        match self {
            Extraction::Files(artifact) => Some(artifact),
            Extraction::Source(source) => Some(Artifact::single(source)),
            Extraction::Empty => None,
        }
    }
}

static PROGRAM_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*(?:import[\s{*'"]|export\s|(?:async\s+)?function[\s*]|const\s|let\s|class\s|['"]use client['"])"#,
    )
    .expect("program start pattern compiles")
});

/// Removes one level of surrounding markdown fences.
fn strip_outer_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Balanced `{...}` fragment at the start of `text`, ignoring braces in strings.
fn leading_json_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if in_string {
            match c {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ if depth == 0 && !c.is_whitespace() => return None,
            _ => {}
        }
    }
    None
}

/// Cheap check used while streaming, before the envelope is complete.
pub fn looks_like_envelope(text: &str) -> bool {
    let trimmed = strip_outer_fences(text);
    trimmed.starts_with('{') && (trimmed.contains("\"files\"") || trimmed.contains("\"projectFiles\""))
}

/// Unwraps `{"files": {...}}` / `{"projectFiles": {...}}` into a files artifact.
///
/// File values may be plain strings or `{ "code": ... }` / `{ "content": ... }`
/// objects. Returns `None` when the text is not such an envelope.
pub fn unwrap_envelope(text: &str) -> Option<Artifact> {
    let trimmed = strip_outer_fences(text);
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => serde_json::from_str(leading_json_object(trimmed)?).ok()?,
    };
    let files = value
        .get("files")
        .or_else(|| value.get("projectFiles"))?
        .as_object()?;

    let mut out = BTreeMap::new();
    for (path, entry) in files {
        let source = entry
            .as_str()
            .or_else(|| entry.get("code").and_then(|v| v.as_str()))
            .or_else(|| entry.get("content").and_then(|v| v.as_str()));
        if let Some(source) = source {
            out.insert(path.clone(), source.to_string());
        }
    }
    if out.is_empty() {
        return None;
    }
    Some(Artifact::files(out))
}

/// Removes `[LOG: ...]` progress tokens; an unclosed token runs to end of line.
pub fn strip_log_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(markers::LOG_TOKEN_OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let end = after
            .find(']')
            .map(|i| i + 1)
            .or_else(|| after.find('\n'))
            .unwrap_or(after.len());
        rest = &after[end..];
    }
    out.push_str(rest);
    out
}

fn strip_fence_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_summary_section(text: &str) -> &str {
    match text.find(markers::SUMMARY) {
        Some(idx) => &text[..idx],
        None => text,
    }
}

fn clean(text: &str) -> String {
    let text = strip_log_tokens(text);
    let text = strip_fence_lines(&text);
    let text = text.replace(markers::COMPLETION_SENTINEL, "");
    strip_summary_section(&text).trim_end().to_string()
}

fn from_program_start(text: &str) -> Option<String> {
    let m = PROGRAM_START.find(text)?;
    let source = text[m.start()..].trim_start_matches(['\n', '\r']).trim_end();
    (!source.trim().is_empty()).then(|| source.to_string())
}

/// Parses legacy `/// FILE: <path> ///` blocks after `/// BEGIN_FILES ///`.
///
/// An unterminated block yields the files seen so far.
fn legacy_file_blocks(buffer: &str) -> Option<Artifact> {
    let start = buffer.find(markers::BEGIN_FILES)? + markers::BEGIN_FILES.len();
    let body = &buffer[start..];
    let body = match body.find(markers::END_FILES) {
        Some(end) => &body[..end],
        None => body,
    };

    let mut files: Vec<(String, Vec<&str>)> = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if let Some(header) = trimmed
            .strip_prefix(markers::FILE_PREFIX)
            .and_then(|h| h.strip_suffix(markers::MARKER_SUFFIX))
        {
            files.push((header.trim().to_string(), Vec::new()));
            continue;
        }
        if let Some((_, lines)) = files.last_mut() {
            lines.push(line);
        }
    }
    let files: Vec<(String, String)> = files
        .into_iter()
        .filter(|(path, _)| !path.is_empty())
        .map(|(path, lines)| (path, clean(&lines.join("\n")).trim().to_string()))
        .collect();
    if files.is_empty() {
        return None;
    }
    Some(Artifact::files(files))
}

fn after_code_marker(buffer: &str) -> &str {
    [markers::BEGIN_CODE, markers::TYPE_CODE]
        .into_iter()
        .filter_map(|marker| buffer.rfind(marker).map(|idx| idx + marker.len()))
        .max()
        .map_or(buffer, |idx| &buffer[idx..])
}

/// Locates the real source inside a raw `code`-mode buffer.
pub fn extract(buffer: &str) -> Extraction {
    if let Some(artifact) = unwrap_envelope(buffer) {
        return Extraction::Files(artifact);
    }
    if let Some(artifact) = legacy_file_blocks(buffer) {
        return Extraction::Files(artifact);
    }
    let cleaned = clean(after_code_marker(buffer));
    if let Some(artifact) = unwrap_envelope(&cleaned) {
        return Extraction::Files(artifact);
    }
    match from_program_start(&cleaned) {
        Some(source) => Extraction::Source(source),
        None => Extraction::Empty,
    }
}

/// Text of the trailing summary section, if the producer wrote one.
pub fn extract_summary(buffer: &str) -> Option<String> {
    let idx = buffer.find(markers::SUMMARY)?;
    let text = strip_log_tokens(&buffer[idx + markers::SUMMARY.len()..])
        .replace(markers::COMPLETION_SENTINEL, "");
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_json_envelope_without_exposing_json() {
        let buffer = r#"{"files":{"/App.tsx":"export default function App() { return null }"}}"#;
        let extraction = extract(buffer);
        let Extraction::Files(artifact) = extraction else {
            panic!("expected files, got {extraction:?}");
        };
        assert_eq!(
            artifact.primary_source(),
            "export default function App() { return null }"
        );
        assert!(!artifact.primary_source().contains("\"files\""));
    }

    #[test]
    fn envelope_accepts_project_files_and_code_objects() {
        let text = "```json\n{\"projectFiles\": {\"App.tsx\": {\"code\": \"export default 1\"}}}\n```";
        let artifact = unwrap_envelope(text).expect("envelope");
        assert_eq!(artifact.primary_path(), Some("/App.tsx"));
        assert!(unwrap_envelope("{\"other\": 1}").is_none());
        assert!(unwrap_envelope("export default function App() {}").is_none());
    }

    #[test]
    fn envelope_with_trailing_noise_is_unwrapped() {
        let text = "{\"files\": {\"/App.tsx\": \"x { }\"}}\n/// END_CODE ///";
        assert!(unwrap_envelope(text).is_some());
    }

    #[test]
    fn strips_markers_logs_fences_and_summary() {
        let buffer = "/// TYPE: CODE ///\n[LOG: planning layout]\n```tsx\nimport React from 'react';\n[LOG: writing]\nexport default function App() {\n  return <div />;\n}\n```\n/// END_CODE ///\n/// SUMMARY ///\nBuilt a page.";
        let Extraction::Source(source) = extract(buffer) else {
            panic!("expected source");
        };
        assert_eq!(
            source,
            "import React from 'react';\n\nexport default function App() {\n  return <div />;\n}"
        );
        assert_eq!(extract_summary(buffer).as_deref(), Some("Built a page."));
    }

    #[test]
    fn no_program_start_is_empty() {
        assert_eq!(extract("Sure, I can help with that."), Extraction::Empty);
        assert_eq!(extract("/// BEGIN_CODE ///\n[LOG: thinking"), Extraction::Empty);
    }

    #[test]
    fn legacy_file_blocks_become_files() {
        let buffer = "/// BEGIN_FILES ///\n/// FILE: App.tsx ///\nimport Card from './Card';\nexport default function App() { return <Card /> }\n/// FILE: /components/Card.tsx ///\nexport default function Card() { return null }\n/// END_FILES ///\n/// END_CODE ///";
        let Extraction::Files(artifact) = extract(buffer) else {
            panic!("expected files");
        };
        assert_eq!(artifact.file_count(), 2);
        let entries = artifact.entries();
        assert_eq!(entries[1].0, Some("/components/Card.tsx"));
        assert_eq!(entries[1].1, "export default function Card() { return null }");
    }

    #[test]
    fn unterminated_log_token_is_dropped_to_end_of_line() {
        assert_eq!(strip_log_tokens("a[LOG: half\nb"), "a\nb");
        assert_eq!(strip_log_tokens("a [LOG: x] b [LOG: y]"), "a  b ");
    }
}
