use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

const SCRIPT_EXTENSIONS: [&str; 5] = [".tsx", ".jsx", ".ts", ".js", ".mjs"];

/// Generated output: one source unit, or a set of files keyed by path.
///
/// File paths are always normalized to begin with `/`; use
/// [`Artifact::files`] to build a multi-file artifact from raw paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Single { source: String },
    Files { files: BTreeMap<String, String> },
}

impl Artifact {
    pub fn single(source: impl Into<String>) -> Self {
        Artifact::Single {
            source: source.into(),
        }
    }

    /// Builds a files artifact, normalizing every path. Later duplicates win.
    pub fn files<I, P, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, S)>,
        P: AsRef<str>,
        S: Into<String>,
    {
        let files = entries
            .into_iter()
            .map(|(path, source)| (normalize_path(path.as_ref()), source.into()))
            .collect();
        Artifact::Files { files }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Artifact::Single { source } => source.trim().is_empty(),
            Artifact::Files { files } => files.values().all(|s| s.trim().is_empty()),
        }
    }

    /// Path of the file that carries the program entry, if this is a files artifact.
    pub fn primary_path(&self) -> Option<&str> {
        let Artifact::Files { files } = self else {
            return None;
        };
        if files.contains_key("/App.tsx") {
            return Some("/App.tsx");
        }
        files
            .keys()
            .find(|p| p.ends_with(".tsx"))
            .or_else(|| files.keys().find(|p| p.ends_with(".jsx")))
            .or_else(|| files.keys().next())
            .map(String::as_str)
    }

    /// The source a preview renders: the single source or the primary file.
    pub fn primary_source(&self) -> &str {
        match self {
            Artifact::Single { source } => source,
            Artifact::Files { files } => self
                .primary_path()
                .and_then(|p| files.get(p))
                .map(String::as_str)
                .unwrap_or(""),
        }
    }

    /// Deterministic flattening used when comparing two artifacts line by line.
    pub fn combined_source(&self) -> String {
        match self {
            Artifact::Single { source } => source.clone(),
            Artifact::Files { files } => {
                let mut out = String::new();
                for (path, source) in files {
                    out.push_str("/// FILE: ");
                    out.push_str(path);
                    out.push_str(" ///\n");
                    out.push_str(source);
                    if !source.ends_with('\n') {
                        out.push('\n');
                    }
                }
                out
            }
        }
    }

    /// Iterates `(path, source)` pairs; a single source reports no path.
    pub fn entries(&self) -> Vec<(Option<&str>, &str)> {
        match self {
            Artifact::Single { source } => vec![(None, source.as_str())],
            Artifact::Files { files } => files
                .iter()
                .map(|(p, s)| (Some(p.as_str()), s.as_str()))
                .collect(),
        }
    }

    pub fn file_count(&self) -> usize {
        match self {
            Artifact::Single { .. } => 1,
            Artifact::Files { files } => files.len(),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::Single { source } => write!(f, "single source ({} chars)", source.len()),
            Artifact::Files { files } => write!(f, "{} file(s)", files.len()),
        }
    }
}

/// Normalizes a producer-supplied path to the `/dir/file.ext` form.
pub fn normalize_path(raw: &str) -> String {
    let mut path = raw.trim().replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    let mut prev_slash = true;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

/// True for paths the validator lexes as script source.
pub fn is_script_path(path: &str) -> bool {
    SCRIPT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_adds_leading_slash_and_collapses_separators() {
        assert_eq!(normalize_path("App.tsx"), "/App.tsx");
        assert_eq!(normalize_path("./components//Hero.tsx"), "/components/Hero.tsx");
        assert_eq!(normalize_path("\\src\\main.tsx"), "/src/main.tsx");
        assert_eq!(normalize_path("/App.tsx"), "/App.tsx");
    }

    #[test]
    fn primary_prefers_app_then_tsx_then_jsx() {
        let a = Artifact::files([("styles.css", "body{}"), ("b.jsx", "x"), ("a.tsx", "y")]);
        assert_eq!(a.primary_path(), Some("/a.tsx"));
        let a = Artifact::files([("a.tsx", "y"), ("App.tsx", "app")]);
        assert_eq!(a.primary_source(), "app");
        let a = Artifact::files([("styles.css", "body{}"), ("b.jsx", "x")]);
        assert_eq!(a.primary_path(), Some("/b.jsx"));
    }

    #[test]
    fn combined_source_is_deterministic() {
        let a = Artifact::files([("/b.tsx", "b"), ("/a.tsx", "a\n")]);
        assert_eq!(
            a.combined_source(),
            "/// FILE: /a.tsx ///\na\n/// FILE: /b.tsx ///\nb\n"
        );
    }
}
