//! Destructive-edit protection.
//!
//! A [`GuardrailEngine`] compares the known-good source with a proposed
//! rewrite. Every guard runs independently and any failure rejects the whole
//! apply; a rejected [`ApplyDecision`] always carries the old source.

mod profile;

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use profile::{GuardConfig, GuardProfile, ProfileKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardName {
    Length,
    LineDiff,
    LineCount,
    Structure,
    Confidence,
}

impl GuardName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardName::Length => "length",
            GuardName::LineDiff => "line_diff",
            GuardName::LineCount => "line_count",
            GuardName::Structure => "structure",
            GuardName::Confidence => "confidence",
        }
    }
}

impl fmt::Display for GuardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Detail {
    Number(f64),
    Text(String),
}

impl From<f64> for Detail {
    fn from(value: f64) -> Self {
        Detail::Number(value)
    }
}

impl From<usize> for Detail {
    fn from(value: usize) -> Self {
        Detail::Number(value as f64)
    }
}

impl From<&str> for Detail {
    fn from(value: &str) -> Self {
        Detail::Text(value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardResult {
    pub passed: bool,
    pub guard: GuardName,
    pub message: String,
    pub details: BTreeMap<String, Detail>,
}

impl GuardResult {
    fn new(guard: GuardName, passed: bool, message: impl Into<String>) -> Self {
        Self {
            passed,
            guard,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    fn detail(mut self, key: &str, value: impl Into<Detail>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplyDecision {
    pub accepted: bool,
    /// The new source when accepted, the old source byte for byte otherwise.
    pub source: String,
    /// `None` when the engine was bypassed.
    pub profile: Option<ProfileKind>,
    pub results: Vec<GuardResult>,
    pub failed_guards: Vec<GuardName>,
}

impl ApplyDecision {
    pub fn bypassed(&self) -> bool {
        self.profile.is_none()
    }

    /// Failure messages joined for display.
    pub fn rejection_message(&self) -> String {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| format!("{}: {}", r.guard, r.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Structural counts used by the structure guard.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureCounts {
    pub components: usize,
    pub exports: usize,
    pub returns: usize,
    pub routes: usize,
}

static COMPONENT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:export[ \t]+(?:default[ \t]+)?)?(?:(?:async[ \t]+)?function[ \t]+[A-Z][\w$]*[ \t]*\(|(?:const|let|var)[ \t]+[A-Z][\w$]*[ \t]*(?::[^=\n]+)?=|class[ \t]+[A-Z][\w$]*)",
    )
    .expect("component pattern compiles")
});
static EXPORT_STMT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*export\b").expect("export pattern compiles"));
static RETURN_STMT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\breturn\b").expect("return pattern compiles"));
static ROUTE_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<Route\b|\bpath\s*:\s*['"]/"#).expect("route pattern compiles")
});

impl StructureCounts {
    pub fn of(source: &str) -> Self {
        Self {
            components: COMPONENT_DECL.find_iter(source).count(),
            exports: EXPORT_STMT.find_iter(source).count(),
            returns: RETURN_STMT.find_iter(source).count(),
            routes: ROUTE_DECL.find_iter(source).count(),
        }
    }
}

/// `(differing positions over the common prefix + |Δ lines|) / max(lines)`.
pub fn line_diff_ratio(old: &str, new: &str) -> f64 {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let max = old_lines.len().max(new_lines.len());
    if max == 0 {
        return 0.0;
    }
    let differing = old_lines
        .iter()
        .zip(&new_lines)
        .filter(|(a, b)| a != b)
        .count();
    let delta = old_lines.len().abs_diff(new_lines.len());
    (differing + delta) as f64 / max as f64
}

/// Large-old/small-new heuristic run after the guards on accepted rewrites.
pub fn check_suspicious(old: &str, new: &str) -> Option<String> {
    let old_lines = old.lines().count();
    let new_lines = new.lines().count();
    if old_lines > 100 && new_lines < 200 && (new_lines as f64) < old_lines as f64 * 0.4 {
        return Some(format!(
            "The new version has {new_lines} lines where the current one has {old_lines}; \
             it looks like most of the page was dropped. If you want a full rewrite, ask for it explicitly."
        ));
    }
    None
}

/// Runs the guards under a [`GuardConfig`].
#[derive(Clone, Debug, Default)]
pub struct GuardrailEngine {
    config: GuardConfig,
}

impl GuardrailEngine {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn safe_apply(
        &self,
        old: &str,
        new: &str,
        instruction: &str,
        confidence: Option<f64>,
    ) -> ApplyDecision {
        if old.trim().len() < self.config.activation_chars {
            debug!(old_chars = old.trim().len(), "guards bypassed for short baseline");
            return ApplyDecision {
                accepted: true,
                source: new.to_string(),
                profile: None,
                results: Vec::new(),
                failed_guards: Vec::new(),
            };
        }

        let (kind, profile) = self.config.profile_for(instruction);
        let results = self.evaluate(old, new, &profile, confidence);
        let failed_guards: Vec<GuardName> =
            results.iter().filter(|r| !r.passed).map(|r| r.guard).collect();
        let accepted = failed_guards.is_empty();

        for result in results.iter().filter(|r| !r.passed) {
            warn!(guard = %result.guard, profile = ?kind, message = %result.message, "guard rejected rewrite");
        }
        if accepted {
            info!(profile = ?kind, guards = results.len(), "rewrite passed guards");
        }

        ApplyDecision {
            accepted,
            source: if accepted { new.to_string() } else { old.to_string() },
            profile: Some(kind),
            results,
            failed_guards,
        }
    }

    /// Runs every guard for one profile, without the bypass.
    pub fn evaluate(
        &self,
        old: &str,
        new: &str,
        profile: &GuardProfile,
        confidence: Option<f64>,
    ) -> Vec<GuardResult> {
        let mut results = vec![
            length_guard(old, new, profile),
            line_diff_guard(old, new, profile),
        ];
        if let Some(result) = line_count_guard(old, new, profile) {
            results.push(result);
        }
        results.push(structure_guard(old, new));
        if let Some(score) = confidence {
            results.push(confidence_guard(score, profile));
        }
        results
    }
}

fn length_guard(old: &str, new: &str, profile: &GuardProfile) -> GuardResult {
    let ratio = new.len() as f64 / old.len().max(1) as f64;
    let passed = ratio >= profile.min_length_ratio;
    let message = if passed {
        format!("length ratio {ratio:.2}")
    } else {
        format!(
            "new source is {:.0}% of the old length (minimum {:.0}%)",
            ratio * 100.0,
            profile.min_length_ratio * 100.0
        )
    };
    GuardResult::new(GuardName::Length, passed, message)
        .detail("ratio", ratio)
        .detail("old_chars", old.len())
        .detail("new_chars", new.len())
}

fn line_diff_guard(old: &str, new: &str, profile: &GuardProfile) -> GuardResult {
    let ratio = line_diff_ratio(old, new);
    let passed = ratio <= profile.max_diff_ratio;
    let message = if passed {
        format!("line diff ratio {ratio:.2}")
    } else {
        format!(
            "{:.0}% of lines changed (maximum {:.0}%)",
            ratio * 100.0,
            profile.max_diff_ratio * 100.0
        )
    };
    GuardResult::new(GuardName::LineDiff, passed, message).detail("ratio", ratio)
}

fn line_count_guard(old: &str, new: &str, profile: &GuardProfile) -> Option<GuardResult> {
    let old_lines = old.lines().count();
    if old_lines <= 50 {
        return None;
    }
    let new_lines = new.lines().count();
    let ratio = new_lines as f64 / old_lines as f64;
    let passed = ratio >= profile.min_line_ratio;
    let message = if passed {
        format!("line count {old_lines} → {new_lines}")
    } else {
        format!("line count dropped from {old_lines} to {new_lines}")
    };
    Some(
        GuardResult::new(GuardName::LineCount, passed, message)
            .detail("ratio", ratio)
            .detail("old_lines", old_lines)
            .detail("new_lines", new_lines),
    )
}

fn structure_guard(old: &str, new: &str) -> GuardResult {
    let before = StructureCounts::of(old);
    let after = StructureCounts::of(new);
    let (passed, message) = if before.components >= 3 && after.components <= 1 {
        (
            false,
            format!(
                "component count collapsed: {} → {}",
                before.components, after.components
            ),
        )
    } else if before.routes >= 2 && after.routes == 0 {
        (
            false,
            format!("route declarations collapsed: {} → 0", before.routes),
        )
    } else {
        (true, "structure preserved".to_string())
    };
    GuardResult::new(GuardName::Structure, passed, message)
        .detail("old_components", before.components)
        .detail("new_components", after.components)
        .detail("old_exports", before.exports)
        .detail("new_exports", after.exports)
        .detail("old_returns", before.returns)
        .detail("new_returns", after.returns)
        .detail("old_routes", before.routes)
        .detail("new_routes", after.routes)
}

fn confidence_guard(score: f64, profile: &GuardProfile) -> GuardResult {
    let passed = score >= profile.min_confidence;
    let message = if passed {
        format!("confidence {score:.0}")
    } else {
        format!(
            "producer confidence {score:.0} is below {:.0}",
            profile.min_confidence
        )
    };
    GuardResult::new(GuardName::Confidence, passed, message).detail("score", score)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG_INSTRUCTION: &str = "Please rework the whole landing page so the pricing section, the testimonials and the footer all share one consistent visual style";

    fn filler(i: usize, tag: &str) -> String {
        format!("  const value_{i:03} = \"{tag}\";")
    }

    /// `components` component headers followed by filler up to `lines`.
    fn page(components: usize, lines: usize) -> Vec<String> {
        (0..lines)
            .map(|i| {
                if i < components {
                    format!("function Section{i}() {{ return null }}")
                } else {
                    filler(i, "old")
                }
            })
            .collect()
    }

    #[test]
    fn short_baseline_bypasses_guards() {
        let engine = GuardrailEngine::default();
        for old in ["", "   ", "export default function App() { return null }"] {
            let decision = engine.safe_apply(old, "x", "anything", Some(0.0));
            assert!(decision.accepted);
            assert!(decision.bypassed());
            assert_eq!(decision.source, "x");
            assert!(decision.results.is_empty());
        }
    }

    #[test]
    fn moderate_rewrite_with_same_components_is_accepted() {
        let old = page(5, 200);
        let mut new: Vec<String> = old[..180].to_vec();
        for (i, line) in new.iter_mut().enumerate().take(50).skip(10) {
            *line = filler(i, "chg");
        }
        let decision =
            GuardrailEngine::default().safe_apply(&old.join("\n"), &new.join("\n"), LONG_INSTRUCTION, None);
        assert_eq!(decision.profile, Some(ProfileKind::Normal));
        assert!(decision.accepted, "{}", decision.rejection_message());
        let diff = decision
            .results
            .iter()
            .find(|r| r.guard == GuardName::LineDiff)
            .expect("line diff result");
        assert_eq!(diff.details["ratio"], Detail::Number(0.3));
    }

    #[test]
    fn component_collapse_is_rejected_and_old_source_kept() {
        let old = page(5, 200).join("\n");
        let new = page(1, 40).join("\n");
        let decision = GuardrailEngine::default().safe_apply(&old, &new, LONG_INSTRUCTION, None);
        assert!(!decision.accepted);
        assert_eq!(decision.source, old);
        assert!(decision.failed_guards.contains(&GuardName::Structure));
        let structure = decision
            .results
            .iter()
            .find(|r| r.guard == GuardName::Structure)
            .expect("structure result");
        assert!(structure.message.contains("5 → 1"), "{}", structure.message);
    }

    #[test]
    fn micro_profile_is_stricter_than_normal() {
        let old = page(0, 100);
        let mut new: Vec<String> = old[..75].to_vec();
        for (i, line) in new.iter_mut().enumerate().take(10) {
            *line = filler(i, "chg");
        }
        let (old, new) = (old.join("\n"), new.join("\n"));
        assert!((line_diff_ratio(&old, &new) - 0.35).abs() < 1e-9);

        let engine = GuardrailEngine::default();
        let micro = engine.safe_apply(&old, &new, "make the header smaller", None);
        assert_eq!(micro.profile, Some(ProfileKind::Micro));
        assert!(!micro.accepted);
        assert!(micro.failed_guards.contains(&GuardName::LineDiff));
        assert_eq!(micro.source, old);

        let normal = engine.safe_apply(&old, &new, LONG_INSTRUCTION, None);
        assert!(normal.accepted, "{}", normal.rejection_message());
    }

    #[test]
    fn low_confidence_rejects_only_when_supplied() {
        let old = page(0, 60).join("\n");
        let engine = GuardrailEngine::default();
        let decision = engine.safe_apply(&old, &old, LONG_INSTRUCTION, Some(20.0));
        assert_eq!(decision.failed_guards, vec![GuardName::Confidence]);
        let decision = engine.safe_apply(&old, &old, LONG_INSTRUCTION, None);
        assert!(decision.accepted);
        assert!(decision.results.iter().all(|r| r.guard != GuardName::Confidence));
    }

    #[test]
    fn route_collapse_is_rejected() {
        let mut old = page(0, 60);
        old[1] = "<Route path=\"/\" element={<Home />} />".to_string();
        old[2] = "<Route path=\"/about\" element={<About />} />".to_string();
        let mut new = old.clone();
        new[1] = filler(1, "old");
        new[2] = filler(2, "old");
        let decision =
            GuardrailEngine::default().safe_apply(&old.join("\n"), &new.join("\n"), LONG_INSTRUCTION, None);
        assert_eq!(decision.failed_guards, vec![GuardName::Structure]);
        assert!(decision.rejection_message().contains("route declarations collapsed: 2 → 0"));
    }

    #[test]
    fn suspicious_shrink_is_flagged() {
        let old = page(0, 150).join("\n");
        assert!(check_suspicious(&old, &page(0, 50).join("\n")).is_some());
        assert!(check_suspicious(&old, &page(0, 100).join("\n")).is_none());
        assert!(check_suspicious(&page(0, 90).join("\n"), "x").is_none());
    }
}
