//! Pre-scan source rules.
//!
//! Rules run before the lexical scan. Each one is independent and can be
//! added or removed from a [`Validator`](super::Validator) by name.

use once_cell::sync::Lazy;
use regex::Regex;

/// Which files of a multi-file artifact a rule applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleScope {
    /// Only the primary (entry) file.
    Primary,
    /// Every script file.
    AllScripts,
}

/// A rule failure with an optional 1-based line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleViolation {
    pub reason: String,
    pub line: Option<usize>,
}

impl RuleViolation {
    pub fn new(reason: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            reason: reason.into(),
            line,
        }
    }
}

pub trait SourceRule: Send + Sync {
    /// Stable identifier used to remove the rule from a validator.
    fn name(&self) -> &'static str;

    fn scope(&self) -> RuleScope {
        RuleScope::Primary
    }

    fn check(&self, source: &str) -> Option<RuleViolation>;
}

pub(crate) fn line_of_offset(source: &str, offset: usize) -> usize {
    source.as_bytes()[..offset.min(source.len())]
        .iter()
        .filter(|b| **b == b'\n')
        .count()
        + 1
}

static ENTRY_POINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\s*export\s+default\b|^\s*export\s+(?:async\s+)?(?:function|const|let|class)\b|^\s*(?:async\s+)?function\s+[A-Za-z_$][\w$]*\s*\(|^\s*const\s+[A-Z][\w$]*\s*=|\bcreateRoot\s*\(|\brender\s*\(",
    )
    .expect("entry point pattern compiles")
});

/// Requires a plausible program entry point.
#[derive(Clone, Copy, Debug, Default)]
pub struct EntryPointRule;

impl SourceRule for EntryPointRule {
    fn name(&self) -> &'static str {
        "entry-point"
    }

    fn check(&self, source: &str) -> Option<RuleViolation> {
        if ENTRY_POINT.is_match(source) {
            None
        } else {
            Some(RuleViolation::new("no program entry point found", None))
        }
    }
}

static MODULE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:\bfrom\s*|\bimport\s*\(?\s*|\brequire\s*\(\s*)['"]([^'"\n]+)['"]"#)
        .expect("module reference pattern compiles")
});

const DENIED_MODULES: [&str; 8] = [
    "fs",
    "path",
    "os",
    "net",
    "child_process",
    "electron",
    "react-native",
    "next",
];
const DENIED_PREFIXES: [&str; 4] = ["next/", "@remix-run/", "node:", "react-native/"];

/// Rejects imports of modules the browser sandbox cannot provide.
#[derive(Clone, Copy, Debug, Default)]
pub struct DenylistRule;

impl DenylistRule {
    pub fn is_denied(module: &str) -> bool {
        DENIED_MODULES.contains(&module) || DENIED_PREFIXES.iter().any(|p| module.starts_with(p))
    }
}

impl SourceRule for DenylistRule {
    fn name(&self) -> &'static str {
        "denylist"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::AllScripts
    }

    fn check(&self, source: &str) -> Option<RuleViolation> {
        for captures in MODULE_REFERENCE.captures_iter(source) {
            let Some(module) = captures.get(1) else {
                continue;
            };
            if Self::is_denied(module.as_str()) {
                return Some(RuleViolation::new(
                    format!("forbidden import '{}'", module.as_str()),
                    Some(line_of_offset(source, module.start())),
                ));
            }
        }
        None
    }
}

static NAV_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:nav|Navbar|Navigation|Header)\b").expect("nav marker pattern compiles")
});
static HERO_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<Hero\b|\bid=["']hero["']|\bdata-section=["']hero["']"#)
        .expect("hero marker pattern compiles")
});

/// Page-layout policy: the hero section renders before any navigation.
///
/// Not a validity check; enabled through `layout_policy` and removable.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeroBeforeNavRule;

impl SourceRule for HeroBeforeNavRule {
    fn name(&self) -> &'static str {
        "hero-before-nav"
    }

    fn check(&self, source: &str) -> Option<RuleViolation> {
        let nav = NAV_MARKER.find(source)?;
        let hero = HERO_MARKER.find(source)?;
        if nav.start() < hero.start() {
            return Some(RuleViolation::new(
                "navigation rendered before the hero section",
                Some(line_of_offset(source, nav.start())),
            ));
        }
        None
    }
}
