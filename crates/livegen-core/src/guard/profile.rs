use serde::{Deserialize, Deserializer, Serialize};

const MICRO_VERBS: [&str; 18] = [
    "make", "change", "fix", "add", "remove", "set", "swap", "replace", "move", "adjust", "tweak",
    "update", "rename", "delete", "hide", "show", "use", "turn",
];

/// Thresholds applied by the guards for one class of instruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuardProfile {
    /// Smallest accepted `len(new) / len(old)`.
    pub min_length_ratio: f64,
    /// Largest accepted line-diff ratio.
    pub max_diff_ratio: f64,
    /// Smallest accepted `lines(new) / lines(old)` for sources over 50 lines.
    pub min_line_ratio: f64,
    /// Smallest accepted producer confidence, 0..=100.
    pub min_confidence: f64,
}

impl GuardProfile {
    pub const fn normal() -> Self {
        Self {
            min_length_ratio: 0.50,
            max_diff_ratio: 0.40,
            min_line_ratio: 0.50,
            min_confidence: 35.0,
        }
    }

    /// Stricter thresholds for small, targeted edits.
    pub const fn micro() -> Self {
        Self {
            min_length_ratio: 0.30,
            max_diff_ratio: 0.25,
            min_line_ratio: 0.80,
            min_confidence: 50.0,
        }
    }
}

/// Profile as written in a config file; absent fields keep the base value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileOverride {
    min_length_ratio: Option<f64>,
    max_diff_ratio: Option<f64>,
    min_line_ratio: Option<f64>,
    min_confidence: Option<f64>,
}

impl ProfileOverride {
    fn over(self, base: GuardProfile) -> GuardProfile {
        GuardProfile {
            min_length_ratio: self.min_length_ratio.unwrap_or(base.min_length_ratio),
            max_diff_ratio: self.max_diff_ratio.unwrap_or(base.max_diff_ratio),
            min_line_ratio: self.min_line_ratio.unwrap_or(base.min_line_ratio),
            min_confidence: self.min_confidence.unwrap_or(base.min_confidence),
        }
    }
}

fn normal_profile<'de, D: Deserializer<'de>>(deserializer: D) -> Result<GuardProfile, D::Error> {
    ProfileOverride::deserialize(deserializer).map(|o| o.over(GuardProfile::normal()))
}

fn micro_profile<'de, D: Deserializer<'de>>(deserializer: D) -> Result<GuardProfile, D::Error> {
    ProfileOverride::deserialize(deserializer).map(|o| o.over(GuardProfile::micro()))
}

/// Which profile an instruction selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    Normal,
    Micro,
}

/// Guardrail engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Old sources shorter than this (trimmed) bypass every guard.
    #[serde(default = "default_activation_chars")]
    pub activation_chars: usize,
    /// Instructions with at most this many words count as micro-edits.
    #[serde(default = "default_micro_max_tokens")]
    pub micro_max_tokens: usize,
    #[serde(default = "GuardProfile::normal", deserialize_with = "normal_profile")]
    pub normal: GuardProfile,
    #[serde(default = "GuardProfile::micro", deserialize_with = "micro_profile")]
    pub micro: GuardProfile,
}

const fn default_activation_chars() -> usize {
    200
}

const fn default_micro_max_tokens() -> usize {
    15
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            activation_chars: default_activation_chars(),
            micro_max_tokens: default_micro_max_tokens(),
            normal: GuardProfile::normal(),
            micro: GuardProfile::micro(),
        }
    }
}

impl GuardConfig {
    pub fn is_micro_edit(&self, instruction: &str) -> bool {
        let mut words = instruction.split_whitespace();
        let Some(first) = words.next() else {
            return true;
        };
        if 1 + words.count() <= self.micro_max_tokens {
            return true;
        }
        let first = first
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_ascii_lowercase();
        MICRO_VERBS.contains(&first.as_str())
    }

    pub fn profile_for(&self, instruction: &str) -> (ProfileKind, GuardProfile) {
        if self.is_micro_edit(instruction) {
            (ProfileKind::Micro, self.micro)
        } else {
            (ProfileKind::Normal, self.normal)
        }
    }

    /// Checks ranges; returns the first offending field.
    pub fn validate(&self) -> Result<(), String> {
        for (name, profile) in [("normal", &self.normal), ("micro", &self.micro)] {
            for (field, value) in [
                ("min_length_ratio", profile.min_length_ratio),
                ("max_diff_ratio", profile.max_diff_ratio),
                ("min_line_ratio", profile.min_line_ratio),
            ] {
                if !(0.0..=1.0).contains(&value) {
                    return Err(format!("guard.{name}.{field} must be within [0, 1], got {value}"));
                }
            }
            if !(0.0..=100.0).contains(&profile.min_confidence) {
                return Err(format!(
                    "guard.{name}.min_confidence must be within [0, 100], got {}",
                    profile.min_confidence
                ));
            }
        }
        Ok(())
    }
}
