use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extract::looks_like_envelope;
use crate::markers;

/// Response mode of a generation session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Detecting,
    Chat,
    Plan,
    Code,
}

impl Mode {
    pub fn is_terminal(self) -> bool {
        self != Mode::Detecting
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Detecting => "detecting",
            Mode::Chat => "chat",
            Mode::Plan => "plan",
            Mode::Code => "code",
        };
        f.write_str(s)
    }
}

/// What one observation did to the resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Mode did not change.
    Unchanged,
    /// Mode moved out of `detecting`.
    Entered(Mode),
    /// The buffer looks like a JSON envelope; live extraction is off.
    EnvelopeSuspected,
}

/// Classifies a session as chat, plan or code from its evolving raw buffer.
///
/// Once a terminal mode is reached it never changes for the session.
#[derive(Clone, Debug)]
pub struct ModeResolver {
    mode: Mode,
    fallback_chars: usize,
    envelope_suspected: bool,
}

impl ModeResolver {
    pub fn new(fallback_chars: usize) -> Self {
        Self {
            mode: Mode::Detecting,
            fallback_chars,
            envelope_suspected: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// True once the fallback saw a JSON envelope instead of raw source.
    pub fn envelope_suspected(&self) -> bool {
        self.envelope_suspected
    }

    /// Applies an explicit signal (for example a typed `plan` event).
    pub fn signal(&mut self, mode: Mode) -> Resolution {
        if self.mode.is_terminal() || mode == Mode::Detecting {
            return Resolution::Unchanged;
        }
        self.enter(mode)
    }

    /// Re-examines the whole raw buffer.
    pub fn observe(&mut self, buffer: &str) -> Resolution {
        if self.mode.is_terminal() {
            return Resolution::Unchanged;
        }
        if let Some(mode) = earliest_marker(buffer) {
            return self.enter(mode);
        }
        if buffer.len() > self.fallback_chars {
            if looks_like_envelope(buffer) {
                if !self.envelope_suspected {
                    debug!(len = buffer.len(), "buffer looks like a JSON envelope, suppressing live extraction");
                }
                self.envelope_suspected = true;
                return Resolution::EnvelopeSuspected;
            }
            return self.enter(Mode::Code);
        }
        Resolution::Unchanged
    }

    fn enter(&mut self, mode: Mode) -> Resolution {
        debug!(from = %self.mode, to = %mode, "mode resolved");
        self.mode = mode;
        Resolution::Entered(mode)
    }
}

fn earliest_marker(buffer: &str) -> Option<Mode> {
    [
        (markers::TYPE_CHAT, Mode::Chat),
        (markers::TYPE_PLAN, Mode::Plan),
        (markers::TYPE_CODE, Mode::Code),
        (markers::BEGIN_CODE, Mode::Code),
        (markers::BEGIN_FILES, Mode::Code),
    ]
    .into_iter()
    .filter_map(|(marker, mode)| buffer.find(marker).map(|idx| (idx, mode)))
    .min_by_key(|(idx, _)| *idx)
    .map(|(_, mode)| mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_resolve_modes() {
        let mut r = ModeResolver::new(400);
        assert_eq!(r.observe("Sure! /// TYPE: CHAT ///"), Resolution::Entered(Mode::Chat));
        let mut r = ModeResolver::new(400);
        assert_eq!(r.observe("/// TYPE: PLAN ///\n1. a"), Resolution::Entered(Mode::Plan));
        let mut r = ModeResolver::new(400);
        assert_eq!(r.observe("/// BEGIN_FILES ///"), Resolution::Entered(Mode::Code));
    }

    #[test]
    fn earliest_marker_wins() {
        let mut r = ModeResolver::new(400);
        r.observe("/// TYPE: PLAN ///\nthen /// TYPE: CODE ///");
        assert_eq!(r.mode(), Mode::Plan);
    }

    #[test]
    fn chat_and_plan_never_move_to_code() {
        for first in [Mode::Chat, Mode::Plan] {
            let mut r = ModeResolver::new(10);
            r.signal(first);
            assert_eq!(r.signal(Mode::Code), Resolution::Unchanged);
            assert_eq!(
                r.observe("/// TYPE: CODE ///\nexport default function App() {}"),
                Resolution::Unchanged
            );
            assert_eq!(r.mode(), first);
        }
    }

    #[test]
    fn long_unmarked_buffer_falls_back_to_code() {
        let mut r = ModeResolver::new(20);
        assert_eq!(r.observe("import React"), Resolution::Unchanged);
        assert_eq!(
            r.observe("import React from 'react';\nexport default"),
            Resolution::Entered(Mode::Code)
        );
    }

    #[test]
    fn envelope_suppresses_fallback() {
        let mut r = ModeResolver::new(10);
        let buffer = r#"{"files": {"/App.tsx": "export default function App() {}"#;
        assert_eq!(r.observe(buffer), Resolution::EnvelopeSuspected);
        assert_eq!(r.mode(), Mode::Detecting);
        assert!(r.envelope_suspected());
    }
}
