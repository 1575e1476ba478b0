//! Per-request session state.
//!
//! A [`StreamSession`] folds decoded records into its buffers and reports the
//! side effects the pipeline should forward. It never touches project state;
//! [`StreamSession::conclude`] turns the final buffers into a [`Conclusion`].

use livegen_core::extract::strip_log_tokens;
use livegen_core::markers::{self, has_completion_sentinel};
use livegen_core::{
    Artifact, FailureKind, GenerationFailure, Mode, ModeResolver, Resolution, Validator, extract,
    extract_summary,
};
use tracing::debug;

use crate::decoder::Decoded;
use crate::event::StreamEvent;
use crate::project::GenerationLock;

/// Something the pipeline should forward to collaborators.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEffect {
    Phase(String),
    Preview(Artifact),
    Forward(StreamEvent),
}

/// What a finished session produced, before validation and guards.
#[derive(Clone, Debug, PartialEq)]
pub enum Conclusion {
    Chat { text: String },
    Plan { items: Vec<String> },
    /// Code-mode result. `truncated` is set when the producer confirmed truncation.
    Candidate {
        artifact: Option<Artifact>,
        truncated: bool,
    },
    Failed(GenerationFailure),
}

#[derive(Debug)]
pub struct StreamSession {
    session_id: uuid::Uuid,
    lock: GenerationLock,
    instruction: String,
    resolver: ModeResolver,
    raw_buffer: String,
    structured: bool,
    terminal_seen: bool,
    files: Option<Artifact>,
    chat_text: String,
    plan_items: Vec<String>,
    summary: Option<String>,
    confidence: Option<f64>,
    producer_error: Option<(String, String)>,
    last_preview: Option<Artifact>,
    malformed: usize,
}

impl StreamSession {
    pub fn new(
        session_id: uuid::Uuid,
        lock: GenerationLock,
        instruction: impl Into<String>,
        mode_fallback_chars: usize,
    ) -> Self {
        Self {
            session_id,
            lock,
            instruction: instruction.into(),
            resolver: ModeResolver::new(mode_fallback_chars),
            raw_buffer: String::new(),
            structured: false,
            terminal_seen: false,
            files: None,
            chat_text: String::new(),
            plan_items: Vec::new(),
            summary: None,
            confidence: None,
            producer_error: None,
            last_preview: None,
            malformed: 0,
        }
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn lock(&self) -> &GenerationLock {
        &self.lock
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn mode(&self) -> Mode {
        self.resolver.mode()
    }

    pub fn raw_buffer(&self) -> &str {
        &self.raw_buffer
    }

    pub fn is_structured(&self) -> bool {
        self.structured
    }

    pub fn terminal_seen(&self) -> bool {
        self.terminal_seen
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    /// Last candidate pushed to the preview, used as a fallback buffer.
    pub fn last_preview(&self) -> Option<&Artifact> {
        self.last_preview.as_ref()
    }

    /// Summary from a `summary` event, or from the legacy summary section.
    pub fn summary(&self) -> Option<String> {
        self.summary
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| extract_summary(&self.raw_buffer))
    }

    pub fn apply(&mut self, decoded: Decoded, validator: &Validator) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        match decoded {
            Decoded::Unstructured(text) => {
                self.push_raw(&text);
                self.preview(validator, &mut effects);
            }
            Decoded::Malformed { tag, reason } => {
                // A tagged record, even unreadable, makes the session structured.
                self.structured = true;
                self.malformed += 1;
                if tag == "error" {
                    self.terminal_seen = true;
                    self.producer_error.get_or_insert_with(|| {
                        (String::new(), format!("the generator reported an unreadable error ({reason})"))
                    });
                }
            }
            Decoded::Event(event) => {
                self.structured = true;
                debug!(session_id = %self.session_id, tag = event.tag(), "stream event");
                self.apply_event(event, validator, &mut effects);
            }
        }
        effects
    }

    fn apply_event(&mut self, event: StreamEvent, validator: &Validator, effects: &mut Vec<SessionEffect>) {
        match event {
            StreamEvent::Phase { phase } => effects.push(SessionEffect::Phase(phase)),
            StreamEvent::Text { content } => {
                self.chat_text.push_str(&content);
                effects.push(SessionEffect::Forward(StreamEvent::Text { content }));
            }
            StreamEvent::Plan { items } => {
                self.plan_items.extend(items.iter().cloned());
                self.signal(Mode::Plan);
                effects.push(SessionEffect::Forward(StreamEvent::Plan { items }));
            }
            StreamEvent::Summary { content } => {
                self.summary.get_or_insert_with(String::new).push_str(&content);
            }
            StreamEvent::Raw { content } => {
                self.push_raw(&content);
                self.preview(validator, effects);
            }
            StreamEvent::Files { artifact } => {
                self.terminal_seen = true;
                let mode = self.resolver.mode();
                if matches!(mode, Mode::Chat | Mode::Plan) {
                    debug!(session_id = %self.session_id, %mode, artifact = %artifact, "ignoring files payload after mode resolved");
                    return;
                }
                self.signal(Mode::Code);
                self.files = Some(artifact);
                self.preview(validator, effects);
            }
            StreamEvent::CodeChunk { content } => {
                self.signal(Mode::Code);
                self.push_raw(&content);
                self.preview(validator, effects);
            }
            StreamEvent::CodeProgress => {}
            StreamEvent::Error { code, message } => {
                self.terminal_seen = true;
                debug!(session_id = %self.session_id, code = %code, "producer reported error");
                self.producer_error = Some((code, message));
            }
            StreamEvent::Confidence { score, reason } => {
                self.confidence = Some(score);
                effects.push(SessionEffect::Forward(StreamEvent::Confidence { score, reason }));
            }
            forwarded @ (StreamEvent::Suggestions { .. } | StreamEvent::Questions { .. }) => {
                effects.push(SessionEffect::Forward(forwarded));
            }
        }
    }

    fn signal(&mut self, mode: Mode) {
        if let Resolution::Entered(mode) = self.resolver.signal(mode) {
            debug!(session_id = %self.session_id, %mode, "mode signalled");
        }
    }

    fn push_raw(&mut self, text: &str) {
        self.raw_buffer.push_str(text);
        self.resolver.observe(&self.raw_buffer);
        if has_completion_sentinel(&self.raw_buffer) {
            self.terminal_seen = true;
        }
    }

    /// Current best candidate: the files payload, else the extracted buffer.
    pub fn candidate(&self) -> Option<Artifact> {
        if let Some(files) = &self.files {
            return Some(files.clone());
        }
        extract(&self.raw_buffer).into_artifact()
    }

    fn preview(&mut self, validator: &Validator, effects: &mut Vec<SessionEffect>) {
        if self.resolver.mode() != Mode::Code {
            return;
        }
        let Some(candidate) = self.candidate() else {
            return;
        };
        if candidate.is_empty() || self.last_preview.as_ref() == Some(&candidate) {
            return;
        }
        if !validator.validate_artifact(&candidate).valid {
            return;
        }
        debug!(session_id = %self.session_id, artifact = %candidate, "live preview");
        self.last_preview = Some(candidate.clone());
        effects.push(SessionEffect::Preview(candidate));
    }

    /// Resolves the finished session into chat, plan, a code candidate or a failure.
    pub fn conclude(&self) -> Conclusion {
        let mut truncated = false;
        if let Some((code, message)) = &self.producer_error {
            let kind = FailureKind::from_producer_code(code);
            if kind != FailureKind::TruncationConfirmed {
                let message = if message.trim().is_empty() {
                    format!("the generator reported an error ({code})")
                } else {
                    message.clone()
                };
                return Conclusion::Failed(GenerationFailure::new(kind, message));
            }
            truncated = true;
        }

        if self.files.is_none() {
            match self.resolver.mode() {
                Mode::Plan => {
                    return Conclusion::Plan {
                        items: self.plan_items_or_raw(),
                    };
                }
                Mode::Chat => {
                    return Conclusion::Chat {
                        text: self.chat_text_or_raw(),
                    };
                }
                _ => {}
            }
        }

        if self.structured && !self.terminal_seen {
            if self.files.is_none()
                && self.resolver.mode() == Mode::Detecting
                && !self.chat_text.trim().is_empty()
            {
                return Conclusion::Chat {
                    text: self.chat_text.trim().to_string(),
                };
            }
            return Conclusion::Failed(GenerationFailure::new(
                FailureKind::StreamEndedEarly,
                "the generation stream closed before the generator finished; the current version was kept",
            ));
        }

        let artifact = self.candidate();
        if artifact.is_none()
            && !self.structured
            && self.resolver.mode() == Mode::Detecting
            && !truncated
            && !self.raw_buffer.trim().is_empty()
        {
            return Conclusion::Chat {
                text: self.chat_text_or_raw(),
            };
        }
        Conclusion::Candidate { artifact, truncated }
    }

    fn chat_text_or_raw(&self) -> String {
        if !self.chat_text.trim().is_empty() {
            return self.chat_text.trim().to_string();
        }
        let text = strip_log_tokens(&self.raw_buffer)
            .replace(markers::TYPE_CHAT, "")
            .replace(markers::COMPLETION_SENTINEL, "");
        let text = match text.find(markers::SUMMARY) {
            Some(idx) => &text[..idx],
            None => &text,
        };
        text.trim().to_string()
    }

    fn plan_items_or_raw(&self) -> Vec<String> {
        if !self.plan_items.is_empty() {
            return self.plan_items.clone();
        }
        let body = match self.raw_buffer.find(markers::TYPE_PLAN) {
            Some(idx) => &self.raw_buffer[idx + markers::TYPE_PLAN.len()..],
            None => &self.raw_buffer,
        };
        strip_log_tokens(body)
            .lines()
            .filter_map(plan_item)
            .collect()
    }
}

/// `- item`, `* item` or `1. item` lines.
fn plan_item(line: &str) -> Option<String> {
    let line = line.trim();
    let item = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| {
            let digits = line.find(|c: char| !c.is_ascii_digit())?;
            (digits > 0).then_some(())?;
            line[digits..]
                .strip_prefix(". ")
                .or_else(|| line[digits..].strip_prefix(") "))
        })?;
    let item = item.trim();
    (!item.is_empty()).then(|| item.to_string())
}
