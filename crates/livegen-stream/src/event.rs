//! Typed events of the tagged generation protocol.

use livegen_core::{Artifact, unwrap_envelope};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub label: String,
    pub prompt: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub value: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub label: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

/// One decoded protocol event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Phase {
        phase: String,
    },
    /// Conversational text fragment.
    Text {
        content: String,
    },
    Plan {
        items: Vec<String>,
    },
    Summary {
        content: String,
    },
    /// Raw passthrough appended to the session buffer.
    Raw {
        content: String,
    },
    /// Atomic multi-file payload; terminal.
    Files {
        artifact: Artifact,
    },
    CodeChunk {
        content: String,
    },
    CodeProgress,
    /// Producer-reported failure; terminal.
    Error {
        code: String,
        message: String,
    },
    Confidence {
        score: f64,
        reason: Option<String>,
    },
    Suggestions {
        suggestions: Vec<Suggestion>,
    },
    Questions {
        questions: Vec<Question>,
        enhanced_prompt_seed: Option<String>,
    },
}

impl StreamEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            StreamEvent::Phase { .. } => "phase",
            StreamEvent::Text { .. } => "text",
            StreamEvent::Plan { .. } => "plan",
            StreamEvent::Summary { .. } => "summary",
            StreamEvent::Raw { .. } => "raw",
            StreamEvent::Files { .. } => "files",
            StreamEvent::CodeChunk { .. } => "code_chunk",
            StreamEvent::CodeProgress => "code_progress",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Confidence { .. } => "confidence",
            StreamEvent::Suggestions { .. } => "suggestions",
            StreamEvent::Questions { .. } => "questions",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Files { .. } | StreamEvent::Error { .. })
    }
}

#[derive(Deserialize)]
struct PhasePayload {
    phase: String,
}

#[derive(Deserialize)]
struct ContentPayload {
    content: String,
}

#[derive(Deserialize)]
struct PlanPayload {
    items: Vec<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ConfidencePayload {
    score: f64,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SuggestionsPayload {
    Wrapped { suggestions: Vec<Suggestion> },
    Bare(Vec<Suggestion>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuestionsPayload {
    Wrapped {
        questions: Vec<Question>,
        #[serde(default)]
        enhanced_prompt_seed: Option<String>,
    },
    Bare(Vec<Question>),
}

/// JSON payload, or the verbatim data when it is not the expected shape.
fn text_like<T, F>(data: &str, field: F) -> String
where
    T: for<'de> Deserialize<'de>,
    F: FnOnce(T) -> String,
{
    match serde_json::from_str::<T>(data) {
        Ok(payload) => field(payload),
        Err(_) => data.to_string(),
    }
}

/// Parses the payload of one record. `Err` carries a malformation reason.
pub(crate) fn parse_event(tag: &str, data: &str) -> Result<StreamEvent, String> {
    let json_err = |e: serde_json::Error| format!("invalid {tag} payload: {e}");
    let event = match tag {
        "phase" => StreamEvent::Phase {
            phase: text_like(data, |p: PhasePayload| p.phase).trim().to_string(),
        },
        "text" => StreamEvent::Text {
            content: text_like(data, |p: ContentPayload| p.content),
        },
        "summary" => StreamEvent::Summary {
            content: text_like(data, |p: ContentPayload| p.content),
        },
        "raw" => StreamEvent::Raw {
            content: text_like(data, |p: ContentPayload| p.content),
        },
        "code_chunk" => StreamEvent::CodeChunk {
            content: text_like(data, |p: ContentPayload| p.content),
        },
        "code_progress" => StreamEvent::CodeProgress,
        "plan" => {
            let payload: PlanPayload = serde_json::from_str(data).map_err(json_err)?;
            StreamEvent::Plan {
                items: payload.items,
            }
        }
        "files" => {
            let artifact = unwrap_envelope(data)
                .ok_or_else(|| "files payload carries no files map".to_string())?;
            StreamEvent::Files { artifact }
        }
        "error" => {
            let payload: ErrorPayload = serde_json::from_str(data).map_err(json_err)?;
            StreamEvent::Error {
                code: payload.code,
                message: payload.message,
            }
        }
        "confidence" => {
            let payload: ConfidencePayload = serde_json::from_str(data).map_err(json_err)?;
            StreamEvent::Confidence {
                score: payload.score,
                reason: payload.reason,
            }
        }
        "suggestions" => {
            let suggestions = match serde_json::from_str::<SuggestionsPayload>(data).map_err(json_err)? {
                SuggestionsPayload::Wrapped { suggestions } | SuggestionsPayload::Bare(suggestions) => {
                    suggestions
                }
            };
            StreamEvent::Suggestions { suggestions }
        }
        "questions" => match serde_json::from_str::<QuestionsPayload>(data).map_err(json_err)? {
            QuestionsPayload::Wrapped {
                questions,
                enhanced_prompt_seed,
            } => StreamEvent::Questions {
                questions,
                enhanced_prompt_seed,
            },
            QuestionsPayload::Bare(questions) => StreamEvent::Questions {
                questions,
                enhanced_prompt_seed: None,
            },
        },
        other => return Err(format!("unknown event tag '{other}'")),
    };
    Ok(event)
}
