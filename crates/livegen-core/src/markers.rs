//! In-band markers used by producers that do not speak the tagged protocol.

pub const TYPE_CHAT: &str = "/// TYPE: CHAT ///";
pub const TYPE_PLAN: &str = "/// TYPE: PLAN ///";
pub const TYPE_CODE: &str = "/// TYPE: CODE ///";
pub const BEGIN_CODE: &str = "/// BEGIN_CODE ///";
pub const BEGIN_FILES: &str = "/// BEGIN_FILES ///";
pub const END_FILES: &str = "/// END_FILES ///";
pub const FILE_PREFIX: &str = "/// FILE:";
pub const MARKER_SUFFIX: &str = "///";
/// Completion sentinel: the producer finished the whole artifact.
pub const COMPLETION_SENTINEL: &str = "/// END_CODE ///";
pub const SUMMARY: &str = "/// SUMMARY ///";
pub const LOG_TOKEN_OPEN: &str = "[LOG:";

/// True when the legacy completion sentinel has been emitted.
pub fn has_completion_sentinel(buffer: &str) -> bool {
    buffer.contains(COMPLETION_SENTINEL)
}
