//! Incremental projection of `assistant.text` out of a live JSON stream.
//!
//! The answer model emits one JSON document whose display text lives at
//! `assistant.text`, next to sibling fields (`ui`, `chips`, `artifacts`)
//! that are only meaningful once generation completes. Waiting for the full
//! document before showing anything would put the entire generation time in
//! front of the first visible byte, so [`StreamFieldExtractor`] scans the
//! raw character stream and surfaces the text field's decoded contents as
//! deltas while the rest of the document is still being produced.
//!
//! The extractor is a four-state machine fed one fragment at a time:
//!
//! ```text
//! Seeking ──(opener matched)──▶ AwaitQuote ──(")──▶ InValue ──(")──▶ Done
//! ```
//!
//! Every raw character is also appended to a full buffer; [`finish`]
//! (`StreamFieldExtractor::finish`) parses that buffer once at stream end
//! to recover the sibling fields. Under well-formed output the parsed
//! `assistant.text` equals the concatenated deltas exactly.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Longest opener variant is 25 chars; keep a little slack so a fragment
/// boundary can never split a match out of the window.
const TAIL_CAP: usize = 48;

/// Whitespace-tolerant spellings of the opening path `"assistant":{"text":`.
///
/// JSON-mode models occasionally put a single space after a colon or brace;
/// deeper pretty-printing has not been observed and is left to the final
/// full parse.
static OPENERS: LazyLock<Vec<String>> = LazyLock::new(|| {
    let gaps = ["", " "];
    let mut variants = Vec::with_capacity(16);
    for a in gaps {
        for b in gaps {
            for c in gaps {
                for d in gaps {
                    variants.push(format!("\"assistant\"{a}:{b}{{{c}\"text\"{d}:"));
                }
            }
        }
    }
    variants
});

/// Trailing bracketed list of quoted strings, e.g. `["A","B"]` at the very
/// end of a plain-text reply. Used by fallback salvage only.
static TRAILING_CHIPS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[(?:"[^"]*"(?:\s*,\s*"[^"]*")*)\]\s*$"#).expect("chips pattern is valid")
});

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]*)""#).expect("quote pattern is valid"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Watching a bounded tail buffer for an opener.
    Seeking,
    /// Opener matched; waiting for the value's opening quote.
    AwaitQuote,
    /// Inside the string value; `escape_pending` means a backslash was the
    /// previous character.
    InValue { escape_pending: bool },
    /// Value closed; accumulate silently.
    Done,
}

/// What the accumulated stream turned out to be once it ended.
#[derive(Clone, Debug, PartialEq)]
pub enum ExtractOutcome {
    /// The buffer parsed as a complete JSON document.
    Parsed {
        document: Value,
        /// Concatenation of every delta emitted while streaming.
        streamed_text: String,
    },
    /// The buffer was not valid JSON; the whole text is the display string,
    /// minus a salvaged trailing chips array when one was present.
    Fallback {
        text: String,
        chips: Vec<String>,
        streamed_text: String,
    },
    /// The stream carried no content at all.
    Empty,
}

/// Incremental `assistant.text` projector. See the module docs.
#[derive(Debug)]
pub struct StreamFieldExtractor {
    state: State,
    tail: String,
    raw: String,
    projected: String,
}

impl Default for StreamFieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFieldExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Seeking,
            tail: String::new(),
            raw: String::new(),
            projected: String::new(),
        }
    }

    /// Feeds one raw fragment and returns the decoded display-text delta it
    /// produced (empty when the fragment fell outside the projected field).
    pub fn feed(&mut self, fragment: &str) -> String {
        let mut delta = String::new();
        for ch in fragment.chars() {
            self.raw.push(ch);
            self.step(ch, &mut delta);
        }
        self.projected.push_str(&delta);
        delta
    }

    fn step(&mut self, ch: char, delta: &mut String) {
        match self.state {
            State::Seeking => {
                self.tail.push(ch);
                if self.tail.len() > TAIL_CAP {
                    // Trim from the front; openers are ASCII so any char
                    // boundary issues come from the payload side.
                    let cut = self.tail.len() - TAIL_CAP;
                    let boundary = (cut..self.tail.len())
                        .find(|&i| self.tail.is_char_boundary(i))
                        .unwrap_or(0);
                    self.tail.drain(..boundary);
                }
                if OPENERS.iter().any(|o| self.tail.ends_with(o.as_str())) {
                    self.tail.clear();
                    self.state = State::AwaitQuote;
                }
            }
            State::AwaitQuote => {
                if ch == '"' {
                    self.state = State::InValue {
                        escape_pending: false,
                    };
                }
                // Whitespace is expected here; any other character is
                // tolerated without emission.
            }
            State::InValue { escape_pending } => {
                if escape_pending {
                    delta.push(decode_escape(ch));
                    self.state = State::InValue {
                        escape_pending: false,
                    };
                } else if ch == '\\' {
                    self.state = State::InValue {
                        escape_pending: true,
                    };
                } else if ch == '"' {
                    self.state = State::Done;
                } else {
                    delta.push(ch);
                }
            }
            State::Done => {}
        }
    }

    /// True once the projected field has been fully emitted.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Everything emitted as deltas so far.
    #[must_use]
    pub fn projected(&self) -> &str {
        &self.projected
    }

    /// Consumes the extractor at stream end and classifies the full buffer.
    #[must_use]
    pub fn finish(self) -> ExtractOutcome {
        classify(&self.raw, self.projected)
    }
}

fn decode_escape(ch: char) -> char {
    match ch {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        // \\ , \" and anything else pass through literally.
        other => other,
    }
}

/// Classifies a complete raw model output: parsed JSON document, salvaged
/// plain text, or nothing. Shared by the streaming and blocking paths.
#[must_use]
pub fn classify(raw: &str, streamed_text: String) -> ExtractOutcome {
    let stripped = strip_code_fences(raw);
    if stripped.is_empty() {
        return ExtractOutcome::Empty;
    }
    match serde_json::from_str::<Value>(stripped) {
        Ok(document) if document.is_object() => ExtractOutcome::Parsed {
            document,
            streamed_text,
        },
        _ => {
            let (text, chips) = salvage_trailing_chips(stripped);
            ExtractOutcome::Fallback {
                text,
                chips,
                streamed_text,
            }
        }
    }
}

/// Strips one layer of enclosing Markdown code fences, with or without a
/// `json` language tag.
#[must_use]
pub fn strip_code_fences(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    } else {
        return s;
    }
    s = s.strip_suffix("```").unwrap_or(s);
    s.trim()
}

/// Pulls a trailing `["…","…"]` span off plain text, returning the cleaned
/// text and the quoted contents as chips. Models asked for structured
/// output sometimes decline and append the chips array as free text; this
/// recovers them.
fn salvage_trailing_chips(text: &str) -> (String, Vec<String>) {
    match TRAILING_CHIPS.find(text) {
        Some(m) => {
            let chips = QUOTED
                .captures_iter(m.as_str())
                .map(|c| c[1].to_string())
                .collect();
            (text[..m.start()].trim().to_string(), chips)
        }
        None => (text.to_string(), Vec::new()),
    }
}
