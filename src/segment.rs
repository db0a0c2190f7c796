//! Sentence segmentation for streamed translation text.
//!
//! Translation fragments arrive a few words at a time. Synthesizing each
//! fragment separately produces choppy prosody and one remote request per
//! fragment, so fragments are buffered and released as whole sentences.

/// Buffered text longer than this is released at its last whitespace even
/// without sentence punctuation.
const MAX_PENDING_BYTES: usize = 400;

/// Find the end of the first complete sentence in `text`.
///
/// A sentence ends at `. ! ? 。 ！ ？` or a newline that is followed by
/// whitespace. The returned byte index is just past the whitespace run that
/// follows the punctuation, so `text[..end]` keeps the original spacing.
/// Punctuation at the very end of `text` is not a boundary since more text
/// may still arrive (a decimal point, an abbreviation).
pub fn find_sentence_end(text: &str) -> Option<usize> {
    for (i, c) in text.char_indices() {
        if !matches!(c, '.' | '!' | '?' | '\n' | '。' | '！' | '？') {
            continue;
        }
        let after = i + c.len_utf8();
        let rest = &text[after..];
        let is_wide = matches!(c, '。' | '！' | '？');
        let followed_by_space = rest.starts_with(char::is_whitespace);
        if c == '\n' || followed_by_space || (is_wide && !rest.is_empty()) {
            let ws = rest.len() - rest.trim_start().len();
            return Some(after + ws);
        }
    }
    None
}

/// Accumulates fragments and yields complete sentences in order.
#[derive(Debug, Default)]
pub struct SentenceAccumulator {
    buffer: String,
}

impl SentenceAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and drain every sentence it completes.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);
        let mut sentences = Vec::new();
        while let Some(end) = find_sentence_end(&self.buffer) {
            let rest = self.buffer.split_off(end);
            sentences.push(std::mem::replace(&mut self.buffer, rest));
        }
        if self.buffer.len() > MAX_PENDING_BYTES
            && let Some(cut) = self.buffer.rfind(char::is_whitespace)
        {
            let end = cut + self.buffer[cut..].chars().next().map_or(1, char::len_utf8);
            let rest = self.buffer.split_off(end);
            sentences.push(std::mem::replace(&mut self.buffer, rest));
        }
        sentences
    }

    /// Release whatever is left. Whitespace-only remainders yield `None`.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
