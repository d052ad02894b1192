//! Incremental sentence segmentation over a streamed token sequence.
//!
//! Tokens accumulate in a rolling buffer; every push re-tests the buffer
//! against the boundary pattern (sentence punctuation, optional closing
//! quotes/brackets, then whitespace) and yields any completed sentences.
//! Text still in the buffer when the stream ends comes out via `flush`.

use once_cell::sync::Lazy;
use regex::Regex;

static BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?]["')\]]*\s"#).expect("sentence boundary pattern"));

#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one token; returns sentences completed by it, in order.
    ///
    /// A boundary only splits when the text before it is long enough to be a
    /// sentence on its own; a short interjection ("Hi!", "Ok.") rides along
    /// into the next sentence instead of becoming a fragment.
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);
        let mut sentences = Vec::new();
        let mut search_from = 0;
        while let Some(m) = BOUNDARY.find_at(&self.buffer, search_from) {
            let candidate = self.buffer[..m.end()].trim();
            if candidate.chars().count() > MIN_SENTENCE_CHARS {
                sentences.push(candidate.to_string());
                self.buffer.drain(..m.end());
                search_from = 0;
            } else {
                search_from = m.end();
            }
        }
        sentences
    }

    /// Take whatever remains after the stream ends.
    pub fn flush(&mut self) -> Option<String> {
        let rest = self.buffer.trim().to_string();
        self.buffer.clear();
        if rest.is_empty() { None } else { Some(rest) }
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

/// Sentences at or under this trimmed length are not worth a synthesis call.
pub const MIN_SENTENCE_CHARS: usize = 3;

/// Whether a segmented sentence should be dispatched to TTS.
pub fn worth_synthesizing(sentence: &str) -> bool {
    sentence.trim().chars().count() > MIN_SENTENCE_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(splitter: &mut SentenceSplitter, tokens: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        for token in tokens {
            out.extend(splitter.push(token));
        }
        out
    }

    #[test]
    fn test_short_interjection_merges_into_one_sentence() {
        let mut splitter = SentenceSplitter::new();
        let sentences = feed(
            &mut splitter,
            &["Hi! ", "How ", "can ", "I ", "help ", "you ", "today?"],
        );
        // "Hi!" is too short to stand alone; the whole greeting is one sentence
        assert!(sentences.is_empty());
        assert_eq!(splitter.flush().unwrap(), "Hi! How can I help you today?");
    }

    #[test]
    fn test_trivial_leader_merges_into_following_sentence() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.push("Ok. ").is_empty());
        let sentences = splitter.push("Sounds good. ");
        assert_eq!(sentences, vec!["Ok. Sounds good."]);
        assert!(splitter.flush().is_none());
    }

    #[test]
    fn test_three_sentences_in_order() {
        let mut splitter = SentenceSplitter::new();
        let mut sentences = feed(&mut splitter, &["Sure. Let's ", "begin. Tell me ", "more."]);
        if let Some(rest) = splitter.flush() {
            sentences.push(rest);
        }
        assert_eq!(sentences, vec!["Sure.", "Let's begin.", "Tell me more."]);
    }

    #[test]
    fn test_boundary_split_across_tokens() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.push("Done.").is_empty());
        // Whitespace arriving in the next token completes the sentence
        let sentences = splitter.push(" Next");
        assert_eq!(sentences, vec!["Done."]);
        assert_eq!(splitter.pending(), "Next");
    }

    #[test]
    fn test_closing_quote_after_punctuation() {
        let mut splitter = SentenceSplitter::new();
        let sentences = splitter.push("She said \"stop.\" Then left.");
        assert_eq!(sentences, vec!["She said \"stop.\""]);
        assert_eq!(splitter.flush().unwrap(), "Then left.");
    }

    #[test]
    fn test_flush_empty_buffer_is_none() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.flush().is_none());
        splitter.push("   ");
        assert!(splitter.flush().is_none());
    }

    #[test]
    fn test_worth_synthesizing_filters_trivial_fragments() {
        assert!(!worth_synthesizing("Ok."));
        assert!(!worth_synthesizing("  a  "));
        assert!(worth_synthesizing("Sure."));
        assert!(worth_synthesizing("Hi! How can I help you today?"));
    }
}
