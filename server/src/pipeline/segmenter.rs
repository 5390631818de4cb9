//! Splits an incrementally generated text into speakable phrases.
//!
//! Text is accumulated in a working buffer. Once the buffer holds at least
//! `min_phrase_length` characters, the earliest delimiter found at or after
//! that offset ends a phrase. The floor keeps abbreviations such as "Mr. "
//! from producing choppy, very short utterances.

use std::fmt;
use std::sync::Arc;

/// String rewrite applied to fragments or phrases
pub type Transform = Arc<dyn Fn(&str) -> String + Send + Sync>;

pub const DEFAULT_MIN_PHRASE_LENGTH: usize = 200;
pub const DEFAULT_DELIMITERS: [&str; 3] = [". ", "? ", "! "];

#[derive(Clone)]
pub struct SegmenterConfig {
    /// Minimum phrase length in characters; also the delimiter search offset
    pub min_phrase_length: usize,
    pub delimiters: Vec<String>,
    /// Applied to every incoming fragment before buffering
    pub content_transforms: Vec<Transform>,
    /// Applied to every phrase before it is emitted
    pub phrase_transforms: Vec<Transform>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_phrase_length: DEFAULT_MIN_PHRASE_LENGTH,
            delimiters: DEFAULT_DELIMITERS.iter().map(|d| d.to_string()).collect(),
            content_transforms: vec![Arc::new(collapse_newlines)],
            phrase_transforms: vec![Arc::new(trim_phrase)],
        }
    }
}

impl SegmenterConfig {
    /// Same boundaries, no rewriting of fragments or phrases
    pub fn without_transforms(mut self) -> Self {
        self.content_transforms.clear();
        self.phrase_transforms.clear();
        self
    }
}

impl fmt::Debug for SegmenterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmenterConfig")
            .field("min_phrase_length", &self.min_phrase_length)
            .field("delimiters", &self.delimiters)
            .field("content_transforms", &self.content_transforms.len())
            .field("phrase_transforms", &self.phrase_transforms.len())
            .finish()
    }
}

pub fn collapse_newlines(text: &str) -> String {
    text.replace('\n', " ")
}

pub fn trim_phrase(text: &str) -> String {
    text.trim().to_string()
}

fn apply(text: &str, transforms: &[Transform]) -> String {
    transforms
        .iter()
        .fold(text.to_string(), |acc, transform| transform(&acc))
}

#[derive(Debug)]
pub struct PhraseSegmenter {
    config: SegmenterConfig,
    buffer: String,
}

impl PhraseSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
        }
    }

    /// Feed one fragment and return every phrase it completes, in order.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        if fragment.is_empty() {
            return Vec::new();
        }
        let content = apply(fragment, &self.config.content_transforms);
        self.buffer.push_str(&content);

        let mut phrases = Vec::new();
        while let Some(split_at) = self.next_boundary() {
            let rest = self.buffer.split_off(split_at);
            let raw = std::mem::replace(&mut self.buffer, rest);
            let phrase = apply(&raw, &self.config.phrase_transforms);
            if !phrase.trim().is_empty() {
                phrases.push(phrase);
            }
        }
        phrases
    }

    /// Drain the remainder once the upstream text has ended.
    /// Whitespace-only remainders are dropped.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        let phrase = apply(&raw, &self.config.phrase_transforms);
        if phrase.trim().is_empty() {
            None
        } else {
            Some(phrase)
        }
    }

    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Byte offset just past the earliest delimiter starting at or after
    /// `min_phrase_length` characters. `None` while the buffer is too short.
    fn next_boundary(&self) -> Option<usize> {
        let min = self.config.min_phrase_length;
        let start = if min == 0 {
            0
        } else {
            self.buffer.char_indices().nth(min)?.0
        };

        let tail = &self.buffer[start..];
        self.config
            .delimiters
            .iter()
            .filter(|d| !d.is_empty())
            .filter_map(|d| tail.find(d.as_str()).map(|idx| (idx, d.len())))
            .min_by_key(|(idx, _)| *idx)
            .map(|(idx, len)| start + idx + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: usize, delimiters: &[&str]) -> SegmenterConfig {
        SegmenterConfig {
            min_phrase_length: min,
            delimiters: delimiters.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    fn segment(segmenter: &mut PhraseSegmenter, fragments: &[&str]) -> Vec<String> {
        let mut phrases: Vec<String> = fragments.iter().flat_map(|f| segmenter.push(f)).collect();
        phrases.extend(segmenter.finish());
        phrases
    }

    #[test]
    fn test_short_scenario() {
        let mut segmenter = PhraseSegmenter::new(config(10, &[". ", "! "]));
        let phrases = segment(&mut segmenter, &["Hello there. ", "This is ", "a test! ", "Goodbye."]);
        assert_eq!(phrases, vec!["Hello there.", "This is a test!", "Goodbye."]);
    }

    #[test]
    fn test_delimiter_search_starts_at_minimum_offset() {
        let mut segmenter = PhraseSegmenter::new(config(10, &[". "]));
        // the first ". " sits at offset 2, before the floor
        assert!(segmenter.push("Mr. Smith sat down").is_empty());
        let phrases = segmenter.push(". Then he rested. ");
        assert_eq!(phrases, vec!["Mr. Smith sat down.", "Then he rested."]);
        assert_eq!(segmenter.buffered(), "");
    }

    #[test]
    fn test_buffer_at_exact_minimum_does_not_split() {
        let mut segmenter = PhraseSegmenter::new(config(4, &[". "]).without_transforms());
        assert!(segmenter.push("ab. ").is_empty());
        assert_eq!(segmenter.buffered(), "ab. ");
    }

    #[test]
    fn test_earliest_delimiter_wins() {
        let mut segmenter = PhraseSegmenter::new(config(3, &[". ", "? ", "! "]).without_transforms());
        let phrases = segmenter.push("Well now? Yes! Fine. ");
        assert_eq!(phrases, vec!["Well now? ", "Yes! ", "Fine. "]);
    }

    #[test]
    fn test_default_floor_keeps_short_sentences_together() {
        let mut segmenter = PhraseSegmenter::new(SegmenterConfig::default());
        let sentence = "Breathe in slowly. ";
        let mut emitted = Vec::new();
        for _ in 0..20 {
            emitted.extend(segmenter.push(sentence));
        }
        assert!(!emitted.is_empty());
        for phrase in &emitted {
            assert!(phrase.chars().count() >= DEFAULT_MIN_PHRASE_LENGTH);
        }
    }

    #[test]
    fn test_newlines_collapse_into_spaces() {
        let mut segmenter = PhraseSegmenter::new(config(5, &[". "]));
        let phrases = segment(&mut segmenter, &["Rest here.\n", "\nNow ", "notice your breath."]);
        assert_eq!(phrases, vec!["Rest here.", "Now notice your breath."]);
    }

    #[test]
    fn test_empty_fragments_are_noops() {
        let mut segmenter = PhraseSegmenter::new(config(5, &[". "]));
        assert!(segmenter.push("").is_empty());
        assert_eq!(segmenter.buffered(), "");
        assert!(segmenter.finish().is_none());
    }

    #[test]
    fn test_short_stream_flushes_below_minimum() {
        let mut segmenter = PhraseSegmenter::new(SegmenterConfig::default());
        assert_eq!(segment(&mut segmenter, &["Be still. ", "Rest."]), vec!["Be still. Rest."]);
    }

    #[test]
    fn test_whitespace_remainder_is_discarded() {
        let mut segmenter = PhraseSegmenter::new(config(5, &[". "]));
        let phrases = segment(&mut segmenter, &["Close your eyes. ", "   ", "\n"]);
        assert_eq!(phrases, vec!["Close your eyes."]);
    }

    #[test]
    fn test_minimum_is_counted_in_characters() {
        let mut segmenter = PhraseSegmenter::new(config(6, &[". "]).without_transforms());
        // six two-byte characters, then a delimiter at char offset 6
        let phrases = segmenter.push("éééééé. rest");
        assert_eq!(phrases, vec!["éééééé. "]);
        assert_eq!(segmenter.buffered(), "rest");
    }

    #[test]
    fn test_concatenation_reproduces_input() {
        let fragments = [
            "You are safe here. ", "Let the", " day fall away", ". Notice the ", "weight of your body? ",
            "Feel it! ", "Again. ", "And once more, slowly", ". ", "Rest.",
        ];
        for min in [0, 1, 5, 12, 40, 500] {
            let mut segmenter = PhraseSegmenter::new(config(min, &[". ", "? ", "! "]).without_transforms());
            let phrases = segment(&mut segmenter, &fragments);
            assert_eq!(phrases.concat(), fragments.concat(), "min_phrase_length = {min}");

            // every phrase but the flushed remainder reaches the floor
            for phrase in &phrases[..phrases.len() - 1] {
                assert!(phrase.chars().count() > min, "{phrase:?} shorter than {min}");
            }
        }
    }
}
