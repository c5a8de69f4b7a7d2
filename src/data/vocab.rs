//! Vocabulary: word ↔ id mapping shared by every embedding table.

use std::collections::HashMap;

/// Out-of-vocabulary token id.
pub const UNK_TOKEN: usize = 0;
/// Padding token id.
pub const PAD_TOKEN: usize = 1;
/// End-of-sequence token id.
pub const EOS_TOKEN: usize = 2;
/// Start-of-sequence token id.
pub const SOS_TOKEN: usize = 3;
/// Sentinel "no answer" memory word.
pub const NULL_TOKEN: usize = 4;

/// Fixed token width of one memory slot (entity word + tags).
pub const MEM_TOKEN_SIZE: usize = 4;

/// Word ↔ index mapping. Index 0..=4 are reserved for the special tokens.
#[derive(Debug, Clone)]
pub struct Lang {
    word2index: HashMap<String, usize>,
    index2word: Vec<String>,
}

impl Default for Lang {
    fn default() -> Self {
        Self::new()
    }
}

impl Lang {
    pub fn new() -> Self {
        let mut lang = Self {
            word2index: HashMap::new(),
            index2word: Vec::new(),
        };
        for special in ["UNK", "PAD", "EOS", "SOS", "$$$$"] {
            lang.index_word(special);
        }
        lang
    }

    /// Intern a word, returning its id.
    pub fn index_word(&mut self, word: &str) -> usize {
        if let Some(&idx) = self.word2index.get(word) {
            return idx;
        }
        let idx = self.index2word.len();
        self.word2index.insert(word.to_string(), idx);
        self.index2word.push(word.to_string());
        idx
    }

    /// Intern every word of a whitespace-separated string.
    pub fn index_words(&mut self, sentence: &str) {
        for word in sentence.split_whitespace() {
            self.index_word(word);
        }
    }

    /// Look up a word, falling back to UNK.
    pub fn encode(&self, word: &str) -> usize {
        self.word2index.get(word).copied().unwrap_or(UNK_TOKEN)
    }

    /// Reverse lookup. Out-of-range ids decode to "UNK".
    pub fn decode(&self, id: usize) -> &str {
        self.index2word.get(id).map(String::as_str).unwrap_or("UNK")
    }

    pub fn n_words(&self) -> usize {
        self.index2word.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_tokens_are_fixed() {
        let lang = Lang::new();
        assert_eq!(lang.encode("UNK"), UNK_TOKEN);
        assert_eq!(lang.encode("PAD"), PAD_TOKEN);
        assert_eq!(lang.encode("EOS"), EOS_TOKEN);
        assert_eq!(lang.encode("SOS"), SOS_TOKEN);
        assert_eq!(lang.encode("$$$$"), NULL_TOKEN);
        assert_eq!(lang.n_words(), 5);
    }

    #[test]
    fn interning_is_idempotent() {
        let mut lang = Lang::new();
        let a = lang.index_word("taco_bell");
        let b = lang.index_word("taco_bell");
        assert_eq!(a, b);
        assert_eq!(lang.decode(a), "taco_bell");
    }

    #[test]
    fn unknown_words_map_to_unk() {
        let lang = Lang::new();
        assert_eq!(lang.encode("never_seen"), UNK_TOKEN);
    }
}
