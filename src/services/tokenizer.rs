use std::collections::HashMap;
use std::path::Path;

use crate::error::AppError;

pub const PAD_ID: i64 = 0;
pub const UNK_ID: i64 = 100;
pub const CLS_ID: i64 = 101;
pub const SEP_ID: i64 = 102;
pub const MAX_SEQUENCE_LEN: usize = 512;

/// Token string to id. The id of a token is its line number in `vocab.txt`.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    ids: HashMap<String, i64>,
}

impl Vocabulary {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_tokens(raw.lines().map(str::trim_end)))
    }

    pub fn from_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        let mut ids = HashMap::new();
        for (index, token) in tokens.into_iter().enumerate() {
            ids.entry(token.to_string()).or_insert(index as i64);
        }
        Self { ids }
    }

    pub fn id(&self, token: &str) -> i64 {
        self.ids.get(token).copied().unwrap_or(UNK_ID)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Lowercased maximal runs of letters and digits.
pub fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Prefix of `text` holding at most `n` words, preserving the original characters.
pub fn leading_words(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let mut seen = 0;
    let mut in_word = false;
    for (i, c) in text.char_indices() {
        let is_word = c.is_alphanumeric();
        if is_word && !in_word {
            if seen == n {
                return text[..i].trim_end();
            }
            seen += 1;
        }
        in_word = is_word;
    }
    text
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedInput {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab: Vocabulary,
    max_len: usize,
}

impl Tokenizer {
    pub fn new(vocab: Vocabulary) -> Self {
        Self {
            vocab,
            max_len: MAX_SEQUENCE_LEN,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(2);
        self
    }

    pub fn from_vocab_file(path: &Path) -> Result<Self, AppError> {
        Ok(Self::new(Vocabulary::from_file(path)?))
    }

    /// `[CLS] body [SEP]`, truncated so the end marker always survives.
    pub fn encode(&self, text: &str) -> Vec<i64> {
        let mut ids = Vec::with_capacity(self.max_len);
        ids.push(CLS_ID);
        for word in words(text) {
            if ids.len() == self.max_len - 1 {
                break;
            }
            ids.push(self.vocab.id(&word));
        }
        ids.push(SEP_ID);
        ids
    }

    pub fn encode_for_model(&self, text: &str) -> EncodedInput {
        let input_ids = self.encode(text);
        let attention_mask = vec![1; input_ids.len()];
        let token_type_ids = vec![PAD_ID; input_ids.len()];
        EncodedInput {
            input_ids,
            attention_mask,
            token_type_ids,
        }
    }
}
