// Text helpers shared by the flattener, the labeler and the recognizers.
use once_cell::sync::Lazy;
use regex::Regex;

static ALNUM_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9]+").unwrap());

/// Split a key such as `PassengerID` into readable words joined by `join`.
///
/// Words break before an uppercase letter that follows a lowercase letter or a
/// digit, and before the last capital of an uppercase run when a lowercase
/// letter comes next (`XMLHttp` -> `XML Http`). Digits stay with the word they
/// follow. Anything that is not ASCII alphanumeric separates words. A key with
/// no alphanumeric characters is returned unchanged.
pub fn camel_case_split(key: &str, join: &str) -> String {
    let mut words: Vec<&str> = Vec::new();

    for run in ALNUM_RUN.find_iter(key) {
        let s = run.as_str();
        let bytes = s.as_bytes();
        let mut word_start = 0;
        for i in 1..bytes.len() {
            let prev = bytes[i - 1];
            let cur = bytes[i];
            let next = bytes.get(i + 1).copied();
            let boundary = cur.is_ascii_uppercase()
                && (prev.is_ascii_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_ascii_uppercase()
                        && next.map_or(false, |n| n.is_ascii_lowercase())));
            if boundary {
                words.push(&s[word_start..i]);
                word_start = i;
            }
        }
        words.push(&s[word_start..]);
    }

    if words.is_empty() {
        return key.to_string();
    }
    words.join(join)
}

/// Converts byte offsets of one string into character offsets.
///
/// JSON consumers slice by code point, regex reports bytes.
pub struct CharIndex {
    // starts[c] is the byte offset of char c; the last entry is text.len()
    starts: Vec<usize>,
}

impl CharIndex {
    pub fn new(text: &str) -> Self {
        let mut starts: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        starts.push(text.len());
        Self { starts }
    }

    /// Character offset of a byte offset that lies on a char boundary.
    pub fn char_at(&self, byte: usize) -> usize {
        match self.starts.binary_search(&byte) {
            Ok(c) => c,
            Err(c) => c.saturating_sub(1),
        }
    }

    /// Byte offset of a character offset, clamped to the end of the text.
    pub fn byte_at(&self, ch: usize) -> usize {
        let last = self.starts.len() - 1;
        self.starts[ch.min(last)]
    }

    pub fn char_len(&self) -> usize {
        self.starts.len() - 1
    }
}

/// Slice `text` by character offsets.
pub fn char_slice(text: &str, start: usize, end: usize) -> &str {
    let index = CharIndex::new(text);
    let (s, e) = (index.byte_at(start), index.byte_at(end));
    if s > e {
        return "";
    }
    &text[s..e]
}
