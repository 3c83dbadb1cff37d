//! Recursive character splitter with exact-length overlap.
//!
//! Text is broken at decreasing granularity (paragraph, line, sentence, word,
//! character) until every piece fits in `max_chars - overlap_chars`. Pieces
//! keep their separators, so concatenating them reproduces the input. Pieces
//! are then merged greedily; every chunk after the first begins with the last
//! `overlap_chars` characters of its predecessor.
//!
//! Lengths are counted in `char`s, not bytes.

use crate::error::{Error, Result};

const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "? ", "! ", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    max_chars: usize,
    overlap_chars: usize,
}

impl TextSplitter {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(Error::InvalidConfig("chunk max_chars must be positive".into()));
        }
        if overlap_chars >= max_chars {
            return Err(Error::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than max_chars ({})",
                overlap_chars, max_chars
            )));
        }
        Ok(Self { max_chars, overlap_chars })
    }

    pub fn max_chars(&self) -> usize { self.max_chars }
    pub fn overlap_chars(&self) -> usize { self.overlap_chars }

    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let mut pieces = Vec::new();
        split_recursive(text, self.max_chars - self.overlap_chars, SEPARATORS, &mut pieces);
        self.merge(&pieces)
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_len = 0usize;
        for piece in pieces {
            let len = char_len(piece);
            // Every piece fits after an overlap, so a flushed chunk is always
            // longer than the overlap it hands to its successor.
            if current_len + len > self.max_chars {
                let tail = tail_chars(&current, self.overlap_chars).to_string();
                chunks.push(std::mem::replace(&mut current, tail));
                current_len = self.overlap_chars;
            }
            current.push_str(piece);
            current_len += len;
        }
        if current_len > 0 {
            chunks.push(current);
        }
        chunks
    }
}

fn split_recursive<'a>(text: &'a str, limit: usize, separators: &[&str], out: &mut Vec<&'a str>) {
    if char_len(text) <= limit {
        out.push(text);
        return;
    }
    match separators.split_first() {
        Some((&sep, finer)) if text.contains(sep) => {
            for piece in text.split_inclusive(sep) {
                split_recursive(piece, limit, finer, out);
            }
        }
        Some((_, finer)) => split_recursive(text, limit, finer, out),
        None => {
            let mut bounds = text.char_indices().map(|(i, _)| i).peekable();
            while let Some(start) = bounds.next() {
                let end = bounds.peek().copied().unwrap_or(text.len());
                out.push(&text[start..end]);
            }
        }
    }
}

pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The last `n` characters of `s` (all of `s` if shorter).
pub fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}
