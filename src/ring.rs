//! Bounded records of recent child output.
//!
//! Both rings use a cap/keep discipline: nothing happens until an append
//! pushes the length past `cap`, then the oldest content is dropped until
//! `keep` remains. The contents are always a suffix of what was appended.

use std::collections::VecDeque;

/// Recent complete output lines.
#[derive(Debug, Clone)]
pub struct LineRing {
    lines: VecDeque<String>,
    cap: usize,
    keep: usize,
}

impl LineRing {
    pub fn new(cap: usize, keep: usize) -> Self {
        let cap = cap.max(1);
        Self {
            lines: VecDeque::with_capacity(cap + 1),
            cap,
            keep: keep.clamp(1, cap),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
        if self.lines.len() > self.cap {
            let excess = self.lines.len() - self.keep;
            self.lines.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let start = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(start).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.lines.iter()
    }
}

/// Recent output text, capped in characters.
///
/// Bytes are decoded incrementally: an incomplete UTF-8 sequence at the end
/// of one chunk is carried into the next instead of being mangled. Invalid
/// sequences decode lossily.
#[derive(Debug, Clone)]
pub struct TextRing {
    text: String,
    chars: usize,
    cap: usize,
    keep: usize,
    carry: Vec<u8>,
}

impl TextRing {
    pub fn new(cap: usize, keep: usize) -> Self {
        let cap = cap.max(1);
        Self {
            text: String::new(),
            chars: 0,
            cap,
            keep: keep.clamp(1, cap),
            carry: Vec::new(),
        }
    }

    /// Append raw bytes, returning the newly decoded text.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> String {
        let mut pending = std::mem::take(&mut self.carry);
        pending.extend_from_slice(bytes);

        let decoded = match std::str::from_utf8(&pending) {
            Ok(s) => s.to_string(),
            Err(e) if e.error_len().is_none() => {
                // Truncated multi-byte sequence at the end: keep it for later.
                let valid = e.valid_up_to();
                self.carry = pending[valid..].to_vec();
                String::from_utf8_lossy(&pending[..valid]).into_owned()
            }
            Err(_) => String::from_utf8_lossy(&pending).into_owned(),
        };

        self.push_str(&decoded);
        decoded
    }

    pub fn push_str(&mut self, s: &str) {
        self.text.push_str(s);
        self.chars += s.chars().count();
        if self.chars > self.cap {
            let drop = self.chars - self.keep;
            let cut = self
                .text
                .char_indices()
                .nth(drop)
                .map(|(idx, _)| idx)
                .unwrap_or(self.text.len());
            self.text.drain(..cut);
            self.chars = self.keep;
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.chars
    }

    pub fn is_empty(&self) -> bool {
        self.chars == 0
    }

    /// Last line of the buffer after trimming surrounding whitespace, the
    /// way a prompt sits at the bottom of the screen.
    pub fn last_line(&self) -> &str {
        self.text
            .trim()
            .rsplit(['\n', '\r'])
            .next()
            .unwrap_or("")
            .trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn line_ring_trims_to_keep() {
        let mut ring = LineRing::new(4, 2);
        for i in 0..5 {
            ring.push(format!("line {i}"));
        }
        assert_eq!(ring.tail(10), vec!["line 3", "line 4"]);
    }

    #[test]
    fn line_ring_tail_is_bounded_by_len() {
        let mut ring = LineRing::new(10, 5);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.tail(1), vec!["b"]);
        assert_eq!(ring.tail(5), vec!["a", "b"]);
    }

    #[test]
    fn text_ring_keeps_suffix() {
        let mut ring = TextRing::new(10, 5);
        ring.push_str("abcdefgh");
        assert_eq!(ring.as_str(), "abcdefgh");
        ring.push_str("ijk");
        assert_eq!(ring.as_str(), "ghijk");
        assert_eq!(ring.len(), 5);
    }

    #[test]
    fn text_ring_cuts_on_char_boundaries() {
        let mut ring = TextRing::new(3, 2);
        ring.push_str("❯❯❯❯");
        assert_eq!(ring.as_str(), "❯❯");
    }

    #[test]
    fn split_multibyte_char_is_carried() {
        let mut ring = TextRing::new(100, 50);
        let bytes = "ok ❯".as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 1);
        assert_eq!(ring.push_bytes(head), "ok ");
        assert_eq!(ring.push_bytes(tail), "❯");
        assert_eq!(ring.as_str(), "ok ❯");
    }

    #[test]
    fn invalid_bytes_decode_lossily() {
        let mut ring = TextRing::new(100, 50);
        let out = ring.push_bytes(&[b'a', 0xff, b'b']);
        assert_eq!(out, "a\u{fffd}b");
    }

    #[test]
    fn last_line_ignores_trailing_newlines() {
        let mut ring = TextRing::new(100, 50);
        ring.push_str("some output\r\n❯ \r\n");
        assert_eq!(ring.last_line(), "❯");
    }

    proptest! {
        #[test]
        fn text_ring_never_exceeds_cap(chunks in proptest::collection::vec(".{0,40}", 0..30), cap in 1usize..64) {
            let keep = cap / 2 + 1;
            let mut ring = TextRing::new(cap, keep);
            let mut all = String::new();
            for chunk in &chunks {
                ring.push_str(chunk);
                all.push_str(chunk);
                prop_assert!(ring.len() <= cap);
                prop_assert_eq!(ring.len(), ring.as_str().chars().count());
                prop_assert!(all.ends_with(ring.as_str()));
            }
        }

        #[test]
        fn line_ring_never_exceeds_cap(lines in proptest::collection::vec("[a-z]{0,8}", 0..200), cap in 1usize..40) {
            let mut ring = LineRing::new(cap, cap / 2);
            for line in &lines {
                ring.push(line.clone());
                prop_assert!(ring.len() <= cap);
            }
            let kept: Vec<String> = ring.iter().cloned().collect();
            prop_assert!(lines.ends_with(&kept));
        }
    }
}
