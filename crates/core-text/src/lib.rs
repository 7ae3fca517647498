//! Gap-buffer text store with an incrementally maintained line index.
//!
//! The buffer is a contiguous byte array split into `[prefix | gap | suffix]`;
//! the logical text is `prefix ++ suffix` and always ends with `\n` (the
//! empty buffer is the single byte `\n`). `line_lengths` tracks, per logical
//! line, its length excluding the trailing newline, so that
//! `sum(line_lengths) + line_count == size()` always holds.

use tracing::trace;

/// A 0-based byte offset into the logical text.
pub type Offset = usize;

/// An ordered half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Region {
    pub start: Offset,
    pub end: Offset,
}

impl Region {
    pub fn new(start: Offset, end: Offset) -> Self {
        debug_assert!(start <= end, "region start must not exceed end");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Smallest gap grown at a time, and the minimum initial gap size.
const GAP_CHUNK: usize = 1024;

/// Byte-level text store with a movable gap and a maintained line index.
pub struct GapBuffer {
    buf: Vec<u8>,
    gap_start: usize,
    gap_end: usize,
    /// Length of each logical line, excluding its trailing `\n`.
    line_lengths: Vec<usize>,
}

impl Default for GapBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl GapBuffer {
    /// Create an empty buffer (logical content `"\n"`).
    pub fn new() -> Self {
        let mut buf = vec![0u8; GAP_CHUNK + 1];
        buf[GAP_CHUNK] = b'\n';
        Self {
            buf,
            gap_start: 0,
            gap_end: GAP_CHUNK,
            line_lengths: vec![0],
        }
    }

    /// Load buffer contents from raw bytes (e.g. a loaded file). A trailing
    /// newline is appended if missing, preserving the buffer's invariant.
    pub fn from_bytes(content: &[u8]) -> Self {
        let mut gb = Self::new();
        if !content.is_empty() {
            // Replace the initial sole "\n" with the loaded content.
            gb.delete(0, 1);
            let mut owned = content.to_vec();
            if owned.last() != Some(&b'\n') {
                owned.push(b'\n');
            }
            gb.insert(0, &owned);
        }
        gb
    }

    /// Total number of logical bytes.
    pub fn size(&self) -> usize {
        self.buf.len() - (self.gap_end - self.gap_start)
    }

    /// Number of logical lines.
    pub fn line_count(&self) -> usize {
        self.line_lengths.len()
    }

    /// Length of a given logical line, excluding its trailing newline.
    pub fn line_len(&self, line: usize) -> usize {
        self.line_lengths.get(line).copied().unwrap_or(0)
    }

    fn real_index(&self, pos: usize) -> usize {
        if pos < self.gap_start {
            pos
        } else {
            pos + (self.gap_end - self.gap_start)
        }
    }

    /// Byte at logical offset `pos`. Clamped: `pos >= size()` returns `\n`.
    pub fn char_at(&self, pos: usize) -> u8 {
        if pos >= self.size() {
            return b'\n';
        }
        self.buf[self.real_index(pos)]
    }

    /// Owned copy of `len` bytes starting at `start`, clamped to the buffer.
    pub fn substring(&self, start: usize, len: usize) -> Vec<u8> {
        let size = self.size();
        let start = start.min(size);
        let len = len.min(size - start);
        (start..start + len).map(|i| self.char_at(i)).collect()
    }

    /// Relocate the gap so the logical byte at `pos` lies immediately after it.
    pub fn move_gap_to(&mut self, pos: usize) {
        let pos = pos.min(self.size());
        let point = self.real_index(pos);
        if point > self.gap_end {
            let n = point - self.gap_end;
            self.buf.copy_within(self.gap_end..self.gap_end + n, self.gap_start);
            self.gap_start += n;
            self.gap_end += n;
        } else if point < self.gap_start {
            let n = self.gap_start - point;
            self.buf.copy_within(point..point + n, self.gap_end - n);
            self.gap_start -= n;
            self.gap_end -= n;
        }
    }

    /// The contiguous region starting logically at `pos`. The caller must
    /// have already called `move_gap_to(pos)`.
    pub fn contiguous_from(&self, pos: usize) -> &[u8] {
        debug_assert_eq!(
            self.gap_start,
            pos.min(self.size()),
            "contiguous_from requires a prior move_gap_to(pos)"
        );
        &self.buf[self.gap_end..]
    }

    fn ensure_gap(&mut self, n: usize) {
        let gap_len = self.gap_end - self.gap_start;
        if n <= gap_len {
            return;
        }
        let mut new_gap = 0usize;
        while new_gap < 2 * n {
            new_gap += GAP_CHUNK;
        }
        let left = self.gap_start;
        let right = self.buf.len() - self.gap_end;
        let new_size = left + right + new_gap;
        let mut new_buf = vec![0u8; new_size];
        new_buf[..left].copy_from_slice(&self.buf[..left]);
        new_buf[left + new_gap..].copy_from_slice(&self.buf[self.gap_end..]);
        trace!(old = self.buf.len(), new = new_size, "gap_buffer_grow");
        self.buf = new_buf;
        self.gap_end = left + new_gap;
    }

    /// Insert `bytes` at logical offset `pos`.
    pub fn insert(&mut self, pos: usize, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let pos = pos.min(self.size());
        let (mut line, col) = self.pos_to_linecol(pos);
        self.ensure_gap(bytes.len());
        self.move_gap_to(pos);
        self.buf[self.gap_start..self.gap_start + bytes.len()].copy_from_slice(bytes);

        let mut start = col;
        let mut since_newline = 0usize;
        for &b in bytes {
            if b == b'\n' {
                let old_len = self.line_lengths[line];
                let new_len = start + since_newline;
                self.line_lengths[line] = new_len;
                self.line_lengths.insert(line + 1, old_len - new_len);
                line += 1;
                start = 0;
                since_newline = 0;
            } else {
                self.line_lengths[line] += 1;
                since_newline += 1;
            }
        }
        self.gap_start += bytes.len();
    }

    /// Delete `len` bytes starting at logical offset `pos`. Out-of-range
    /// deletes are clamped; deleting everything re-inserts the sentinel
    /// trailing newline.
    pub fn delete(&mut self, pos: usize, len: usize) {
        let size = self.size();
        if pos >= size || len == 0 {
            return;
        }
        let len = len.min(size - pos);

        if pos == 0 && len == size {
            // Deleting everything: reset to the empty-buffer representation
            // directly rather than walking the merge loop through an
            // out-of-range "previous line".
            self.move_gap_to(0);
            self.gap_end = self.buf.len();
            self.ensure_gap(1);
            self.buf[self.gap_start] = b'\n';
            self.gap_start += 1;
            self.line_lengths = vec![0];
            return;
        }

        self.move_gap_to(pos + len);
        let (mut line, _col) = self.pos_to_linecol(pos + len);
        for i in 0..len {
            let ch = self.buf[self.gap_start - 1 - i];
            if ch == b'\n' {
                let merged = self.line_lengths.remove(line);
                self.line_lengths[line - 1] += merged;
                line -= 1;
            } else {
                self.line_lengths[line] -= 1;
            }
        }
        self.gap_start -= len;
    }

    /// First offset at or after `from` holding `byte`, or `size()` if absent.
    /// First offset at or after `from` holding `byte`, or `size()` if absent
    /// (mirrors `gb_indexof` returning `gb_size` on a miss).
    pub fn index_of(&self, byte: u8, from: usize) -> usize {
        let size = self.size();
        (from..size).find(|&i| self.char_at(i) == byte).unwrap_or(size)
    }

    /// Last offset at or before `before` holding `byte`, or `None` if absent.
    pub fn last_index_of(&self, byte: u8, before: usize) -> Option<usize> {
        let before = before.min(self.size().saturating_sub(1));
        (0..=before).rev().find(|&i| self.char_at(i) == byte)
    }

    /// Decompose a logical offset into `(line, col)`.
    pub fn pos_to_linecol(&self, pos: usize) -> (usize, usize) {
        let pos = pos.min(self.size());
        let mut offset = 0usize;
        for (i, &len) in self.line_lengths.iter().enumerate() {
            if pos <= offset + len {
                return (i, pos - offset);
            }
            offset += len + 1;
        }
        let last = self.line_lengths.len().saturating_sub(1);
        (last, pos.saturating_sub(offset))
    }

    /// Inverse of `pos_to_linecol`.
    pub fn linecol_to_pos(&self, line: usize, col: usize) -> usize {
        let line = line.min(self.line_lengths.len().saturating_sub(1));
        let offset: usize = self.line_lengths[..line].iter().map(|l| l + 1).sum();
        offset + col
    }

    /// Debug-only check of the `sum(line_lengths) + line_count == size()` invariant.
    pub fn check_invariant(&self) -> bool {
        let sum: usize = self.line_lengths.iter().sum();
        sum + self.line_lengths.len() == self.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_is_single_newline() {
        let gb = GapBuffer::new();
        assert_eq!(gb.size(), 1);
        assert_eq!(gb.char_at(0), b'\n');
        assert_eq!(gb.line_count(), 1);
        assert!(gb.check_invariant());
    }

    #[test]
    fn insert_then_read() {
        let mut gb = GapBuffer::new();
        gb.insert(0, b"hello");
        assert_eq!(gb.size(), 6);
        assert_eq!(gb.substring(0, 5), b"hello");
        assert_eq!(gb.char_at(5), b'\n');
        assert!(gb.check_invariant());
    }

    #[test]
    fn insert_splits_lines() {
        let mut gb = GapBuffer::new();
        gb.insert(0, b"hello\nworld");
        assert_eq!(gb.line_count(), 2);
        assert_eq!(gb.line_len(0), 5);
        assert_eq!(gb.line_len(1), 5);
        assert!(gb.check_invariant());
    }

    #[test]
    fn delete_merges_lines() {
        let mut gb = GapBuffer::new();
        gb.insert(0, b"abc\ndef\n");
        assert_eq!(gb.line_count(), 3);
        // delete the newline ending line 0 (offset 3, len 1)
        gb.delete(3, 1);
        assert_eq!(gb.line_count(), 2);
        assert_eq!(gb.substring(0, gb.size() - 1), b"abcdef");
        assert!(gb.check_invariant());
    }

    #[test]
    fn delete_everything_reinserts_newline() {
        let mut gb = GapBuffer::new();
        gb.insert(0, b"abc");
        let size = gb.size();
        gb.delete(0, size);
        assert_eq!(gb.size(), 1);
        assert_eq!(gb.char_at(0), b'\n');
        assert!(gb.check_invariant());
    }

    #[test]
    fn out_of_range_delete_is_noop() {
        let mut gb = GapBuffer::new();
        gb.insert(0, b"abc");
        let before = gb.size();
        gb.delete(1000, 5);
        assert_eq!(gb.size(), before);
    }

    #[test]
    fn pos_linecol_roundtrip() {
        let mut gb = GapBuffer::new();
        gb.insert(0, b"the quick\nbrown fox\njumps\n");
        for p in 0..=gb.size() {
            let (line, col) = gb.pos_to_linecol(p);
            assert_eq!(gb.linecol_to_pos(line, col), p, "roundtrip failed at {p}");
        }
    }

    #[test]
    fn gap_grows_past_initial_chunk() {
        let mut gb = GapBuffer::new();
        let big = vec![b'x'; GAP_CHUNK * 3];
        gb.insert(0, &big);
        assert_eq!(gb.size(), GAP_CHUNK * 3 + 1);
        assert!(gb.check_invariant());
    }

    #[test]
    fn move_gap_and_contiguous_from() {
        let mut gb = GapBuffer::new();
        gb.insert(0, b"hello world\n");
        gb.move_gap_to(6);
        let tail = gb.contiguous_from(6);
        assert!(tail.starts_with(b"world"));
    }

    #[test]
    fn index_of_and_last_index_of() {
        let mut gb = GapBuffer::new();
        gb.insert(0, b"abc\ndef\nabc\n");
        assert_eq!(gb.index_of(b'\n', 0), 3);
        assert_eq!(gb.index_of(b'z', 0), gb.size());
        assert_eq!(gb.last_index_of(b'a', gb.size() - 1), Some(8));
    }

    #[test]
    fn insert_near_cursor_repeatedly_preserves_invariant() {
        let mut gb = GapBuffer::new();
        let mut pos = 0;
        for ch in "the quick brown fox jumps over the lazy dog".bytes() {
            gb.insert(pos, &[ch]);
            pos += 1;
            assert!(gb.check_invariant());
        }
        assert_eq!(
            gb.substring(0, pos),
            b"the quick brown fox jumps over the lazy dog"
        );
    }

    #[test]
    fn from_bytes_appends_missing_trailing_newline() {
        let gb = GapBuffer::from_bytes(b"no newline");
        assert_eq!(gb.char_at(gb.size() - 1), b'\n');
        assert_eq!(gb.substring(0, gb.size() - 1), b"no newline");
    }

    #[test]
    fn from_bytes_empty_matches_new() {
        let gb = GapBuffer::from_bytes(b"");
        assert_eq!(gb.size(), 1);
        assert_eq!(gb.char_at(0), b'\n');
    }

    proptest::proptest! {
        #[test]
        fn invariant_holds_across_random_edits(ops in proptest::collection::vec((proptest::bool::ANY, 0usize..40, proptest::collection::vec(proptest::prelude::any::<u8>(), 0..8)), 0..60)) {
            let mut gb = GapBuffer::new();
            for (is_insert, raw_pos, bytes) in ops {
                let size = gb.size();
                let pos = if size == 0 { 0 } else { raw_pos % (size + 1) };
                if is_insert {
                    let bytes: Vec<u8> = bytes.into_iter().map(|b| if b == 0 { b'x' } else { b }).collect();
                    gb.insert(pos, &bytes);
                } else {
                    gb.delete(pos, raw_pos % 5);
                }
                prop_assert!(gb.check_invariant());
            }
        }
    }
}
