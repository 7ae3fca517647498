//! Motion parsing/evaluation and Operator application rules.
//!
//! A `Motion` is the count-prefixed, possibly two-keystroke grammar of
//! `h j k l 0 ^ $ w W b B e E ge gE { } gg G / ? % f F t T`; `apply` evaluates
//! one against a cursor offset to produce a target offset plus the
//! linewise/exclusive flags operators need to build a `Region`.

use core_events::{MatchSpan, RegexEngine, RegexFlags};
use core_text::{GapBuffer, Offset, Region};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Word,
    Punct,
    Blank,
}

fn classify(b: u8) -> CharClass {
    if b == b'\n' || (b as char).is_whitespace() {
        CharClass::Blank
    } else if b == b'_' || b.is_ascii_alphanumeric() {
        CharClass::Word
    } else {
        CharClass::Punct
    }
}

/// `true` groups non-word and punctuation together (WORD semantics: only
/// whitespace separates).
fn class_big(b: u8) -> CharClass {
    if b == b'\n' || (b as char).is_whitespace() {
        CharClass::Blank
    } else {
        CharClass::Word
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotionKind {
    Left,
    Right,
    Down,
    Up,
    LineStart,
    FirstNonBlank,
    LineEnd,
    WordForward { big: bool },
    WordBackward { big: bool },
    WordEndForward { big: bool },
    WordEndBackward { big: bool },
    ParaBackward,
    ParaForward,
    FirstLine,
    GotoLine,
    MatchBracket,
    FindChar { ch: u8, till: bool, forward: bool },
    SearchForward(String),
    SearchBackward(String),
    /// Current line, used to build `dd`/`yy`/`cc`-style linewise regions.
    CurrentLine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Motion {
    pub kind: MotionKind,
    pub count: usize,
    pub linewise: bool,
    pub exclusive: bool,
}

impl Motion {
    pub fn new(kind: MotionKind, count: usize, linewise: bool, exclusive: bool) -> Self {
        Self {
            kind,
            count,
            linewise,
            exclusive,
        }
    }

    fn reps(&self) -> usize {
        self.count.max(1)
    }

    /// Evaluate the motion against `cursor`. `desired_col` is the
    /// column-preservation state `j`/`k` read and leave for the caller to
    /// update; regex search kinds need a `RegexEngine` and the computed
    /// case-sensitivity flag. Returns `None` when the motion fails (cursor
    /// unchanged), matching e.g. an `f` search with no match.
    pub fn apply(
        &self,
        gb: &GapBuffer,
        cursor: Offset,
        desired_col: Option<usize>,
        regex: Option<(&dyn RegexEngine, bool)>,
    ) -> Option<Offset> {
        match &self.kind {
            MotionKind::Left => move_horizontal(gb, cursor, self.reps(), false),
            MotionKind::Right => move_horizontal(gb, cursor, self.reps(), true),
            MotionKind::Down => Some(move_vertical(gb, cursor, self.reps(), true, desired_col)),
            MotionKind::Up => Some(move_vertical(gb, cursor, self.reps(), false, desired_col)),
            MotionKind::LineStart => {
                let (line, _) = gb.pos_to_linecol(cursor);
                Some(gb.linecol_to_pos(line, 0))
            }
            MotionKind::FirstNonBlank => Some(first_non_blank(gb, cursor)),
            MotionKind::LineEnd => {
                let (line, _) = gb.pos_to_linecol(cursor);
                let len = gb.line_len(line);
                Some(gb.linecol_to_pos(line, len.saturating_sub(1).max(0)))
            }
            MotionKind::WordForward { big } => {
                Some(word_forward(gb, cursor, self.reps(), *big))
            }
            MotionKind::WordBackward { big } => {
                Some(word_backward(gb, cursor, self.reps(), *big))
            }
            MotionKind::WordEndForward { big } => {
                Some(word_end_forward(gb, cursor, self.reps(), *big))
            }
            MotionKind::WordEndBackward { big } => {
                Some(word_end_backward(gb, cursor, self.reps(), *big))
            }
            MotionKind::ParaBackward => Some(paragraph(gb, cursor, self.reps(), false)),
            MotionKind::ParaForward => Some(paragraph(gb, cursor, self.reps(), true)),
            MotionKind::FirstLine => Some(gb.linecol_to_pos(0, 0)),
            MotionKind::GotoLine => {
                let target = self.count.saturating_sub(1).min(gb.line_count() - 1);
                let target = if self.count == 0 {
                    gb.line_count() - 1
                } else {
                    target
                };
                Some(gb.linecol_to_pos(target, 0))
            }
            MotionKind::MatchBracket => match_bracket(gb, cursor),
            MotionKind::FindChar { ch, till, forward } => {
                find_char(gb, cursor, *ch, *till, *forward, self.reps())
            }
            MotionKind::CurrentLine => {
                let (line, _) = gb.pos_to_linecol(cursor);
                let target_line = (line + self.reps() - 1).min(gb.line_count() - 1);
                Some(gb.linecol_to_pos(target_line, 0))
            }
            MotionKind::SearchForward(pattern) => {
                let (engine, icase) = regex?;
                search(gb, cursor, pattern, engine, icase, true)
            }
            MotionKind::SearchBackward(pattern) => {
                let (engine, icase) = regex?;
                search(gb, cursor, pattern, engine, icase, false)
            }
        }
    }
}

fn move_horizontal(gb: &GapBuffer, cursor: Offset, reps: usize, forward: bool) -> Option<Offset> {
    let (line, col) = gb.pos_to_linecol(cursor);
    let len = gb.line_len(line);
    let max_col = len.saturating_sub(1);
    if forward {
        let new_col = (col + reps).min(max_col);
        Some(gb.linecol_to_pos(line, new_col))
    } else {
        let new_col = col.saturating_sub(reps);
        Some(gb.linecol_to_pos(line, new_col))
    }
}

fn move_vertical(
    gb: &GapBuffer,
    cursor: Offset,
    reps: usize,
    down: bool,
    desired_col: Option<usize>,
) -> Offset {
    let (line, col) = gb.pos_to_linecol(cursor);
    let want = desired_col.unwrap_or(col);
    let last_line = gb.line_count() - 1;
    let target_line = if down {
        (line + reps).min(last_line)
    } else {
        line.saturating_sub(reps)
    };
    let len = gb.line_len(target_line);
    let target_col = want.min(len.saturating_sub(1).max(0)).min(len);
    gb.linecol_to_pos(target_line, target_col.min(len))
}

fn first_non_blank(gb: &GapBuffer, cursor: Offset) -> Offset {
    let (line, _) = gb.pos_to_linecol(cursor);
    let len = gb.line_len(line);
    let start = gb.linecol_to_pos(line, 0);
    for i in 0..len {
        if !(gb.char_at(start + i) as char).is_whitespace() {
            return start + i;
        }
    }
    start
}

fn word_forward(gb: &GapBuffer, mut cursor: Offset, reps: usize, big: bool) -> Offset {
    let size = gb.size();
    let cls = if big { class_big } else { classify };
    for _ in 0..reps {
        if cursor >= size {
            break;
        }
        let start_class = cls(gb.char_at(cursor));
        while cursor < size && cls(gb.char_at(cursor)) == start_class && start_class != CharClass::Blank
        {
            cursor += 1;
        }
        while cursor < size && cls(gb.char_at(cursor)) == CharClass::Blank {
            cursor += 1;
        }
    }
    cursor.min(size)
}

pub fn word_backward(gb: &GapBuffer, mut cursor: Offset, reps: usize, big: bool) -> Offset {
    let cls = if big { class_big } else { classify };
    for _ in 0..reps {
        if cursor == 0 {
            break;
        }
        cursor -= 1;
        while cursor > 0 && cls(gb.char_at(cursor)) == CharClass::Blank {
            cursor -= 1;
        }
        let start_class = cls(gb.char_at(cursor));
        while cursor > 0 && cls(gb.char_at(cursor - 1)) == start_class {
            cursor -= 1;
        }
    }
    cursor
}

fn word_end_forward(gb: &GapBuffer, mut cursor: Offset, reps: usize, big: bool) -> Offset {
    let size = gb.size();
    let cls = if big { class_big } else { classify };
    for _ in 0..reps {
        if cursor + 1 >= size {
            break;
        }
        cursor += 1;
        while cursor < size && cls(gb.char_at(cursor)) == CharClass::Blank {
            cursor += 1;
        }
        let start_class = cls(gb.char_at(cursor));
        while cursor + 1 < size && cls(gb.char_at(cursor + 1)) == start_class {
            cursor += 1;
        }
    }
    cursor.min(size.saturating_sub(1))
}

fn word_end_backward(gb: &GapBuffer, mut cursor: Offset, reps: usize, big: bool) -> Offset {
    let cls = if big { class_big } else { classify };
    let size = gb.size();
    for _ in 0..reps {
        let mut found = None;
        let mut p = cursor;
        while p > 0 {
            p -= 1;
            let c = cls(gb.char_at(p));
            if c == CharClass::Blank {
                continue;
            }
            let next_differs = p + 1 >= size || cls(gb.char_at(p + 1)) != c;
            if next_differs {
                found = Some(p);
                break;
            }
        }
        match found {
            Some(p) => cursor = p,
            None => break,
        }
    }
    cursor
}

fn paragraph(gb: &GapBuffer, cursor: Offset, reps: usize, forward: bool) -> Offset {
    let (mut line, _) = gb.pos_to_linecol(cursor);
    let last_line = gb.line_count() - 1;
    for _ in 0..reps {
        if forward {
            if line >= last_line {
                break;
            }
            line += 1;
            while line < last_line && gb.line_len(line) != 0 {
                line += 1;
            }
        } else {
            if line == 0 {
                break;
            }
            line -= 1;
            while line > 0 && gb.line_len(line) != 0 {
                line -= 1;
            }
        }
    }
    gb.linecol_to_pos(line, 0)
}

fn match_bracket(gb: &GapBuffer, cursor: Offset) -> Option<Offset> {
    const OPEN: &[u8] = b"([{";
    const CLOSE: &[u8] = b")]}";
    let (line, _) = gb.pos_to_linecol(cursor);
    let line_end = gb.linecol_to_pos(line, gb.line_len(line));
    let mut pos = cursor;
    let mut found = None;
    while pos < line_end {
        let c = gb.char_at(pos);
        if OPEN.contains(&c) || CLOSE.contains(&c) {
            found = Some((pos, c));
            break;
        }
        pos += 1;
    }
    let (pos, ch) = found?;
    if let Some(idx) = OPEN.iter().position(|&o| o == ch) {
        let close = CLOSE[idx];
        let open = ch;
        let mut depth = 1i32;
        let mut p = pos + 1;
        let size = gb.size();
        while p < size {
            let c = gb.char_at(p);
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    return Some(p);
                }
            }
            p += 1;
        }
        None
    } else {
        let idx = CLOSE.iter().position(|&c| c == ch).unwrap();
        let open = OPEN[idx];
        let close = ch;
        let mut depth = 1i32;
        if pos == 0 {
            return None;
        }
        let mut p = pos;
        loop {
            if p == 0 {
                return None;
            }
            p -= 1;
            let c = gb.char_at(p);
            if c == close {
                depth += 1;
            } else if c == open {
                depth -= 1;
                if depth == 0 {
                    return Some(p);
                }
            }
        }
    }
}

fn find_char(
    gb: &GapBuffer,
    cursor: Offset,
    ch: u8,
    till: bool,
    forward: bool,
    reps: usize,
) -> Option<Offset> {
    let (line, _) = gb.pos_to_linecol(cursor);
    let line_start = gb.linecol_to_pos(line, 0);
    let line_end = gb.linecol_to_pos(line, gb.line_len(line));
    let mut pos = cursor;
    for _ in 0..reps {
        if forward {
            let mut p = pos + 1;
            let mut hit = None;
            while p < line_end {
                if gb.char_at(p) == ch {
                    hit = Some(p);
                    break;
                }
                p += 1;
            }
            pos = hit?;
        } else {
            if pos <= line_start {
                return None;
            }
            let mut p = pos;
            let mut hit = None;
            while p > line_start {
                p -= 1;
                if gb.char_at(p) == ch {
                    hit = Some(p);
                    break;
                }
            }
            pos = hit?;
        }
    }
    if till {
        if forward {
            Some(pos - 1)
        } else {
            Some(pos + 1)
        }
    } else {
        Some(pos)
    }
}

fn search(
    gb: &GapBuffer,
    cursor: Offset,
    pattern: &str,
    engine: &dyn RegexEngine,
    icase: bool,
    forward: bool,
) -> Option<Offset> {
    let size = gb.size();
    let text = gb.substring(0, size);
    let mut flags = RegexFlags::EXTENDED | RegexFlags::NEWLINE_AWARE;
    if icase {
        flags |= RegexFlags::ICASE;
    }
    if forward {
        let start = (cursor + 1).min(size);
        let hay = &text[start..];
        let m: MatchSpan = engine.find(hay, pattern, flags).ok()??;
        Some(start + m.start)
    } else {
        // Scan matches from the start up to (not including) cursor, keep the last.
        let hay = &text[..cursor.min(size)];
        let mut best = None;
        let mut from = 0;
        while from < hay.len() {
            match engine.find(&hay[from..], pattern, flags).ok()? {
                Some(m) => {
                    let abs = from + m.start;
                    best = Some(abs);
                    from += m.start + (m.end - m.start).max(1);
                }
                None => break,
            }
        }
        best
    }
}

/// Smartcase: `ignorecase=false` forces case-sensitive; else case-insensitive
/// unless `smartcase` is set and the pattern contains an uppercase byte.
pub fn smartcase_insensitive(pattern: &str, ignorecase: bool, smartcase: bool) -> bool {
    if !ignorecase {
        return false;
    }
    if !smartcase {
        return true;
    }
    !pattern.bytes().any(|b| b.is_ascii_uppercase())
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Delete,
    Change,
    Yank,
    ShiftRight,
    ShiftLeft,
    LowerCase,
    UpperCase,
    ToggleCase,
}

impl Operator {
    /// `>`/`<` always act on whole lines regardless of the motion's own
    /// linewise-ness.
    pub fn forces_linewise(&self) -> bool {
        matches!(self, Operator::ShiftRight | Operator::ShiftLeft)
    }
}

/// Build the `Region` an operator acts on from a motion's evaluated target,
/// per the region-construction rules: linewise expands to whole lines,
/// exclusive motions are half-open, inclusive motions extend one byte.
pub fn region_from_motion(
    gb: &GapBuffer,
    cursor: Offset,
    target: Offset,
    motion: &Motion,
    op: Operator,
) -> Region {
    let (lo, hi) = if cursor <= target {
        (cursor, target)
    } else {
        (target, cursor)
    };
    if motion.linewise || op.forces_linewise() {
        let (lo_line, _) = gb.pos_to_linecol(lo);
        let (hi_line, _) = gb.pos_to_linecol(hi);
        let start = gb.linecol_to_pos(lo_line, 0);
        let end = if hi_line + 1 < gb.line_count() {
            gb.linecol_to_pos(hi_line + 1, 0)
        } else {
            gb.size()
        };
        Region::new(start, end)
    } else if motion.exclusive {
        Region::new(lo, hi)
    } else {
        Region::new(lo, (hi + 1).min(gb.size()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseOp {
    Lower,
    Upper,
    Toggle,
}

pub fn apply_case(bytes: &[u8], op: CaseOp) -> Vec<u8> {
    bytes
        .iter()
        .map(|&b| match op {
            CaseOp::Lower => b.to_ascii_lowercase(),
            CaseOp::Upper => b.to_ascii_uppercase(),
            CaseOp::Toggle => {
                if b.is_ascii_uppercase() {
                    b.to_ascii_lowercase()
                } else if b.is_ascii_lowercase() {
                    b.to_ascii_uppercase()
                } else {
                    b
                }
            }
        })
        .collect()
}

/// Shift every (non-empty) line within `text` (a run of complete lines,
/// including trailing newlines) right or left by `shiftwidth` columns.
pub fn shift_lines(text: &[u8], shiftwidth: usize, right: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for line in text.split_inclusive(|&b| b == b'\n') {
        if line == b"\n" {
            out.extend_from_slice(line);
            continue;
        }
        if right {
            out.extend(std::iter::repeat_n(b' ', shiftwidth));
            out.extend_from_slice(line);
        } else {
            let mut removed = 0;
            let mut rest = line;
            while removed < shiftwidth {
                match rest.first() {
                    Some(b' ') => {
                        rest = &rest[1..];
                        removed += 1;
                    }
                    Some(b'\t') => {
                        rest = &rest[1..];
                        removed += shiftwidth;
                    }
                    _ => break,
                }
            }
            out.extend_from_slice(rest);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gb_of(s: &str) -> GapBuffer {
        let mut gb = GapBuffer::new();
        gb.insert(0, s.as_bytes());
        gb
    }

    #[test]
    fn word_and_end_motions_cover_sentence() {
        let gb = gb_of("the quick brown fox jumps over the lazy dog");
        let m = |kind| Motion::new(kind, 1, false, true);
        let mut pos = 0;

        pos = m(MotionKind::WordForward { big: false })
            .apply(&gb, pos, None, None)
            .unwrap();
        assert_eq!(gb.char_at(pos), b'q');

        pos = m(MotionKind::WordEndForward { big: false })
            .apply(&gb, pos, None, None)
            .unwrap();
        assert_eq!(gb.char_at(pos), b'k');

        pos = m(MotionKind::WordEndBackward { big: false })
            .apply(&gb, pos, None, None)
            .unwrap();
        assert_eq!(gb.char_at(pos), b'e');

        pos = m(MotionKind::WordBackward { big: false })
            .apply(&gb, pos, None, None)
            .unwrap();
        assert_eq!(gb.char_at(pos), b't');
    }

    #[test]
    fn find_char_inclusive_and_till() {
        let gb = gb_of("abcXdefXghi\n");
        let f = Motion::new(
            MotionKind::FindChar {
                ch: b'X',
                till: false,
                forward: true,
            },
            1,
            false,
            false,
        );
        let pos = f.apply(&gb, 0, None, None).unwrap();
        assert_eq!(gb.char_at(pos), b'X');

        let t = Motion::new(
            MotionKind::FindChar {
                ch: b'X',
                till: true,
                forward: true,
            },
            1,
            false,
            false,
        );
        let pos = t.apply(&gb, 0, None, None).unwrap();
        assert_eq!(gb.char_at(pos), b'c');
    }

    #[test]
    fn find_char_fails_when_absent() {
        let gb = gb_of("abc\n");
        let f = Motion::new(
            MotionKind::FindChar {
                ch: b'Z',
                till: false,
                forward: true,
            },
            1,
            false,
            false,
        );
        assert_eq!(f.apply(&gb, 0, None, None), None);
    }

    #[test]
    fn match_bracket_finds_pair() {
        let gb = gb_of("foo(bar(baz))\n");
        let m = Motion::new(MotionKind::MatchBracket, 1, false, false);
        let pos = m.apply(&gb, 3, None, None).unwrap();
        assert_eq!(gb.char_at(pos), b')');
    }

    #[test]
    fn region_linewise_expands_to_full_lines() {
        let gb = gb_of("one\ntwo\nthree\n");
        let motion = Motion::new(MotionKind::Down, 1, true, false);
        let region = region_from_motion(&gb, 0, gb.linecol_to_pos(1, 0), &motion, Operator::Delete);
        assert_eq!(region.start, 0);
        assert_eq!(region.end, gb.linecol_to_pos(2, 0));
    }

    #[test]
    fn region_exclusive_is_half_open() {
        let gb = gb_of("hello world\n");
        let motion = Motion::new(MotionKind::WordForward { big: false }, 1, false, true);
        let target = motion.apply(&gb, 0, None, None).unwrap();
        let region = region_from_motion(&gb, 0, target, &motion, Operator::Delete);
        assert_eq!(region, Region::new(0, target));
    }

    #[test]
    fn region_inclusive_extends_one_byte() {
        let gb = gb_of("hello\n");
        let motion = Motion::new(MotionKind::LineEnd, 1, false, false);
        let target = motion.apply(&gb, 0, None, None).unwrap();
        let region = region_from_motion(&gb, 0, target, &motion, Operator::Delete);
        assert_eq!(region.end, target + 1);
    }

    #[test]
    fn shift_right_adds_spaces() {
        let out = shift_lines(b"abc\ndef\n", 2, true);
        assert_eq!(out, b"  abc\n  def\n");
    }

    #[test]
    fn shift_left_removes_leading_space() {
        let out = shift_lines(b"  abc\ndef\n", 2, false);
        assert_eq!(out, b"abc\ndef\n");
    }

    #[test]
    fn smartcase_rules() {
        assert!(!smartcase_insensitive("Hello", false, true));
        assert!(smartcase_insensitive("hello", true, true));
        assert!(!smartcase_insensitive("Hello", true, true));
        assert!(smartcase_insensitive("Hello", true, false));
    }

    #[test]
    fn apply_case_variants() {
        assert_eq!(apply_case(b"AbC", CaseOp::Lower), b"abc");
        assert_eq!(apply_case(b"AbC", CaseOp::Upper), b"ABC");
        assert_eq!(apply_case(b"AbC", CaseOp::Toggle), b"aBc");
    }
}
