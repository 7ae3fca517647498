//! External collaborator contracts: `Display`, `Storage`, `RegexEngine`,
//! `Tokenizer`, and the key-event types that flow from the real event source
//! (or the synthetic injection queue) into the mode stack.
//!
//! Concrete implementations live in `ox-bin`; every core crate only ever
//! depends on these traits.

use bitflags::bitflags;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Key events
// ---------------------------------------------------------------------------

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct KeyModifiers: u8 {
        const CTRL  = 0b0000_0001;
        const ALT   = 0b0000_0010;
        const SHIFT = 0b0000_0100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    Char(char),
    Enter,
    Esc,
    Backspace,
    Tab,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Delete,
    F(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub mods: KeyModifiers,
}

impl KeyEvent {
    pub fn new(code: KeyCode, mods: KeyModifiers) -> Self {
        Self { code, mods }
    }

    pub fn plain(code: KeyCode) -> Self {
        Self::new(code, KeyModifiers::empty())
    }

    pub fn ctrl(ch: char) -> Self {
        Self::new(KeyCode::Char(ch), KeyModifiers::CTRL)
    }
}

impl std::fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{:?}", self.code, self.mods)
    }
}

/// Events delivered by the real terminal, or replayed from the synthetic
/// injection queue used for macros and tests. The two sources share this
/// type so the mode stack needs no special casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Key(KeyEvent),
    Resize(u16, u16),
}

// ---------------------------------------------------------------------------
// Display contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Color {
    #[default]
    Default,
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    Indexed(u8),
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct CellAttrs: u8 {
        const BOLD      = 0b0000_0001;
        const UNDERLINE = 0b0000_0010;
        const REVERSE   = 0b0000_0100;
        const ITALIC    = 0b0000_1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub codepoint: char,
    pub fg: Color,
    pub bg: Color,
    pub attrs: CellAttrs,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            codepoint: ' ',
            fg: Color::Default,
            bg: Color::Default,
            attrs: CellAttrs::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: u16,
    pub y: u16,
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Terminal rendering + key-event source. The core editing engine only ever
/// produces `(Position, Cell)` writes; cell-grid diffing and raw terminal
/// I/O belong to the concrete `ox-bin` adapter.
pub trait Display {
    fn size(&self) -> (u16, u16);
    fn clear(&mut self) -> Result<(), DisplayError>;
    fn write_cell(&mut self, pos: Position, cell: Cell) -> Result<(), DisplayError>;
    fn write_run(&mut self, pos: Position, text: &str, style: Cell) -> Result<(), DisplayError> {
        for (i, ch) in text.chars().enumerate() {
            self.write_cell(
                Position {
                    x: pos.x + i as u16,
                    y: pos.y,
                },
                Cell {
                    codepoint: ch,
                    ..style
                },
            )?;
        }
        Ok(())
    }
    fn render(&mut self) -> Result<(), DisplayError>;
    /// Block until the next real terminal event arrives.
    fn poll_event(&mut self) -> Result<InputEvent, DisplayError>;
}

// ---------------------------------------------------------------------------
// Storage contract
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub is_dir: bool,
    pub writable: bool,
}

pub trait Storage {
    fn read(&self, path: &std::path::Path) -> Result<Vec<u8>, StorageError>;
    fn write(&self, path: &std::path::Path, bytes: &[u8]) -> Result<(), StorageError>;
    fn stat(&self, path: &std::path::Path) -> Result<Stat, StorageError>;
    /// Entry names in `path`, directories suffixed with `/`.
    fn list_dir(&self, path: &std::path::Path) -> Result<Vec<String>, StorageError>;
}

// ---------------------------------------------------------------------------
// Regex contract
// ---------------------------------------------------------------------------

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct RegexFlags: u8 {
        /// POSIX extended syntax, matching the original's `REG_EXTENDED`.
        const EXTENDED     = 0b0000_0001;
        /// `^`/`$` anchor to line boundaries within a multi-line haystack.
        const NEWLINE_AWARE = 0b0000_0010;
        const ICASE        = 0b0000_0100;
        /// Haystack does not begin at a true line start (`REG_NOTBOL`).
        const NOTBOL       = 0b0000_1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Error)]
pub enum RegexError {
    #[error("bad regex: {0}")]
    BadPattern(String),
}

pub trait RegexEngine {
    fn find(
        &self,
        haystack: &[u8],
        pattern: &str,
        flags: RegexFlags,
    ) -> Result<Option<MatchSpan>, RegexError>;
}

// ---------------------------------------------------------------------------
// Tokenizer contract (syntax highlighting)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    Identifier,
    String,
    Number,
    Comment,
    Operator,
    Punctuation,
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
    pub kind: TokenKind,
}

pub trait Tokenizer {
    fn tokenize(&self, text: &[u8]) -> Vec<TokenSpan>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_event_display() {
        let k = KeyEvent::new(KeyCode::Char('x'), KeyModifiers::CTRL);
        assert!(format!("{k}").contains("Char"));
    }

    #[test]
    fn cell_default_is_blank() {
        let c = Cell::default();
        assert_eq!(c.codepoint, ' ');
        assert_eq!(c.attrs, CellAttrs::empty());
    }

    #[test]
    fn modifiers_combine() {
        let m = KeyModifiers::CTRL | KeyModifiers::SHIFT;
        assert!(m.contains(KeyModifiers::CTRL));
        assert!(m.contains(KeyModifiers::SHIFT));
        assert!(!m.contains(KeyModifiers::ALT));
    }
}
