//! Concrete `core_events::Display` adapter over `crossterm`.
//!
//! The core render pass only ever produces `(Position, Cell)` writes; this
//! module owns the actual cell grid, diffing against it on `render()` so we
//! repaint only what changed, and translates `crossterm`'s key events into
//! the engine's `InputEvent`.

use core_events::{
    Cell, CellAttrs, Color, Display, DisplayError, InputEvent, KeyCode, KeyEvent, KeyModifiers,
    Position,
};
use crossterm::event::{self, Event as CtEvent, KeyCode as CtKeyCode, KeyModifiers as CtMods};
use crossterm::{queue, style};
use std::io::{Write, stdout};
use std::time::Duration;

pub struct CrosstermDisplay {
    width: u16,
    height: u16,
    front: Vec<Cell>,
    back: Vec<Cell>,
}

impl CrosstermDisplay {
    pub fn new() -> anyhow::Result<Self> {
        let (width, height) = crossterm::terminal::size()?;
        let size = width as usize * height as usize;
        Ok(Self {
            width,
            height,
            front: vec![Cell::default(); size],
            back: vec![Cell::default(); size],
        })
    }

    fn index(&self, pos: Position) -> Option<usize> {
        if pos.x >= self.width || pos.y >= self.height {
            return None;
        }
        Some(pos.y as usize * self.width as usize + pos.x as usize)
    }

    fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        let size = width as usize * height as usize;
        self.front = vec![Cell::default(); size];
        self.back = vec![Cell::default(); size];
    }
}

fn to_crossterm_color(c: Color) -> style::Color {
    match c {
        Color::Default => style::Color::Reset,
        Color::Black => style::Color::Black,
        Color::Red => style::Color::DarkRed,
        Color::Green => style::Color::DarkGreen,
        Color::Yellow => style::Color::DarkYellow,
        Color::Blue => style::Color::DarkBlue,
        Color::Magenta => style::Color::DarkMagenta,
        Color::Cyan => style::Color::DarkCyan,
        Color::White => style::Color::Grey,
        Color::Indexed(i) => style::Color::AnsiValue(i),
    }
}

fn from_crossterm_key(code: CtKeyCode, mods: CtMods) -> Option<KeyEvent> {
    let code = match code {
        CtKeyCode::Char(c) => KeyCode::Char(c),
        CtKeyCode::Enter => KeyCode::Enter,
        CtKeyCode::Esc => KeyCode::Esc,
        CtKeyCode::Backspace => KeyCode::Backspace,
        CtKeyCode::Tab => KeyCode::Tab,
        CtKeyCode::Up => KeyCode::Up,
        CtKeyCode::Down => KeyCode::Down,
        CtKeyCode::Left => KeyCode::Left,
        CtKeyCode::Right => KeyCode::Right,
        CtKeyCode::Home => KeyCode::Home,
        CtKeyCode::End => KeyCode::End,
        CtKeyCode::PageUp => KeyCode::PageUp,
        CtKeyCode::PageDown => KeyCode::PageDown,
        CtKeyCode::Delete => KeyCode::Delete,
        CtKeyCode::F(n) => KeyCode::F(n),
        _ => return None,
    };
    let mut out = KeyModifiers::empty();
    if mods.contains(CtMods::CONTROL) {
        out |= KeyModifiers::CTRL;
    }
    if mods.contains(CtMods::ALT) {
        out |= KeyModifiers::ALT;
    }
    if mods.contains(CtMods::SHIFT) {
        out |= KeyModifiers::SHIFT;
    }
    Some(KeyEvent::new(code, out))
}

impl Display for CrosstermDisplay {
    fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        self.back.fill(Cell::default());
        Ok(())
    }

    fn write_cell(&mut self, pos: Position, cell: Cell) -> Result<(), DisplayError> {
        if let Some(i) = self.index(pos) {
            self.back[i] = cell;
        }
        Ok(())
    }

    fn render(&mut self) -> Result<(), DisplayError> {
        let mut out = stdout();
        for y in 0..self.height {
            for x in 0..self.width {
                let i = y as usize * self.width as usize + x as usize;
                if self.back[i] == self.front[i] {
                    continue;
                }
                let cell = self.back[i];
                queue!(
                    out,
                    crossterm::cursor::MoveTo(x, y),
                    style::SetForegroundColor(to_crossterm_color(cell.fg)),
                    style::SetBackgroundColor(to_crossterm_color(cell.bg)),
                    style::SetAttribute(if cell.attrs.contains(CellAttrs::BOLD) {
                        style::Attribute::Bold
                    } else {
                        style::Attribute::NormalIntensity
                    }),
                    style::Print(cell.codepoint),
                )?;
            }
        }
        out.flush()?;
        self.front.copy_from_slice(&self.back);
        Ok(())
    }

    fn poll_event(&mut self) -> Result<InputEvent, DisplayError> {
        loop {
            if event::poll(Duration::from_millis(250))? {
                match event::read()? {
                    CtEvent::Key(k) => {
                        if let Some(ev) = from_crossterm_key(k.code, k.modifiers) {
                            return Ok(InputEvent::Key(ev));
                        }
                    }
                    CtEvent::Resize(w, h) => {
                        self.resize(w, h);
                        return Ok(InputEvent::Resize(w, h));
                    }
                    _ => {}
                }
            }
        }
    }
}
