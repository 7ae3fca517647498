//! `core-editor`: the aggregate that owns buffers, the window tree, registers,
//! bounded histories, and the ex-command surface, and that bridges
//! `core-keymap`'s char-tagged composed actions to `core-motion`'s typed
//! `Motion`/`Operator` values.

use core_config::Options;
use core_events::{RegexEngine, Storage, StorageError};
use core_keymap::{ComposedAction, Mode, ModeStack, PendingCharSeq, PendingContext};
use core_model::{BufferRef, Orientation, VisualKind as WinVisualKind, WindowId, WindowTree};
use core_motion::{
    apply_case, region_from_motion, shift_lines, CaseOp, Motion, MotionKind, Operator,
};
use core_state::{Buffer, BufferError};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

// -------------------------------------------------------------------------------------------------
// Errors
// -------------------------------------------------------------------------------------------------
#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Io(#[from] StorageError),
    #[error("bad regex: {0}")]
    BadRegex(String),
    #[error("pattern not found")]
    NoMatch,
    #[error("buffer is not modifiable")]
    NotModifiable,
    #[error("unsaved changes (add ! to override)")]
    UnsavedChanges,
    #[error("no such option: {0}")]
    NoSuchOption(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    /// `:w` with no associated path, distinct from a write that fails once
    /// a path is known.
    #[error("no file name")]
    NoFileName,
}

impl From<BufferError> for EditorError {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::Storage(s) => EditorError::Io(s),
            BufferError::NoPath => EditorError::NoFileName,
            BufferError::NotModifiable => EditorError::NotModifiable,
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Registers
// -------------------------------------------------------------------------------------------------
#[derive(Debug, Clone, Default)]
pub struct RegisterContent {
    pub text: Vec<u8>,
    pub linewise: bool,
}

/// Holds named (`a`-`z`), unnamed (`"`), last-search (`/`), clipboard
/// (`*`, `+`) and a numbered ring (`1`-`9`) shifted on unnamed deletes, the
/// way Vim's `:help registers` describes it.
#[derive(Debug, Default)]
pub struct Registers {
    named: HashMap<char, RegisterContent>,
    numbered: VecDeque<RegisterContent>,
    unnamed: RegisterContent,
    yank: RegisterContent,
    last_search: String,
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a yank or delete. `name` is the explicit register the user
    /// requested (if any); `is_yank` distinguishes `y` (feeds register `0`,
    /// never the numbered ring) from `d`/`c` (feeds the numbered ring when
    /// no explicit register was given).
    pub fn write(&mut self, name: Option<char>, content: RegisterContent, is_yank: bool) {
        self.unnamed = content.clone();
        match name {
            Some(n) if n.is_ascii_uppercase() => {
                let key = n.to_ascii_lowercase();
                let entry = self.named.entry(key).or_default();
                entry.text.extend_from_slice(&content.text);
                entry.linewise = entry.linewise || content.linewise;
            }
            Some(n) if n.is_ascii_lowercase() => {
                self.named.insert(n, content);
            }
            Some('*') | Some('+') => {
                self.named.insert('*', content.clone());
                self.named.insert('+', content);
            }
            _ => {
                if is_yank {
                    self.yank = content;
                } else {
                    self.numbered.push_front(content);
                    self.numbered.truncate(9);
                }
            }
        }
    }

    pub fn read(&self, name: Option<char>) -> RegisterContent {
        match name {
            Some('"') | None => self.unnamed.clone(),
            Some('/') => RegisterContent {
                text: self.last_search.clone().into_bytes(),
                linewise: false,
            },
            Some('0') => self.yank.clone(),
            Some(d) if d.is_ascii_digit() && d != '0' => {
                let idx = d.to_digit(10).unwrap() as usize - 1;
                self.numbered.get(idx).cloned().unwrap_or_default()
            }
            Some(n) => self.named.get(&n.to_ascii_lowercase()).cloned().unwrap_or_default(),
        }
    }

    pub fn set_last_search(&mut self, pattern: &str) {
        self.last_search = pattern.to_string();
    }

    pub fn last_search(&self) -> &str {
        &self.last_search
    }
}

// -------------------------------------------------------------------------------------------------
// Bounded history (`:` command line and `/` search line), capped by the
// `history` option and navigable by a typed prefix like Vim's command-line
// window.
// -------------------------------------------------------------------------------------------------
#[derive(Debug, Default)]
pub struct History {
    entries: VecDeque<String>,
    cursor: Option<usize>,
}

impl History {
    pub fn push(&mut self, entry: String, cap: usize) {
        if entry.is_empty() {
            return;
        }
        self.entries.retain(|e| e != &entry);
        self.entries.push_back(entry);
        while self.entries.len() > cap.max(1) {
            self.entries.pop_front();
        }
        self.cursor = None;
    }

    /// Walk older entries (`Up`) whose text starts with `prefix`.
    pub fn recall_older(&mut self, prefix: &str) -> Option<&str> {
        let start = self.cursor.unwrap_or(self.entries.len());
        for i in (0..start).rev() {
            if self.entries[i].starts_with(prefix) {
                self.cursor = Some(i);
                return Some(&self.entries[i]);
            }
        }
        None
    }

    pub fn recall_newer(&mut self, prefix: &str) -> Option<&str> {
        let cur = self.cursor?;
        for i in (cur + 1)..self.entries.len() {
            if self.entries[i].starts_with(prefix) {
                self.cursor = Some(i);
                return Some(&self.entries[i]);
            }
        }
        self.cursor = None;
        None
    }
}

// -------------------------------------------------------------------------------------------------
// char <-> typed Motion/Operator translation
//
// core-keymap stays keyed on raw chars so its count/register composition
// logic is reusable independent of the motion table; this is the one place
// that turns a composed char into the typed values core-motion understands.
// -------------------------------------------------------------------------------------------------

/// Translate a motion char (optionally preceded by a pending `g`, or with a
/// pending `f`/`F`/`t`/`T` target char already resolved) into a `Motion`.
pub fn motion_from_char(
    m: char,
    count: u32,
    g_prefix: bool,
    find_pending: Option<(bool, bool, char)>, // (till, forward, target) once the 2nd key arrives
) -> Option<Motion> {
    let count = count.max(1) as usize;
    if let Some((till, forward, target)) = find_pending {
        return Some(Motion::new(
            MotionKind::FindChar {
                ch: target as u8,
                till,
                forward,
            },
            count,
            false,
            forward,
        ));
    }
    let kind = if g_prefix {
        match m {
            'g' => MotionKind::FirstLine,
            'e' => MotionKind::WordEndBackward { big: false },
            'E' => MotionKind::WordEndBackward { big: true },
            _ => return None,
        }
    } else {
        match m {
            'h' => MotionKind::Left,
            'l' => MotionKind::Right,
            'j' => MotionKind::Down,
            'k' => MotionKind::Up,
            '0' => MotionKind::LineStart,
            '^' => MotionKind::FirstNonBlank,
            '$' => MotionKind::LineEnd,
            'w' => MotionKind::WordForward { big: false },
            'W' => MotionKind::WordForward { big: true },
            'b' => MotionKind::WordBackward { big: false },
            'B' => MotionKind::WordBackward { big: true },
            'e' => MotionKind::WordEndForward { big: false },
            'E' => MotionKind::WordEndForward { big: true },
            '{' => MotionKind::ParaBackward,
            '}' => MotionKind::ParaForward,
            'G' => MotionKind::GotoLine,
            '%' => MotionKind::MatchBracket,
            _ => return None,
        }
    };
    let linewise = matches!(
        kind,
        MotionKind::Down | MotionKind::Up | MotionKind::ParaBackward | MotionKind::ParaForward
    );
    let exclusive = !matches!(kind, MotionKind::LineEnd | MotionKind::FindChar { .. });
    Some(Motion::new(kind, count, linewise, exclusive))
}

pub fn operator_from_char(op: char) -> Option<Operator> {
    match op {
        'd' => Some(Operator::Delete),
        'c' => Some(Operator::Change),
        'y' => Some(Operator::Yank),
        '>' => Some(Operator::ShiftRight),
        '<' => Some(Operator::ShiftLeft),
        _ => None,
    }
}

// -------------------------------------------------------------------------------------------------
// Ex-command surface
// -------------------------------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub enum LineTarget {
    Absolute(usize),
    RelativeForward(usize),
    RelativeBackward(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetAction {
    Assign(String),
    Append(String),
    Query,
    Reset,
    ToggleOff,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExCommand {
    Quit { force: bool },
    Write { path: Option<String> },
    WriteQuit,
    Edit { path: String },
    Split,
    VSplit,
    Set { scope: core_config::OptionScope, name: String, action: SetAction },
    Cd { path: String },
    LCd { path: String },
    Pwd,
    NoHlSearch,
    Shell { cmd: String },
    Goto(LineTarget),
}

pub fn parse_ex_command(line: &str) -> Result<ExCommand, EditorError> {
    let line = line.trim();
    if let Ok(n) = line.parse::<usize>() {
        return Ok(ExCommand::Goto(LineTarget::Absolute(n)));
    }
    if let Some(rest) = line.strip_prefix('+') {
        if let Ok(n) = rest.parse::<usize>() {
            return Ok(ExCommand::Goto(LineTarget::RelativeForward(n)));
        }
    }
    if let Some(rest) = line.strip_prefix('-') {
        if let Ok(n) = rest.parse::<usize>() {
            return Ok(ExCommand::Goto(LineTarget::RelativeBackward(n)));
        }
    }
    if let Some(rest) = line.strip_prefix('!') {
        return Ok(ExCommand::Shell { cmd: rest.trim().to_string() });
    }
    let mut parts = line.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();
    match head {
        "q" => Ok(ExCommand::Quit { force: false }),
        "q!" => Ok(ExCommand::Quit { force: true }),
        "w" => Ok(ExCommand::Write {
            path: if rest.is_empty() { None } else { Some(rest.to_string()) },
        }),
        "wq" | "x" => Ok(ExCommand::WriteQuit),
        "e" | "edit" => Ok(ExCommand::Edit { path: rest.to_string() }),
        "split" | "sp" => Ok(ExCommand::Split),
        "vsplit" | "vsp" => Ok(ExCommand::VSplit),
        "set" | "setl" | "setlocal" | "setg" | "setglobal" => {
            let scope = match head {
                "setl" | "setlocal" => core_config::OptionScope::Buffer,
                "setg" | "setglobal" => core_config::OptionScope::Editor,
                _ => core_config::OptionScope::Editor,
            };
            parse_set(scope, rest)
        }
        "cd" => Ok(ExCommand::Cd { path: rest.to_string() }),
        "lcd" => Ok(ExCommand::LCd { path: rest.to_string() }),
        "pwd" => Ok(ExCommand::Pwd),
        "nohlsearch" | "noh" => Ok(ExCommand::NoHlSearch),
        _ => Err(EditorError::UnknownCommand(head.to_string())),
    }
}

fn parse_set(scope: core_config::OptionScope, rest: &str) -> Result<ExCommand, EditorError> {
    if rest.is_empty() {
        return Err(EditorError::UnknownCommand("set".to_string()));
    }
    if let Some(name) = rest.strip_suffix('?') {
        return Ok(ExCommand::Set { scope, name: name.to_string(), action: SetAction::Query });
    }
    if let Some(name) = rest.strip_suffix('&') {
        return Ok(ExCommand::Set { scope, name: name.to_string(), action: SetAction::Reset });
    }
    if let Some((name, val)) = rest.split_once("+=") {
        return Ok(ExCommand::Set {
            scope,
            name: name.to_string(),
            action: SetAction::Append(val.to_string()),
        });
    }
    if let Some((name, val)) = rest.split_once('=') {
        return Ok(ExCommand::Set {
            scope,
            name: name.to_string(),
            action: SetAction::Assign(val.to_string()),
        });
    }
    if let Some(name) = rest.strip_prefix("no") {
        if core_config::Options::exists(name) {
            return Ok(ExCommand::Set { scope, name: name.to_string(), action: SetAction::ToggleOff });
        }
    }
    Ok(ExCommand::Set {
        scope,
        name: rest.to_string(),
        action: SetAction::Assign("true".to_string()),
    })
}

/// Collapse `.`/`..` components lexically, without touching the
/// filesystem — `:cd`/`:lcd` targets are resolved this way rather than via
/// `std::fs::canonicalize` so `core-editor` never calls into `std::fs`
/// directly (file contents still go exclusively through `Storage`).
fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;
    enum Entry<'a> {
        Normal(&'a std::ffi::OsStr),
        ParentDir,
    }
    let mut prefix = None;
    let mut is_absolute = false;
    let mut stack: Vec<Entry> = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => prefix = Some(p.as_os_str()),
            Component::RootDir => is_absolute = true,
            Component::CurDir => {}
            Component::ParentDir => match stack.last() {
                Some(Entry::Normal(_)) => {
                    stack.pop();
                }
                _ if is_absolute => {}
                _ => stack.push(Entry::ParentDir),
            },
            Component::Normal(n) => stack.push(Entry::Normal(n)),
        }
    }
    let mut out = PathBuf::new();
    if let Some(p) = prefix {
        out.push(p);
    }
    if is_absolute {
        out.push(std::path::MAIN_SEPARATOR.to_string());
    }
    for entry in stack {
        match entry {
            Entry::Normal(n) => out.push(n),
            Entry::ParentDir => out.push(".."),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

// -------------------------------------------------------------------------------------------------
// Editor
// -------------------------------------------------------------------------------------------------
pub struct Editor {
    pub buffers: Vec<Buffer>,
    pub windows: WindowTree,
    pub registers: Registers,
    pub command_history: History,
    pub search_history: History,
    pub mode_stack: ModeStack,
    pub pending_ctx: PendingContext,
    pub pending_char: PendingCharSeq,
    pub options: Options,
    pub status: Option<(String, bool)>,
    pub cwd: PathBuf,
    pub running: bool,
    /// `:!cmd` queues the command string here rather than spawning it
    /// itself — `core-editor` stays side effect-free; `ox-bin` drains this
    /// after each ex-command dispatch and actually runs the process.
    pending_shell: Option<String>,
}

impl Editor {
    pub fn new(options: Options, width: u16, height: u16) -> Self {
        let first = Buffer::new(&options);
        let mut buffers = Vec::new();
        buffers.push(first);
        Self {
            buffers,
            windows: WindowTree::new(BufferRef(0), width, height),
            registers: Registers::new(),
            command_history: History::default(),
            search_history: History::default(),
            mode_stack: ModeStack::new(),
            pending_ctx: PendingContext::default(),
            pending_char: PendingCharSeq::default(),
            options,
            status: None,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            running: true,
            pending_shell: None,
        }
    }

    /// Drain a `:!cmd` queued by the last `run_ex_command` call, if any.
    pub fn take_pending_shell_command(&mut self) -> Option<String> {
        self.pending_shell.take()
    }

    pub fn set_error(&mut self, err: &EditorError) {
        warn!(target = "editor.status", error = %err, "command_error");
        self.status = Some((err.to_string(), true));
    }

    pub fn set_info(&mut self, msg: impl Into<String>) {
        self.status = Some((msg.into(), false));
    }

    /// The working directory `:pwd`, relative `:e`/`:!cmd` resolution, and
    /// new `:cd`/`:lcd` targets are resolved against: the focused window's
    /// `:lcd` override if it has one, else the editor-global `:cd` target.
    pub fn effective_cwd(&self) -> PathBuf {
        self.windows
            .leaf(self.windows.focus())
            .and_then(|l| l.local_cwd.clone())
            .unwrap_or_else(|| self.cwd.clone())
    }

    /// Resolve a user-typed path (`:e`, `:w`, `:cd`, `:lcd` argument)
    /// against `effective_cwd` when relative.
    fn resolve_path(&self, path: &str) -> PathBuf {
        let target = Path::new(path);
        let joined = if target.is_absolute() { target.to_path_buf() } else { self.effective_cwd().join(target) };
        normalize_path(&joined)
    }

    fn focused_leaf(&self) -> WindowId {
        self.windows.focus()
    }

    fn focused_buffer_index(&self) -> usize {
        self.windows.leaf(self.focused_leaf()).map(|l| l.buffer.0).unwrap_or(0)
    }

    pub fn current_buffer(&self) -> &Buffer {
        &self.buffers[self.focused_buffer_index()]
    }

    pub fn current_buffer_mut(&mut self) -> &mut Buffer {
        let idx = self.focused_buffer_index();
        &mut self.buffers[idx]
    }

    /// Apply a fully-composed motion (no pending operator) to the focused window's cursor.
    pub fn apply_motion(&mut self, motion: &Motion, regex: Option<(&dyn RegexEngine, bool)>) {
        let idx = self.focused_buffer_index();
        let cursor = self.windows.leaf(self.focused_leaf()).map(|l| l.cursor_pos).unwrap_or(0);
        let gb = self.buffers[idx].text();
        if let Some(target) = motion.apply(gb, cursor, None, regex) {
            if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
                leaf.cursor_pos = target;
            }
        }
    }

    /// Apply an operator over the region a motion produces.
    pub fn apply_operator(
        &mut self,
        op: Operator,
        motion: &Motion,
        register: Option<char>,
        regex: Option<(&dyn RegexEngine, bool)>,
    ) -> Result<(), EditorError> {
        let idx = self.focused_buffer_index();
        let cursor = self.windows.leaf(self.focused_leaf()).map(|l| l.cursor_pos).unwrap_or(0);
        let gb = self.buffers[idx].text();
        let Some(target) = motion.apply(gb, cursor, None, regex) else {
            return Ok(());
        };
        let region = region_from_motion(gb, cursor, target, motion, op);
        let linewise = motion.linewise || op.forces_linewise();
        self.apply_operator_to_region(op, region, linewise, register)?;
        if op == Operator::Change {
            self.mode_stack.push(Mode::Insert);
        }
        Ok(())
    }

    /// Live visual selection span: `[min(anchor,cursor), max(anchor,cursor)+1)`
    /// charwise, or expanded to whole lines when the selection is linewise.
    /// Returns `None` for a block selection — callers must check
    /// `visual_block_ranges` first, since a block has no single region.
    pub fn visual_region(&self) -> Option<(core_text::Region, bool)> {
        let leaf = self.windows.leaf(self.windows.focus())?;
        let (anchor, kind) = leaf.visual_anchor?;
        if matches!(kind, WinVisualKind::Block) {
            return None;
        }
        let cursor = leaf.cursor_pos;
        let (lo, hi) = if anchor <= cursor { (anchor, cursor) } else { (cursor, anchor) };
        let gb = self.current_buffer().text();
        let linewise = matches!(kind, WinVisualKind::Linewise);
        let region = if linewise {
            let (lo_line, _) = gb.pos_to_linecol(lo);
            let (hi_line, _) = gb.pos_to_linecol(hi);
            let start = gb.linecol_to_pos(lo_line, 0);
            let end = gb.linecol_to_pos(hi_line + 1, 0).min(gb.size());
            core_text::Region::new(start, end)
        } else {
            core_text::Region::new(lo, (hi + 1).min(gb.size()))
        };
        Some((region, linewise))
    }

    /// Per-line column sub-ranges covered by a block (`Ctrl-V`) visual
    /// selection, top line first. `None` when the live selection isn't a
    /// block (or there is none).
    pub fn visual_block_ranges(&self) -> Option<Vec<core_text::Region>> {
        let leaf = self.windows.leaf(self.windows.focus())?;
        let (anchor, kind) = leaf.visual_anchor?;
        if !matches!(kind, WinVisualKind::Block) {
            return None;
        }
        let cursor = leaf.cursor_pos;
        let gb = self.current_buffer().text();
        let (a_line, a_col) = gb.pos_to_linecol(anchor);
        let (c_line, c_col) = gb.pos_to_linecol(cursor);
        let (lo_line, hi_line) = if a_line <= c_line { (a_line, c_line) } else { (c_line, a_line) };
        let (lo_col, hi_col) = if a_col <= c_col { (a_col, c_col) } else { (c_col, a_col) };
        let mut ranges = Vec::with_capacity(hi_line - lo_line + 1);
        for line in lo_line..=hi_line {
            let len = gb.line_len(line);
            let start_col = lo_col.min(len);
            let end_col = (hi_col + 1).min(len);
            let start = gb.linecol_to_pos(line, start_col);
            let end = gb.linecol_to_pos(line, end_col);
            ranges.push(core_text::Region::new(start, end));
        }
        Some(ranges)
    }

    /// Apply an operator directly over an already-computed region, e.g. the
    /// current Visual selection. Shared by `apply_operator`.
    pub fn apply_operator_to_region(
        &mut self,
        op: Operator,
        region: core_text::Region,
        linewise: bool,
        register: Option<char>,
    ) -> Result<(), EditorError> {
        let idx = self.focused_buffer_index();
        let gb = self.buffers[idx].text();
        let bytes = gb.substring(region.start, region.len());

        match op {
            Operator::Delete | Operator::Change => {
                self.registers.write(register, RegisterContent { text: bytes, linewise }, false);
                let buf = &mut self.buffers[idx];
                buf.start_action_group();
                buf.do_delete(region.start, region.len())?;
                buf.commit_action_group();
                if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
                    leaf.cursor_pos = region.start;
                }
                if op == Operator::Change {
                    self.buffers[idx].start_action_group();
                }
            }
            Operator::Yank => {
                self.registers.write(register, RegisterContent { text: bytes, linewise }, true);
            }
            Operator::ShiftRight | Operator::ShiftLeft => {
                let shiftwidth = self.buffers[idx].options.get_int("shiftwidth").unwrap_or(8) as usize;
                let shifted = shift_lines(&bytes, shiftwidth, op == Operator::ShiftRight);
                let buf = &mut self.buffers[idx];
                buf.start_action_group();
                buf.do_delete(region.start, region.len())?;
                buf.do_insert(region.start, &shifted)?;
                buf.commit_action_group();
            }
            Operator::LowerCase | Operator::UpperCase | Operator::ToggleCase => {
                let case_op = match op {
                    Operator::LowerCase => CaseOp::Lower,
                    Operator::UpperCase => CaseOp::Upper,
                    _ => CaseOp::Toggle,
                };
                let cased = apply_case(&bytes, case_op);
                let buf = &mut self.buffers[idx];
                buf.start_action_group();
                buf.do_delete(region.start, region.len())?;
                buf.do_insert(region.start, &cased)?;
                buf.commit_action_group();
            }
        }
        Ok(())
    }

    /// Apply an operator to the live Visual selection (no motion key needed)
    /// and drop back to Normal mode, clearing the anchor.
    pub fn apply_operator_to_visual_selection(
        &mut self,
        op: Operator,
        register: Option<char>,
    ) -> Result<(), EditorError> {
        if self.visual_block_ranges().is_some() {
            self.apply_operator_to_block_selection(op, register)?;
        } else {
            let Some((region, linewise)) = self.visual_region() else {
                return Ok(());
            };
            self.apply_operator_to_region(op, region, linewise, register)?;
        }
        if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
            leaf.visual_anchor = None;
        }
        if matches!(op, Operator::Change) {
            self.mode_stack.replace_top(Mode::Insert);
        } else {
            self.mode_stack.pop();
        }
        Ok(())
    }

    /// Apply `op` independently to each line's column sub-range of a block
    /// selection. Indent/case operators shift the whole covered lines
    /// instead — a rectangular sub-range has no meaning for `>`/`<`, and
    /// vim's own block mode applies those linewise too.
    fn apply_operator_to_block_selection(&mut self, op: Operator, register: Option<char>) -> Result<(), EditorError> {
        let Some(ranges) = self.visual_block_ranges() else {
            return Ok(());
        };
        if matches!(
            op,
            Operator::ShiftRight | Operator::ShiftLeft | Operator::LowerCase | Operator::UpperCase | Operator::ToggleCase
        ) {
            let Some(first) = ranges.first() else { return Ok(()) };
            let Some(last) = ranges.last() else { return Ok(()) };
            let gb = self.current_buffer().text();
            let (lo_line, _) = gb.pos_to_linecol(first.start);
            let (hi_line, _) = gb.pos_to_linecol(last.start);
            let start = gb.linecol_to_pos(lo_line, 0);
            let end = gb.linecol_to_pos(hi_line + 1, 0).min(gb.size());
            return self.apply_operator_to_region(op, core_text::Region::new(start, end), true, register);
        }

        let idx = self.focused_buffer_index();
        let gb = self.buffers[idx].text();
        let pieces: Vec<Vec<u8>> = ranges.iter().map(|r| gb.substring(r.start, r.len())).collect();
        let joined = pieces.join(&b"\n"[..]);

        match op {
            Operator::Delete | Operator::Change => {
                self.registers.write(register, RegisterContent { text: joined, linewise: false }, false);
                let buf = &mut self.buffers[idx];
                buf.start_action_group();
                for r in ranges.iter().rev() {
                    buf.do_delete(r.start, r.len())?;
                }
                buf.commit_action_group();
                if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
                    leaf.cursor_pos = ranges[0].start;
                }
                if op == Operator::Change {
                    self.buffers[idx].start_action_group();
                }
            }
            Operator::Yank => {
                self.registers.write(register, RegisterContent { text: joined, linewise: false }, true);
            }
            Operator::ShiftRight | Operator::ShiftLeft | Operator::LowerCase | Operator::UpperCase | Operator::ToggleCase => {
                unreachable!("handled as a whole-line region above")
            }
        }
        Ok(())
    }

    pub fn undo(&mut self) {
        let idx = self.focused_buffer_index();
        if let Some(pos) = self.buffers[idx].undo() {
            if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
                leaf.cursor_pos = pos;
            }
        }
    }

    pub fn redo(&mut self) {
        let idx = self.focused_buffer_index();
        if let Some(pos) = self.buffers[idx].redo() {
            if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
                leaf.cursor_pos = pos;
            }
        }
    }

    pub fn feed_composed(
        &mut self,
        action: ComposedAction,
        g_prefix: bool,
        regex: Option<(&dyn RegexEngine, bool)>,
    ) -> Result<(), EditorError> {
        match action {
            ComposedAction::Motion { motion, count } => {
                if let Some(m) = motion_from_char(motion, count, g_prefix, None) {
                    self.apply_motion(&m, regex);
                }
            }
            ComposedAction::ApplyOperator { op, motion, count, register } => {
                if let (Some(o), Some(m)) =
                    (operator_from_char(op), motion_from_char(motion, count, g_prefix, None))
                {
                    self.apply_operator(o, &m, register, regex)?;
                }
            }
            ComposedAction::LinewiseOperator { op, count, register } => {
                if let Some(o) = operator_from_char(op) {
                    let m = Motion::new(MotionKind::CurrentLine, count as usize, true, false);
                    self.apply_operator(o, &m, register, regex)?;
                }
            }
            ComposedAction::PasteAfter { register } => self.paste(register, true)?,
            ComposedAction::PasteBefore { register } => self.paste(register, false)?,
            ComposedAction::Undo => self.undo(),
            ComposedAction::Redo => self.redo(),
            ComposedAction::EnterInsert => {
                self.mode_stack.push(Mode::Insert);
                self.current_buffer_mut().start_action_group();
            }
            ComposedAction::ModeToggleVisualChar => {
                self.toggle_visual(WinVisualKind::Charwise, core_keymap::VisualKind::Charwise)
            }
            ComposedAction::ModeToggleVisualLine => {
                self.toggle_visual(WinVisualKind::Linewise, core_keymap::VisualKind::Linewise)
            }
            ComposedAction::ModeToggleVisualBlock => {
                self.toggle_visual(WinVisualKind::Block, core_keymap::VisualKind::Block)
            }
            ComposedAction::DeleteUnder => self.delete_under_cursor(1)?,
            ComposedAction::DeleteLeft => self.delete_left_of_cursor(1)?,
            ComposedAction::DeleteWordBackInsert => self.delete_word_back_insert()?,
            ComposedAction::Literal(_) | ComposedAction::None => {}
        }
        Ok(())
    }

    /// Enter the given Visual kind, or leave Visual mode if the same kind is
    /// already active (re-pressing `v`/`V`/`Ctrl-V` exits, switching kinds
    /// re-anchors at the cursor rather than stacking a second frame).
    fn toggle_visual(&mut self, win_kind: WinVisualKind, km_kind: core_keymap::VisualKind) {
        match self.mode_stack.current() {
            Mode::Visual(active) if active == km_kind => {
                self.mode_stack.pop();
                if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
                    leaf.visual_anchor = None;
                }
            }
            Mode::Visual(_) => {
                let cursor = self.windows.leaf(self.focused_leaf()).map(|l| l.cursor_pos).unwrap_or(0);
                if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
                    leaf.visual_anchor = Some((cursor, win_kind));
                }
                self.mode_stack.replace_top(Mode::Visual(km_kind));
            }
            _ => {
                let cursor = self.windows.leaf(self.focused_leaf()).map(|l| l.cursor_pos).unwrap_or(0);
                if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
                    leaf.visual_anchor = Some((cursor, win_kind));
                }
                self.mode_stack.push(Mode::Visual(km_kind));
            }
        }
    }

    fn delete_under_cursor(&mut self, n: usize) -> Result<(), EditorError> {
        let idx = self.focused_buffer_index();
        let cursor = self.windows.leaf(self.focused_leaf()).map(|l| l.cursor_pos).unwrap_or(0);
        let buf = &mut self.buffers[idx];
        let len = n.min(buf.size().saturating_sub(cursor));
        if len == 0 {
            return Ok(());
        }
        let bytes = buf.text().substring(cursor, len);
        self.registers.write(None, RegisterContent { text: bytes, linewise: false }, false);
        let buf = &mut self.buffers[idx];
        buf.start_action_group();
        buf.do_delete(cursor, len)?;
        buf.commit_action_group();
        Ok(())
    }

    fn delete_left_of_cursor(&mut self, n: usize) -> Result<(), EditorError> {
        let idx = self.focused_buffer_index();
        let cursor = self.windows.leaf(self.focused_leaf()).map(|l| l.cursor_pos).unwrap_or(0);
        let len = n.min(cursor);
        if len == 0 {
            return Ok(());
        }
        let start = cursor - len;
        let buf = &mut self.buffers[idx];
        let bytes = buf.text().substring(start, len);
        self.registers.write(None, RegisterContent { text: bytes, linewise: false }, false);
        let buf = &mut self.buffers[idx];
        buf.start_action_group();
        buf.do_delete(start, len)?;
        buf.commit_action_group();
        if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
            leaf.cursor_pos = start;
        }
        Ok(())
    }

    /// `<C-w>` in Insert mode: delete the word immediately before the cursor.
    fn delete_word_back_insert(&mut self) -> Result<(), EditorError> {
        let idx = self.focused_buffer_index();
        let cursor = self.windows.leaf(self.focused_leaf()).map(|l| l.cursor_pos).unwrap_or(0);
        let gb = self.buffers[idx].text();
        let start = core_motion::word_backward(gb, cursor, 1, false);
        let len = cursor - start;
        if len == 0 {
            return Ok(());
        }
        let buf = &mut self.buffers[idx];
        buf.do_delete(start, len)?;
        if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
            leaf.cursor_pos = start;
        }
        Ok(())
    }

    fn paste(&mut self, register: Option<char>, after: bool) -> Result<(), EditorError> {
        let content = self.registers.read(register);
        if content.text.is_empty() {
            return Ok(());
        }
        let idx = self.focused_buffer_index();
        let cursor = self.windows.leaf(self.focused_leaf()).map(|l| l.cursor_pos).unwrap_or(0);
        let gb = self.buffers[idx].text();
        let pos = if content.linewise {
            let (line, _) = gb.pos_to_linecol(cursor);
            let target_line = if after { line + 1 } else { line };
            gb.linecol_to_pos(target_line.min(gb.line_count()), 0)
        } else if after {
            (cursor + 1).min(gb.size())
        } else {
            cursor
        };
        let buf = &mut self.buffers[idx];
        buf.start_action_group();
        buf.do_insert(pos, &content.text)?;
        buf.commit_action_group();
        if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
            leaf.cursor_pos = pos;
        }
        Ok(())
    }

    pub fn run_ex_command(&mut self, storage: &dyn Storage, cmd: ExCommand) -> Result<(), EditorError> {
        match cmd {
            ExCommand::Quit { force } => {
                if !force && self.current_buffer().is_dirty() {
                    return Err(EditorError::UnsavedChanges);
                }
                self.running = false;
            }
            ExCommand::Write { path } => {
                let idx = self.focused_buffer_index();
                match path {
                    Some(p) => {
                        let resolved = self.resolve_path(&p);
                        self.buffers[idx].save_as(storage, &resolved)?
                    }
                    None => self.buffers[idx].save(storage)?,
                }
            }
            ExCommand::WriteQuit => {
                let idx = self.focused_buffer_index();
                self.buffers[idx].save(storage)?;
                self.running = false;
            }
            ExCommand::Edit { path } => {
                let resolved = self.resolve_path(&path);
                let buf = Buffer::load(storage, &resolved, &self.options)?;
                self.buffers.push(buf);
                let new_ref = BufferRef(self.buffers.len() - 1);
                if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
                    leaf.buffer = new_ref;
                    leaf.cursor_pos = 0;
                }
            }
            ExCommand::Split => {
                self.windows.split_leaf(self.focused_leaf(), Orientation::Horizontal);
            }
            ExCommand::VSplit => {
                self.windows.split_leaf(self.focused_leaf(), Orientation::Vertical);
            }
            ExCommand::Set { name, action, .. } => self.apply_set(&name, action)?,
            ExCommand::Cd { path } => {
                self.cwd = self.resolve_path(&path);
            }
            ExCommand::LCd { path } => {
                let resolved = self.resolve_path(&path);
                if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
                    leaf.local_cwd = Some(resolved);
                }
            }
            ExCommand::Pwd => {
                self.set_info(self.effective_cwd().display().to_string());
            }
            ExCommand::NoHlSearch => {
                if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
                    leaf.incsearch_match = None;
                }
            }
            ExCommand::Shell { cmd } => {
                info!(target = "editor.shell", %cmd, "shell_command_queued");
                self.pending_shell = Some(cmd);
            }
            ExCommand::Goto(target) => self.goto_line(target),
        }
        Ok(())
    }

    fn goto_line(&mut self, target: LineTarget) {
        let idx = self.focused_buffer_index();
        let gb = self.buffers[idx].text();
        let (cur_line, _) = gb.pos_to_linecol(
            self.windows.leaf(self.focused_leaf()).map(|l| l.cursor_pos).unwrap_or(0),
        );
        let line = match target {
            LineTarget::Absolute(n) => n.saturating_sub(1),
            LineTarget::RelativeForward(n) => cur_line + n,
            LineTarget::RelativeBackward(n) => cur_line.saturating_sub(n),
        }
        .min(gb.line_count().saturating_sub(1));
        let pos = gb.linecol_to_pos(line, 0);
        if let Some(leaf) = self.windows.leaf_mut(self.focused_leaf()) {
            leaf.cursor_pos = pos;
        }
    }

    fn apply_set(&mut self, name: &str, action: SetAction) -> Result<(), EditorError> {
        if !core_config::Options::exists(name) {
            return Err(EditorError::NoSuchOption(name.to_string()));
        }
        let idx = self.focused_buffer_index();
        let opts = &mut self.buffers[idx].options;
        use core_config::OptionValue;
        match action {
            SetAction::Query => {
                let val = opts.get(name).map_err(|_| EditorError::NoSuchOption(name.to_string()))?;
                self.set_info(format!("{name}={val:?}"));
            }
            SetAction::Reset => {
                opts.reset_to_default(name).map_err(|_| EditorError::NoSuchOption(name.to_string()))?;
            }
            SetAction::ToggleOff => {
                opts.set(name, OptionValue::Bool(false))
                    .map_err(|_| EditorError::NoSuchOption(name.to_string()))?;
            }
            SetAction::Assign(val) => {
                let parsed = if let Ok(i) = val.parse::<i64>() {
                    OptionValue::Int(i)
                } else if val == "true" {
                    OptionValue::Bool(true)
                } else if val == "false" {
                    OptionValue::Bool(false)
                } else {
                    OptionValue::Str(val)
                };
                opts.set(name, parsed).map_err(|_| EditorError::NoSuchOption(name.to_string()))?;
            }
            SetAction::Append(val) => {
                let current = opts.get_str(name).unwrap_or("").to_string();
                opts.set(name, OptionValue::Str(format!("{current},{val}")))
                    .map_err(|_| EditorError::NoSuchOption(name.to_string()))?;
            }
        }
        debug!(target = "editor.set", option = name, "option_applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::collections::HashMap as Map;

    fn not_found() -> StorageError {
        StorageError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "not found"))
    }

    struct MemStorage(RefCell<Map<PathBuf, Vec<u8>>>);
    impl Storage for MemStorage {
        fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
            self.0.borrow().get(path).cloned().ok_or_else(not_found)
        }
        fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
            self.0.borrow_mut().insert(path.to_path_buf(), bytes.to_vec());
            Ok(())
        }
        fn stat(&self, path: &Path) -> Result<core_events::Stat, StorageError> {
            if self.0.borrow().contains_key(path) {
                Ok(core_events::Stat { is_dir: false, writable: true })
            } else {
                Err(not_found())
            }
        }
        fn list_dir(&self, _path: &Path) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn motion_from_char_resolves_g_prefix_and_find_char() {
        let gg = motion_from_char('g', 1, true, None).unwrap();
        assert_eq!(gg.kind, MotionKind::FirstLine);

        let ge = motion_from_char('e', 3, true, None).unwrap();
        assert_eq!(ge.kind, MotionKind::WordEndBackward { big: false });
        assert_eq!(ge.count, 3);

        let till_x = motion_from_char(' ', 1, false, Some((true, true, 'x'))).unwrap();
        assert_eq!(till_x.kind, MotionKind::FindChar { ch: b'x', till: true, forward: true });

        assert!(motion_from_char('z', 1, true, None).is_none());
    }

    #[test]
    fn parse_numeric_goto() {
        assert_eq!(parse_ex_command("42").unwrap(), ExCommand::Goto(LineTarget::Absolute(42)));
        assert_eq!(parse_ex_command("-3").unwrap(), ExCommand::Goto(LineTarget::RelativeBackward(3)));
        assert_eq!(parse_ex_command("+5").unwrap(), ExCommand::Goto(LineTarget::RelativeForward(5)));
    }

    #[test]
    fn parse_quit_and_write() {
        assert_eq!(parse_ex_command("q").unwrap(), ExCommand::Quit { force: false });
        assert_eq!(parse_ex_command("q!").unwrap(), ExCommand::Quit { force: true });
        assert_eq!(parse_ex_command("wq").unwrap(), ExCommand::WriteQuit);
    }

    #[test]
    fn parse_set_variants() {
        match parse_ex_command("set number").unwrap() {
            ExCommand::Set { action: SetAction::Assign(v), .. } => assert_eq!(v, "true"),
            other => panic!("unexpected {other:?}"),
        }
        match parse_ex_command("set nonumber").unwrap() {
            ExCommand::Set { action: SetAction::ToggleOff, .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_command_errors() {
        assert!(matches!(parse_ex_command("bogus"), Err(EditorError::UnknownCommand(_))));
    }

    #[test]
    fn registers_numbered_ring_shifts_on_delete() {
        let mut regs = Registers::new();
        regs.write(None, RegisterContent { text: b"a".to_vec(), linewise: false }, false);
        regs.write(None, RegisterContent { text: b"b".to_vec(), linewise: false }, false);
        assert_eq!(regs.read(Some('1')).text, b"b");
        assert_eq!(regs.read(Some('2')).text, b"a");
        assert_eq!(regs.read(None).text, b"b");
    }

    #[test]
    fn registers_yank_never_touches_numbered_ring() {
        let mut regs = Registers::new();
        regs.write(None, RegisterContent { text: b"yanked".to_vec(), linewise: false }, true);
        assert_eq!(regs.read(Some('0')).text, b"yanked");
        assert!(regs.read(Some('1')).text.is_empty());
    }

    #[test]
    fn history_recall_filters_by_prefix() {
        let mut h = History::default();
        h.push("wq".to_string(), 50);
        h.push("set number".to_string(), 50);
        h.push("w foo.txt".to_string(), 50);
        assert_eq!(h.recall_older("w"), Some("w foo.txt"));
        assert_eq!(h.recall_older("w"), Some("wq"));
        assert_eq!(h.recall_older("w"), None);
    }

    #[test]
    fn editor_insert_and_undo_scenario() {
        let opts = Options::defaults();
        let mut ed = Editor::new(opts, 80, 24);
        ed.feed_composed(ComposedAction::EnterInsert, false, None).unwrap();
        for ch in "hello".chars() {
            let buf = ed.current_buffer_mut();
            let pos = 0;
            buf.do_insert(pos, ch.to_string().as_bytes()).unwrap();
        }
        assert_eq!(ed.current_buffer().text().substring(0, 5), b"olleh");
        ed.current_buffer_mut().commit_action_group();
        ed.undo();
        assert_eq!(ed.current_buffer().size(), 1);
    }

    #[test]
    fn visual_delete_applies_to_selection_without_a_motion_key() {
        let opts = Options::defaults();
        let mut ed = Editor::new(opts, 80, 24);
        ed.current_buffer_mut().start_action_group();
        ed.current_buffer_mut().do_insert(0, b"hello, world!").unwrap();
        ed.current_buffer_mut().commit_action_group();
        if let Some(leaf) = ed.windows.leaf_mut(ed.windows.focus()) {
            leaf.cursor_pos = 1;
            leaf.visual_anchor = Some((1, core_model::VisualKind::Charwise));
        }
        ed.mode_stack.push(Mode::Visual(core_keymap::VisualKind::Charwise));
        if let Some(leaf) = ed.windows.leaf_mut(ed.windows.focus()) {
            leaf.cursor_pos = 6;
        }
        ed.apply_operator_to_visual_selection(Operator::Delete, None).unwrap();
        assert_eq!(ed.current_buffer().text().substring(0, ed.current_buffer().size()), b"h world!");
        assert_eq!(ed.windows.leaf(ed.windows.focus()).unwrap().cursor_pos, 1);
        assert!(ed.windows.leaf(ed.windows.focus()).unwrap().visual_anchor.is_none());
        assert!(matches!(ed.mode_stack.current(), Mode::Normal));
        let reg = ed.registers.read(None);
        assert_eq!(reg.text, b"ello, ");
    }

    #[test]
    fn visual_block_delete_applies_per_line_column_sub_range() {
        let opts = Options::defaults();
        let mut ed = Editor::new(opts, 80, 24);
        ed.current_buffer_mut().start_action_group();
        ed.current_buffer_mut().do_insert(0, b"abcd\nefgh\nijkl\n").unwrap();
        ed.current_buffer_mut().commit_action_group();
        let anchor = ed.current_buffer().text().linecol_to_pos(0, 1);
        let cursor = ed.current_buffer().text().linecol_to_pos(2, 2);
        if let Some(leaf) = ed.windows.leaf_mut(ed.windows.focus()) {
            leaf.cursor_pos = anchor;
            leaf.visual_anchor = Some((anchor, core_model::VisualKind::Block));
        }
        ed.mode_stack.push(Mode::Visual(core_keymap::VisualKind::Block));
        if let Some(leaf) = ed.windows.leaf_mut(ed.windows.focus()) {
            leaf.cursor_pos = cursor;
        }
        ed.apply_operator_to_visual_selection(Operator::Delete, None).unwrap();
        assert_eq!(
            ed.current_buffer().text().substring(0, ed.current_buffer().size()),
            b"ad\neh\nil\n"
        );
        assert!(ed.windows.leaf(ed.windows.focus()).unwrap().visual_anchor.is_none());
        assert!(matches!(ed.mode_stack.current(), Mode::Normal));
        let reg = ed.registers.read(None);
        assert_eq!(reg.text, b"bc\nfg\njk");
    }

    #[test]
    fn ex_quit_refuses_when_dirty() {
        let opts = Options::defaults();
        let mut ed = Editor::new(opts, 80, 24);
        ed.current_buffer_mut().start_action_group();
        ed.current_buffer_mut().do_insert(0, b"x").unwrap();
        ed.current_buffer_mut().commit_action_group();
        let storage = MemStorage(RefCell::new(Map::new()));
        let result = ed.run_ex_command(&storage, ExCommand::Quit { force: false });
        assert!(matches!(result, Err(EditorError::UnsavedChanges)));
    }

    #[test]
    fn lcd_sets_window_local_cwd_distinct_from_global_cd() {
        let opts = Options::defaults();
        let mut ed = Editor::new(opts, 80, 24);
        ed.cwd = PathBuf::from("/tmp/scratch");
        let storage = MemStorage(RefCell::new(Map::new()));

        ed.run_ex_command(&storage, ExCommand::Cd { path: "..".to_string() }).unwrap();
        assert_eq!(ed.cwd, PathBuf::from("/tmp"));

        let left = ed.focused_leaf();
        let right = ed.windows.split_leaf(left, Orientation::Vertical).unwrap();
        ed.windows.set_focus(right);
        ed.run_ex_command(&storage, ExCommand::LCd { path: "scratch".to_string() }).unwrap();
        assert_eq!(ed.effective_cwd(), PathBuf::from("/tmp/scratch"));

        ed.windows.set_focus(left);
        assert_eq!(ed.effective_cwd(), PathBuf::from("/tmp"));
    }
}
