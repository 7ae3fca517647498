//! Oxidized entrypoint: wires concrete `Storage`/`Display`/`RegexEngine`
//! adapters to the core crates and runs the single-threaded event loop.
use anyhow::Result;
use clap::Parser;
use core_editor::{motion_from_char, operator_from_char, parse_ex_command, Editor, EditorError};
use core_events::{
    Display, DisplayError, InputEvent, KeyCode, KeyEvent, MatchSpan, RegexEngine, RegexError,
    RegexFlags, Stat, Storage, StorageError,
};
use core_keymap::{
    baseline_normal_specs, compose_with_context, ComposedAction, MappingOutput, MappingTrie, Mode,
    PendingCharKind, Resolution,
};
use core_terminal::{CrosstermBackend, CrosstermDisplay};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Once;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

// -------------------------------------------------------------------------------------------------
// CLI
// -------------------------------------------------------------------------------------------------
#[derive(Parser, Debug)]
#[command(name = "oxidized", version, about = "Oxidized editor")]
struct Args {
    /// Optional path to open at startup. If omitted a welcome buffer is used.
    pub path: Option<PathBuf>,
    /// Optional configuration file path (overrides `oxidized.toml` discovery).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// `+N` / `+` style initial line jump, as a separate positional so it
    /// can sit before or after `path` the way `vi +42 file` does.
    #[arg(long = "line")]
    pub line: Option<usize>,
}

/// Split a leading `+N` token out of the raw argument list before handing
/// the rest to clap, mirroring `vi`'s `+42 file.txt` invocation.
fn extract_plus_line(raw: Vec<String>) -> (Vec<String>, Option<usize>) {
    let mut out = Vec::with_capacity(raw.len());
    let mut line = None;
    for arg in raw {
        if let Some(rest) = arg.strip_prefix('+') {
            if let Ok(n) = rest.parse::<usize>() {
                line = Some(n);
                continue;
            }
        }
        out.push(arg);
    }
    (out, line)
}

// -------------------------------------------------------------------------------------------------
// Concrete Storage: the real filesystem
// -------------------------------------------------------------------------------------------------
struct FsStorage;

impl Storage for FsStorage {
    fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        std::fs::read(path).map_err(StorageError::Io)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        std::fs::write(path, bytes).map_err(StorageError::Io)
    }

    fn stat(&self, path: &Path) -> Result<Stat, StorageError> {
        let meta = std::fs::metadata(path).map_err(StorageError::Io)?;
        let writable = !meta.permissions().readonly();
        Ok(Stat { is_dir: meta.is_dir(), writable })
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path).map_err(StorageError::Io)? {
            let entry = entry.map_err(StorageError::Io)?;
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.path().is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

// -------------------------------------------------------------------------------------------------
// Concrete RegexEngine: the `regex` crate over byte haystacks
// -------------------------------------------------------------------------------------------------
struct RegexCrateEngine;

impl RegexEngine for RegexCrateEngine {
    fn find(
        &self,
        haystack: &[u8],
        pattern: &str,
        flags: RegexFlags,
    ) -> Result<Option<MatchSpan>, RegexError> {
        let mut builder = regex::bytes::RegexBuilder::new(pattern);
        builder.case_insensitive(flags.contains(RegexFlags::ICASE));
        builder.multi_line(flags.contains(RegexFlags::NEWLINE_AWARE));
        let re = builder
            .build()
            .map_err(|e| RegexError::BadPattern(e.to_string()))?;
        Ok(re.find(haystack).map(|m| MatchSpan { start: m.start(), end: m.end() }))
    }
}

// -------------------------------------------------------------------------------------------------
// Logging: file-only, never stdout/stderr (the screen belongs to the editor)
// -------------------------------------------------------------------------------------------------
fn configure_logging() -> Option<WorkerGuard> {
    let log_path = Path::new("oxidized.log");
    if log_path.exists() {
        let _ = std::fs::remove_file(log_path);
    }
    let file_appender = tracing_appender::rolling::never(".", "oxidized.log");
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .try_init()
    {
        Ok(()) => Some(guard),
        Err(_) => None,
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            error!(target: "runtime.panic", %info, "panic");
            default_panic(info);
        }));
    });
}

fn key_code_to_char(code: KeyCode) -> Option<char> {
    match code {
        KeyCode::Char(c) => Some(c),
        KeyCode::Enter => Some('\n'),
        KeyCode::Tab => Some('\t'),
        _ => None,
    }
}

// -------------------------------------------------------------------------------------------------
// Command-line mode scratch buffer (`:`, `/`, `?`)
// -------------------------------------------------------------------------------------------------
#[derive(Debug, Default)]
struct CommandLine {
    prompt: char,
    text: String,
    cursor: usize,
    saved_pos: core_text::Offset,
}

// -------------------------------------------------------------------------------------------------
// Main loop
// -------------------------------------------------------------------------------------------------
fn main() -> Result<()> {
    install_panic_hook();
    let _log_guard = configure_logging();

    let raw_args: Vec<String> = std::env::args().collect();
    let (clean_args, plus_line) = extract_plus_line(raw_args);
    let args = Args::parse_from(clean_args);
    let line_target = plus_line.or(args.line);

    info!(target: "runtime.startup", path = ?args.path, "oxidized_starting");

    let options = core_config::load_editor_options(args.config)?;
    let storage = FsStorage;
    let regex_engine = RegexCrateEngine;

    let mut display = CrosstermDisplay::new()?;
    let mut backend = CrosstermBackend::new();
    let _guard = backend.enter_guard()?;
    let (width, height) = display.size();

    let mut editor = Editor::new(options, width, height);
    if let Some(path) = &args.path {
        match core_state::Buffer::load(&storage, path, &editor.options) {
            Ok(buf) => editor.buffers[0] = buf,
            Err(e) => {
                warn!(target: "runtime.startup", error = %e, "initial_load_failed");
            }
        }
    }
    if let Some(n) = line_target {
        editor
            .run_ex_command(&storage, parse_ex_command(&n.to_string())?)
            .ok();
    }

    let trie = MappingTrie::build(baseline_normal_specs());
    let mut cmdline: Option<CommandLine> = None;
    let mut normal_buf: Vec<char> = Vec::new();

    while editor.running {
        render(&mut display, &editor)?;
        let event = match display.poll_event() {
            Ok(e) => e,
            Err(DisplayError::Io(_)) => continue,
        };
        match event {
            InputEvent::Resize(w, h) => {
                editor.windows.set_viewport_size(w, h);
            }
            InputEvent::Key(key) => {
                if let Err(e) = handle_key(&mut editor, &storage, &regex_engine, &trie, &mut normal_buf, &mut cmdline, key)
                {
                    editor.set_error(&e);
                }
            }
        }
    }
    Ok(())
}

fn handle_key(
    editor: &mut Editor,
    storage: &dyn Storage,
    regex: &dyn RegexEngine,
    trie: &MappingTrie,
    normal_buf: &mut Vec<char>,
    cmdline: &mut Option<CommandLine>,
    key: KeyEvent,
) -> Result<(), EditorError> {
    match editor.mode_stack.current() {
        Mode::Insert => handle_insert_key(editor, key),
        Mode::Command | Mode::Search { .. } => handle_command_key(editor, storage, regex, cmdline, key),
        _ => handle_normal_key(editor, trie, normal_buf, regex, key),
    }
}

fn handle_insert_key(editor: &mut Editor, key: KeyEvent) -> Result<(), EditorError> {
    let idx_leaf = editor.windows.focus();
    let cursor = editor.windows.leaf(idx_leaf).map(|l| l.cursor_pos).unwrap_or(0);
    match key.code {
        KeyCode::Esc => {
            editor.current_buffer_mut().commit_action_group();
            editor.mode_stack.pop();
        }
        KeyCode::Backspace => {
            if cursor > 0 {
                editor.current_buffer_mut().do_delete(cursor - 1, 1)?;
                if let Some(leaf) = editor.windows.leaf_mut(idx_leaf) {
                    leaf.cursor_pos = cursor - 1;
                }
            }
        }
        KeyCode::Enter => {
            editor.current_buffer_mut().do_insert(cursor, b"\n")?;
            if let Some(leaf) = editor.windows.leaf_mut(idx_leaf) {
                leaf.cursor_pos = cursor + 1;
            }
        }
        _ if key.mods.contains(core_events::KeyModifiers::CTRL) && key.code == KeyCode::Char('w') => {
            editor.feed_composed(ComposedAction::DeleteWordBackInsert, false, None)?;
        }
        _ => {
            if let Some(ch) = key_code_to_char(key.code) {
                let mut buf = [0u8; 4];
                let bytes = ch.encode_utf8(&mut buf).as_bytes();
                editor.current_buffer_mut().do_insert(cursor, bytes)?;
                if let Some(leaf) = editor.windows.leaf_mut(idx_leaf) {
                    leaf.cursor_pos = cursor + bytes.len();
                }
            }
        }
    }
    Ok(())
}

fn handle_normal_key(
    editor: &mut Editor,
    trie: &MappingTrie,
    normal_buf: &mut Vec<char>,
    regex: &dyn RegexEngine,
    key: KeyEvent,
) -> Result<(), EditorError> {
    if key.code == KeyCode::Esc {
        editor.pending_char.abort();
        editor.pending_ctx.reset_transient();
        normal_buf.clear();
        if matches!(editor.mode_stack.current(), Mode::Visual(_)) {
            if let Some(leaf) = editor.windows.leaf_mut(editor.windows.focus()) {
                leaf.visual_anchor = None;
            }
            editor.mode_stack.pop();
        }
        return Ok(());
    }
    if key.mods.contains(core_events::KeyModifiers::CTRL) && key.code == KeyCode::Char('r') {
        editor.feed_composed(ComposedAction::Redo, false, None)?;
        return Ok(());
    }
    if key.mods.contains(core_events::KeyModifiers::CTRL) && key.code == KeyCode::Char('v') {
        editor.feed_composed(ComposedAction::ModeToggleVisualBlock, false, None)?;
        return Ok(());
    }
    if key.code == KeyCode::Char(':') && normal_buf.is_empty() {
        editor.mode_stack.push(Mode::Command);
        return Ok(());
    }
    if key.code == KeyCode::Char('/') && normal_buf.is_empty() {
        editor.mode_stack.push(Mode::Search { forward: true });
        return Ok(());
    }
    let Some(ch) = key_code_to_char(key.code) else { return Ok(()) };

    // g-prefix (gg, ge, gE) and f/F/t/T each await one further literal
    // character that the trie can't enumerate in advance.
    if editor.pending_char.is_active() {
        if let Some(kind) = editor.pending_char.feed(ch) {
            resolve_pending_char(editor, kind, ch, regex)?;
        }
        return Ok(());
    }
    if normal_buf.is_empty() {
        let begin = match key.code {
            KeyCode::Char('g') => Some(PendingCharKind::GPrefix),
            KeyCode::Char('f') => Some(PendingCharKind::FindChar { till: false, forward: true }),
            KeyCode::Char('F') => Some(PendingCharKind::FindChar { till: false, forward: false }),
            KeyCode::Char('t') => Some(PendingCharKind::FindChar { till: true, forward: true }),
            KeyCode::Char('T') => Some(PendingCharKind::FindChar { till: true, forward: false }),
            _ => None,
        };
        if let Some(kind) = begin {
            editor.pending_char.begin(kind);
            return Ok(());
        }
    }

    normal_buf.push(ch);
    loop {
        match trie.resolve(normal_buf) {
            // In Visual mode an operator applies immediately to the live
            // selection rather than waiting on a following motion key.
            Resolution::Matched { consumed, output: MappingOutput::Operator(op), .. }
                if matches!(editor.mode_stack.current(), Mode::Visual(_)) =>
            {
                if let Some(operator) = operator_from_char(op) {
                    let register = editor.pending_ctx.register.take();
                    editor.apply_operator_to_visual_selection(operator, register)?;
                }
                editor.pending_ctx.reset_transient();
                normal_buf.drain(0..consumed);
                if normal_buf.is_empty() {
                    break;
                }
            }
            Resolution::Matched { consumed, output, .. } => {
                let composed = compose_with_context(&mut editor.pending_ctx, &output);
                editor.feed_composed(composed, false, Some((regex, smartcase(editor))))?;
                normal_buf.drain(0..consumed);
                if normal_buf.is_empty() {
                    break;
                }
            }
            Resolution::NeedMore => break,
            Resolution::FallbackLiteral(_) => {
                normal_buf.remove(0);
                if normal_buf.is_empty() {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Resolve a completed g-prefix or f/F/t/T sequence into a motion, applying
/// it directly or folding it into a still-pending operator.
fn resolve_pending_char(
    editor: &mut Editor,
    kind: PendingCharKind,
    ch: char,
    regex: &dyn RegexEngine,
) -> Result<(), EditorError> {
    let count = editor.pending_ctx.count_prefix.take().unwrap_or(1);
    let find_pending = match kind {
        PendingCharKind::GPrefix => None,
        PendingCharKind::FindChar { till, forward } => Some((till, forward, ch)),
    };
    let g_prefix = matches!(kind, PendingCharKind::GPrefix);
    let Some(motion) = motion_from_char(ch, count, g_prefix, find_pending) else {
        return Ok(());
    };
    if let Some(op) = editor.pending_ctx.operator.take() {
        let register = editor.pending_ctx.register.take();
        if let Some(operator) = operator_from_char(op) {
            editor.apply_operator(operator, &motion, register, Some((regex, smartcase(editor))))?;
        }
        editor.pending_ctx.reset_transient();
    } else {
        editor.apply_motion(&motion, Some((regex, smartcase(editor))));
    }
    Ok(())
}

fn smartcase(editor: &Editor) -> bool {
    let opts = &editor.current_buffer().options;
    let ignorecase = opts.get_bool("ignorecase").unwrap_or(false);
    let smartcase = opts.get_bool("smartcase").unwrap_or(false);
    ignorecase && !smartcase
}

/// Actually runs a `:!cmd` queued by `Editor::run_ex_command`, via the
/// user's shell, reporting exit status/output on the status line the same
/// way `:pwd` does.
fn run_pending_shell(editor: &mut Editor) {
    let Some(cmd) = editor.take_pending_shell_command() else { return };
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    match Command::new(shell).arg("-c").arg(&cmd).current_dir(editor.effective_cwd()).output() {
        Ok(output) => {
            let mut msg = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                msg = format!("{cmd}: {} ({stderr})", output.status);
            } else if msg.is_empty() {
                msg = format!("{cmd}: done");
            }
            editor.set_info(msg);
        }
        Err(e) => editor.set_info(format!("{cmd}: failed to spawn ({e})")),
    }
}

fn handle_command_key(
    editor: &mut Editor,
    storage: &dyn Storage,
    regex: &dyn RegexEngine,
    cmdline: &mut Option<CommandLine>,
    key: KeyEvent,
) -> Result<(), EditorError> {
    if cmdline.is_none() {
        let prompt = match editor.mode_stack.current() {
            Mode::Search { forward: true } => '/',
            Mode::Search { forward: false } => '?',
            _ => ':',
        };
        let saved_pos = editor.windows.leaf(editor.windows.focus()).map(|l| l.cursor_pos).unwrap_or(0);
        *cmdline = Some(CommandLine { prompt, text: String::new(), cursor: 0, saved_pos });
    }
    let cl = cmdline.as_mut().unwrap();
    let is_search = cl.prompt != ':';
    match key.code {
        KeyCode::Esc => {
            if let Some(leaf) = editor.windows.leaf_mut(editor.windows.focus()) {
                leaf.cursor_pos = cl.saved_pos;
                leaf.incsearch_match = None;
            }
            *cmdline = None;
            editor.mode_stack.pop();
            return Ok(());
        }
        KeyCode::Enter => {
            let text = cl.text.clone();
            let prompt = cl.prompt;
            *cmdline = None;
            if let Some(leaf) = editor.windows.leaf_mut(editor.windows.focus()) {
                leaf.incsearch_match = None;
            }
            editor.mode_stack.pop();
            if prompt == ':' {
                editor.command_history.push(text.clone(), history_cap(editor));
                let cmd = parse_ex_command(&text)?;
                editor.run_ex_command(storage, cmd)?;
                run_pending_shell(editor);
            } else {
                editor.search_history.push(text.clone(), history_cap(editor));
                editor.registers.set_last_search(&text);
                run_search(editor, &text, prompt == '/', regex)?;
            }
            return Ok(());
        }
        KeyCode::Backspace => {
            if cl.cursor > 0 {
                cl.text.remove(cl.cursor - 1);
                cl.cursor -= 1;
            } else {
                *cmdline = None;
                if let Some(leaf) = editor.windows.leaf_mut(editor.windows.focus()) {
                    leaf.incsearch_match = None;
                }
                editor.mode_stack.pop();
                return Ok(());
            }
        }
        KeyCode::Left => cl.cursor = cl.cursor.saturating_sub(1),
        KeyCode::Right => cl.cursor = (cl.cursor + 1).min(cl.text.len()),
        KeyCode::Home => cl.cursor = 0,
        KeyCode::End => cl.cursor = cl.text.len(),
        KeyCode::Up | KeyCode::Down => {
            let prefix = cl.text.clone();
            let history = if cl.prompt == ':' { &mut editor.command_history } else { &mut editor.search_history };
            let recalled = if key.code == KeyCode::Up {
                history.recall_older(&prefix)
            } else {
                history.recall_newer(&prefix)
            };
            if let Some(entry) = recalled {
                cl.text = entry.to_string();
                cl.cursor = cl.text.len();
            }
        }
        _ => {
            if let Some(ch) = key_code_to_char(key.code) {
                cl.text.insert(cl.cursor, ch);
                cl.cursor += 1;
            }
        }
    }
    if is_search {
        let pattern = cl.text.clone();
        let forward = cl.prompt == '/';
        update_incsearch(editor, regex, &pattern, forward);
    }
    Ok(())
}

/// Live search preview: highlight the next match as the pattern is typed,
/// without moving the cursor or touching history. No-op unless `incsearch`.
fn update_incsearch(editor: &mut Editor, regex: &dyn RegexEngine, pattern: &str, forward: bool) {
    let idx = editor.windows.focus();
    let incsearch = editor.current_buffer().options.get_bool("incsearch").unwrap_or(false);
    if !incsearch || pattern.is_empty() {
        if let Some(leaf) = editor.windows.leaf_mut(idx) {
            leaf.incsearch_match = None;
        }
        return;
    }
    let cursor = editor.windows.leaf(idx).map(|l| l.cursor_pos).unwrap_or(0);
    let gb = editor.current_buffer().text();
    let haystack = gb.substring(0, gb.size());
    let mut flags = RegexFlags::EXTENDED | RegexFlags::NEWLINE_AWARE;
    let case_insensitive = smartcase(editor) || {
        let opts = &editor.current_buffer().options;
        opts.get_bool("ignorecase").unwrap_or(false) && !pattern.bytes().any(|b| b.is_ascii_uppercase())
    };
    if case_insensitive {
        flags |= RegexFlags::ICASE;
    }
    let found = if forward {
        regex
            .find(&haystack[cursor..], pattern, flags)
            .ok()
            .flatten()
            .map(|m| (cursor + m.start, cursor + m.end))
            .or_else(|| regex.find(&haystack, pattern, flags).ok().flatten().map(|m| (m.start, m.end)))
    } else {
        regex
            .find(&haystack[..cursor], pattern, flags)
            .ok()
            .flatten()
            .map(|m| (m.start, m.end))
            .or_else(|| regex.find(&haystack, pattern, flags).ok().flatten().map(|m| (m.start, m.end)))
    };
    if let Some(leaf) = editor.windows.leaf_mut(idx) {
        leaf.incsearch_match = found;
    }
}

fn run_search(editor: &mut Editor, pattern: &str, forward: bool, regex: &dyn RegexEngine) -> Result<(), EditorError> {
    let idx = editor.windows.focus();
    let cursor = editor.windows.leaf(idx).map(|l| l.cursor_pos).unwrap_or(0);
    let kind = if forward {
        core_motion::MotionKind::SearchForward(pattern.to_string())
    } else {
        core_motion::MotionKind::SearchBackward(pattern.to_string())
    };
    let motion = core_motion::Motion::new(kind, 1, false, true);
    let gb = editor.current_buffer().text();
    let case_insensitive = smartcase(editor) || {
        let opts = &editor.current_buffer().options;
        opts.get_bool("ignorecase").unwrap_or(false) && !pattern.bytes().any(|b| b.is_ascii_uppercase())
    };
    match motion.apply(gb, cursor, None, Some((regex, case_insensitive))) {
        Some(target) => {
            if let Some(leaf) = editor.windows.leaf_mut(idx) {
                leaf.cursor_pos = target;
            }
            Ok(())
        }
        None => Err(EditorError::NoMatch),
    }
}

fn history_cap(editor: &Editor) -> usize {
    editor.options.get_int("history").unwrap_or(50).max(1) as usize
}

fn render(display: &mut CrosstermDisplay, editor: &Editor) -> Result<()> {
    let (_, h) = display.size();
    display.clear()?;
    let leaves = editor.windows.leaves();
    for leaf_id in leaves {
        let Some(leaf) = editor.windows.leaf(leaf_id) else { continue };
        let rect = editor.windows.geometry(leaf_id);
        let Some(buf) = editor.buffers.get(leaf.buffer.0) else { continue };
        let gb = buf.text();
        for row in 0..rect.h {
            let line_no = leaf.top_line + row as usize;
            if line_no >= gb.line_count() {
                break;
            }
            let start = gb.linecol_to_pos(line_no, 0);
            let len = gb.line_len(line_no);
            let text = gb.substring(start, len);
            let line = String::from_utf8_lossy(&text);
            let visible: String = line.chars().skip(leaf.left_col).take(rect.w as usize).collect();
            let y = rect.y + row;
            match leaf.incsearch_match.filter(|(s, e)| *s < start + len && *e > start) {
                Some((m_start, m_end)) => {
                    let lo = m_start.saturating_sub(start).min(line.chars().count());
                    let hi = m_end.saturating_sub(start).min(line.chars().count());
                    let chars: Vec<char> = visible.chars().collect();
                    let lo = lo.saturating_sub(leaf.left_col).min(chars.len());
                    let hi = hi.saturating_sub(leaf.left_col).min(chars.len());
                    let before: String = chars[..lo].iter().collect();
                    let matched: String = chars[lo..hi].iter().collect();
                    let after: String = chars[hi..].iter().collect();
                    let mut x = rect.x;
                    display.write_run(core_events::Position { x, y }, &before, core_events::Cell::default())?;
                    x += before.chars().count() as u16;
                    display.write_run(
                        core_events::Position { x, y },
                        &matched,
                        core_events::Cell { bg: core_events::Color::Yellow, ..Default::default() },
                    )?;
                    x += matched.chars().count() as u16;
                    display.write_run(core_events::Position { x, y }, &after, core_events::Cell::default())?;
                }
                None => {
                    display.write_run(
                        core_events::Position { x: rect.x, y },
                        &visible,
                        core_events::Cell::default(),
                    )?;
                }
            }
        }
    }
    if let Some((msg, is_error)) = &editor.status {
        let style = core_events::Cell {
            fg: if *is_error { core_events::Color::Red } else { core_events::Color::Default },
            ..Default::default()
        };
        display.write_run(core_events::Position { x: 0, y: h.saturating_sub(1) }, msg, style)?;
    }
    display.render().map_err(anyhow::Error::from)
}
