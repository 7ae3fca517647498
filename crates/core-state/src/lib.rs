//! `Buffer`: a `GapBuffer` plus dirty/readonly tracking, marks, and the
//! two-stack undo/redo of action groups.

use core_config::Options;
use core_events::{Storage, StorageError};
use core_text::{GapBuffer, Offset, Region};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// One recorded mutation, exact enough to be replayed forwards or reversed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditAction {
    Insert { pos: Offset, bytes: Vec<u8> },
    Delete { pos: Offset, bytes: Vec<u8> },
}

/// An atomic sequence of `EditAction`s for undo/redo purposes.
#[derive(Debug, Clone, Default)]
pub struct ActionGroup {
    pub actions: Vec<EditAction>,
}

impl ActionGroup {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Opaque handle to a `Mark`, stable across edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    pub region: Region,
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("buffer has no associated path")]
    NoPath,
    #[error("buffer is not modifiable")]
    NotModifiable,
}

/// Owns a `GapBuffer`, dirty/readonly flags, marks, and undo/redo stacks.
pub struct Buffer {
    text: GapBuffer,
    path: Option<PathBuf>,
    dirty: bool,
    readonly: bool,
    directory: bool,
    undo_stack: Vec<ActionGroup>,
    redo_stack: Vec<ActionGroup>,
    /// `None` until `start_action_group` is called; accumulates actions for
    /// the in-progress group (e.g. an Insert-mode session).
    current_group: Option<ActionGroup>,
    marks: Vec<Option<Mark>>,
    pub options: Options,
}

impl Buffer {
    /// Create an empty, unnamed buffer inheriting option defaults from the
    /// editor scope.
    pub fn new(editor_options: &Options) -> Self {
        Self {
            text: GapBuffer::new(),
            path: None,
            dirty: false,
            readonly: false,
            directory: false,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            current_group: None,
            marks: Vec::new(),
            options: editor_options.inherit(),
        }
    }

    /// Load `path` via `Storage`. A missing file yields an empty buffer
    /// rather than an error, mirroring the original's buffer_create
    /// behavior for `:e newfile`. A directory path is flagged `directory`
    /// and `readonly`, and its listing is loaded as buffer text.
    pub fn load(
        storage: &dyn Storage,
        path: &Path,
        editor_options: &Options,
    ) -> Result<Self, BufferError> {
        let mut buf = Self::new(editor_options);
        buf.path = Some(path.to_path_buf());
        match storage.stat(path) {
            Ok(stat) if stat.is_dir => {
                buf.directory = true;
                buf.readonly = true;
                let mut listing = storage.list_dir(path)?.join("\n");
                listing.push('\n');
                buf.text = GapBuffer::from_bytes(listing.as_bytes());
            }
            Ok(stat) => {
                buf.readonly = !stat.writable;
                let bytes = storage.read(path)?;
                buf.text = GapBuffer::from_bytes(&bytes);
            }
            Err(_) => {
                // Nonexistent path: start empty, as if `:e` created a new file.
            }
        }
        info!(target: "buffer", path = %path.display(), "buffer_loaded");
        Ok(buf)
    }

    pub fn save(&mut self, storage: &dyn Storage) -> Result<(), BufferError> {
        let path = self.path.clone().ok_or(BufferError::NoPath)?;
        self.save_as(storage, &path)
    }

    pub fn save_as(&mut self, storage: &dyn Storage, path: &Path) -> Result<(), BufferError> {
        let bytes = self.text.substring(0, self.text.size());
        storage.write(path, &bytes)?;
        self.path = Some(path.to_path_buf());
        self.dirty = false;
        info!(target: "buffer", path = %path.display(), "buffer_saved");
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_directory(&self) -> bool {
        self.directory
    }

    pub fn text(&self) -> &GapBuffer {
        &self.text
    }

    pub fn size(&self) -> usize {
        self.text.size()
    }

    // -- editing -----------------------------------------------------------

    /// Push a new empty group onto the undo stack, dropping the redo stack.
    /// Subsequent `do_insert`/`do_delete` calls accumulate into this group
    /// until the next `start_action_group` call.
    pub fn start_action_group(&mut self) {
        if let Some(g) = self.current_group.take() {
            if !g.is_empty() {
                self.undo_stack.push(g);
            }
        }
        self.current_group = Some(ActionGroup::default());
        self.redo_stack.clear();
        debug!(target: "buffer", "start_action_group");
    }

    /// Flush the in-progress group (if any and non-empty) onto the undo
    /// stack without starting a new one. Call this to close a group (e.g.
    /// on leaving Insert mode) without immediately opening another.
    pub fn commit_action_group(&mut self) {
        if let Some(g) = self.current_group.take() {
            if !g.is_empty() {
                self.undo_stack.push(g);
            }
        }
    }

    fn record(&mut self, action: EditAction) {
        if self.current_group.is_none() {
            self.start_action_group();
        }
        self.current_group.as_mut().unwrap().actions.push(action);
    }

    pub fn do_insert(&mut self, pos: Offset, bytes: &[u8]) -> Result<(), BufferError> {
        if !self.options.get_bool("modifiable").unwrap_or(true) || self.readonly {
            return Err(BufferError::NotModifiable);
        }
        self.text.insert(pos, bytes);
        self.shift_marks_insert(pos, bytes.len());
        self.record(EditAction::Insert {
            pos,
            bytes: bytes.to_vec(),
        });
        self.dirty = true;
        Ok(())
    }

    pub fn do_delete(&mut self, pos: Offset, len: usize) -> Result<(), BufferError> {
        if !self.options.get_bool("modifiable").unwrap_or(true) || self.readonly {
            return Err(BufferError::NotModifiable);
        }
        let size = self.text.size();
        if pos >= size || len == 0 {
            return Ok(());
        }
        let len = len.min(size - pos);
        let removed = self.text.substring(pos, len);
        self.text.delete(pos, len);
        self.shift_marks_delete(pos, len);
        self.record(EditAction::Delete { pos, bytes: removed });
        self.dirty = true;
        Ok(())
    }

    /// Apply one action's inverse directly, bypassing mark shifting and
    /// undo recording (used internally by `undo`/`redo` replay).
    fn apply_raw(&mut self, action: &EditAction) {
        match action {
            EditAction::Insert { pos, bytes } => self.text.delete(*pos, bytes.len()),
            EditAction::Delete { pos, bytes } => self.text.insert(*pos, bytes),
        }
    }

    fn apply_forward(&mut self, action: &EditAction) {
        match action {
            EditAction::Insert { pos, bytes } => self.text.insert(*pos, bytes),
            EditAction::Delete { pos, bytes } => self.text.delete(*pos, bytes.len()),
        }
    }

    /// Pop the top undo group and replay its inverses in reverse-recording
    /// order, pushing the group onto redo. Returns the cursor position to
    /// restore (the position of the first-replayed, i.e. last-recorded,
    /// action).
    pub fn undo(&mut self) -> Option<Offset> {
        self.commit_action_group();
        let group = self.undo_stack.pop()?;
        let mut cursor = None;
        for action in group.actions.iter().rev() {
            if cursor.is_none() {
                cursor = Some(match action {
                    EditAction::Insert { pos, .. } => *pos,
                    EditAction::Delete { pos, .. } => *pos,
                });
            }
            self.apply_raw(action);
        }
        debug!(target: "buffer", actions = group.actions.len(), "undo");
        self.redo_stack.push(group);
        cursor
    }

    /// Pop the top redo group and replay its actions in original recording
    /// order, pushing the group back onto undo. Returns the cursor position
    /// just after the last action's effect.
    pub fn redo(&mut self) -> Option<Offset> {
        let group = self.redo_stack.pop()?;
        let mut cursor = None;
        for action in group.actions.iter() {
            self.apply_forward(action);
            cursor = Some(match action {
                EditAction::Insert { pos, bytes } => pos + bytes.len(),
                EditAction::Delete { pos, .. } => *pos,
            });
        }
        if !group.actions.is_empty() {
            self.dirty = true;
        }
        debug!(target: "buffer", actions = group.actions.len(), "redo");
        self.undo_stack.push(group);
        cursor
    }

    // -- marks ---------------------------------------------------------

    pub fn add_mark(&mut self, region: Region) -> MarkId {
        self.marks.push(Some(Mark { region }));
        MarkId(self.marks.len() - 1)
    }

    pub fn mark(&self, id: MarkId) -> Option<Mark> {
        self.marks.get(id.0).copied().flatten()
    }

    pub fn remove_mark(&mut self, id: MarkId) {
        if let Some(slot) = self.marks.get_mut(id.0) {
            *slot = None;
        }
    }

    fn shift_endpoint_insert(e: Offset, p: Offset, l: usize) -> Offset {
        if e >= p { e + l } else { e }
    }

    fn shift_endpoint_delete(e: Offset, p: Offset, l: usize) -> Offset {
        if e < p {
            e
        } else if e < p + l {
            p
        } else {
            e - l
        }
    }

    fn shift_marks_insert(&mut self, pos: Offset, len: usize) {
        for slot in self.marks.iter_mut().flatten() {
            slot.region.start = Self::shift_endpoint_insert(slot.region.start, pos, len);
            slot.region.end = Self::shift_endpoint_insert(slot.region.end, pos, len);
        }
    }

    fn shift_marks_delete(&mut self, pos: Offset, len: usize) {
        for slot in self.marks.iter_mut().flatten() {
            slot.region.start = Self::shift_endpoint_delete(slot.region.start, pos, len);
            slot.region.end = Self::shift_endpoint_delete(slot.region.end, pos, len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_events::Stat;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct MemStorage {
        files: RefCell<HashMap<PathBuf, Vec<u8>>>,
    }

    impl MemStorage {
        fn new() -> Self {
            Self {
                files: RefCell::new(HashMap::new()),
            }
        }

        fn seed(&self, path: &str, content: &[u8]) {
            self.files
                .borrow_mut()
                .insert(PathBuf::from(path), content.to_vec());
        }
    }

    impl Storage for MemStorage {
        fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
            self.files
                .borrow()
                .get(path)
                .cloned()
                .ok_or_else(|| StorageError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)))
        }
        fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
            self.files
                .borrow_mut()
                .insert(path.to_path_buf(), bytes.to_vec());
            Ok(())
        }
        fn stat(&self, path: &Path) -> Result<Stat, StorageError> {
            if self.files.borrow().contains_key(path) {
                Ok(Stat {
                    is_dir: false,
                    writable: true,
                })
            } else {
                Err(StorageError::Io(std::io::Error::from(
                    std::io::ErrorKind::NotFound,
                )))
            }
        }
        fn list_dir(&self, _path: &Path) -> Result<Vec<String>, StorageError> {
            Ok(vec![])
        }
    }

    #[test]
    fn new_buffer_is_empty_newline() {
        let opts = Options::defaults();
        let buf = Buffer::new(&opts);
        assert_eq!(buf.size(), 1);
        assert!(!buf.is_dirty());
    }

    #[test]
    fn load_missing_file_is_empty_not_error() {
        let storage = MemStorage::new();
        let opts = Options::defaults();
        let buf = Buffer::load(&storage, Path::new("missing.txt"), &opts).unwrap();
        assert_eq!(buf.size(), 1);
        assert!(!buf.is_readonly());
    }

    #[test]
    fn load_existing_file() {
        let storage = MemStorage::new();
        storage.seed("a.txt", b"hello\n");
        let opts = Options::defaults();
        let buf = Buffer::load(&storage, Path::new("a.txt"), &opts).unwrap();
        assert_eq!(buf.text().substring(0, buf.size()), b"hello\n");
    }

    #[test]
    fn save_clears_dirty() {
        let storage = MemStorage::new();
        let opts = Options::defaults();
        let mut buf = Buffer::new(&opts);
        buf.start_action_group();
        buf.do_insert(0, b"hi").unwrap();
        assert!(buf.is_dirty());
        buf.save_as(&storage, Path::new("out.txt")).unwrap();
        assert!(!buf.is_dirty());
        assert_eq!(storage.read(Path::new("out.txt")).unwrap(), b"hi\n");
    }

    #[test]
    fn undo_redo_restores_exact_content() {
        let opts = Options::defaults();
        let mut buf = Buffer::new(&opts);
        buf.start_action_group();
        buf.do_insert(0, b"world").unwrap();
        buf.do_insert(0, b"hello, ").unwrap();
        assert_eq!(buf.text().substring(0, buf.size() - 1), b"hello, world");

        let cursor = buf.undo();
        assert_eq!(buf.size(), 1);
        assert_eq!(cursor, Some(0));

        let cursor = buf.redo();
        assert_eq!(buf.text().substring(0, buf.size() - 1), b"hello, world");
        assert!(cursor.is_some());
    }

    #[test]
    fn undo_then_new_edit_drops_redo_stack() {
        let opts = Options::defaults();
        let mut buf = Buffer::new(&opts);
        buf.start_action_group();
        buf.do_insert(0, b"aaa").unwrap();
        buf.undo();
        buf.start_action_group();
        buf.do_insert(0, b"b").unwrap();
        assert_eq!(buf.redo(), None);
    }

    #[test]
    fn marks_shift_on_insert_and_delete() {
        let opts = Options::defaults();
        let mut buf = Buffer::new(&opts);
        buf.start_action_group();
        buf.do_insert(0, b"0123456789").unwrap();
        let id = buf.add_mark(Region::new(3, 6));

        buf.do_insert(0, b"XX").unwrap();
        assert_eq!(buf.mark(id).unwrap().region, Region::new(5, 8));

        buf.do_delete(0, 2).unwrap();
        assert_eq!(buf.mark(id).unwrap().region, Region::new(3, 6));

        // Delete overlapping the mark's start clamps it into the deletion point.
        buf.do_delete(2, 2).unwrap();
        assert_eq!(buf.mark(id).unwrap().region.start, 2);
    }

    #[test]
    fn readonly_buffer_rejects_edits() {
        let storage = MemStorage::new();
        storage.seed("ro.txt", b"x\n");
        let opts = Options::defaults();
        let mut buf = Buffer::load(&storage, Path::new("ro.txt"), &opts).unwrap();
        buf.readonly = true;
        assert!(matches!(
            buf.do_insert(0, b"y"),
            Err(BufferError::NotModifiable)
        ));
    }

    #[test]
    fn directory_path_is_readonly_listing() {
        struct DirStorage;
        impl Storage for DirStorage {
            fn read(&self, _path: &Path) -> Result<Vec<u8>, StorageError> {
                unreachable!()
            }
            fn write(&self, _path: &Path, _bytes: &[u8]) -> Result<(), StorageError> {
                unreachable!()
            }
            fn stat(&self, _path: &Path) -> Result<Stat, StorageError> {
                Ok(Stat {
                    is_dir: true,
                    writable: false,
                })
            }
            fn list_dir(&self, _path: &Path) -> Result<Vec<String>, StorageError> {
                Ok(vec!["a.txt".to_string(), "sub/".to_string()])
            }
        }
        let opts = Options::defaults();
        let buf = Buffer::load(&DirStorage, Path::new("/some/dir"), &opts).unwrap();
        assert!(buf.is_directory());
        assert!(buf.is_readonly());
        assert!(buf.text().substring(0, buf.size()).starts_with(b"a.txt"));
    }
}
