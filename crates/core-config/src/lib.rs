//! Typed option registry with three-scope inheritance (editor / window / buffer),
//! plus loading of an optional `oxidized.toml` to seed editor-scope defaults.
//!
//! Every recognised option lives in every scope's table; `inherit()` clones a
//! parent scope's table as the starting point for a newly created child
//! (editor -> new buffer, window -> new child window), matching the
//! snapshot-at-creation inheritance model described for the option registry.

use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::{fs, path::PathBuf};
use tracing::{debug, info};

/// The three scopes an option value may be read or written at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionScope {
    Editor,
    Window,
    Buffer,
}

/// A typed option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl OptionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "bool",
            OptionValue::Int(_) => "int",
            OptionValue::Str(_) => "string",
        }
    }
}

struct OptionSpec {
    name: &'static str,
    /// The scope this option conceptually belongs to (per the original
    /// BUFFER_OPTIONS / WINDOW_OPTIONS / EDITOR_OPTIONS groupings).
    home_scope: OptionScope,
    default: OptionValue,
}

macro_rules! spec {
    ($name:literal, $scope:ident, bool, $default:literal) => {
        OptionSpec {
            name: $name,
            home_scope: OptionScope::$scope,
            default: OptionValue::Bool($default),
        }
    };
    ($name:literal, $scope:ident, int, $default:literal) => {
        OptionSpec {
            name: $name,
            home_scope: OptionScope::$scope,
            default: OptionValue::Int($default),
        }
    };
    ($name:literal, $scope:ident, str, $default:literal) => {
        OptionSpec {
            name: $name,
            home_scope: OptionScope::$scope,
            default: OptionValue::Str(String::new()),
        }
    };
}

fn option_table() -> &'static [OptionSpec] {
    // Defaults and scope groupings per the exhaustive option list.
    static TABLE: std::sync::OnceLock<Vec<OptionSpec>> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| {
        vec![
            spec!("autoindent", Buffer, bool, false),
            spec!("smartindent", Buffer, bool, false),
            spec!("shiftwidth", Buffer, int, 8),
            // Not part of the distilled option list, but horizontal scrolling
            // (window geometry) requires tab-expanded column accounting —
            // added here as a buffer-scoped option, default matching vi.
            spec!("tabstop", Buffer, int, 8),
            OptionSpec {
                name: "cinwords",
                home_scope: OptionScope::Buffer,
                default: OptionValue::Str("if,else,while,do,for,switch".to_string()),
            },
            spec!("modifiable", Buffer, bool, true),
            spec!("numberwidth", Window, int, 4),
            spec!("number", Window, bool, false),
            spec!("relativenumber", Window, bool, false),
            spec!("cursorline", Window, bool, false),
            spec!("history", Editor, int, 50),
            spec!("sidescroll", Editor, int, 0),
            spec!("ignorecase", Editor, bool, false),
            spec!("smartcase", Editor, bool, false),
            spec!("splitright", Editor, bool, false),
            spec!("splitbelow", Editor, bool, false),
            spec!("equalalways", Editor, bool, true),
            spec!("hlsearch", Editor, bool, false),
            spec!("incsearch", Editor, bool, false),
            spec!("ruler", Editor, bool, false),
        ]
    })
}

fn find_spec(name: &str) -> Option<&'static OptionSpec> {
    option_table().iter().find(|s| s.name == name)
}

/// Error raised by option get/set.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OptionError {
    #[error("no such option: {0}")]
    NoSuchOption(String),
    #[error("option {name} expects a {expected} value")]
    TypeMismatch {
        name: String,
        expected: &'static str,
    },
}

/// One scope's table of option values. Every recognised option is present.
#[derive(Debug, Clone)]
pub struct Options {
    values: HashMap<&'static str, OptionValue>,
}

impl Default for Options {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Options {
    /// A table populated with every option at its documented default.
    pub fn defaults() -> Self {
        let values = option_table()
            .iter()
            .map(|s| (s.name, s.default.clone()))
            .collect();
        Self { values }
    }

    /// Clone this table as the starting point for a newly created child scope.
    pub fn inherit(&self) -> Self {
        self.clone()
    }

    pub fn get(&self, name: &str) -> Result<&OptionValue, OptionError> {
        self.values
            .get(name)
            .ok_or_else(|| OptionError::NoSuchOption(name.to_string()))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, OptionError> {
        self.get(name)?
            .as_bool()
            .ok_or_else(|| OptionError::TypeMismatch {
                name: name.to_string(),
                expected: "bool",
            })
    }

    pub fn get_int(&self, name: &str) -> Result<i64, OptionError> {
        self.get(name)?
            .as_int()
            .ok_or_else(|| OptionError::TypeMismatch {
                name: name.to_string(),
                expected: "int",
            })
    }

    pub fn get_str(&self, name: &str) -> Result<&str, OptionError> {
        self.get(name)?
            .as_str()
            .ok_or_else(|| OptionError::TypeMismatch {
                name: name.to_string(),
                expected: "string",
            })
    }

    /// Set an option, checking it exists and that the new value's type
    /// matches the existing one.
    pub fn set(&mut self, name: &str, value: OptionValue) -> Result<(), OptionError> {
        let current = self
            .values
            .get(name)
            .ok_or_else(|| OptionError::NoSuchOption(name.to_string()))?;
        if std::mem::discriminant(current) != std::mem::discriminant(&value) {
            return Err(OptionError::TypeMismatch {
                name: name.to_string(),
                expected: current.kind_name(),
            });
        }
        debug!(target: "options", option = name, "option_set");
        self.values.insert(find_spec(name).unwrap().name, value);
        Ok(())
    }

    /// Toggle a bool option (`:set opt!`) or `:set opt&` reset to default.
    pub fn reset_to_default(&mut self, name: &str) -> Result<(), OptionError> {
        let s = find_spec(name).ok_or_else(|| OptionError::NoSuchOption(name.to_string()))?;
        self.values.insert(s.name, s.default.clone());
        Ok(())
    }

    pub fn home_scope(name: &str) -> Option<OptionScope> {
        find_spec(name).map(|s| s.home_scope)
    }

    pub fn exists(name: &str) -> bool {
        find_spec(name).is_some()
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        option_table().iter().map(|s| s.name)
    }
}

// ---------------------------------------------------------------------------
// oxidized.toml: optional file seeding editor-scope option values at startup.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub options: HashMap<String, toml::Value>,
}

/// Best-effort config path following platform conventions.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("oxidized.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("oxidized").join("oxidized.toml");
    }
    PathBuf::from("oxidized.toml")
}

/// Load `oxidized.toml` (or the given override path) and apply any `[options]`
/// entries on top of the editor-scope defaults. Unknown or ill-typed entries
/// are logged and skipped rather than failing startup.
pub fn load_editor_options(path: Option<PathBuf>) -> Result<Options> {
    let path = path.unwrap_or_else(discover);
    let mut options = Options::defaults();
    let Ok(content) = fs::read_to_string(&path) else {
        return Ok(options);
    };
    let file: ConfigFile = match toml::from_str(&content) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(target: "config", path = %path.display(), error = %e, "config_parse_failed");
            return Ok(options);
        }
    };
    for (name, raw) in file.options {
        let value = match raw {
            toml::Value::Boolean(b) => OptionValue::Bool(b),
            toml::Value::Integer(i) => OptionValue::Int(i),
            toml::Value::String(s) => OptionValue::Str(s),
            other => {
                tracing::warn!(target: "config", option = %name, value = ?other, "unsupported_option_value_type");
                continue;
            }
        };
        match options.set(&name, value) {
            Ok(()) => info!(target: "config", option = %name, "config_option_applied"),
            Err(e) => tracing::warn!(target: "config", option = %name, error = %e, "config_option_rejected"),
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let opts = Options::defaults();
        assert_eq!(opts.get_bool("autoindent").unwrap(), false);
        assert_eq!(opts.get_int("shiftwidth").unwrap(), 8);
        assert_eq!(opts.get_str("cinwords").unwrap(), "if,else,while,do,for,switch");
        assert_eq!(opts.get_bool("modifiable").unwrap(), true);
        assert_eq!(opts.get_int("numberwidth").unwrap(), 4);
        assert_eq!(opts.get_int("history").unwrap(), 50);
        assert_eq!(opts.get_bool("equalalways").unwrap(), true);
    }

    #[test]
    fn unknown_option_errors() {
        let opts = Options::defaults();
        assert!(matches!(
            opts.get("nope"),
            Err(OptionError::NoSuchOption(_))
        ));
    }

    #[test]
    fn set_type_mismatch_rejected() {
        let mut opts = Options::defaults();
        let err = opts.set("number", OptionValue::Str("x".into())).unwrap_err();
        assert!(matches!(err, OptionError::TypeMismatch { .. }));
    }

    #[test]
    fn inherit_clones_independent_copy() {
        let mut editor_opts = Options::defaults();
        editor_opts.set("ignorecase", OptionValue::Bool(true)).unwrap();
        let buffer_opts = editor_opts.inherit();
        assert_eq!(buffer_opts.get_bool("ignorecase").unwrap(), true);

        editor_opts.set("ignorecase", OptionValue::Bool(false)).unwrap();
        // Buffer's snapshot is unaffected by later editor-scope changes.
        assert_eq!(buffer_opts.get_bool("ignorecase").unwrap(), true);
    }

    #[test]
    fn reset_to_default_restores_value() {
        let mut opts = Options::defaults();
        opts.set("number", OptionValue::Bool(true)).unwrap();
        opts.reset_to_default("number").unwrap();
        assert_eq!(opts.get_bool("number").unwrap(), false);
    }

    #[test]
    fn home_scope_groupings() {
        assert_eq!(Options::home_scope("shiftwidth"), Some(OptionScope::Buffer));
        assert_eq!(Options::home_scope("number"), Some(OptionScope::Window));
        assert_eq!(Options::home_scope("hlsearch"), Some(OptionScope::Editor));
        assert_eq!(Options::home_scope("nope"), None);
    }

    #[test]
    fn load_editor_options_missing_file_uses_defaults() {
        let opts = load_editor_options(Some(PathBuf::from("__nonexistent__.toml"))).unwrap();
        assert_eq!(opts.get_int("shiftwidth").unwrap(), 8);
    }

    #[test]
    fn load_editor_options_applies_file_values() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[options]\nignorecase = true\nshiftwidth = 4\n",
        )
        .unwrap();
        let opts = load_editor_options(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(opts.get_bool("ignorecase").unwrap(), true);
        assert_eq!(opts.get_int("shiftwidth").unwrap(), 4);
    }

    #[test]
    fn load_editor_options_skips_unknown_name() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[options]\nbogus = true\n").unwrap();
        // Should not error; bogus entry is logged and skipped.
        let opts = load_editor_options(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(opts.get_bool("hlsearch").unwrap(), false);
    }
}
