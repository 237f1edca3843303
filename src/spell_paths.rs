//! Purpose: CLI-side resolution of spell directories and the settings source path.
//! Exports: `NamespaceArg`, `parse_namespace_arg`, `resolve_config`.
//! Role: Keep `--spells-dir` and `--config` semantics in one place for every command.
//! Invariants: Default settings file is `settings.json` in the working directory, used only if present.
//! Invariants: Namespace names are word characters; without `=NAME` the directory name is used.

use std::path::{Path, PathBuf};

use spellbook::core::error::{Error, ErrorKind};

pub(crate) const DEFAULT_CONFIG: &str = "settings.json";

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct NamespaceArg {
    pub(crate) dir: PathBuf,
    pub(crate) name: String,
}

/// Parses `DIR[=NAME]`.
pub(crate) fn parse_namespace_arg(raw: &str) -> Result<NamespaceArg, Error> {
    let (dir, name) = match raw.rsplit_once('=') {
        Some((dir, name)) => (dir, Some(name)),
        None => (raw, None),
    };
    if dir.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--spells-dir requires a directory")
            .with_hint("Use `--spells-dir DIR` or `--spells-dir DIR=NAMESPACE`."));
    }
    let dir = PathBuf::from(dir);
    let name = match name {
        Some(name) => name.to_string(),
        None => dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("app")
            .to_string(),
    };
    if name.is_empty() || !name.chars().all(|ch| ch.is_alphanumeric() || ch == '_' || ch == '-') {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("invalid namespace name `{name}`"))
            .with_path(&dir)
            .with_hint("Namespace names use letters, digits, `_` or `-`."));
    }
    Ok(NamespaceArg { dir, name })
}

/// An explicit path is always used; otherwise `settings.json` is picked up when it exists.
pub(crate) fn resolve_config(explicit: Option<&Path>, cwd: &Path) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let candidate = cwd.join(DEFAULT_CONFIG);
            candidate.is_file().then_some(candidate)
        }
    }
}
