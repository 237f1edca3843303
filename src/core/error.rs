// Error taxonomy for discovery, settings, entry points and lifecycle failures.
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use crate::core::settings::ValueType;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Io,
    Parse,
    DuplicateSpell,
    UnknownSpell,
    MissingDependency,
    CircularDependency,
    DuplicateSetting,
    MalformedKey,
    SettingType,
    MissingSetting,
    UnknownSetting,
    ReadOnlyViolation,
    RegistrationClosed,
    DuplicateEntryPoint,
    UnknownEntryPoint,
    UndeclaredDependency,
    UnresolvedDependency,
    AlreadyInitialized,
    Backend,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCategory {
    Discovery,
    Configuration,
    Runtime,
    Lifecycle,
    Internal,
}

impl ErrorKind {
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::DuplicateSpell
            | ErrorKind::UnknownSpell
            | ErrorKind::MissingDependency
            | ErrorKind::CircularDependency => ErrorCategory::Discovery,
            ErrorKind::DuplicateSetting
            | ErrorKind::MalformedKey
            | ErrorKind::SettingType
            | ErrorKind::MissingSetting
            | ErrorKind::ReadOnlyViolation
            | ErrorKind::RegistrationClosed
            | ErrorKind::Parse => ErrorCategory::Configuration,
            ErrorKind::DuplicateEntryPoint
            | ErrorKind::UnknownEntryPoint
            | ErrorKind::UnknownSetting
            | ErrorKind::Usage
            | ErrorKind::Backend
            | ErrorKind::Io => ErrorCategory::Runtime,
            ErrorKind::UndeclaredDependency
            | ErrorKind::UnresolvedDependency
            | ErrorKind::AlreadyInitialized => ErrorCategory::Lifecycle,
            ErrorKind::Internal => ErrorCategory::Internal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Internal => "Internal",
            ErrorKind::Usage => "Usage",
            ErrorKind::Io => "Io",
            ErrorKind::Parse => "Parse",
            ErrorKind::DuplicateSpell => "DuplicateSpell",
            ErrorKind::UnknownSpell => "UnknownSpell",
            ErrorKind::MissingDependency => "MissingDependency",
            ErrorKind::CircularDependency => "CircularDependency",
            ErrorKind::DuplicateSetting => "DuplicateSetting",
            ErrorKind::MalformedKey => "MalformedKey",
            ErrorKind::SettingType => "SettingType",
            ErrorKind::MissingSetting => "MissingSetting",
            ErrorKind::UnknownSetting => "UnknownSetting",
            ErrorKind::ReadOnlyViolation => "ReadOnlyViolation",
            ErrorKind::RegistrationClosed => "RegistrationClosed",
            ErrorKind::DuplicateEntryPoint => "DuplicateEntryPoint",
            ErrorKind::UnknownEntryPoint => "UnknownEntryPoint",
            ErrorKind::UndeclaredDependency => "UndeclaredDependency",
            ErrorKind::UnresolvedDependency => "UnresolvedDependency",
            ErrorKind::AlreadyInitialized => "AlreadyInitialized",
            ErrorKind::Backend => "Backend",
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    path: Option<PathBuf>,
    key: Option<String>,
    spell: Option<String>,
    expected: Option<ValueType>,
    actual: Option<String>,
    cycle: Vec<String>,
    hint: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            path: None,
            key: None,
            spell: None,
            expected: None,
            actual: None,
            cycle: Vec::new(),
            hint: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn spell(&self) -> Option<&str> {
        self.spell.as_deref()
    }

    pub fn expected(&self) -> Option<ValueType> {
        self.expected
    }

    pub fn actual(&self) -> Option<&str> {
        self.actual.as_deref()
    }

    pub fn cycle(&self) -> &[String] {
        &self.cycle
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_spell(mut self, spell: impl Into<String>) -> Self {
        self.spell = Some(spell.into());
        self
    }

    pub fn with_types(mut self, expected: ValueType, actual: impl Into<String>) -> Self {
        self.expected = Some(expected);
        self.actual = Some(actual.into());
        self
    }

    pub fn with_cycle(mut self, cycle: Vec<String>) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(key) = &self.key {
            write!(f, " (key: {key})")?;
        }
        if let Some(spell) = &self.spell {
            write!(f, " (spell: {spell})")?;
        }
        if let (Some(expected), Some(actual)) = (self.expected, &self.actual) {
            write!(f, " (expected: {expected}, actual: {actual})")?;
        }
        if !self.cycle.is_empty() {
            write!(f, " (cycle: {})", self.cycle.join(" -> "))?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Io => 3,
        ErrorKind::Parse => 4,
        ErrorKind::DuplicateSpell
        | ErrorKind::UnknownSpell
        | ErrorKind::MissingDependency
        | ErrorKind::CircularDependency => 5,
        ErrorKind::DuplicateSetting
        | ErrorKind::MalformedKey
        | ErrorKind::SettingType
        | ErrorKind::MissingSetting
        | ErrorKind::ReadOnlyViolation
        | ErrorKind::RegistrationClosed => 6,
        ErrorKind::DuplicateEntryPoint
        | ErrorKind::UnknownEntryPoint
        | ErrorKind::UnknownSetting => 7,
        ErrorKind::UndeclaredDependency
        | ErrorKind::UnresolvedDependency
        | ErrorKind::AlreadyInitialized => 8,
        ErrorKind::Backend => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCategory, ErrorKind, to_exit_code};
    use crate::core::settings::ValueType;

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::Io, 3),
            (ErrorKind::Parse, 4),
            (ErrorKind::CircularDependency, 5),
            (ErrorKind::DuplicateSpell, 5),
            (ErrorKind::SettingType, 6),
            (ErrorKind::MissingSetting, 6),
            (ErrorKind::UnknownEntryPoint, 7),
            (ErrorKind::UnresolvedDependency, 8),
            (ErrorKind::Backend, 9),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn categories_follow_taxonomy() {
        assert_eq!(ErrorKind::DuplicateSpell.category(), ErrorCategory::Discovery);
        assert_eq!(ErrorKind::MalformedKey.category(), ErrorCategory::Configuration);
        assert_eq!(ErrorKind::UnknownEntryPoint.category(), ErrorCategory::Runtime);
        assert_eq!(
            ErrorKind::UnresolvedDependency.category(),
            ErrorCategory::Lifecycle
        );
    }

    #[test]
    fn display_carries_context() {
        let err = Error::new(ErrorKind::SettingType)
            .with_message("value has the wrong type")
            .with_key("sessions.expiration_interval")
            .with_types(ValueType::Int, "string");
        let text = err.to_string();
        assert!(text.starts_with("SettingType: value has the wrong type"));
        assert!(text.contains("sessions.expiration_interval"));
        assert!(text.contains("expected: int, actual: string"));

        let err = Error::new(ErrorKind::CircularDependency)
            .with_cycle(vec!["a".to_string(), "b".to_string(), "a".to_string()]);
        assert!(err.to_string().contains("a -> b -> a"));
    }
}
