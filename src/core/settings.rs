//! Purpose: Typed settings registry: key parsing, descriptors, load, reads and live apply.
//! Exports: `ValueType`, `SettingKey`, `SettingDescriptor`, `SettingsRegistry`, `LoadReport`.
//! Role: Single process-wide store shared by spells, the synchronizer and entry points.
//! Invariants: The tree only ever holds registered keys with values of the registered type.
//! Invariants: Registration closes at load; load happens once and swaps the whole tree in.
//! Invariants: `apply` replaces one key under one write and never touches read-only keys.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};
use crate::json::parse;

const READ_ONLY_MARKER: char = '!';

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    List,
    Map,
}

impl ValueType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(ValueType::Bool),
            "int" => Some(ValueType::Int),
            "float" => Some(ValueType::Float),
            "string" => Some(ValueType::String),
            "list" => Some(ValueType::List),
            "map" => Some(ValueType::Map),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::List => "list",
            ValueType::Map => "map",
        }
    }

    /// Structural check; integers are accepted where a float is expected.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ValueType::Bool => value.is_boolean(),
            ValueType::Int => value.is_i64() || value.is_u64(),
            ValueType::Float => value.is_number(),
            ValueType::String => value.is_string(),
            ValueType::List => value.is_array(),
            ValueType::Map => value.is_object(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(number) if number.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SettingKey {
    pub group: String,
    pub option: String,
    pub read_only: bool,
}

impl SettingKey {
    /// Parses `[!]group.option`, where both segments are word characters.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let (read_only, body) = match raw.strip_prefix(READ_ONLY_MARKER) {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let malformed = || {
            Error::new(ErrorKind::MalformedKey)
                .with_message("setting keys must look like `group.option`")
                .with_key(raw)
                .with_hint("Prefix with `!` to mark a setting read-only.")
        };
        let (group, option) = body.split_once('.').ok_or_else(malformed)?;
        if !is_word(group) || !is_word(option) {
            return Err(malformed());
        }
        Ok(Self {
            group: group.to_string(),
            option: option.to_string(),
            read_only,
        })
    }

    pub fn fqn(&self) -> String {
        format!("{}.{}", self.group, self.option)
    }
}

fn is_word(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|ch| ch.is_alphanumeric() || ch == '_')
}

#[derive(Clone, Debug, PartialEq)]
pub struct SettingDescriptor {
    pub group: String,
    pub option: String,
    pub read_only: bool,
    pub value_type: ValueType,
    pub comment: String,
    pub default: Option<Value>,
}

impl SettingDescriptor {
    pub fn fqn(&self) -> String {
        format!("{}.{}", self.group, self.option)
    }

    fn check(&self, value: &Value) -> Result<(), Error> {
        if self.value_type.accepts(value) {
            return Ok(());
        }
        Err(Error::new(ErrorKind::SettingType)
            .with_message("setting value has the wrong type")
            .with_key(self.fqn())
            .with_types(self.value_type, describe_value(value)))
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoadReport {
    pub loaded: usize,
    pub defaulted: usize,
    pub ignored: Vec<String>,
}

type SettingsTree = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Default)]
pub struct SettingsRegistry {
    descriptors: RwLock<BTreeMap<String, SettingDescriptor>>,
    tree: RwLock<SettingsTree>,
    closed: AtomicBool,
    loaded: AtomicBool,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        raw_key: &str,
        value_type: ValueType,
        comment: impl Into<String>,
    ) -> Result<SettingDescriptor, Error> {
        self.insert(raw_key, value_type, comment.into(), None)
    }

    pub fn register_with_default(
        &self,
        raw_key: &str,
        value_type: ValueType,
        comment: impl Into<String>,
        default: Value,
    ) -> Result<SettingDescriptor, Error> {
        self.insert(raw_key, value_type, comment.into(), Some(default))
    }

    fn insert(
        &self,
        raw_key: &str,
        value_type: ValueType,
        comment: String,
        default: Option<Value>,
    ) -> Result<SettingDescriptor, Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::RegistrationClosed)
                .with_message("settings can only be registered before load")
                .with_key(raw_key));
        }
        let key = SettingKey::parse(raw_key)?;
        let fqn = key.fqn();
        let descriptor = SettingDescriptor {
            group: key.group,
            option: key.option,
            read_only: key.read_only,
            value_type,
            comment,
            default,
        };
        if let Some(default) = &descriptor.default {
            descriptor.check(default)?;
        }

        let mut descriptors = write_lock(&self.descriptors)?;
        if let Some(existing) = descriptors.get(&fqn) {
            return Err(Error::new(ErrorKind::DuplicateSetting)
                .with_message(format!(
                    "setting is already registered ({})",
                    existing.comment
                ))
                .with_key(fqn));
        }
        tracing::debug!(key = %fqn, value_type = %value_type, read_only = descriptor.read_only, "registered setting");
        descriptors.insert(fqn, descriptor.clone());
        Ok(descriptor)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<LoadReport, Error> {
        let source = parse::read_document(path.as_ref())?;
        self.load(&source)
    }

    pub fn load(&self, source: &Value) -> Result<LoadReport, Error> {
        if self.loaded.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::Usage).with_message("settings are already loaded"));
        }
        let groups = source.as_object().ok_or_else(|| {
            Error::new(ErrorKind::SettingType)
                .with_message("settings source must be an object of groups")
                .with_types(ValueType::Map, describe_value(source))
        })?;
        self.closed.store(true, Ordering::Release);

        let descriptors = read_lock(&self.descriptors)?;
        let mut report = LoadReport::default();
        let mut tree = SettingsTree::new();
        for (fqn, descriptor) in descriptors.iter() {
            let value = match lookup(groups, &descriptor.group, &descriptor.option)? {
                Some(value) => {
                    descriptor.check(value)?;
                    report.loaded += 1;
                    value.clone()
                }
                None => match &descriptor.default {
                    Some(default) => {
                        report.defaulted += 1;
                        default.clone()
                    }
                    None => {
                        return Err(Error::new(ErrorKind::MissingSetting)
                            .with_message("required setting is missing from the source")
                            .with_key(fqn.clone()));
                    }
                },
            };
            tree.entry(descriptor.group.clone())
                .or_default()
                .insert(descriptor.option.clone(), value);
        }

        for (group, options) in groups {
            let Some(options) = options.as_object() else {
                // Groups holding registered keys were already type-checked above.
                tracing::warn!(group = %group, "ignoring non-object settings group");
                report.ignored.push(group.clone());
                continue;
            };
            for option in options.keys() {
                let fqn = format!("{group}.{option}");
                if !descriptors.contains_key(&fqn) {
                    tracing::warn!(key = %fqn, "ignoring unregistered setting");
                    report.ignored.push(fqn);
                }
            }
        }
        drop(descriptors);

        *write_lock(&self.tree)? = tree;
        self.loaded.store(true, Ordering::Release);
        tracing::info!(
            loaded = report.loaded,
            defaulted = report.defaulted,
            ignored = report.ignored.len(),
            "settings loaded"
        );
        Ok(report)
    }

    pub fn get(&self, group: &str, option: &str) -> Result<Value, Error> {
        let fqn = format!("{group}.{option}");
        if !read_lock(&self.descriptors)?.contains_key(&fqn) {
            return Err(unknown_setting(&fqn));
        }
        if !self.is_loaded() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("settings are read after load")
                .with_key(fqn));
        }
        read_lock(&self.tree)?
            .get(group)
            .and_then(|options| options.get(option))
            .cloned()
            .ok_or_else(|| {
                Error::new(ErrorKind::Internal)
                    .with_message("registered setting missing from loaded tree")
                    .with_key(fqn)
            })
    }

    pub fn value(&self, fqn: &str) -> Result<Value, Error> {
        let (group, option) = fqn.split_once('.').ok_or_else(|| unknown_setting(fqn))?;
        self.get(group, option)
    }

    pub fn get_as<T: DeserializeOwned>(&self, fqn: &str) -> Result<T, Error> {
        let value = self.value(fqn)?;
        serde_json::from_value(value).map_err(|err| {
            Error::new(ErrorKind::SettingType)
                .with_message("setting does not decode into the requested type")
                .with_key(fqn)
                .with_source(err)
        })
    }

    pub fn group(&self, group: &str) -> Result<Map<String, Value>, Error> {
        if !self.is_loaded() {
            return Err(Error::new(ErrorKind::Usage).with_message("settings are read after load"));
        }
        let tree = read_lock(&self.tree)?;
        let options = tree.get(group).ok_or_else(|| {
            Error::new(ErrorKind::UnknownSetting)
                .with_message("no settings registered in group")
                .with_key(group)
        })?;
        Ok(options
            .iter()
            .map(|(option, value)| (option.clone(), value.clone()))
            .collect())
    }

    pub fn snapshot(&self) -> Result<Value, Error> {
        let tree = read_lock(&self.tree)?;
        let mut out = Map::new();
        for (group, options) in tree.iter() {
            let inner = options
                .iter()
                .map(|(option, value)| (option.clone(), value.clone()))
                .collect::<Map<_, _>>();
            out.insert(group.clone(), Value::Object(inner));
        }
        Ok(Value::Object(out))
    }

    pub fn descriptor(&self, fqn: &str) -> Result<SettingDescriptor, Error> {
        read_lock(&self.descriptors)?
            .get(fqn)
            .cloned()
            .ok_or_else(|| unknown_setting(fqn))
    }

    pub fn descriptors(&self) -> Result<Vec<SettingDescriptor>, Error> {
        Ok(read_lock(&self.descriptors)?.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        read_lock(&self.descriptors)
            .map(|descriptors| descriptors.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mutable_keys(&self) -> Result<Vec<String>, Error> {
        Ok(read_lock(&self.descriptors)?
            .iter()
            .filter(|(_, descriptor)| !descriptor.read_only)
            .map(|(fqn, _)| fqn.clone())
            .collect())
    }

    /// Replaces a single mutable value; returns whether the stored value changed.
    pub fn apply(&self, fqn: &str, value: Value) -> Result<bool, Error> {
        let descriptor = self.descriptor(fqn)?;
        if descriptor.read_only {
            return Err(Error::new(ErrorKind::ReadOnlyViolation)
                .with_message("read-only settings cannot change at runtime")
                .with_key(fqn));
        }
        descriptor.check(&value)?;
        if !self.is_loaded() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("settings are applied after load")
                .with_key(fqn));
        }

        let mut tree = write_lock(&self.tree)?;
        let slot = tree
            .entry(descriptor.group)
            .or_default()
            .entry(descriptor.option)
            .or_insert(Value::Null);
        if *slot == value {
            return Ok(false);
        }
        *slot = value;
        Ok(true)
    }
}

fn lookup<'a>(
    groups: &'a Map<String, Value>,
    group: &str,
    option: &str,
) -> Result<Option<&'a Value>, Error> {
    let Some(options) = groups.get(group) else {
        return Ok(None);
    };
    let options = options.as_object().ok_or_else(|| {
        Error::new(ErrorKind::SettingType)
            .with_message("settings group must be an object")
            .with_key(group)
            .with_types(ValueType::Map, describe_value(options))
    })?;
    Ok(options.get(option))
}

fn unknown_setting(fqn: &str) -> Error {
    Error::new(ErrorKind::UnknownSetting)
        .with_message("setting was never registered")
        .with_key(fqn)
}

fn read_lock<T>(lock: &RwLock<T>) -> Result<std::sync::RwLockReadGuard<'_, T>, Error> {
    lock.read()
        .map_err(|_| Error::new(ErrorKind::Internal).with_message("settings lock poisoned"))
}

fn write_lock<T>(lock: &RwLock<T>) -> Result<std::sync::RwLockWriteGuard<'_, T>, Error> {
    lock.write()
        .map_err(|_| Error::new(ErrorKind::Internal).with_message("settings lock poisoned"))
}
