// One-shot registry of named callables made available after initialization.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntryArgs {
    pub positional: Vec<Value>,
    pub keyword: Map<String, Value>,
}

impl EntryArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name)
    }
}

pub type EntryFn = Arc<dyn Fn(EntryArgs) -> Result<Value, Error> + Send + Sync>;

#[derive(Default)]
pub struct EntryPoints {
    entries: RwLock<BTreeMap<String, EntryFn>>,
}

impl EntryPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, id: &str, entry: F) -> Result<(), Error>
    where
        F: Fn(EntryArgs) -> Result<Value, Error> + Send + Sync + 'static,
    {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("entry point lock poisoned"))?;
        if entries.contains_key(id) {
            return Err(Error::new(ErrorKind::DuplicateEntryPoint)
                .with_message(format!("entry point `{id}` is already registered")));
        }
        tracing::debug!(entry_point = id, "registered entry point");
        entries.insert(id.to_string(), Arc::new(entry));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<EntryFn, Error> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("entry point lock poisoned"))?;
        entries.get(id).cloned().ok_or_else(|| {
            Error::new(ErrorKind::UnknownEntryPoint)
                .with_message(format!("no entry point named `{id}`"))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for EntryPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoints")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{EntryArgs, EntryPoints};
    use crate::core::error::ErrorKind;
    use serde_json::{Value, json};

    #[test]
    fn registration_is_one_shot() {
        let entries = EntryPoints::new();
        entries
            .register("echo", |args: EntryArgs| Ok(Value::Array(args.positional)))
            .expect("register");
        let err = entries
            .register("echo", |_| Ok(Value::Null))
            .expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::DuplicateEntryPoint);

        let echo = entries.get("echo").expect("get");
        let out = echo(EntryArgs::new().arg(1).arg("two").kwarg("k", true)).expect("call");
        assert_eq!(out, json!([1, "two"]));
        assert_eq!(entries.names(), vec!["echo".to_string()]);
    }

    #[test]
    fn unknown_entry_point_is_typed() {
        let entries = EntryPoints::new();
        match entries.get("missing") {
            Ok(_) => panic!("expected unknown entry point"),
            Err(err) => assert_eq!(err.kind(), ErrorKind::UnknownEntryPoint),
        }
    }
}
