//! Purpose: Define the spell contract and the metadata the enumerator reads without instantiating.
//! Exports: `Spell`, `AsAny`, `SpellMeta`, `SpellDescriptor`, `ActiveSpell`, `SpellState`, `SpellContext`.
//! Role: The typed two-phase interface every plugin implements; the orchestrator drives it uniformly.
//! Invariants: `pre_configure` and `post_configure` each run exactly once per spell per process.
//! Invariants: `SpellContext::dependency` only resolves names the spell declared as dependencies.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::core::capability::Capability;
use crate::core::entry::EntryArgs;
use crate::core::error::{Error, ErrorKind};
use crate::core::orchestrator::Core;
use crate::core::settings::{SettingDescriptor, SettingsRegistry, ValueType};
use serde_json::Value;

pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub trait Spell: AsAny + Send + Sync + 'static {
    /// Register settings; nothing here may rely on another spell being configured.
    fn pre_configure(&self, ctx: &SpellContext<'_>) -> Result<(), Error>;

    /// Runs after every spell pre-configured and the settings tree loaded.
    fn post_configure(&self, ctx: &SpellContext<'_>) -> Result<(), Error>;

    fn stop(&self, _core: &Core) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpellMeta {
    pub name: String,
    pub info: String,
    pub deps: Vec<String>,
    pub provides: Vec<String>,
    pub capabilities: Vec<Capability>,
}

impl SpellMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            info: String::new(),
            deps: Vec::new(),
            provides: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.deps.contains(&name) {
            self.deps.push(name);
        }
        self
    }

    pub fn provides(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.provides.contains(&tag) {
            self.provides.push(tag);
        }
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn implements(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

pub type SpellFactory = Arc<dyn Fn() -> Result<Arc<dyn Spell>, Error> + Send + Sync>;

/// Metadata plus a factory; cloning never instantiates the spell.
#[derive(Clone)]
pub struct SpellDescriptor {
    meta: SpellMeta,
    factory: SpellFactory,
}

impl SpellDescriptor {
    pub fn new<F>(meta: SpellMeta, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Spell>, Error> + Send + Sync + 'static,
    {
        Self {
            meta,
            factory: Arc::new(factory),
        }
    }

    pub fn of<S: Spell + Default>(meta: SpellMeta) -> Self {
        Self::new(meta, || Ok(Arc::new(S::default()) as Arc<dyn Spell>))
    }

    pub fn meta(&self) -> &SpellMeta {
        &self.meta
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub(crate) fn instantiate(&self) -> Result<Arc<dyn Spell>, Error> {
        (self.factory)().map_err(|err| err.with_spell(self.meta.name.clone()))
    }
}

impl fmt::Debug for SpellDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpellDescriptor")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpellState {
    Discovered,
    Instantiated,
    PreConfigured,
    PostConfigured,
    Active,
}

/// A live spell together with where it was discovered.
#[derive(Clone)]
pub struct ActiveSpell {
    pub(crate) meta: SpellMeta,
    pub(crate) namespace: String,
    pub(crate) module: String,
    pub(crate) instance: Arc<dyn Spell>,
}

impl ActiveSpell {
    pub fn meta(&self) -> &SpellMeta {
        &self.meta
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn instance(&self) -> &Arc<dyn Spell> {
        &self.instance
    }

    pub fn downcast<T: Spell>(&self) -> Option<&T> {
        let spell: &dyn Spell = &*self.instance;
        spell.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for ActiveSpell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSpell")
            .field("name", &self.meta.name)
            .field("namespace", &self.namespace)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

/// The view of the core a spell gets during either configuration phase.
pub struct SpellContext<'a> {
    core: &'a Core,
    spell: &'a ActiveSpell,
}

impl<'a> SpellContext<'a> {
    pub(crate) fn new(core: &'a Core, spell: &'a ActiveSpell) -> Self {
        Self { core, spell }
    }

    pub fn core(&self) -> &'a Core {
        self.core
    }

    pub fn spell(&self) -> &'a ActiveSpell {
        self.spell
    }

    pub fn settings(&self) -> &'a Arc<SettingsRegistry> {
        self.core.settings()
    }

    pub fn register_option(
        &self,
        raw_key: &str,
        value_type: ValueType,
        comment: &str,
    ) -> Result<SettingDescriptor, Error> {
        self.core
            .register_option(raw_key, value_type, comment)
            .map_err(|err| err.with_spell(self.spell.name()))
    }

    pub fn register_option_with_default(
        &self,
        raw_key: &str,
        value_type: ValueType,
        comment: &str,
        default: Value,
    ) -> Result<SettingDescriptor, Error> {
        self.core
            .settings()
            .register_with_default(raw_key, value_type, comment, default)
            .map_err(|err| err.with_spell(self.spell.name()))
    }

    pub fn register_entry_point<F>(&self, id: &str, entry: F) -> Result<(), Error>
    where
        F: Fn(EntryArgs) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.core
            .register_entry_point(id, entry)
            .map_err(|err| err.with_spell(self.spell.name()))
    }

    pub fn dependency(&self, name: &str) -> Result<&'a ActiveSpell, Error> {
        if !self.spell.meta.deps.iter().any(|dep| dep == name) {
            return Err(Error::new(ErrorKind::UndeclaredDependency)
                .with_message(format!("looked up `{name}` without declaring it"))
                .with_spell(self.spell.name())
                .with_hint("Add the spell to the dependency list so it is ordered first."));
        }
        self.core.spell(name).ok_or_else(|| {
            Error::new(ErrorKind::UnresolvedDependency)
                .with_message(format!("dependency `{name}` is not active at configure time"))
                .with_spell(self.spell.name())
        })
    }

    pub fn dependency_as<T: Spell>(&self, name: &str) -> Result<&'a T, Error> {
        let dependency = self.dependency(name)?;
        dependency.downcast::<T>().ok_or_else(|| {
            Error::new(ErrorKind::UnresolvedDependency)
                .with_message(format!(
                    "dependency `{name}` is not a {}",
                    std::any::type_name::<T>()
                ))
                .with_spell(self.spell.name())
        })
    }

    pub fn implementations(&self, capability: &Capability) -> Vec<&'a ActiveSpell> {
        self.core.implementations(capability)
    }

    pub fn providers(&self, tag: &str) -> Vec<&'a ActiveSpell> {
        self.core.providers(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::SpellMeta;
    use crate::core::capability::Capability;

    #[test]
    fn meta_builder_deduplicates_sets() {
        let meta = SpellMeta::new("sessions")
            .info("session spell")
            .depends_on("core")
            .depends_on("core")
            .provides("session")
            .provides("session")
            .capability(Capability::Request)
            .capability(Capability::Request);
        assert_eq!(meta.deps, vec!["core".to_string()]);
        assert_eq!(meta.provides, vec!["session".to_string()]);
        assert!(meta.implements(&Capability::Request));
        assert!(!meta.implements(&Capability::Handling));
    }
}
