//! Purpose: Own the process-wide core and drive every spell through the two-phase lifecycle.
//! Exports: `Core`, `CoreOptions`, `CoreExtension`, `SettingsSource`.
//! Role: Stable surface spells and callers use: options, entry points, capability queries, shutdown.
//! Invariants: At most one live `Core` per process; the guard is released on drop or failed init.
//! Invariants: No spell enters `post_configure` before every spell pre-configured and settings loaded.
//! Invariants: `stop` runs spell teardown in reverse instantiation order, at most once.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::{Value, json};

use crate::core::capability::Capability;
use crate::core::entry::{EntryArgs, EntryPoints};
use crate::core::enumerator::Enumerator;
use crate::core::error::{Error, ErrorKind};
use crate::core::log_queue::{LogQueue, LogSender};
use crate::core::namespace::Namespace;
use crate::core::settings::{SettingDescriptor, SettingsRegistry, ValueType};
use crate::core::spell::{ActiveSpell, Spell, SpellContext, SpellState};

static CORE_ACTIVE: AtomicBool = AtomicBool::new(false);

struct InstanceGuard;

impl InstanceGuard {
    fn acquire() -> Result<Self, Error> {
        CORE_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InstanceGuard)
            .map_err(|_| {
                Error::new(ErrorKind::AlreadyInitialized)
                    .with_message("a core is already live in this process")
                    .with_hint("Drop the existing core before initializing another.")
            })
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        CORE_ACTIVE.store(false, Ordering::Release);
    }
}

/// Hooks that run around the spell lifecycle without being spells themselves.
pub trait CoreExtension: Send + Sync {
    fn name(&self) -> &str;

    /// May rewrite the options before discovery starts.
    fn init(&self, _options: &mut CoreOptions) -> Result<(), Error> {
        Ok(())
    }

    fn on_post_configure(&self, _core: &Core) -> Result<(), Error> {
        Ok(())
    }

    fn on_stop(&self, _core: &Core) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub enum SettingsSource {
    File(PathBuf),
    Document(Value),
}

pub struct CoreOptions {
    pub app_name: String,
    pub namespaces: Vec<Namespace>,
    pub forbidden_spells: Vec<String>,
    pub settings: SettingsSource,
    pub extensions: Vec<Arc<dyn CoreExtension>>,
}

impl CoreOptions {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            namespaces: Vec::new(),
            forbidden_spells: Vec::new(),
            settings: SettingsSource::Document(json!({})),
            extensions: Vec::new(),
        }
    }

    pub fn namespace(mut self, namespace: Namespace) -> Self {
        self.namespaces.push(namespace);
        self
    }

    pub fn forbid(mut self, spell: impl Into<String>) -> Self {
        self.forbidden_spells.push(spell.into());
        self
    }

    pub fn settings_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings = SettingsSource::File(path.into());
        self
    }

    pub fn settings_document(mut self, document: Value) -> Self {
        self.settings = SettingsSource::Document(document);
        self
    }

    pub fn extension(mut self, extension: Arc<dyn CoreExtension>) -> Self {
        self.extensions.push(extension);
        self
    }
}

impl fmt::Debug for CoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let extensions = self
            .extensions
            .iter()
            .map(|extension| extension.name())
            .collect::<Vec<_>>();
        f.debug_struct("CoreOptions")
            .field("app_name", &self.app_name)
            .field("namespaces", &self.namespaces)
            .field("forbidden_spells", &self.forbidden_spells)
            .field("settings", &self.settings)
            .field("extensions", &extensions)
            .finish()
    }
}

pub struct Core {
    app_name: String,
    spells: Vec<ActiveSpell>,
    by_name: BTreeMap<String, usize>,
    capabilities: BTreeMap<Capability, Vec<usize>>,
    states: RwLock<Vec<SpellState>>,
    settings: Arc<SettingsRegistry>,
    entry_points: EntryPoints,
    extensions: Vec<Arc<dyn CoreExtension>>,
    logs: LogQueue,
    ready: AtomicBool,
    stopped: AtomicBool,
    _guard: InstanceGuard,
}

impl Core {
    pub fn init(mut options: CoreOptions) -> Result<Arc<Core>, Error> {
        let guard = InstanceGuard::acquire()?;

        let extensions = std::mem::take(&mut options.extensions);
        for extension in &extensions {
            tracing::debug!(extension = extension.name(), "initializing extension");
            extension.init(&mut options)?;
        }
        let mut all_extensions = extensions;
        all_extensions.append(&mut options.extensions);

        let CoreOptions {
            app_name,
            namespaces,
            forbidden_spells,
            settings,
            ..
        } = options;
        tracing::info!(app = %app_name, namespaces = namespaces.len(), "initializing core");

        let mut enumerator = Enumerator::new(namespaces, forbidden_spells);
        let spells = enumerator.enumerate()?;

        let mut by_name = BTreeMap::new();
        let mut capabilities = BTreeMap::<Capability, Vec<usize>>::new();
        for (index, spell) in spells.iter().enumerate() {
            by_name.insert(spell.name().to_string(), index);
            for capability in &spell.meta().capabilities {
                capabilities.entry(capability.clone()).or_default().push(index);
            }
        }

        let core = Arc::new(Core {
            app_name,
            states: RwLock::new(vec![SpellState::Instantiated; spells.len()]),
            spells,
            by_name,
            capabilities,
            settings: Arc::new(SettingsRegistry::new()),
            entry_points: EntryPoints::new(),
            extensions: all_extensions,
            logs: LogQueue::new(),
            ready: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            _guard: guard,
        });

        for (index, spell) in core.spells.iter().enumerate() {
            let ctx = SpellContext::new(&core, spell);
            spell
                .instance
                .pre_configure(&ctx)
                .map_err(|err| blame(err, spell))?;
            core.set_state(index, SpellState::PreConfigured)?;
            tracing::debug!(spell = spell.name(), "pre-configured");
        }

        let report = match settings {
            SettingsSource::File(path) => core.settings.load_file(path)?,
            SettingsSource::Document(document) => core.settings.load(&document)?,
        };
        tracing::debug!(ignored = ?report.ignored, "settings barrier passed");

        for (index, spell) in core.spells.iter().enumerate() {
            let ctx = SpellContext::new(&core, spell);
            spell
                .instance
                .post_configure(&ctx)
                .map_err(|err| blame(err, spell))?;
            core.set_state(index, SpellState::PostConfigured)?;
            tracing::debug!(spell = spell.name(), "post-configured");
        }

        for extension in &core.extensions {
            extension.on_post_configure(&core)?;
        }
        enumerator.eager_unload();

        {
            let mut states = core.states.write().map_err(|_| poisoned())?;
            states.iter_mut().for_each(|state| *state = SpellState::Active);
        }
        core.ready.store(true, Ordering::Release);
        tracing::info!(
            app = %core.app_name,
            spells = core.spells.len(),
            settings = core.settings.len(),
            version = %core.version_string(),
            "core ready"
        );
        Ok(core)
    }

    fn set_state(&self, index: usize, state: SpellState) -> Result<(), Error> {
        let mut states = self.states.write().map_err(|_| poisoned())?;
        if let Some(slot) = states.get_mut(index) {
            *slot = state;
        }
        Ok(())
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn version_string(&self) -> String {
        version_string()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire)
    }

    pub fn settings(&self) -> &Arc<SettingsRegistry> {
        &self.settings
    }

    pub fn register_option(
        &self,
        raw_key: &str,
        value_type: ValueType,
        comment: &str,
    ) -> Result<SettingDescriptor, Error> {
        self.settings.register(raw_key, value_type, comment)
    }

    pub fn register_entry_point<F>(&self, id: &str, entry: F) -> Result<(), Error>
    where
        F: Fn(EntryArgs) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.entry_points.register(id, entry)
    }

    pub fn entry_point_names(&self) -> Vec<String> {
        self.entry_points.names()
    }

    pub fn run_entry_point(&self, name: &str, args: EntryArgs) -> Result<Value, Error> {
        if !self.is_ready() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("entry point `{name}` called before the core is ready")));
        }
        let entry = self.entry_points.get(name)?;
        tracing::debug!(entry_point = name, "running entry point");
        entry(args)
    }

    pub fn spells(&self) -> &[ActiveSpell] {
        &self.spells
    }

    pub fn spell(&self, name: &str) -> Option<&ActiveSpell> {
        self.by_name.get(name).map(|&index| &self.spells[index])
    }

    pub fn spell_as<T: Spell>(&self, name: &str) -> Option<&T> {
        self.spell(name)?.downcast::<T>()
    }

    pub fn spell_state(&self, name: &str) -> Option<SpellState> {
        let index = *self.by_name.get(name)?;
        self.states.read().ok()?.get(index).copied()
    }

    /// Spells implementing `capability`, in instantiation order.
    pub fn implementations(&self, capability: &Capability) -> Vec<&ActiveSpell> {
        self.capabilities
            .get(capability)
            .map(|indices| indices.iter().map(|&index| &self.spells[index]).collect())
            .unwrap_or_default()
    }

    pub fn providers(&self, tag: &str) -> Vec<&ActiveSpell> {
        self.spells
            .iter()
            .filter(|spell| spell.meta().provides.iter().any(|provided| provided == tag))
            .collect()
    }

    pub fn log_sender(&self) -> LogSender {
        self.logs.sender()
    }

    pub fn drain_logs(&self) -> usize {
        self.logs.drain()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(app = %self.app_name, "stopping core");
        for spell in self.spells.iter().rev() {
            if let Err(err) = spell.instance.stop(self) {
                tracing::warn!(spell = spell.name(), error = %err, "spell teardown failed");
            }
        }
        for extension in &self.extensions {
            if let Err(err) = extension.on_stop(self) {
                tracing::warn!(extension = extension.name(), error = %err, "extension teardown failed");
            }
        }
        self.logs.drain();
    }
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("app_name", &self.app_name)
            .field("spells", &self.spells)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("SPELLBOOK_BUILD") {
        Some(build) if !build.is_empty() => format!("{version}+{build}"),
        _ => version.to_string(),
    }
}

fn blame(err: Error, spell: &ActiveSpell) -> Error {
    if err.spell().is_some() {
        err
    } else {
        err.with_spell(spell.name())
    }
}

fn poisoned() -> Error {
    Error::new(ErrorKind::Internal).with_message("spell state lock poisoned")
}

#[cfg(test)]
pub(crate) static TEST_CORE_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::{Core, CoreExtension, CoreOptions, TEST_CORE_LOCK};
    use crate::core::capability::Capability;
    use crate::core::entry::EntryArgs;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::namespace::Namespace;
    use crate::core::settings::ValueType;
    use crate::core::spell::{Spell, SpellContext, SpellDescriptor, SpellMeta, SpellState};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex, MutexGuard};

    fn lock() -> MutexGuard<'static, ()> {
        TEST_CORE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    struct Probe {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl Spell for Probe {
        fn pre_configure(&self, ctx: &SpellContext<'_>) -> Result<(), Error> {
            ctx.register_option(&format!("{}.enabled", self.name), ValueType::Bool, "toggle")?;
            self.journal
                .lock()
                .expect("journal")
                .push(format!("pre:{}", self.name));
            Ok(())
        }

        fn post_configure(&self, ctx: &SpellContext<'_>) -> Result<(), Error> {
            assert!(ctx.settings().is_loaded());
            self.journal
                .lock()
                .expect("journal")
                .push(format!("post:{}", self.name));
            Ok(())
        }

        fn stop(&self, _core: &Core) -> Result<(), Error> {
            self.journal
                .lock()
                .expect("journal")
                .push(format!("stop:{}", self.name));
            Ok(())
        }
    }

    fn probe(name: &'static str, deps: &[&str], journal: &Arc<Mutex<Vec<String>>>) -> SpellDescriptor {
        let meta = deps
            .iter()
            .fold(SpellMeta::new(name), |meta, dep| meta.depends_on(*dep))
            .capability(Capability::Handling);
        let journal = Arc::clone(journal);
        SpellDescriptor::new(meta, move || {
            Ok(Arc::new(Probe {
                name,
                journal: Arc::clone(&journal),
            }) as Arc<dyn Spell>)
        })
    }

    impl CoreExtension for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn init(&self, options: &mut CoreOptions) -> Result<(), Error> {
            options.forbidden_spells.push("ghost".to_string());
            self.seen.lock().expect("seen").push("init".to_string());
            Ok(())
        }

        fn on_post_configure(&self, core: &Core) -> Result<(), Error> {
            assert_eq!(core.spell_state("a"), Some(SpellState::PostConfigured));
            self.seen.lock().expect("seen").push("post".to_string());
            Ok(())
        }

        fn on_stop(&self, _core: &Core) -> Result<(), Error> {
            self.seen.lock().expect("seen").push("stop".to_string());
            Ok(())
        }
    }

    #[test]
    fn lifecycle_runs_phases_behind_a_global_barrier() {
        let _guard = lock();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::new(Recorder::default());
        let namespace = Namespace::new("app")
            .with_unit("b", probe("b", &["a"], &journal))
            .with_unit("a", probe("a", &[], &journal))
            .with_unit("ghost", probe("ghost", &[], &journal));
        let core = Core::init(
            CoreOptions::new("test")
                .namespace(namespace)
                .settings_document(json!({"a": {"enabled": true}, "b": {"enabled": false}}))
                .extension(recorder.clone()),
        )
        .expect("init");

        assert!(core.is_ready());
        assert!(core.spell("ghost").is_none());
        assert_eq!(core.spell_state("b"), Some(SpellState::Active));
        let names = core
            .implementations(&Capability::Handling)
            .iter()
            .map(|spell| spell.name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b"]);

        core.stop();
        core.stop();
        assert!(!core.is_ready());
        assert_eq!(
            *journal.lock().expect("journal"),
            vec!["pre:a", "pre:b", "post:a", "post:b", "stop:b", "stop:a"]
        );
        assert_eq!(*recorder.seen.lock().expect("seen"), vec!["init", "post", "stop"]);
    }

    #[test]
    fn second_live_core_is_rejected_until_drop() {
        let _guard = lock();
        let core = Core::init(CoreOptions::new("first")).expect("first");
        let err = Core::init(CoreOptions::new("second")).expect_err("second");
        assert_eq!(err.kind(), ErrorKind::AlreadyInitialized);
        drop(core);
        let again = Core::init(CoreOptions::new("third")).expect("after drop");
        assert_eq!(again.app_name(), "third");
    }

    #[test]
    fn failed_init_releases_the_guard() {
        let _guard = lock();
        let err = Core::init(
            CoreOptions::new("broken").settings_document(json!([1])),
        )
        .expect_err("bad source");
        assert_eq!(err.kind(), ErrorKind::SettingType);
        Core::init(CoreOptions::new("fine")).expect("guard released");
    }

    #[test]
    fn entry_points_run_only_after_ready() {
        let _guard = lock();
        let core = Core::init(CoreOptions::new("entries")).expect("init");
        core.register_entry_point("sum", |args: EntryArgs| {
            let total = args.positional.iter().filter_map(Value::as_i64).sum::<i64>();
            Ok(json!(total))
        })
        .expect("register");
        let out = core
            .run_entry_point("sum", EntryArgs::new().arg(2).arg(3))
            .expect("run");
        assert_eq!(out, json!(5));
        assert_eq!(
            core.run_entry_point("nope", EntryArgs::new())
                .expect_err("unknown")
                .kind(),
            ErrorKind::UnknownEntryPoint
        );
        core.stop();
        assert_eq!(
            core.run_entry_point("sum", EntryArgs::new())
                .expect_err("stopped")
                .kind(),
            ErrorKind::Usage
        );
    }

    #[test]
    fn version_string_starts_with_crate_version() {
        assert!(super::version_string().starts_with(env!("CARGO_PKG_VERSION")));
    }
}
