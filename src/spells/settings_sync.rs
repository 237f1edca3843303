//! Purpose: Select the settings backend from configuration and expose on-demand sync.
//! Exports: `SettingsSyncSpell`, `descriptor`, `synchronizer`, setting key constants.
//! Role: Bridges the read-only `sync.*` settings to the runtime's periodic synchronizer.
//! Invariants: The backend is chosen once in `post_configure` and never changes afterwards.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::json;

use crate::core::backend::SettingsBackend;
use crate::core::capability::Capability;
use crate::core::error::{Error, ErrorKind};
use crate::core::orchestrator::Core;
use crate::core::settings::ValueType;
use crate::core::spell::{Spell, SpellContext, SpellDescriptor, SpellMeta};
use crate::core::sync::SettingsSynchronizer;
use crate::spells::core_spell;

pub const NAME: &str = "spellbook_settings_sync";
pub const BACKEND_URI_KEY: &str = "sync.backend_uri";
pub const UPDATE_INTERVAL_KEY: &str = "sync.update_interval";

pub fn descriptor() -> SpellDescriptor {
    SpellDescriptor::of::<SettingsSyncSpell>(
        SpellMeta::new(NAME)
            .info("pulls mutable settings from the configured backend")
            .depends_on(core_spell::NAME)
            .provides("settings_backend")
            .capability(Capability::SettingsBackend),
    )
}

#[derive(Debug, Default)]
pub struct SettingsSyncSpell {
    backend: OnceLock<SettingsBackend>,
    interval: OnceLock<Duration>,
}

impl SettingsSyncSpell {
    pub fn backend(&self) -> Option<&SettingsBackend> {
        self.backend.get()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval.get().copied()
    }
}

impl Spell for SettingsSyncSpell {
    fn pre_configure(&self, ctx: &SpellContext<'_>) -> Result<(), Error> {
        ctx.register_option_with_default(
            &format!("!{BACKEND_URI_KEY}"),
            ValueType::String,
            "settings backend as <scheme>+<details>",
            json!("memory+default"),
        )?;
        ctx.register_option_with_default(
            &format!("!{UPDATE_INTERVAL_KEY}"),
            ValueType::Int,
            "seconds between settings sync ticks",
            json!(30),
        )?;
        Ok(())
    }

    fn post_configure(&self, ctx: &SpellContext<'_>) -> Result<(), Error> {
        ctx.dependency(core_spell::NAME)?;
        let settings = ctx.settings();
        let uri = settings.get_as::<String>(BACKEND_URI_KEY)?;
        let seconds = settings.get_as::<u64>(UPDATE_INTERVAL_KEY)?;
        if seconds == 0 {
            return Err(Error::new(ErrorKind::SettingType)
                .with_message("sync interval must be at least one second")
                .with_key(UPDATE_INTERVAL_KEY));
        }
        let backend = SettingsBackend::from_uri(&uri).map_err(|err| err.with_key(BACKEND_URI_KEY))?;
        let interval = Duration::from_secs(seconds);
        tracing::info!(backend = %backend.describe(), interval_secs = seconds, "settings backend selected");

        let synchronizer = SettingsSynchronizer::new(Arc::clone(settings), backend.clone(), interval);
        ctx.register_entry_point("settings.sync_now", move |_| {
            let report = synchronizer.tick()?;
            serde_json::to_value(report).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode sync report")
                    .with_source(err)
            })
        })?;

        let _ = self.backend.set(backend);
        let _ = self.interval.set(interval);
        Ok(())
    }
}

/// Synchronizer for the first configured settings-backend spell, if any.
pub fn synchronizer(core: &Core) -> Option<SettingsSynchronizer> {
    core.implementations(&Capability::SettingsBackend)
        .into_iter()
        .filter_map(|spell| spell.downcast::<SettingsSyncSpell>())
        .find_map(|spell| {
            let backend = spell.backend()?.clone();
            let interval = spell.interval()?;
            Some(SettingsSynchronizer::new(
                Arc::clone(core.settings()),
                backend,
                interval,
            ))
        })
}
