// Core options and introspection entry points every application gets.
use std::sync::Arc;

use serde_json::{Value, json};

use crate::core::capability::Capability;
use crate::core::entry::EntryArgs;
use crate::core::error::{Error, ErrorKind};
use crate::core::settings::{SettingsRegistry, ValueType};
use crate::core::spell::{Spell, SpellContext, SpellDescriptor, SpellMeta};

pub const NAME: &str = "spellbook_core";
pub const DEBUG_KEY: &str = "core.debug";
pub const LOG_PUMP_INTERVAL_KEY: &str = "core.log_pump_interval";

pub fn descriptor() -> SpellDescriptor {
    SpellDescriptor::of::<CoreSpell>(
        SpellMeta::new(NAME)
            .info("core settings and introspection")
            .provides("introspection")
            .capability(Capability::Internal),
    )
}

#[derive(Debug, Default)]
pub struct CoreSpell;

impl Spell for CoreSpell {
    fn pre_configure(&self, ctx: &SpellContext<'_>) -> Result<(), Error> {
        ctx.register_option_with_default(
            DEBUG_KEY,
            ValueType::Bool,
            "verbose diagnostics; may change at runtime",
            json!(false),
        )?;
        ctx.register_option_with_default(
            &format!("!{LOG_PUMP_INTERVAL_KEY}"),
            ValueType::Int,
            "milliseconds between log queue drains",
            json!(100),
        )?;
        Ok(())
    }

    fn post_configure(&self, ctx: &SpellContext<'_>) -> Result<(), Error> {
        let settings = Arc::clone(ctx.settings());
        ctx.register_entry_point("settings.dump", move |_| settings.snapshot())?;

        let settings = Arc::clone(ctx.settings());
        ctx.register_entry_point("settings.get", move |args| read_setting(&settings, &args))?;

        let spells = ctx
            .core()
            .spells()
            .iter()
            .map(|spell| {
                let meta = spell.meta();
                json!({
                    "name": meta.name,
                    "info": meta.info,
                    "namespace": spell.namespace(),
                    "module": spell.module(),
                    "deps": meta.deps,
                    "provides": meta.provides,
                    "capabilities": meta
                        .capabilities
                        .iter()
                        .map(|capability| capability.as_str().to_string())
                        .collect::<Vec<_>>(),
                })
            })
            .collect::<Vec<_>>();
        let spells = Value::Array(spells);
        ctx.register_entry_point("spells.list", move |_| Ok(spells.clone()))?;

        if ctx.settings().get_as::<bool>(DEBUG_KEY)? {
            tracing::info!("debug mode enabled");
        }
        Ok(())
    }
}

fn read_setting(settings: &SettingsRegistry, args: &EntryArgs) -> Result<Value, Error> {
    let key = args
        .get(0)
        .or_else(|| args.keyword("key"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("settings.get takes the setting key as a string")
        })?;
    settings.value(key)
}

#[cfg(test)]
mod tests {
    use super::read_setting;
    use crate::core::entry::EntryArgs;
    use crate::core::error::ErrorKind;
    use crate::core::settings::{SettingsRegistry, ValueType};
    use serde_json::json;

    #[test]
    fn settings_get_accepts_positional_or_keyword_key() {
        let registry = SettingsRegistry::new();
        registry
            .register("core.debug", ValueType::Bool, "debug")
            .expect("register");
        registry
            .load(&json!({"core": {"debug": true}}))
            .expect("load");

        let positional = EntryArgs::new().arg("core.debug");
        assert_eq!(read_setting(&registry, &positional).expect("positional"), json!(true));
        let keyword = EntryArgs::new().kwarg("key", "core.debug");
        assert_eq!(read_setting(&registry, &keyword).expect("keyword"), json!(true));

        let err = read_setting(&registry, &EntryArgs::new().arg(3)).expect_err("number");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = read_setting(&registry, &EntryArgs::new().arg("core.missing")).expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::UnknownSetting);
    }
}
