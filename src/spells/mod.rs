//! Purpose: Spells that ship with the crate and the manifest kinds the CLI understands.
//! Exports: `builtin_namespace`, `default_kinds`, `core_spell`, `settings_sync`, `declarative`.
//! Role: The `spellbook` namespace loaded ahead of application namespaces.
//! Invariants: Builtin spell names are prefixed `spellbook_` so they never clash with application spells.

use crate::core::namespace::{Namespace, SpellKinds};

pub mod core_spell;
pub mod declarative;
pub mod settings_sync;

pub const BUILTIN_NAMESPACE: &str = "spellbook";

pub fn builtin_namespace() -> Namespace {
    Namespace::new(BUILTIN_NAMESPACE)
        .with_unit("core", core_spell::descriptor())
        .with_unit("settings_sync", settings_sync::descriptor())
}

pub fn default_kinds() -> SpellKinds {
    SpellKinds::new().with_kind(declarative::KIND, declarative::DeclarativeSpell::build)
}
