// Spells defined entirely by a JSON manifest: options to register, dependencies to verify.
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind};
use crate::core::namespace::SpellManifest;
use crate::core::settings::ValueType;
use crate::core::spell::{Spell, SpellContext};

pub const KIND: &str = "declarative";

#[derive(Clone, Debug)]
struct DeclaredOption {
    key: String,
    value_type: ValueType,
    comment: String,
    default: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct DeclarativeSpell {
    name: String,
    deps: Vec<String>,
    options: Vec<DeclaredOption>,
}

impl DeclarativeSpell {
    pub fn from_manifest(manifest: &SpellManifest) -> Result<Self, Error> {
        let mut options = Vec::with_capacity(manifest.options.len());
        for option in &manifest.options {
            let value_type = ValueType::parse(&option.value_type).ok_or_else(|| {
                Error::new(ErrorKind::Parse)
                    .with_message(format!("unknown setting type `{}`", option.value_type))
                    .with_key(&option.key)
                    .with_spell(&manifest.name)
                    .with_hint("Use one of bool, int, float, string, list, map.")
            })?;
            options.push(DeclaredOption {
                key: option.key.clone(),
                value_type,
                comment: option.comment.clone(),
                default: option.default.clone(),
            });
        }
        Ok(Self {
            name: manifest.name.clone(),
            deps: manifest.deps.clone(),
            options,
        })
    }

    pub fn build(manifest: &SpellManifest) -> Result<Arc<dyn Spell>, Error> {
        Ok(Arc::new(Self::from_manifest(manifest)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Spell for DeclarativeSpell {
    fn pre_configure(&self, ctx: &SpellContext<'_>) -> Result<(), Error> {
        for option in &self.options {
            match &option.default {
                Some(default) => ctx.register_option_with_default(
                    &option.key,
                    option.value_type,
                    &option.comment,
                    default.clone(),
                )?,
                None => ctx.register_option(&option.key, option.value_type, &option.comment)?,
            };
        }
        Ok(())
    }

    fn post_configure(&self, ctx: &SpellContext<'_>) -> Result<(), Error> {
        for dep in &self.deps {
            let resolved = ctx.dependency(dep)?;
            tracing::debug!(spell = %self.name, dependency = resolved.name(), "dependency resolved");
        }
        Ok(())
    }
}
