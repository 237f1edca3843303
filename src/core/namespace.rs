//! Purpose: Named discovery roots holding spell descriptors in deterministic order.
//! Exports: `Namespace`, `SpellManifest`, `OptionManifest`, `SpellKinds`, `KindFactory`.
//! Role: Feeds the enumerator; units come from code or from JSON manifests on disk.
//! Invariants: Units iterate in lexical module order, then declaration order within a module.
//! Invariants: Scanning reads metadata only; no spell factory runs during discovery.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::core::capability::Capability;
use crate::core::error::{Error, ErrorKind};
use crate::core::spell::{Spell, SpellDescriptor, SpellMeta};
use crate::json::parse;

const MANIFEST_EXTENSION: &str = "json";

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OptionManifest {
    pub key: String,
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SpellManifest {
    pub name: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub options: Vec<OptionManifest>,
}

fn default_kind() -> String {
    "declarative".to_string()
}

impl SpellManifest {
    pub fn meta(&self) -> SpellMeta {
        let mut meta = SpellMeta::new(&self.name).info(&self.info);
        for dep in &self.deps {
            meta = meta.depends_on(dep);
        }
        for tag in &self.provides {
            meta = meta.provides(tag);
        }
        for cap in &self.capabilities {
            meta = meta.capability(Capability::parse(cap));
        }
        meta
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    spells: Vec<SpellManifest>,
}

pub type KindFactory = Arc<dyn Fn(&SpellManifest) -> Result<Arc<dyn Spell>, Error> + Send + Sync>;

/// Maps a manifest's `kind` to the code that builds its spell.
#[derive(Clone, Default)]
pub struct SpellKinds {
    kinds: BTreeMap<String, KindFactory>,
}

impl SpellKinds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&SpellManifest) -> Result<Arc<dyn Spell>, Error> + Send + Sync + 'static,
    {
        self.kinds.insert(kind.into(), Arc::new(factory));
        self
    }

    fn get(&self, kind: &str) -> Option<&KindFactory> {
        self.kinds.get(kind)
    }
}

impl fmt::Debug for SpellKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds.keys()).finish()
    }
}

#[derive(Clone, Debug)]
pub struct Namespace {
    name: String,
    root: Option<PathBuf>,
    units: BTreeMap<String, Vec<SpellDescriptor>>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: None,
            units: BTreeMap::new(),
        }
    }

    pub fn with_unit(mut self, module: impl Into<String>, descriptor: SpellDescriptor) -> Self {
        self.add_unit(module, descriptor);
        self
    }

    pub fn add_unit(&mut self, module: impl Into<String>, descriptor: SpellDescriptor) {
        self.units.entry(module.into()).or_default().push(descriptor);
    }

    /// Reads every `*.json` manifest directly under `root`; the file stem is the module name.
    pub fn scan(
        root: impl AsRef<Path>,
        name: impl Into<String>,
        kinds: &SpellKinds,
    ) -> Result<Self, Error> {
        let root = root.as_ref();
        let mut namespace = Self::new(name);
        namespace.root = Some(root.to_path_buf());

        let entries = std::fs::read_dir(root).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read spells directory")
                .with_path(root)
                .with_source(err)
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read spells directory entry")
                    .with_path(root)
                    .with_source(err)
            })?;
            let path = entry.path();
            if path.is_file()
                && path.extension().and_then(|ext| ext.to_str()) == Some(MANIFEST_EXTENSION)
            {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let module = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| {
                    Error::new(ErrorKind::Usage)
                        .with_message("manifest file name is not valid UTF-8")
                        .with_path(&path)
                })?
                .to_string();
            let document = parse::read_document(&path)?;
            let file: ManifestFile = serde_json::from_value(document).map_err(|err| {
                Error::new(ErrorKind::Parse)
                    .with_message(format!("invalid spell manifest: {err}"))
                    .with_path(&path)
                    .with_source(err)
            })?;
            for manifest in file.spells {
                let factory = kinds.get(&manifest.kind).cloned().ok_or_else(|| {
                    Error::new(ErrorKind::Usage)
                        .with_message(format!("unknown spell kind `{}`", manifest.kind))
                        .with_spell(&manifest.name)
                        .with_path(&path)
                })?;
                tracing::debug!(
                    namespace = %namespace.name,
                    module = %module,
                    spell = %manifest.name,
                    "found spell manifest"
                );
                let meta = manifest.meta();
                let descriptor = SpellDescriptor::new(meta, move || factory(&manifest));
                namespace.add_unit(module.clone(), descriptor);
            }
        }
        Ok(namespace)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn len(&self) -> usize {
        self.units.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn units(&self) -> impl Iterator<Item = (&str, &SpellDescriptor)> {
        self.units.iter().flat_map(|(module, descriptors)| {
            descriptors
                .iter()
                .map(move |descriptor| (module.as_str(), descriptor))
        })
    }
}
