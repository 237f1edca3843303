//! Purpose: Discover spells across namespaces and instantiate them in dependency order.
//! Exports: `Enumerator`, `DiscoveredSpell`, `resolve_order`.
//! Role: First startup stage; everything it rejects aborts startup before any spell runs.
//! Invariants: For every edge `A -> B` (A depends on B), B is instantiated strictly before A.
//! Invariants: Ties are broken by discovery order (namespace order, module order, declaration order).
//! Invariants: Validation and ordering complete before the first factory call (no partial instantiation).

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use crate::core::error::{Error, ErrorKind};
use crate::core::namespace::Namespace;
use crate::core::spell::{ActiveSpell, SpellDescriptor, SpellMeta};

#[derive(Clone, Debug)]
pub struct DiscoveredSpell {
    pub namespace: String,
    pub module: String,
    pub descriptor: SpellDescriptor,
}

#[derive(Debug)]
pub struct Enumerator {
    namespaces: Vec<Namespace>,
    forbidden: BTreeSet<String>,
    discovered: Vec<DiscoveredSpell>,
    unloaded: bool,
}

impl Enumerator {
    pub fn new(namespaces: Vec<Namespace>, forbidden: impl IntoIterator<Item = String>) -> Self {
        Self {
            namespaces,
            forbidden: forbidden.into_iter().collect(),
            discovered: Vec::new(),
            unloaded: false,
        }
    }

    /// Collects descriptors in discovery order, dropping forbidden spells before the duplicate check.
    pub fn discover(&mut self) -> Result<&[DiscoveredSpell], Error> {
        if self.unloaded {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("discovery state was already unloaded"));
        }
        let mut seen = BTreeMap::<String, String>::new();
        let mut discovered = Vec::new();
        for namespace in &self.namespaces {
            tracing::debug!(namespace = namespace.name(), units = namespace.len(), "scanning namespace");
            for (module, descriptor) in namespace.units() {
                let name = descriptor.name();
                if self.forbidden.contains(name) {
                    tracing::info!(spell = name, "skipping forbidden spell");
                    continue;
                }
                let origin = format!("{}.{}", namespace.name(), module);
                if let Some(first) = seen.get(name) {
                    return Err(Error::new(ErrorKind::DuplicateSpell)
                        .with_message(format!("spell defined in both {first} and {origin}"))
                        .with_spell(name));
                }
                seen.insert(name.to_string(), origin);
                discovered.push(DiscoveredSpell {
                    namespace: namespace.name().to_string(),
                    module: module.to_string(),
                    descriptor: descriptor.clone(),
                });
            }
        }
        self.discovered = discovered;
        Ok(&self.discovered)
    }

    pub fn enumerate(&mut self) -> Result<Vec<ActiveSpell>, Error> {
        self.discover()?;
        let metas = self
            .discovered
            .iter()
            .map(|spell| spell.descriptor.meta().clone())
            .collect::<Vec<_>>();
        self.check_forbidden(&metas)?;
        let order = resolve_order(&metas)?;

        let mut spells = Vec::with_capacity(order.len());
        for index in order {
            let discovered = &self.discovered[index];
            let instance = discovered.descriptor.instantiate()?;
            tracing::debug!(
                spell = discovered.descriptor.name(),
                namespace = %discovered.namespace,
                "instantiated spell"
            );
            spells.push(ActiveSpell {
                meta: discovered.descriptor.meta().clone(),
                namespace: discovered.namespace.clone(),
                module: discovered.module.clone(),
                instance,
            });
        }
        tracing::info!(count = spells.len(), "spells instantiated");
        Ok(spells)
    }

    fn check_forbidden(&self, metas: &[SpellMeta]) -> Result<(), Error> {
        for meta in metas {
            if let Some(dep) = meta.deps.iter().find(|dep| self.forbidden.contains(*dep)) {
                return Err(Error::new(ErrorKind::MissingDependency)
                    .with_message(format!("depends on forbidden spell `{dep}`"))
                    .with_spell(&meta.name)
                    .with_hint("Remove the spell from the forbidden list or forbid its dependents too."));
            }
        }
        Ok(())
    }

    /// Releases namespaces and discovery caches; live spells are unaffected.
    pub fn eager_unload(&mut self) {
        if self.unloaded {
            return;
        }
        let released = self.discovered.len();
        self.namespaces.clear();
        self.namespaces.shrink_to_fit();
        self.discovered.clear();
        self.discovered.shrink_to_fit();
        self.unloaded = true;
        tracing::debug!(released, "discovery state unloaded");
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded
    }

    pub fn discovered(&self) -> &[DiscoveredSpell] {
        &self.discovered
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Returns indices into `metas` in instantiation order.
pub fn resolve_order(metas: &[SpellMeta]) -> Result<Vec<usize>, Error> {
    let index = metas
        .iter()
        .enumerate()
        .map(|(position, meta)| (meta.name.as_str(), position))
        .collect::<BTreeMap<_, _>>();

    let mut edges = vec![Vec::new(); metas.len()];
    for (position, meta) in metas.iter().enumerate() {
        for dep in &meta.deps {
            let target = index.get(dep.as_str()).copied().ok_or_else(|| {
                Error::new(ErrorKind::UnknownSpell)
                    .with_message(format!("unknown spell reference `{dep}`"))
                    .with_spell(&meta.name)
            })?;
            edges[position].push(target);
        }
    }

    detect_cycle(metas, &edges)?;

    let mut dependents = vec![Vec::new(); metas.len()];
    let mut pending = vec![0usize; metas.len()];
    for (position, deps) in edges.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(position);
            pending[position] += 1;
        }
    }

    let mut ready = pending
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(position, _)| Reverse(position))
        .collect::<BinaryHeap<_>>();
    let mut order = Vec::with_capacity(metas.len());
    while let Some(Reverse(position)) = ready.pop() {
        order.push(position);
        for &dependent in &dependents[position] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }
    Ok(order)
}

fn detect_cycle(metas: &[SpellMeta], edges: &[Vec<usize>]) -> Result<(), Error> {
    let mut marks = vec![Mark::Unvisited; metas.len()];
    let mut path = Vec::new();
    for start in 0..metas.len() {
        if marks[start] == Mark::Unvisited {
            visit(start, edges, &mut marks, &mut path).map_err(|cycle| {
                let names = cycle
                    .iter()
                    .map(|&position| metas[position].name.clone())
                    .collect::<Vec<_>>();
                Error::new(ErrorKind::CircularDependency)
                    .with_message("spells depend on each other")
                    .with_spell(names[0].clone())
                    .with_cycle(names)
            })?;
        }
    }
    Ok(())
}

// Iterative three-color DFS; the error carries the cycle as a closed path.
fn visit(
    start: usize,
    edges: &[Vec<usize>],
    marks: &mut [Mark],
    path: &mut Vec<usize>,
) -> Result<(), Vec<usize>> {
    let mut stack = vec![(start, 0usize)];
    marks[start] = Mark::InProgress;
    path.push(start);
    while let Some((node, next)) = stack.last_mut() {
        let node = *node;
        if let Some(&dep) = edges[node].get(*next) {
            *next += 1;
            match marks[dep] {
                Mark::Unvisited => {
                    marks[dep] = Mark::InProgress;
                    path.push(dep);
                    stack.push((dep, 0));
                }
                Mark::InProgress => {
                    let from = path.iter().position(|&p| p == dep).unwrap_or_default();
                    let mut cycle = path[from..].to_vec();
                    cycle.push(dep);
                    return Err(cycle);
                }
                Mark::Done => {}
            }
        } else {
            marks[node] = Mark::Done;
            path.pop();
            stack.pop();
        }
    }
    Ok(())
}
