//! Purpose: Library crate behind the `spellbook` CLI and integration tests.
//! Exports: `core` (discovery, lifecycle, settings, errors), `runtime`, `spells`.
//! Role: Plugin substrate: find spells, order them, configure them, keep settings fresh.
//! Invariants: One `Core` per process; spells only see a fully loaded settings tree after the barrier.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod core;
pub(crate) mod json;
pub mod runtime;
pub mod spells;
