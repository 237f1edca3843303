// Core modules: discovery, lifecycle, settings and error modeling.
pub mod backend;
pub mod capability;
pub mod entry;
pub mod enumerator;
pub mod error;
pub mod log_queue;
pub mod namespace;
pub mod orchestrator;
pub mod settings;
pub mod spell;
pub mod sync;
