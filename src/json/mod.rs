//! Purpose: Internal JSON decoding boundary shared by settings, manifests and backends.
//! Exports: `parse` module with decode helpers.
//! Role: Single seam so callsites never hand-roll file reading plus decode plus error mapping.
//! Invariants: Helper APIs stay small and deterministic (no hidden global state).

pub(crate) mod parse;
