//! Purpose: Static capability tags that classify what role a spell plays.
//! Exports: `Capability`.
//! Role: Pure data; the orchestrator builds its capability index from these tags.
//! Invariants: Tag names are stable; unknown names parse to `Capability::Custom`.

use std::fmt;

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Capability {
    /// Serves requests through route handlers.
    Handling,
    /// Observes every request before it is handled.
    Request,
    Model,
    Filtering,
    SessionBackend,
    /// Can instantiate a settings backend for live synchronization.
    SettingsBackend,
    PoolEvent,
    /// Shipped with the framework itself rather than an application.
    Internal,
    Custom(String),
}

impl Capability {
    pub fn parse(name: &str) -> Self {
        match name {
            "handling" => Capability::Handling,
            "request" => Capability::Request,
            "model" => Capability::Model,
            "filtering" => Capability::Filtering,
            "session_backend" => Capability::SessionBackend,
            "settings_backend" => Capability::SettingsBackend,
            "pool_event" => Capability::PoolEvent,
            "internal" => Capability::Internal,
            other => Capability::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Capability::Handling => "handling",
            Capability::Request => "request",
            Capability::Model => "model",
            Capability::Filtering => "filtering",
            Capability::SessionBackend => "session_backend",
            Capability::SettingsBackend => "settings_backend",
            Capability::PoolEvent => "pool_event",
            Capability::Internal => "internal",
            Capability::Custom(name) => name.as_str(),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::Capability;

    #[test]
    fn names_round_trip_through_parse() {
        for cap in [
            Capability::Handling,
            Capability::Request,
            Capability::SettingsBackend,
            Capability::Internal,
            Capability::Custom("metrics".to_string()),
        ] {
            assert_eq!(Capability::parse(cap.as_str()), cap);
        }
    }
}
