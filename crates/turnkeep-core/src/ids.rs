//! Cheaply-cloneable identifiers for events, sessions, and runs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

macro_rules! arc_str_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(Arc::from(s.into()))
            }

            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self::new(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

arc_str_id!(EventId);
arc_str_id!(SessionId);
arc_str_id!(RunId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_and_display() {
        let id = EventId::new("evt-1");
        assert_eq!(id.as_str(), "evt-1");
        assert_eq!(format!("{}", id), "evt-1");
    }

    #[test]
    fn clone_is_cheap_and_eq() {
        let a = SessionId::new("same");
        let b = SessionId::new("same");
        let c = SessionId::new("different");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.clone().as_str(), "same");
    }

    #[test]
    fn generate_produces_distinct_ids() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn hashable_in_set() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(EventId::new("x"));
        assert!(set.contains(&EventId::new("x")));
    }
}
