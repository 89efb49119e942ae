//! Strongly-typed identifiers and labels used across the workspace.
//!
//! Downstream crates (lazy, dp, remote) should *not* use raw integers or bare
//! strings for IDs.

use serde::{Deserialize, Serialize};
use std::fmt;

use uuid::Uuid;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

macro_rules! new_label {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(v: impl Into<String>) -> Self {
                Self(v.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(v: &str) -> Self {
                Self(v.to_string())
            }
        }

        impl From<String> for $name {
            fn from(v: String) -> Self {
                Self(v)
            }
        }
    };
}

new_id!(NodeId);
new_id!(ObjectId);

new_label!(PartyId);
new_label!(DataSubject);

fn random_u64() -> u64 {
    let bytes = Uuid::new_v4().into_bytes();
    let mut head = [0u8; 8];
    head.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(head)
}

impl NodeId {
    /// Random node id. Nodes are shipped between parties and merged into
    /// source maps there, so ids must not come from a per-process counter.
    pub fn fresh() -> Self {
        Self(random_u64())
    }
}

impl ObjectId {
    /// Random 64-bit object id.
    pub fn random() -> Self {
        Self(random_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_node_ids_are_unique() {
        let ids: std::collections::BTreeSet<_> = (0..1000).map(|_| NodeId::fresh()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn labels_round_trip_through_json() {
        let subject = DataSubject::from("patient-17");
        let json = serde_json::to_string(&subject).unwrap();
        assert_eq!(json, "\"patient-17\"");
        let back: DataSubject = serde_json::from_str(&json).unwrap();
        assert_eq!(back, subject);
        assert_eq!(PartyId::new("alice").to_string(), "alice");
    }
}
