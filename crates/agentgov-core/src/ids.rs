//! Typed identifiers — cheaply cloneable, never mixed up at a call site.
//!
//! An `Arc<str>` so clones are a refcount bump instead of a string copy,
//! with a distinct Rust type per entity so e.g. a `SkillId` can't be
//! passed where an `InstanceId` is expected.

use std::fmt;
use std::sync::Arc;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(Arc::from(s.into()))
            }

            pub fn generate() -> Self {
                Self::new(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
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

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Ok(Self::new(s))
            }
        }
    };
}

id_type!(SkillId);
id_type!(JobRoleId);
id_type!(AgentTypeId);
id_type!(CustomerId);
id_type!(SubscriptionId);
id_type!(InstanceId);
id_type!(GoalId);
id_type!(ApprovalId);
id_type!(CorrelationId);
id_type!(StepId);
id_type!(SeedId);
id_type!(DecisionId);
id_type!(AuditChainId);
