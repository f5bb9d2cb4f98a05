//! Agent Governance Core — shared types, error taxonomy, and clock.

pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use clock::{Clock, SharedClock, SystemClock, TestClock};
pub use config::{AuthConfig, AuthMode, BindMode, GovernanceConfig};
pub use error::{GovernanceError, PolicyDenyReason, Result};
pub use ids::*;
pub use types::*;
