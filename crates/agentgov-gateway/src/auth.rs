//! Bearer-token authentication for the HTTP surface.
//!
//! A successful check doesn't just clear a gate — it resolves into the
//! same `PolicySubject` the Policy Decision Point folds rules against, so
//! the identity behind a request is available wherever the governance
//! domain needs it (recording who actually decided an approval, for
//! instance) instead of being thrown away after the gate.

use agentgov_core::config::{AuthConfig, AuthMode};
use agentgov_core::{GovernanceError, Result};
use agentgov_policy::PolicySubject;

/// The role granted to whoever holds the shared platform bearer token.
/// This deployment has no per-caller credentials yet, so every Token-mode
/// request authenticates as the same platform operator; `AuthMode::None`
/// requests carry no assertable identity at all.
pub const PLATFORM_OPERATOR_ROLE: &str = "platform-operator";
pub const ANONYMOUS_ROLE: &str = "anonymous";

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Clone, Debug)]
pub struct ResolvedAuth {
    pub mode: AuthMode,
    pub token: Option<String>,
}

impl ResolvedAuth {
    pub fn from_config(config: &AuthConfig, env_token: Option<String>) -> Self {
        let token = config.token.clone().or(env_token);
        Self { mode: config.mode.clone(), token }
    }

    /// Verifies the bearer token and resolves the caller into a
    /// `PolicySubject`. `AuthMode::None` is for local development: it
    /// always succeeds, as `ANONYMOUS_ROLE`, carrying no real identity.
    pub fn authenticate(&self, provided: Option<&str>) -> Result<PolicySubject> {
        match self.mode {
            AuthMode::None => Ok(PolicySubject {
                customer_id: "anonymous".to_string(),
                agent_id: "anonymous".to_string(),
                roles: vec![ANONYMOUS_ROLE.to_string()],
            }),
            AuthMode::Token => {
                let expected = self
                    .token
                    .as_deref()
                    .ok_or_else(|| GovernanceError::Authz("no token configured".to_string()))?;
                let provided = provided.ok_or_else(|| GovernanceError::Authz("bearer token required".to_string()))?;
                if !constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
                    return Err(GovernanceError::Authz("invalid bearer token".to_string()));
                }
                Ok(PolicySubject {
                    customer_id: "platform".to_string(),
                    agent_id: "gateway-operator".to_string(),
                    roles: vec![PLATFORM_OPERATOR_ROLE.to_string()],
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_mode_accepts_matching_and_rejects_mismatched() {
        let auth = ResolvedAuth { mode: AuthMode::Token, token: Some("s3cr3t".to_string()) };
        let subject = auth.authenticate(Some("s3cr3t")).unwrap();
        assert!(subject.roles.contains(&PLATFORM_OPERATOR_ROLE.to_string()));
        assert!(auth.authenticate(Some("wrong")).is_err());
        assert!(auth.authenticate(None).is_err());
    }

    #[test]
    fn none_mode_accepts_anything_as_anonymous() {
        let auth = ResolvedAuth { mode: AuthMode::None, token: None };
        let subject = auth.authenticate(None).unwrap();
        assert!(subject.roles.contains(&ANONYMOUS_ROLE.to_string()));
        let subject = auth.authenticate(Some("whatever")).unwrap();
        assert!(subject.roles.contains(&ANONYMOUS_ROLE.to_string()));
    }
}
