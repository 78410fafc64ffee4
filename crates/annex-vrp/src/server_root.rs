//! Server policy root — the local side of every anchor comparison.

use serde::{Deserialize, Serialize};

use annex_types::ServerPolicy;

use crate::types::{AnchorSnapshot, VrpError};

/// A server's raw ethical/policy stance before hashing into an anchor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerPolicyRoot {
    /// The server's core operating principles.
    pub principles: Vec<String>,
    /// Actions prohibited by the server.
    pub prohibited_actions: Vec<String>,
}

impl ServerPolicyRoot {
    /// Creates a new policy root.
    pub fn new(principles: Vec<String>, prohibited_actions: Vec<String>) -> Self {
        Self {
            principles,
            prohibited_actions,
        }
    }

    /// Derives a policy root from the active server policy.
    pub fn from_policy(policy: &ServerPolicy) -> Self {
        Self {
            principles: policy.principles.clone(),
            prohibited_actions: policy.prohibited_actions.clone(),
        }
    }

    /// Converts the policy root into an anchor snapshot for comparison.
    ///
    /// # Errors
    ///
    /// Returns [`VrpError::SystemClockInvalid`] if the system clock is
    /// misconfigured.
    pub fn to_anchor_snapshot(&self) -> Result<AnchorSnapshot, VrpError> {
        AnchorSnapshot::new(&self.principles, &self.prohibited_actions)
    }
}

impl From<&ServerPolicy> for ServerPolicyRoot {
    fn from(policy: &ServerPolicy) -> Self {
        Self::from_policy(policy)
    }
}
