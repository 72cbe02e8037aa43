//! Rotation policy store
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use keyward_types::{RotationPolicy, DEFAULT_ROTATION_POLICY};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::RotationResult;

/// Organization policies with a fallback default
pub struct RotationPolicyStore {
    default_policy: RotationPolicy,
    policies: RwLock<HashMap<String, RotationPolicy>>,
}

impl RotationPolicyStore {
    pub fn new() -> Self {
        Self::with_default(DEFAULT_ROTATION_POLICY)
    }

    pub fn with_default(default_policy: RotationPolicy) -> Self {
        Self {
            default_policy,
            policies: RwLock::new(HashMap::new()),
        }
    }

    pub fn default_policy(&self) -> &RotationPolicy {
        &self.default_policy
    }

    /// The organization's own policy, or the default one
    pub async fn get_rotation_policy(&self, organization_id: &str) -> RotationPolicy {
        self.policies
            .read()
            .await
            .get(organization_id)
            .cloned()
            .unwrap_or_else(|| self.default_policy.clone())
    }

    pub async fn set_rotation_policy(
        &self,
        organization_id: &str,
        policy: RotationPolicy,
    ) -> RotationResult<()> {
        policy.validate()?;

        let policy = RotationPolicy {
            organization_id: Some(organization_id.to_string()),
            ..policy
        };

        info!(
            organization_id = organization_id,
            rotation_interval_days = policy.rotation_interval_days,
            auto_rotation_enabled = policy.auto_rotation_enabled,
            emergency_rotation_enabled = policy.emergency_rotation_enabled,
            "Rotation policy updated"
        );

        self.policies
            .write()
            .await
            .insert(organization_id.to_string(), policy);
        Ok(())
    }
}

impl Default for RotationPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RotationError;

    #[tokio::test]
    async fn test_unset_organization_gets_default() {
        let store = RotationPolicyStore::new();
        let policy = store.get_rotation_policy("org-1").await;
        assert_eq!(policy, DEFAULT_ROTATION_POLICY);
    }

    #[tokio::test]
    async fn test_set_policy_is_scoped() {
        let store = RotationPolicyStore::new();
        let custom = RotationPolicy {
            rotation_interval_days: 30,
            emergency_rotation_enabled: false,
            ..RotationPolicy::default()
        };
        store.set_rotation_policy("org-1", custom).await.unwrap();

        let policy = store.get_rotation_policy("org-1").await;
        assert_eq!(policy.organization_id.as_deref(), Some("org-1"));
        assert_eq!(policy.rotation_interval_days, 30);
        assert!(!policy.emergency_rotation_enabled);

        assert_eq!(store.get_rotation_policy("org-2").await, DEFAULT_ROTATION_POLICY);
    }

    #[tokio::test]
    async fn test_invalid_policy_rejected() {
        let store = RotationPolicyStore::new();
        let invalid = RotationPolicy {
            max_key_versions: 1,
            ..RotationPolicy::default()
        };
        let result = store.set_rotation_policy("org-1", invalid).await;
        assert!(matches!(result, Err(RotationError::InvalidPolicy(_))));
    }
}
