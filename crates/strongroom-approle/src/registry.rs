// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy registry collaborator.
//!
//! Policy documents are opaque to this engine; the registry only answers
//! whether a policy name resolves. Role creation and updates refuse to bind
//! a role to a policy the registry does not know.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::{ApproleError, Result};

/// Resolves policy-name references. Read-only from the engine's perspective.
#[async_trait]
pub trait PolicyRegistry: Send + Sync {
	/// Whether the named policy exists.
	async fn exists(&self, policy_name: &str) -> Result<bool>;
}

/// Fixed-set registry for tests and bootstrap configurations.
#[derive(Debug, Default)]
pub struct StaticPolicyRegistry {
	policies: HashSet<String>,
}

impl StaticPolicyRegistry {
	pub fn new<I, S>(policies: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			policies: policies.into_iter().map(Into::into).collect(),
		}
	}
}

#[async_trait]
impl PolicyRegistry for StaticPolicyRegistry {
	async fn exists(&self, policy_name: &str) -> Result<bool> {
		Ok(self.policies.contains(policy_name))
	}
}

/// Validates that every policy in `policies` resolves through the registry.
///
/// Returns `InvalidConfig` naming the first unresolvable policy; runs before
/// any mutation so a bad patch never leaves partial state.
pub async fn ensure_policies_resolve(
	registry: &dyn PolicyRegistry,
	policies: &[String],
) -> Result<()> {
	if policies.is_empty() {
		return Err(ApproleError::InvalidConfig(
			"policy set must not be empty".to_string(),
		));
	}
	for policy in policies {
		if !registry.exists(policy).await? {
			return Err(ApproleError::InvalidConfig(format!(
				"unknown policy: {policy}"
			)));
		}
	}
	Ok(())
}
