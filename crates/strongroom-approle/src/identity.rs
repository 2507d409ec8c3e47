// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Caller identity and the resolver collaborator.
//!
//! [`CallerIdentity`] is supplied per request and used only for
//! authorization checks; the engine never persists it. Resolution from
//! transport context (LDAP/AD membership, session lookup) lives behind
//! [`IdentityResolver`] and is opaque to the engine.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ApproleError, Result};

/// The identity acting on a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerIdentity {
	/// Stable username of the caller.
	pub username: String,
	/// Whether the caller carries the admin capability.
	pub is_admin: bool,
	/// Directory group memberships; opaque to the engine.
	#[serde(default)]
	pub groups: Vec<String>,
}

impl CallerIdentity {
	/// Ordinary caller with no elevated capability.
	pub fn user(username: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			is_admin: false,
			groups: Vec::new(),
		}
	}

	/// Caller with the admin capability.
	pub fn admin(username: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			is_admin: true,
			groups: Vec::new(),
		}
	}
}

/// Resolves transport-level context into a [`CallerIdentity`].
#[async_trait]
pub trait IdentityResolver: Send + Sync {
	/// Resolve an opaque context token (session id, directory principal)
	/// into a caller identity.
	async fn resolve(&self, context: &str) -> Result<CallerIdentity>;
}

/// Fixed-mapping resolver for tests and bootstrap configurations.
#[derive(Debug, Default)]
pub struct StaticIdentityResolver {
	callers: HashMap<String, CallerIdentity>,
}

impl StaticIdentityResolver {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a caller under a context token.
	pub fn with_caller(mut self, context: impl Into<String>, caller: CallerIdentity) -> Self {
		self.callers.insert(context.into(), caller);
		self
	}
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
	async fn resolve(&self, context: &str) -> Result<CallerIdentity> {
		self.callers
			.get(context)
			.cloned()
			.ok_or(ApproleError::InvalidCredential)
	}
}
