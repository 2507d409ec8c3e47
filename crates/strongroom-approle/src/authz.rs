// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorization gate for role and secret-id operations.
//!
//! Every caller-facing operation resolves the caller to a [`Capability`]
//! against the target role and checks it here before touching the role
//! store or secret-id manager. Decisions are pure functions with no side
//! effects.
//!
//! Token issue/renew/revoke/validate never pass through this gate:
//! possession of a valid (role-id, secret-id) pair or token value is the
//! credential, identity-agnostic by design.
//!
//! # Uniform-error policy
//!
//! An ordinary caller denied access to a role receives `NotFound`, whether
//! or not the role exists — existence of a role is itself privileged
//! information. Owners denied an admin-only operation receive `Forbidden`,
//! since ownership already proves they know the role.

use tracing::instrument;

use crate::error::{ApproleError, Result};
use crate::identity::CallerIdentity;
use crate::role::AppRole;

/// What a caller may do with a specific role, from least to most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
	/// No standing on the role beyond possessing credentials.
	Caller,
	/// The role's owner or a caller it is shared with.
	Owner,
	/// Platform administrator.
	Admin,
}

/// Resolve a caller's capability on a role.
#[instrument(level = "debug", skip_all, fields(username = %caller.username, role_name = %role.name))]
pub fn capability_for(caller: &CallerIdentity, role: &AppRole) -> Capability {
	if caller.is_admin {
		return Capability::Admin;
	}
	if role.is_owned_by(&caller.username) {
		return Capability::Owner;
	}
	Capability::Caller
}

/// Capability of a caller when no role is in scope (creation, listing).
pub fn global_capability(caller: &CallerIdentity) -> Capability {
	if caller.is_admin {
		Capability::Admin
	} else {
		Capability::Caller
	}
}

/// Require at least `required`, applying the uniform-error policy: a plain
/// caller is told the role does not exist, anyone with standing gets a
/// truthful `Forbidden`.
pub fn ensure(capability: Capability, required: Capability) -> Result<()> {
	if capability >= required {
		return Ok(());
	}
	if capability == Capability::Caller {
		Err(ApproleError::NotFound)
	} else {
		Err(ApproleError::Forbidden)
	}
}
