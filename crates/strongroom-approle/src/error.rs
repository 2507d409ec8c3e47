// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the AppRole engine.
//!
//! Every failure an operation can surface maps to exactly one variant so
//! callers can decide between retry, re-provision, and escalation without
//! parsing message strings. Messages never embed secret values or the
//! role ids of other tenants.

use thiserror::Error;

/// Result type for AppRole operations.
pub type Result<T> = std::result::Result<T, ApproleError>;

/// Errors that can occur in AppRole operations.
#[derive(Debug, Error)]
pub enum ApproleError {
	/// The target role, secret-id, or token does not exist (or the caller
	/// is not allowed to learn that it exists, see `authz::ensure`).
	#[error("not found")]
	NotFound,

	/// A role with the requested name already exists.
	#[error("role already exists")]
	Conflict,

	/// The supplied role definition or patch violates a configuration
	/// invariant. Detected before any mutation.
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	/// A request exceeded what the role's policy allows, e.g. a CIDR
	/// override outside the role's allow-list.
	#[error("policy violation: {0}")]
	PolicyViolation(String),

	/// The credential's TTL has elapsed. Terminal for that credential.
	#[error("credential expired")]
	Expired,

	/// The credential's usage count is spent. Terminal for that credential.
	#[error("credential exhausted")]
	Exhausted,

	/// The presented credential does not match any live record. Terminal.
	#[error("invalid credential")]
	InvalidCredential,

	/// The caller is not permitted to perform this operation.
	#[error("forbidden")]
	Forbidden,

	/// The token cannot be renewed under the role's TTL configuration.
	#[error("token is not renewable")]
	NonRenewable,

	/// A collaborator (storage, policy registry, identity source) timed out
	/// or is down. Retry policy belongs to the caller, never this core.
	#[error("collaborator unavailable: {0}")]
	Unavailable(String),

	/// Storage backend fault or record corruption.
	#[error("storage error: {0}")]
	Storage(String),
}

impl From<serde_json::Error> for ApproleError {
	fn from(err: serde_json::Error) -> Self {
		ApproleError::Storage(format!("record serialization: {err}"))
	}
}

impl ApproleError {
	/// Returns true when the error is terminal for the credential that was
	/// presented: the caller must re-provision rather than retry.
	pub fn is_terminal_for_credential(&self) -> bool {
		matches!(
			self,
			ApproleError::Expired | ApproleError::Exhausted | ApproleError::InvalidCredential
		)
	}

	/// Returns true when the failure is on the caller's side of the
	/// contract and retrying the identical request cannot succeed.
	pub fn is_caller_error(&self) -> bool {
		matches!(
			self,
			ApproleError::InvalidConfig(_)
				| ApproleError::PolicyViolation(_)
				| ApproleError::Conflict
				| ApproleError::Forbidden
				| ApproleError::NonRenewable
		)
	}
}
