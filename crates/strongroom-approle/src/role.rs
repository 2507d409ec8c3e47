// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Role definitions and the role store.
//!
//! This module provides:
//! - [`AppRole`] - persisted role record (policies, TTLs, usage bounds,
//!   CIDR allow-list, ownership)
//! - [`RoleDefinition`] / [`RolePatch`] - create and update inputs
//! - [`RoleStore`] - CRUD over the storage collaborator with CAS-backed
//!   create/update so concurrent structural changes serialize per role
//!
//! Validation always runs before any write: an invalid definition or patch
//! leaves no partial state behind. Role names are normalized to lowercase
//! and are immutable once created.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cidr;
use crate::clock::Clock;
use crate::error::{ApproleError, Result};
use crate::registry::{ensure_policies_resolve, PolicyRegistry};
use crate::storage::{keys, StorageClient};
use crate::types::RoleId;

/// Role names reserved for the platform itself; they can be neither created
/// nor deleted through this engine.
pub const RESERVED_ROLE_NAMES: &[&str] = &[
	"root",
	"default",
	"strongroom-admin",
	"selfservice-support",
];

/// Attempts to reconcile a concurrently-updated role this many times before
/// giving up with `Unavailable`.
const UPDATE_CAS_ATTEMPTS: u32 = 8;

/// Upper bound in seconds on `token_ttl`, `token_max_ttl`, and
/// `secret_id_ttl` (ten years). Keeps every expiry computation inside
/// chrono's `Duration` range.
pub const MAX_TTL_SECS: u64 = 315_360_000;

/// Check if a role name is reserved.
pub fn is_role_name_reserved(name: &str) -> bool {
	let lower = name.to_lowercase();
	RESERVED_ROLE_NAMES.iter().any(|&reserved| reserved == lower)
}

/// Validates a role name.
/// Rules:
/// - 3-64 characters
/// - Lowercase alphanumeric, `-` and `_` only (input is lowercased first)
/// - Must start with an alphanumeric character
/// - Cannot be a reserved name
pub fn validate_role_name(name: &str) -> Result<()> {
	if name.len() < 3 {
		return Err(ApproleError::InvalidConfig(
			"role name must be at least 3 characters".to_string(),
		));
	}
	if name.len() > 64 {
		return Err(ApproleError::InvalidConfig(
			"role name must be at most 64 characters".to_string(),
		));
	}
	if !name
		.chars()
		.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
	{
		return Err(ApproleError::InvalidConfig(
			"role name may only contain lowercase letters, digits, '-' and '_'".to_string(),
		));
	}
	if !name
		.chars()
		.next()
		.map(|c| c.is_ascii_alphanumeric())
		.unwrap_or(false)
	{
		return Err(ApproleError::InvalidConfig(
			"role name must start with a letter or digit".to_string(),
		));
	}
	if is_role_name_reserved(name) {
		return Err(ApproleError::InvalidConfig(format!(
			"role name is reserved: {name}"
		)));
	}
	Ok(())
}

// =============================================================================
// Records
// =============================================================================

/// A persisted role: the template credentials are issued from.
///
/// Secret material is never stored on the role itself; secret-ids live in
/// child records keyed by accessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRole {
	/// Unique, immutable, lowercase role name.
	pub name: String,

	/// Opaque identifier presented at login. Stable unless explicitly
	/// regenerated.
	pub role_id: RoleId,

	/// Policies copied onto tokens issued from this role. Never empty.
	pub policies: Vec<String>,

	/// TTL in seconds for issued tokens.
	pub token_ttl: u64,

	/// Hard ceiling in seconds on cumulative token lifetime across
	/// renewals. Always >= `token_ttl`.
	pub token_max_ttl: u64,

	/// TTL in seconds for secret-ids. 0 means secret-ids never expire.
	pub secret_id_ttl: u64,

	/// Number of times each secret-id may be consumed. 0 means unlimited.
	pub secret_id_num_uses: u32,

	/// Networks secret-ids may be redeemed from. Empty means unrestricted.
	pub secret_id_bound_cidrs: Vec<String>,

	/// Username of the caller that created the role.
	pub owner: String,

	/// Callers granted owner-level access to this role.
	#[serde(default)]
	pub shared_to: Vec<String>,

	/// When the role was created.
	pub created_at: DateTime<Utc>,

	/// When the role was last updated.
	pub updated_at: DateTime<Utc>,
}

impl AppRole {
	/// Returns true if the caller owns or is shared on this role.
	pub fn is_owned_by(&self, username: &str) -> bool {
		self.owner == username || self.shared_to.iter().any(|u| u == username)
	}
}

/// Input for role creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDefinition {
	pub name: String,
	pub policies: Vec<String>,
	pub token_ttl: u64,
	pub token_max_ttl: u64,
	#[serde(default)]
	pub secret_id_ttl: u64,
	#[serde(default)]
	pub secret_id_num_uses: u32,
	#[serde(default)]
	pub secret_id_bound_cidrs: Vec<String>,
	#[serde(default)]
	pub shared_to: Vec<String>,
}

/// Partial update for an existing role. Absent fields are preserved.
///
/// The role name is immutable; `regenerate_role_id` swaps in a fresh
/// role-id atomically with the rest of the patch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolePatch {
	pub policies: Option<Vec<String>>,
	pub token_ttl: Option<u64>,
	pub token_max_ttl: Option<u64>,
	pub secret_id_ttl: Option<u64>,
	pub secret_id_num_uses: Option<u32>,
	pub secret_id_bound_cidrs: Option<Vec<String>>,
	pub shared_to: Option<Vec<String>>,
	#[serde(default)]
	pub regenerate_role_id: bool,
}

/// Secondary index record mapping a role-id back to its role name.
///
/// The index is a hint only: reads verify the role record's current
/// `role_id` before trusting it, so a regenerated role-id can never be
/// redeemed through a stale pointer.
#[derive(Debug, Serialize, Deserialize)]
struct RoleIdIndex {
	role_name: String,
}

// =============================================================================
// Store
// =============================================================================

/// CRUD for role records. Authorization is enforced by the service layer
/// before these operations run.
#[derive(Clone)]
pub struct RoleStore {
	storage: StorageClient,
	registry: Arc<dyn PolicyRegistry>,
	clock: Arc<dyn Clock>,
}

impl RoleStore {
	pub fn new(
		storage: StorageClient,
		registry: Arc<dyn PolicyRegistry>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			storage,
			registry,
			clock,
		}
	}

	async fn validate_definition(
		&self,
		policies: &[String],
		token_ttl: u64,
		token_max_ttl: u64,
		secret_id_ttl: u64,
		cidrs: &[String],
		owner: &str,
		shared_to: &[String],
	) -> Result<()> {
		if token_ttl == 0 {
			return Err(ApproleError::InvalidConfig(
				"token_ttl must be positive".to_string(),
			));
		}
		if token_ttl > token_max_ttl {
			return Err(ApproleError::InvalidConfig(format!(
				"token_ttl {token_ttl}s exceeds token_max_ttl {token_max_ttl}s"
			)));
		}
		if token_max_ttl > MAX_TTL_SECS {
			return Err(ApproleError::InvalidConfig(format!(
				"token_max_ttl {token_max_ttl}s exceeds the {MAX_TTL_SECS}s limit"
			)));
		}
		if secret_id_ttl > MAX_TTL_SECS {
			return Err(ApproleError::InvalidConfig(format!(
				"secret_id_ttl {secret_id_ttl}s exceeds the {MAX_TTL_SECS}s limit"
			)));
		}
		ensure_policies_resolve(self.registry.as_ref(), policies).await?;
		cidr::parse_cidrs(cidrs)?;
		if shared_to.iter().any(|u| u == owner) {
			return Err(ApproleError::InvalidConfig(
				"a role cannot be shared with its owner".to_string(),
			));
		}
		Ok(())
	}

	/// Create a role. Fails `Conflict` if the name is taken; the
	/// create-if-absent write is a storage CAS, so two concurrent creates
	/// of the same name produce exactly one role.
	#[instrument(level = "debug", skip(self, definition), fields(role_name = %definition.name))]
	pub async fn create(&self, definition: RoleDefinition, owner: &str) -> Result<AppRole> {
		let name = definition.name.to_lowercase();
		validate_role_name(&name)?;
		self.validate_definition(
			&definition.policies,
			definition.token_ttl,
			definition.token_max_ttl,
			definition.secret_id_ttl,
			&definition.secret_id_bound_cidrs,
			owner,
			&definition.shared_to,
		)
		.await?;

		let now = self.clock.now();
		let role = AppRole {
			name: name.clone(),
			role_id: RoleId::generate(),
			policies: definition.policies,
			token_ttl: definition.token_ttl,
			token_max_ttl: definition.token_max_ttl,
			secret_id_ttl: definition.secret_id_ttl,
			secret_id_num_uses: definition.secret_id_num_uses,
			secret_id_bound_cidrs: definition.secret_id_bound_cidrs,
			owner: owner.to_string(),
			shared_to: definition.shared_to,
			created_at: now,
			updated_at: now,
		};

		let created = self
			.storage
			.cas_record(&keys::role(&name), None, &role)
			.await?;
		if !created {
			debug!(role_name = %name, "role already exists");
			return Err(ApproleError::Conflict);
		}
		self.storage
			.put_record(
				&keys::role_id_index(&role.role_id),
				&RoleIdIndex {
					role_name: name.clone(),
				},
			)
			.await?;

		info!(role_name = %name, owner = %owner, "created role");
		Ok(role)
	}

	/// Load a role by name.
	pub async fn get(&self, name: &str) -> Result<AppRole> {
		let (_, role) = self.get_versioned(name).await?;
		Ok(role)
	}

	async fn get_versioned(&self, name: &str) -> Result<(u64, AppRole)> {
		self.storage
			.get_record::<AppRole>(&keys::role(&name.to_lowercase()))
			.await?
			.ok_or(ApproleError::NotFound)
	}

	/// Resolve a role-id to its role.
	///
	/// The secondary index is verified against the role record itself; a
	/// pointer left behind by a regeneration resolves to nothing.
	pub async fn resolve_role_id(&self, role_id: &RoleId) -> Result<AppRole> {
		let index: Option<(u64, RoleIdIndex)> = self
			.storage
			.get_record(&keys::role_id_index(role_id))
			.await?;
		let Some((_, index)) = index else {
			return Err(ApproleError::NotFound);
		};
		let role = self.get(&index.role_name).await?;
		if role.role_id != *role_id {
			// Stale pointer from a regenerated role-id; drop it.
			self.storage.delete(&keys::role_id_index(role_id)).await?;
			return Err(ApproleError::NotFound);
		}
		Ok(role)
	}

	/// Apply a patch to a role.
	///
	/// Runs as a CAS loop so concurrent patches serialize; the role-id swap
	/// is part of the single record write, so there is no window where both
	/// the old and new id resolve.
	#[instrument(level = "debug", skip(self, patch), fields(role_name = %name))]
	pub async fn update(&self, name: &str, patch: RolePatch) -> Result<AppRole> {
		let name = name.to_lowercase();
		for _ in 0..UPDATE_CAS_ATTEMPTS {
			let (version, current) = self.get_versioned(&name).await?;
			let old_role_id = current.role_id;

			let mut updated = current;
			if let Some(policies) = patch.policies.clone() {
				updated.policies = policies;
			}
			if let Some(token_ttl) = patch.token_ttl {
				updated.token_ttl = token_ttl;
			}
			if let Some(token_max_ttl) = patch.token_max_ttl {
				updated.token_max_ttl = token_max_ttl;
			}
			if let Some(secret_id_ttl) = patch.secret_id_ttl {
				updated.secret_id_ttl = secret_id_ttl;
			}
			if let Some(secret_id_num_uses) = patch.secret_id_num_uses {
				updated.secret_id_num_uses = secret_id_num_uses;
			}
			if let Some(cidrs) = patch.secret_id_bound_cidrs.clone() {
				updated.secret_id_bound_cidrs = cidrs;
			}
			if let Some(shared_to) = patch.shared_to.clone() {
				updated.shared_to = shared_to;
			}
			if patch.regenerate_role_id {
				updated.role_id = RoleId::generate();
			}
			updated.updated_at = self.clock.now();

			self.validate_definition(
				&updated.policies,
				updated.token_ttl,
				updated.token_max_ttl,
				updated.secret_id_ttl,
				&updated.secret_id_bound_cidrs,
				&updated.owner,
				&updated.shared_to,
			)
			.await?;

			if patch.regenerate_role_id {
				// New pointer lands before the swap; the old id stops
				// resolving the instant the role record write below wins,
				// because resolve_role_id verifies against the record.
				self.storage
					.put_record(
						&keys::role_id_index(&updated.role_id),
						&RoleIdIndex {
							role_name: name.clone(),
						},
					)
					.await?;
			}

			let swapped = self
				.storage
				.cas_record(&keys::role(&name), Some(version), &updated)
				.await?;
			if swapped {
				if patch.regenerate_role_id {
					self.storage
						.delete(&keys::role_id_index(&old_role_id))
						.await?;
					info!(role_name = %name, "regenerated role-id");
				}
				info!(role_name = %name, "updated role");
				return Ok(updated);
			}
			// Lost the race; reconcile against the new version.
			if patch.regenerate_role_id {
				self.storage
					.delete(&keys::role_id_index(&updated.role_id))
					.await?;
			}
		}
		warn!(role_name = %name, "role update contention exhausted retries");
		Err(ApproleError::Unavailable(
			"role update contention".to_string(),
		))
	}

	/// Delete a role, fanning out to every secret-id record under it.
	///
	/// Secret-ids die with the role immediately; outstanding tokens ride
	/// out their own TTL.
	#[instrument(level = "debug", skip(self), fields(role_name = %name))]
	pub async fn delete(&self, name: &str) -> Result<()> {
		let name = name.to_lowercase();
		if is_role_name_reserved(&name) {
			return Err(ApproleError::Forbidden);
		}
		let role = self.get(&name).await?;

		let secret_keys = self
			.storage
			.list_prefix(&keys::secret_id_prefix(&name))
			.await?;
		let secret_count = secret_keys.len();
		for key in secret_keys {
			self.storage.delete(&key).await?;
		}
		self.storage
			.delete(&keys::role_id_index(&role.role_id))
			.await?;
		self.storage.delete(&keys::role(&name)).await?;

		info!(role_name = %name, revoked_secret_ids = secret_count, "deleted role");
		Ok(())
	}

	/// All role names, lexicographically ordered.
	pub async fn list_names(&self) -> Result<Vec<String>> {
		let keys_listed = self.storage.list_prefix(keys::role_prefix()).await?;
		Ok(keys_listed
			.iter()
			.filter_map(|k| keys::role_name_from_key(k))
			.map(str::to_string)
			.collect())
	}
}
