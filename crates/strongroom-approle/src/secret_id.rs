// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret-id generation, consumption, and revocation.
//!
//! A secret-id is the machine credential paired with a role-id to obtain a
//! token. The plaintext value is revealed exactly once, in the return value
//! of [`SecretIdManager::generate`]; the persisted record holds only a
//! salted SHA-256 digest, so storage compromise alone yields nothing
//! redeemable.
//!
//! Consumption is the race-sensitive path: the usage counter is decremented
//! through a storage compare-and-swap loop, never read-then-write, so a
//! secret-id with one remaining use has exactly one winner under concurrent
//! redemption. Exhausted records stay behind (with zero uses) so later
//! attempts fail `Exhausted` rather than `InvalidCredential`; revocation
//! and role deletion purge them.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strongroom_common_secret::SecretString;
use tracing::{debug, info, instrument, warn};

use crate::cidr;
use crate::clock::Clock;
use crate::error::{ApproleError, Result};
use crate::role::AppRole;
use crate::storage::{keys, StorageClient};
use crate::types::SecretIdAccessor;

/// Size in bytes of a generated secret value (hex-encoded on the wire).
const SECRET_VALUE_BYTES: usize = 32;

/// Size in bytes of the per-record digest salt.
const SALT_BYTES: usize = 16;

/// Bound on CAS retries while decrementing a contended usage counter.
const CONSUME_CAS_ATTEMPTS: u32 = 32;

/// Persisted secret-id record. The secret value itself never appears here.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SecretIdRecord {
	accessor: SecretIdAccessor,
	/// Hex-encoded digest salt.
	salt: String,
	/// Hex-encoded SHA-256 of salt || secret value.
	digest: String,
	created_at: DateTime<Utc>,
	/// None when the role's secret_id_ttl is 0 (never expires).
	expires_at: Option<DateTime<Utc>>,
	/// None when the role's secret_id_num_uses is 0 (unlimited).
	remaining_uses: Option<u32>,
	metadata: HashMap<String, String>,
	/// Effective CIDR list for this credential.
	cidr_list: Vec<String>,
}

/// Result of [`SecretIdManager::generate`] — the only place the plaintext
/// secret value ever surfaces.
#[derive(Debug)]
pub struct GeneratedSecretId {
	/// The secret value. Shown once; not retrievable afterwards.
	pub secret: SecretString,
	/// Lookup handle for revocation and listing.
	pub accessor: SecretIdAccessor,
	/// Expiry instant, when the role sets a secret-id TTL.
	pub expires_at: Option<DateTime<Utc>>,
	/// Initial usage budget, when the role limits uses.
	pub remaining_uses: Option<u32>,
}

/// Non-secret view of a secret-id, as returned by accessor listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretIdAccessorInfo {
	pub accessor: SecretIdAccessor,
	pub created_at: DateTime<Utc>,
	pub expires_at: Option<DateTime<Utc>>,
	pub remaining_uses: Option<u32>,
	pub metadata: HashMap<String, String>,
	pub cidr_list: Vec<String>,
}

/// Outcome of a successful consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedSecretId {
	pub accessor: SecretIdAccessor,
	/// Usage budget left after this consume; None when unlimited.
	pub remaining_uses: Option<u32>,
}

fn digest_hex(salt_hex: &str, secret: &str) -> Result<String> {
	let salt = hex::decode(salt_hex)
		.map_err(|_| ApproleError::Storage("corrupt secret-id salt".to_string()))?;
	let mut hasher = Sha256::new();
	hasher.update(&salt);
	hasher.update(secret.as_bytes());
	Ok(hex::encode(hasher.finalize()))
}

/// Generates, validates, and revokes secret-ids for roles.
#[derive(Clone)]
pub struct SecretIdManager {
	storage: StorageClient,
	clock: Arc<dyn Clock>,
}

impl SecretIdManager {
	pub fn new(storage: StorageClient, clock: Arc<dyn Clock>) -> Self {
		Self { storage, clock }
	}

	/// Mint a fresh secret-id for the role.
	///
	/// `cidr_override`, when given, must be a subset of the role's
	/// allow-list; it becomes the credential's effective list.
	#[instrument(level = "debug", skip_all, fields(role_name = %role.name))]
	pub async fn generate(
		&self,
		role: &AppRole,
		metadata: HashMap<String, String>,
		cidr_override: Option<Vec<String>>,
	) -> Result<GeneratedSecretId> {
		let role_nets = cidr::parse_cidrs(&role.secret_id_bound_cidrs)?;
		let cidr_list = match cidr_override {
			Some(override_list) => {
				let override_nets = cidr::parse_cidrs(&override_list)?;
				if !cidr::is_subset(&override_nets, &role_nets) {
					return Err(ApproleError::PolicyViolation(
						"CIDR override exceeds the role's allow-list".to_string(),
					));
				}
				override_list
			}
			None => role.secret_id_bound_cidrs.clone(),
		};

		let mut value = [0u8; SECRET_VALUE_BYTES];
		OsRng.fill_bytes(&mut value);
		let secret = hex::encode(value);

		let mut salt = [0u8; SALT_BYTES];
		OsRng.fill_bytes(&mut salt);
		let salt_hex = hex::encode(salt);

		let now = self.clock.now();
		let expires_at = if role.secret_id_ttl == 0 {
			None
		} else {
			Some(now + Duration::seconds(role.secret_id_ttl as i64))
		};
		let remaining_uses = if role.secret_id_num_uses == 0 {
			None
		} else {
			Some(role.secret_id_num_uses)
		};

		let record = SecretIdRecord {
			accessor: SecretIdAccessor::generate(),
			digest: digest_hex(&salt_hex, &secret)?,
			salt: salt_hex,
			created_at: now,
			expires_at,
			remaining_uses,
			metadata,
			cidr_list,
		};
		self.storage
			.put_record(&keys::secret_id(&role.name, &record.accessor), &record)
			.await?;

		info!(
			role_name = %role.name,
			accessor = %record.accessor,
			remaining_uses = ?remaining_uses,
			"generated secret-id"
		);
		Ok(GeneratedSecretId {
			secret: SecretString::new(secret),
			accessor: record.accessor,
			expires_at,
			remaining_uses,
		})
	}

	/// Locate the record matching a presented secret value.
	async fn locate(
		&self,
		role_name: &str,
		secret: &str,
	) -> Result<Option<(String, u64, SecretIdRecord)>> {
		let record_keys = self
			.storage
			.list_prefix(&keys::secret_id_prefix(role_name))
			.await?;
		for key in record_keys {
			let Some((version, record)) = self.storage.get_record::<SecretIdRecord>(&key).await?
			else {
				continue;
			};
			if digest_hex(&record.salt, secret)? == record.digest {
				return Ok(Some((key, version, record)));
			}
		}
		Ok(None)
	}

	/// Redeem one use of a secret-id.
	///
	/// Failures are distinct so callers can tell terminal from retryable:
	/// `InvalidCredential` (no live record matches), `Expired`, `Exhausted`,
	/// `PolicyViolation` (source address outside the credential's CIDR
	/// list, checked before any decrement).
	#[instrument(level = "debug", skip_all, fields(role_name = %role.name))]
	pub async fn consume(
		&self,
		role: &AppRole,
		secret: &str,
		source_addr: Option<IpAddr>,
	) -> Result<ConsumedSecretId> {
		for _ in 0..CONSUME_CAS_ATTEMPTS {
			let Some((key, version, record)) = self.locate(&role.name, secret).await? else {
				debug!(role_name = %role.name, "no secret-id record matches presented value");
				return Err(ApproleError::InvalidCredential);
			};

			if let Some(addr) = source_addr {
				let nets = cidr::parse_cidrs(&record.cidr_list)?;
				if !cidr::addr_allowed(addr, &nets) {
					return Err(ApproleError::PolicyViolation(
						"source address not in the credential's CIDR list".to_string(),
					));
				}
			}

			if let Some(expires_at) = record.expires_at {
				if self.clock.now() >= expires_at {
					return Err(ApproleError::Expired);
				}
			}

			let remaining = match record.remaining_uses {
				None => {
					// Unlimited: nothing to decrement.
					return Ok(ConsumedSecretId {
						accessor: record.accessor,
						remaining_uses: None,
					});
				}
				Some(0) => return Err(ApproleError::Exhausted),
				Some(n) => n - 1,
			};

			let mut updated = record.clone();
			updated.remaining_uses = Some(remaining);
			let swapped = self
				.storage
				.cas_record(&key, Some(version), &updated)
				.await?;
			if swapped {
				debug!(
					role_name = %role.name,
					accessor = %record.accessor,
					remaining_uses = remaining,
					"consumed secret-id"
				);
				return Ok(ConsumedSecretId {
					accessor: record.accessor,
					remaining_uses: Some(remaining),
				});
			}
			// Lost the decrement race; re-read and re-check the budget.
		}
		warn!(role_name = %role.name, "secret-id consume contention exhausted retries");
		Err(ApproleError::Unavailable(
			"secret-id consume contention".to_string(),
		))
	}

	/// Revoke a secret-id by accessor. Revoking an absent or
	/// already-revoked accessor is a no-op success.
	#[instrument(level = "debug", skip(self), fields(role_name = %role_name, accessor = %accessor))]
	pub async fn revoke(&self, role_name: &str, accessor: &SecretIdAccessor) -> Result<()> {
		self.storage
			.delete(&keys::secret_id(role_name, accessor))
			.await?;
		info!(role_name = %role_name, accessor = %accessor, "revoked secret-id");
		Ok(())
	}

	/// Revoke a batch of accessors. Idempotent per accessor.
	pub async fn revoke_many(
		&self,
		role_name: &str,
		accessors: &[SecretIdAccessor],
	) -> Result<()> {
		for accessor in accessors {
			self.revoke(role_name, accessor).await?;
		}
		Ok(())
	}

	/// Revoke every secret-id of a role.
	#[instrument(level = "debug", skip(self), fields(role_name = %role_name))]
	pub async fn revoke_all(&self, role_name: &str) -> Result<()> {
		let record_keys = self
			.storage
			.list_prefix(&keys::secret_id_prefix(role_name))
			.await?;
		let count = record_keys.len();
		for key in record_keys {
			self.storage.delete(&key).await?;
		}
		info!(role_name = %role_name, revoked = count, "revoked all secret-ids");
		Ok(())
	}

	/// Accessor-level listing. Never includes values, digests, or salts.
	pub async fn list_accessors(&self, role_name: &str) -> Result<Vec<SecretIdAccessorInfo>> {
		let record_keys = self
			.storage
			.list_prefix(&keys::secret_id_prefix(role_name))
			.await?;
		let mut infos = Vec::with_capacity(record_keys.len());
		for key in record_keys {
			let Some((_, record)) = self.storage.get_record::<SecretIdRecord>(&key).await? else {
				continue;
			};
			infos.push(SecretIdAccessorInfo {
				accessor: record.accessor,
				created_at: record.created_at,
				expires_at: record.expires_at,
				remaining_uses: record.remaining_uses,
				metadata: record.metadata,
				cidr_list: record.cidr_list,
			});
		}
		Ok(infos)
	}
}
