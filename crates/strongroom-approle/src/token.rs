// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Access-token issuance and lease lifecycle.
//!
//! Per-token state machine: `Issued → Active → (Renewed)* → Expired | Revoked`.
//!
//! Tokens are ephemeral: the only persistence is a lease record keyed by
//! token accessor (plus a value-digest pointer for lookup by presented
//! value), and dead leases are purged lazily when touched. Policies are
//! copied from the role at issuance, not referenced live, so later role
//! edits never retroactively change an outstanding token.
//!
//! Renewal follows the clamp-and-grant policy: a renewal that would pass
//! the max-TTL ceiling succeeds with only the remaining headroom granted.
//! `NonRenewable` is reserved for tokens whose role gave them no headroom
//! at all (`token_max_ttl == token_ttl`).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strongroom_common_secret::SecretString;
use tracing::{debug, info, instrument};

use crate::clock::Clock;
use crate::error::{ApproleError, Result};
use crate::role::AppRole;
use crate::storage::{keys, StorageClient};
use crate::types::TokenAccessor;

/// Prefix on every issued token value.
pub const TOKEN_VALUE_PREFIX: &str = "srt_";

/// Size in bytes of a token value's random part.
const TOKEN_VALUE_BYTES: usize = 32;

/// Persisted lease for an issued token. The token value never appears
/// here, only its SHA-256 digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenLease {
	accessor: TokenAccessor,
	/// Hex-encoded SHA-256 of the token value.
	value_digest: String,
	role_name: String,
	/// Policies copied from the role at issuance.
	policies: Vec<String>,
	issued_at: DateTime<Utc>,
	expires_at: DateTime<Utc>,
	/// Original TTL in seconds; the default renewal increment.
	ttl: u64,
	/// Ceiling in seconds on cumulative lifetime from `issued_at`.
	max_ttl: u64,
	renewal_count: u32,
}

impl TokenLease {
	fn ceiling(&self) -> DateTime<Utc> {
		self.issued_at + Duration::seconds(self.max_ttl as i64)
	}
}

/// Pointer from a token value digest to its lease accessor.
#[derive(Debug, Serialize, Deserialize)]
struct TokenValueIndex {
	accessor: TokenAccessor,
}

/// A freshly issued token. The value surfaces only here.
#[derive(Debug)]
pub struct IssuedToken {
	pub token: SecretString,
	pub accessor: TokenAccessor,
	pub policies: Vec<String>,
	pub issued_at: DateTime<Utc>,
	pub expires_at: DateTime<Utc>,
}

/// Read-only view of a live token, as returned by validate and renew.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStatus {
	pub accessor: TokenAccessor,
	pub role_name: String,
	pub policies: Vec<String>,
	pub issued_at: DateTime<Utc>,
	pub expires_at: DateTime<Utc>,
	pub renewal_count: u32,
}

impl TokenStatus {
	fn from_lease(lease: &TokenLease) -> Self {
		Self {
			accessor: lease.accessor,
			role_name: lease.role_name.clone(),
			policies: lease.policies.clone(),
			issued_at: lease.issued_at,
			expires_at: lease.expires_at,
			renewal_count: lease.renewal_count,
		}
	}
}

fn value_digest(value: &str) -> String {
	hex::encode(Sha256::digest(value.as_bytes()))
}

/// Issues, renews, revokes, and validates access tokens.
#[derive(Clone)]
pub struct TokenIssuer {
	storage: StorageClient,
	clock: Arc<dyn Clock>,
}

impl TokenIssuer {
	pub fn new(storage: StorageClient, clock: Arc<dyn Clock>) -> Self {
		Self { storage, clock }
	}

	/// Mint a token carrying the role's current policy set and TTLs.
	///
	/// The caller (the service layer) is responsible for having consumed a
	/// valid secret-id first.
	#[instrument(level = "debug", skip_all, fields(role_name = %role.name))]
	pub async fn issue_for_role(&self, role: &AppRole) -> Result<IssuedToken> {
		let mut raw = [0u8; TOKEN_VALUE_BYTES];
		OsRng.fill_bytes(&mut raw);
		let value = format!("{TOKEN_VALUE_PREFIX}{}", hex::encode(raw));

		let now = self.clock.now();
		let lease = TokenLease {
			accessor: TokenAccessor::generate(),
			value_digest: value_digest(&value),
			role_name: role.name.clone(),
			policies: role.policies.clone(),
			issued_at: now,
			expires_at: now + Duration::seconds(role.token_ttl as i64),
			ttl: role.token_ttl,
			max_ttl: role.token_max_ttl,
			renewal_count: 0,
		};
		self.storage
			.put_record(&keys::token(&lease.accessor), &lease)
			.await?;
		self.storage
			.put_record(
				&keys::token_value_index(&lease.value_digest),
				&TokenValueIndex {
					accessor: lease.accessor,
				},
			)
			.await?;

		info!(
			role_name = %role.name,
			accessor = %lease.accessor,
			expires_at = %lease.expires_at,
			"issued token"
		);
		Ok(IssuedToken {
			token: SecretString::new(value),
			accessor: lease.accessor,
			policies: lease.policies,
			issued_at: lease.issued_at,
			expires_at: lease.expires_at,
		})
	}

	/// Resolve a presented value to its live lease. Dead leases are purged
	/// on the way out: revoked and missing map to `InvalidCredential`,
	/// past-TTL maps to `Expired`.
	async fn resolve(&self, value: &str) -> Result<(String, u64, TokenLease)> {
		let digest = value_digest(value);
		let index_key = keys::token_value_index(&digest);
		let index: Option<(u64, TokenValueIndex)> = self.storage.get_record(&index_key).await?;
		let Some((_, index)) = index else {
			return Err(ApproleError::InvalidCredential);
		};

		let lease_key = keys::token(&index.accessor);
		let lease: Option<(u64, TokenLease)> = self.storage.get_record(&lease_key).await?;
		let Some((version, lease)) = lease else {
			// Lease revoked but its pointer lingered; finish the cleanup.
			self.storage.delete(&index_key).await?;
			return Err(ApproleError::InvalidCredential);
		};
		if lease.value_digest != digest {
			return Err(ApproleError::InvalidCredential);
		}

		if self.clock.now() >= lease.expires_at {
			debug!(accessor = %lease.accessor, "purging expired token lease");
			self.storage.delete(&lease_key).await?;
			self.storage.delete(&index_key).await?;
			return Err(ApproleError::Expired);
		}
		Ok((lease_key, version, lease))
	}

	/// Read-only check of a token's active state and attached policies.
	pub async fn validate(&self, value: &str) -> Result<TokenStatus> {
		let (_, _, lease) = self.resolve(value).await?;
		Ok(TokenStatus::from_lease(&lease))
	}

	/// Extend a token's TTL.
	///
	/// `increment` defaults to the original TTL. The new expiry is clamped
	/// to `issued_at + max_ttl`; cumulative lifetime can never pass the
	/// ceiling regardless of how many renewals are stacked.
	#[instrument(level = "debug", skip(self, value))]
	pub async fn renew(&self, value: &str, increment: Option<u64>) -> Result<TokenStatus> {
		let (lease_key, version, lease) = self.resolve(value).await?;
		if lease.max_ttl == lease.ttl {
			return Err(ApproleError::NonRenewable);
		}

		// Anything past max_ttl is unreachable headroom; clamping before the
		// conversion also keeps caller-supplied increments inside chrono's
		// Duration range.
		let increment = increment.unwrap_or(lease.ttl).min(lease.max_ttl);
		let now = self.clock.now();
		let requested = now + Duration::seconds(increment as i64);
		let clamped = requested.min(lease.ceiling());

		let mut renewed = lease.clone();
		// Renewal never shortens a lease.
		renewed.expires_at = clamped.max(lease.expires_at);
		renewed.renewal_count += 1;

		let swapped = self
			.storage
			.cas_record(&lease_key, Some(version), &renewed)
			.await?;
		if !swapped {
			// A concurrent renew or revoke moved the lease under us.
			return Err(ApproleError::Unavailable(
				"token lease contention".to_string(),
			));
		}
		debug!(
			accessor = %renewed.accessor,
			expires_at = %renewed.expires_at,
			renewal_count = renewed.renewal_count,
			"renewed token"
		);
		Ok(TokenStatus::from_lease(&renewed))
	}

	/// Revoke a token immediately. Idempotent: revoking an unknown or
	/// already-revoked value is a no-op success.
	#[instrument(level = "debug", skip_all)]
	pub async fn revoke(&self, value: &str) -> Result<()> {
		match self.resolve(value).await {
			Ok((lease_key, _, lease)) => {
				self.storage.delete(&lease_key).await?;
				self.storage
					.delete(&keys::token_value_index(&lease.value_digest))
					.await?;
				info!(accessor = %lease.accessor, "revoked token");
				Ok(())
			}
			Err(ApproleError::InvalidCredential) | Err(ApproleError::Expired) => Ok(()),
			Err(other) => Err(other),
		}
	}
}
