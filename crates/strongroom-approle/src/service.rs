// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The caller-facing AppRole service.
//!
//! [`ApproleService`] composes the role store, secret-id manager, token
//! issuer, and authorization gate into the operation surface the rest of
//! the platform calls. Every mutating role/secret-id operation resolves
//! the caller's capability and passes the gate before touching state;
//! token operations are possession-based and skip the gate by design.
//!
//! Control flow for a machine client: obtain a role-id and secret-id
//! (owner/admin-gated), then exchange the pair for a token via
//! [`ApproleService::issue_token`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::instrument;

use crate::authz::{self, Capability};
use crate::clock::Clock;
use crate::error::{ApproleError, Result};
use crate::identity::CallerIdentity;
use crate::registry::PolicyRegistry;
use crate::role::{AppRole, RoleDefinition, RolePatch, RoleStore};
use crate::secret_id::{GeneratedSecretId, SecretIdAccessorInfo, SecretIdManager};
use crate::storage::{StorageBackend, StorageClient};
use crate::token::{IssuedToken, TokenIssuer, TokenStatus};
use crate::types::{ClientContext, RoleId, SecretIdAccessor};

/// The AppRole credential-issuance and lifecycle engine.
#[derive(Clone)]
pub struct ApproleService {
	roles: RoleStore,
	secret_ids: SecretIdManager,
	tokens: TokenIssuer,
}

impl ApproleService {
	/// Wire the engine against its collaborators.
	pub fn new(
		backend: Arc<dyn StorageBackend>,
		registry: Arc<dyn PolicyRegistry>,
		clock: Arc<dyn Clock>,
	) -> Self {
		let storage = StorageClient::new(backend);
		Self {
			roles: RoleStore::new(storage.clone(), registry, clock.clone()),
			secret_ids: SecretIdManager::new(storage.clone(), clock.clone()),
			tokens: TokenIssuer::new(storage, clock),
		}
	}

	/// Load a role and check the caller holds at least `required` on it.
	async fn load_gated(
		&self,
		caller: &CallerIdentity,
		name: &str,
		required: Capability,
	) -> Result<AppRole> {
		// An absent role and a denied role read identically to a plain
		// caller: both paths end in NotFound.
		let role = self.roles.get(name).await?;
		authz::ensure(authz::capability_for(caller, &role), required)?;
		Ok(role)
	}

	// =========================================================================
	// Role operations
	// =========================================================================

	/// Create a role. Admin-only; the caller is recorded as owner.
	#[instrument(level = "debug", skip_all, fields(username = %caller.username))]
	pub async fn create_role(
		&self,
		caller: &CallerIdentity,
		definition: RoleDefinition,
	) -> Result<AppRole> {
		if authz::global_capability(caller) < Capability::Admin {
			// Nothing exists yet to mask, so the denial is truthful.
			return Err(ApproleError::Forbidden);
		}
		self.roles.create(definition, &caller.username).await
	}

	/// Read a role definition. Owner-or-admin; never includes secret
	/// material (secret-ids live in their own records).
	pub async fn read_role(&self, caller: &CallerIdentity, name: &str) -> Result<AppRole> {
		self.load_gated(caller, name, Capability::Owner).await
	}

	/// Read just the role-id. Owner-or-admin.
	pub async fn read_role_id(&self, caller: &CallerIdentity, name: &str) -> Result<RoleId> {
		Ok(self
			.load_gated(caller, name, Capability::Owner)
			.await?
			.role_id)
	}

	/// Patch a role. Changing policies or regenerating the role-id is
	/// admin-only; other fields are owner-or-admin.
	#[instrument(level = "debug", skip_all, fields(username = %caller.username, role_name = %name))]
	pub async fn update_role(
		&self,
		caller: &CallerIdentity,
		name: &str,
		patch: RolePatch,
	) -> Result<AppRole> {
		let required = if patch.policies.is_some() || patch.regenerate_role_id {
			Capability::Admin
		} else {
			Capability::Owner
		};
		self.load_gated(caller, name, required).await?;
		self.roles.update(name, patch).await
	}

	/// Delete a role and, with it, every secret-id it owns. Admin-only.
	/// Outstanding tokens keep their own TTL; callers wanting immediate
	/// token death revoke tokens explicitly.
	#[instrument(level = "debug", skip_all, fields(username = %caller.username, role_name = %name))]
	pub async fn delete_role(&self, caller: &CallerIdentity, name: &str) -> Result<()> {
		self.load_gated(caller, name, Capability::Admin).await?;
		self.roles.delete(name).await
	}

	/// Page through role names. Admins see everything; other callers see
	/// only roles they own or are shared on.
	pub async fn list_roles(
		&self,
		caller: &CallerIdentity,
		limit: usize,
		offset: usize,
	) -> Result<Vec<String>> {
		let names = self.roles.list_names().await?;
		let visible = if caller.is_admin {
			names
		} else {
			let mut visible = Vec::new();
			for name in names {
				if let Ok(role) = self.roles.get(&name).await {
					if role.is_owned_by(&caller.username) {
						visible.push(name);
					}
				}
			}
			visible
		};
		Ok(visible.into_iter().skip(offset).take(limit).collect())
	}

	// =========================================================================
	// Secret-id operations
	// =========================================================================

	/// Mint a secret-id for a role. Owner-or-admin. The returned value is
	/// shown exactly once; there is no retrieval path afterwards.
	#[instrument(level = "debug", skip_all, fields(username = %caller.username, role_name = %role_name))]
	pub async fn generate_secret_id(
		&self,
		caller: &CallerIdentity,
		role_name: &str,
		metadata: HashMap<String, String>,
		cidr_override: Option<Vec<String>>,
	) -> Result<GeneratedSecretId> {
		let role = self.load_gated(caller, role_name, Capability::Owner).await?;
		let generated = self
			.secret_ids
			.generate(&role, metadata, cidr_override)
			.await?;
		// A concurrent delete_role may have fanned out its cascade before
		// the new record landed; re-check and reclaim instead of leaving an
		// unreachable record behind.
		match self.roles.get(&role.name).await {
			Ok(_) => Ok(generated),
			Err(ApproleError::NotFound) => {
				self.secret_ids.revoke(&role.name, &generated.accessor).await?;
				Err(ApproleError::NotFound)
			}
			Err(other) => Err(other),
		}
	}

	/// List secret-id accessors for a role. Owner-or-admin; raw values are
	/// never included.
	pub async fn list_secret_id_accessors(
		&self,
		caller: &CallerIdentity,
		role_name: &str,
	) -> Result<Vec<SecretIdAccessorInfo>> {
		let role = self.load_gated(caller, role_name, Capability::Owner).await?;
		self.secret_ids.list_accessors(&role.name).await
	}

	/// Revoke one secret-id by accessor. Owner-or-admin; idempotent.
	pub async fn revoke_secret_id(
		&self,
		caller: &CallerIdentity,
		role_name: &str,
		accessor: &SecretIdAccessor,
	) -> Result<()> {
		let role = self.load_gated(caller, role_name, Capability::Owner).await?;
		self.secret_ids.revoke(&role.name, accessor).await
	}

	/// Revoke a batch of secret-ids. Owner-or-admin; idempotent per
	/// accessor.
	pub async fn revoke_secret_ids(
		&self,
		caller: &CallerIdentity,
		role_name: &str,
		accessors: &[SecretIdAccessor],
	) -> Result<()> {
		let role = self.load_gated(caller, role_name, Capability::Owner).await?;
		self.secret_ids.revoke_many(&role.name, accessors).await
	}

	/// Revoke every secret-id of a role. Owner-or-admin; idempotent.
	pub async fn revoke_all_secret_ids(
		&self,
		caller: &CallerIdentity,
		role_name: &str,
	) -> Result<()> {
		let role = self.load_gated(caller, role_name, Capability::Owner).await?;
		self.secret_ids.revoke_all(&role.name).await
	}

	// =========================================================================
	// Token operations (possession-based, no identity gate)
	// =========================================================================

	/// Exchange a (role-id, secret-id) pair for a token.
	///
	/// The secret-id is consumed exactly once, before the token exists; a
	/// consume failure issues nothing. If the lease write fails after the
	/// consume, the use is already spent and the error surfaces as
	/// `Unavailable` — the storage contract cannot span both records in
	/// one atomic step.
	#[instrument(level = "debug", skip_all)]
	pub async fn issue_token(
		&self,
		role_id: &RoleId,
		secret_value: &str,
		context: Option<&ClientContext>,
	) -> Result<IssuedToken> {
		let role = match self.roles.resolve_role_id(role_id).await {
			Ok(role) => role,
			// A deleted or unknown role-id is a credential failure to the
			// presenter, not a probe-able existence signal.
			Err(ApproleError::NotFound) => return Err(ApproleError::InvalidCredential),
			Err(other) => return Err(other),
		};
		let source_addr = context.and_then(|ctx| ctx.source_addr);
		self.secret_ids
			.consume(&role, secret_value, source_addr)
			.await?;
		self.tokens.issue_for_role(&role).await
	}

	/// Extend a token's TTL, clamped to its max-TTL ceiling.
	pub async fn renew_token(&self, value: &str, increment: Option<u64>) -> Result<TokenStatus> {
		self.tokens.renew(value, increment).await
	}

	/// Revoke a token immediately. Idempotent.
	pub async fn revoke_token(&self, value: &str) -> Result<()> {
		self.tokens.revoke(value).await
	}

	/// Read-only check of a token's active state and attached policies.
	pub async fn validate_token(&self, value: &str) -> Result<TokenStatus> {
		self.tokens.validate(value).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use crate::registry::StaticPolicyRegistry;
	use crate::storage::MemoryBackend;
	use chrono::Utc;

	fn service() -> (ApproleService, Arc<ManualClock>) {
		let clock = Arc::new(ManualClock::starting_at(Utc::now()));
		let service = ApproleService::new(
			Arc::new(MemoryBackend::new()),
			Arc::new(StaticPolicyRegistry::new(["read-billing", "write-billing"])),
			clock.clone(),
		);
		(service, clock)
	}

	fn definition(name: &str) -> RoleDefinition {
		RoleDefinition {
			name: name.to_string(),
			policies: vec!["read-billing".to_string()],
			token_ttl: 3600,
			token_max_ttl: 7200,
			secret_id_ttl: 0,
			secret_id_num_uses: 1,
			secret_id_bound_cidrs: vec![],
			shared_to: vec![],
		}
	}

	mod role_gating {
		use super::*;

		#[tokio::test]
		async fn create_requires_admin() {
			let (service, _) = service();
			let err = service
				.create_role(&CallerIdentity::user("dev"), definition("billing-svc"))
				.await
				.unwrap_err();
			assert!(matches!(err, ApproleError::Forbidden));

			service
				.create_role(&CallerIdentity::admin("ops"), definition("billing-svc"))
				.await
				.unwrap();
		}

		#[tokio::test]
		async fn owner_reads_their_role() {
			let (service, _) = service();
			let admin = CallerIdentity::admin("ops");
			service
				.create_role(&admin, definition("billing-svc"))
				.await
				.unwrap();

			// The admin creator is the owner.
			let role = service.read_role(&admin, "billing-svc").await.unwrap();
			assert_eq!(role.owner, "ops");
			let role_id = service.read_role_id(&admin, "billing-svc").await.unwrap();
			assert_eq!(role_id, role.role_id);
		}

		#[tokio::test]
		async fn stranger_probe_is_masked_as_not_found() {
			let (service, _) = service();
			service
				.create_role(&CallerIdentity::admin("ops"), definition("billing-svc"))
				.await
				.unwrap();

			let mallory = CallerIdentity::user("mallory");
			let existing = service.read_role(&mallory, "billing-svc").await.unwrap_err();
			let missing = service.read_role(&mallory, "no-such-role").await.unwrap_err();
			// Indistinguishable answers for existing and missing roles.
			assert!(matches!(existing, ApproleError::NotFound));
			assert!(matches!(missing, ApproleError::NotFound));
		}

		#[tokio::test]
		async fn shared_caller_gets_owner_access() {
			let (service, _) = service();
			let admin = CallerIdentity::admin("ops");
			let mut def = definition("billing-svc");
			def.shared_to = vec!["bob".to_string()];
			service.create_role(&admin, def).await.unwrap();

			let bob = CallerIdentity::user("bob");
			assert!(service.read_role(&bob, "billing-svc").await.is_ok());
		}

		#[tokio::test]
		async fn policy_change_is_admin_only() {
			let (service, _) = service();
			let admin = CallerIdentity::admin("ops");
			let mut def = definition("billing-svc");
			def.shared_to = vec!["bob".to_string()];
			service.create_role(&admin, def).await.unwrap();

			let bob = CallerIdentity::user("bob");
			let patch = RolePatch {
				policies: Some(vec!["write-billing".to_string()]),
				..RolePatch::default()
			};
			let err = service
				.update_role(&bob, "billing-svc", patch.clone())
				.await
				.unwrap_err();
			assert!(matches!(err, ApproleError::Forbidden));

			// TTL-only patch is within the owner's reach.
			let ttl_patch = RolePatch {
				token_ttl: Some(1800),
				..RolePatch::default()
			};
			assert!(service.update_role(&bob, "billing-svc", ttl_patch).await.is_ok());

			service.update_role(&admin, "billing-svc", patch).await.unwrap();
		}

		#[tokio::test]
		async fn delete_is_admin_only() {
			let (service, _) = service();
			let admin = CallerIdentity::admin("ops");
			let mut def = definition("billing-svc");
			def.shared_to = vec!["bob".to_string()];
			service.create_role(&admin, def).await.unwrap();

			let err = service
				.delete_role(&CallerIdentity::user("bob"), "billing-svc")
				.await
				.unwrap_err();
			assert!(matches!(err, ApproleError::Forbidden));

			service.delete_role(&admin, "billing-svc").await.unwrap();
			assert!(matches!(
				service.read_role(&admin, "billing-svc").await.unwrap_err(),
				ApproleError::NotFound
			));
		}

		#[tokio::test]
		async fn listing_is_scoped_to_ownership() {
			let (service, _) = service();
			let ops = CallerIdentity::admin("ops");
			let other_admin = CallerIdentity::admin("root-team");
			let mut shared = definition("aaa-svc");
			shared.shared_to = vec!["bob".to_string()];
			service.create_role(&ops, shared).await.unwrap();
			service.create_role(&other_admin, definition("bbb-svc")).await.unwrap();

			let all = service.list_roles(&ops, 10, 0).await.unwrap();
			assert_eq!(all, vec!["aaa-svc".to_string(), "bbb-svc".to_string()]);

			let bob_view = service
				.list_roles(&CallerIdentity::user("bob"), 10, 0)
				.await
				.unwrap();
			assert_eq!(bob_view, vec!["aaa-svc".to_string()]);

			let paged = service.list_roles(&ops, 1, 1).await.unwrap();
			assert_eq!(paged, vec!["bbb-svc".to_string()]);
		}
	}

	mod secret_id_gating {
		use super::*;

		#[tokio::test]
		async fn generation_requires_owner_or_admin() {
			let (service, _) = service();
			let admin = CallerIdentity::admin("ops");
			service
				.create_role(&admin, definition("billing-svc"))
				.await
				.unwrap();

			let err = service
				.generate_secret_id(
					&CallerIdentity::user("mallory"),
					"billing-svc",
					HashMap::new(),
					None,
				)
				.await
				.unwrap_err();
			assert!(matches!(err, ApproleError::NotFound));

			let generated = service
				.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
				.await
				.unwrap();
			assert!(!generated.secret.is_empty());
		}

		#[tokio::test]
		async fn generate_racing_role_delete_leaves_no_orphan() {
			use crate::storage::VersionedEntry;
			use async_trait::async_trait;

			// Drops the role record the moment a secret-id write lands,
			// standing in for a delete_role cascade that listed records
			// before this write.
			struct DeleteRoleOnSecretWrite {
				inner: MemoryBackend,
			}

			#[async_trait]
			impl StorageBackend for DeleteRoleOnSecretWrite {
				async fn get(&self, key: &str) -> Result<Option<VersionedEntry>> {
					self.inner.get(key).await
				}
				async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
					if key.contains("/secretid/") {
						self.inner.delete("role/billing-svc").await?;
					}
					self.inner.put(key, data).await
				}
				async fn delete(&self, key: &str) -> Result<()> {
					self.inner.delete(key).await
				}
				async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
					self.inner.list_prefix(prefix).await
				}
				async fn compare_and_swap(
					&self,
					key: &str,
					expected: Option<u64>,
					data: Vec<u8>,
				) -> Result<bool> {
					self.inner.compare_and_swap(key, expected, data).await
				}
			}

			let backend = Arc::new(DeleteRoleOnSecretWrite {
				inner: MemoryBackend::new(),
			});
			let service = ApproleService::new(
				backend.clone(),
				Arc::new(StaticPolicyRegistry::new(["read-billing"])),
				Arc::new(ManualClock::starting_at(Utc::now())),
			);
			let admin = CallerIdentity::admin("ops");
			service
				.create_role(&admin, definition("billing-svc"))
				.await
				.unwrap();

			let err = service
				.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
				.await
				.unwrap_err();
			assert!(matches!(err, ApproleError::NotFound));

			// The record written mid-race was reclaimed, not leaked.
			let orphans = backend
				.list_prefix("role/billing-svc/secretid/")
				.await
				.unwrap();
			assert!(orphans.is_empty());
		}

		#[tokio::test]
		async fn accessor_listing_requires_standing() {
			let (service, _) = service();
			let admin = CallerIdentity::admin("ops");
			service
				.create_role(&admin, definition("billing-svc"))
				.await
				.unwrap();
			service
				.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
				.await
				.unwrap();

			assert_eq!(
				service
					.list_secret_id_accessors(&admin, "billing-svc")
					.await
					.unwrap()
					.len(),
				1
			);
			assert!(matches!(
				service
					.list_secret_id_accessors(&CallerIdentity::user("mallory"), "billing-svc")
					.await
					.unwrap_err(),
				ApproleError::NotFound
			));
		}
	}

	mod token_flow {
		use super::*;

		#[tokio::test]
		async fn issue_consumes_exactly_one_use() {
			let (service, _) = service();
			let admin = CallerIdentity::admin("ops");
			let role = service
				.create_role(&admin, definition("billing-svc"))
				.await
				.unwrap();
			let generated = service
				.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
				.await
				.unwrap();
			let secret = generated.secret.expose_secret().to_string();

			let issued = service
				.issue_token(&role.role_id, &secret, None)
				.await
				.unwrap();
			assert_eq!(issued.policies, vec!["read-billing".to_string()]);

			// Single-use secret-id: the second exchange is exhausted.
			let err = service
				.issue_token(&role.role_id, &secret, None)
				.await
				.unwrap_err();
			assert!(matches!(err, ApproleError::Exhausted));
		}

		#[tokio::test]
		async fn bogus_role_id_is_a_credential_failure() {
			let (service, _) = service();
			let err = service
				.issue_token(&RoleId::generate(), "whatever", None)
				.await
				.unwrap_err();
			assert!(matches!(err, ApproleError::InvalidCredential));
		}

		#[tokio::test]
		async fn failed_consume_issues_nothing() {
			let (service, _) = service();
			let admin = CallerIdentity::admin("ops");
			let role = service
				.create_role(&admin, definition("billing-svc"))
				.await
				.unwrap();
			service
				.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
				.await
				.unwrap();

			let err = service
				.issue_token(&role.role_id, "wrong-secret", None)
				.await
				.unwrap_err();
			assert!(matches!(err, ApproleError::InvalidCredential));

			// The single use is still intact for the real secret.
			let infos = service
				.list_secret_id_accessors(&admin, "billing-svc")
				.await
				.unwrap();
			assert_eq!(infos[0].remaining_uses, Some(1));
		}

		#[tokio::test]
		async fn deleting_role_invalidates_its_secret_ids() {
			let (service, _) = service();
			let admin = CallerIdentity::admin("ops");
			let role = service
				.create_role(&admin, definition("billing-svc"))
				.await
				.unwrap();
			let generated = service
				.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
				.await
				.unwrap();
			let secret = generated.secret.expose_secret().to_string();

			service.delete_role(&admin, "billing-svc").await.unwrap();
			let err = service
				.issue_token(&role.role_id, &secret, None)
				.await
				.unwrap_err();
			assert!(matches!(err, ApproleError::InvalidCredential));
		}

		#[tokio::test]
		async fn source_address_is_checked_before_consume() {
			let (service, _) = service();
			let admin = CallerIdentity::admin("ops");
			let mut def = definition("billing-svc");
			def.secret_id_bound_cidrs = vec!["10.0.0.0/8".to_string()];
			let role = service.create_role(&admin, def).await.unwrap();
			let generated = service
				.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
				.await
				.unwrap();
			let secret = generated.secret.expose_secret().to_string();

			let outside = ClientContext::from_addr("192.168.1.1".parse().unwrap());
			let err = service
				.issue_token(&role.role_id, &secret, Some(&outside))
				.await
				.unwrap_err();
			assert!(matches!(err, ApproleError::PolicyViolation(_)));

			let inside = ClientContext::from_addr("10.9.8.7".parse().unwrap());
			service
				.issue_token(&role.role_id, &secret, Some(&inside))
				.await
				.unwrap();
		}
	}
}
