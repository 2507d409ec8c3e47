// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AppRole credential issuance and lifecycle engine for Strongroom.
//!
//! This crate manages machine-identity roles, the secret-id credentials
//! bound to them, and the short-lived access tokens minted from a valid
//! (role-id, secret-id) pair.
//!
//! # Overview
//!
//! - Roles bind a policy set, token TTLs, and secret-id bounds (TTL,
//!   usage count, CIDR allow-list) under a unique name
//! - Secret-ids are high-entropy, revealed exactly once at generation,
//!   persisted only as salted digests, and consumed race-free under
//!   concurrent redemption
//! - Tokens carry a policy snapshot and renew up to a hard max-TTL ceiling
//! - An authorization gate decides owner/admin standing per role and masks
//!   existence from unprivileged callers
//!
//! State lives behind the injected [`StorageBackend`] collaborator; policy
//! names resolve through [`PolicyRegistry`]; time flows through [`Clock`].
//! Nothing is cached across requests.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use strongroom_approle::{
//!     ApproleService, CallerIdentity, MemoryBackend, RoleDefinition,
//!     StaticPolicyRegistry, SystemClock,
//! };
//!
//! # async fn demo() -> strongroom_approle::Result<()> {
//! let service = ApproleService::new(
//!     Arc::new(MemoryBackend::new()),
//!     Arc::new(StaticPolicyRegistry::new(["read-billing"])),
//!     Arc::new(SystemClock),
//! );
//!
//! let admin = CallerIdentity::admin("ops");
//! let role = service
//!     .create_role(
//!         &admin,
//!         RoleDefinition {
//!             name: "billing-svc".to_string(),
//!             policies: vec!["read-billing".to_string()],
//!             token_ttl: 3600,
//!             token_max_ttl: 7200,
//!             secret_id_ttl: 600,
//!             secret_id_num_uses: 1,
//!             secret_id_bound_cidrs: vec![],
//!             shared_to: vec![],
//!         },
//!     )
//!     .await?;
//!
//! let secret_id = service
//!     .generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
//!     .await?;
//! let token = service
//!     .issue_token(&role.role_id, secret_id.secret.expose_secret(), None)
//!     .await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

pub mod authz;
pub mod cidr;
pub mod clock;
pub mod error;
pub mod identity;
pub mod registry;
pub mod role;
pub mod secret_id;
pub mod service;
pub mod storage;
pub mod token;
pub mod types;

pub use authz::Capability;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ApproleError, Result};
pub use identity::{CallerIdentity, IdentityResolver, StaticIdentityResolver};
pub use registry::{PolicyRegistry, StaticPolicyRegistry};
pub use role::{AppRole, RoleDefinition, RolePatch, RoleStore, MAX_TTL_SECS, RESERVED_ROLE_NAMES};
pub use secret_id::{
	ConsumedSecretId, GeneratedSecretId, SecretIdAccessorInfo, SecretIdManager,
};
pub use service::ApproleService;
pub use storage::{MemoryBackend, StorageBackend, StorageClient, VersionedEntry};
pub use token::{IssuedToken, TokenIssuer, TokenStatus};
pub use types::{ClientContext, RoleId, SecretIdAccessor, TokenAccessor};
