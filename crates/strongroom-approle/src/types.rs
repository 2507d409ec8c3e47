// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core type definitions for the AppRole engine.
//!
//! This module defines the foundational types used throughout the engine:
//!
//! - **ID newtypes**: Type-safe wrappers around UUIDs ([`RoleId`],
//!   [`SecretIdAccessor`], [`TokenAccessor`]) preventing accidental mixing
//! - **[`ClientContext`]**: optional per-request metadata (source address)
//!   attached to token issuance
//!
//! All ID types implement transparent serde serialization (as UUID strings)
//! and provide conversion to/from [`uuid::Uuid`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

// =============================================================================
// ID Newtypes
// =============================================================================

macro_rules! define_id_type {
	($name:ident, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			/// Create a new ID from a UUID.
			pub fn new(id: Uuid) -> Self {
				Self(id)
			}

			/// Generate a new random ID.
			pub fn generate() -> Self {
				Self(Uuid::new_v4())
			}

			/// Get the inner UUID value.
			pub fn into_inner(self) -> Uuid {
				self.0
			}

			/// Get a reference to the inner UUID.
			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl From<Uuid> for $name {
			fn from(id: Uuid) -> Self {
				Self(id)
			}
		}

		impl From<$name> for Uuid {
			fn from(id: $name) -> Self {
				id.0
			}
		}

		impl std::str::FromStr for $name {
			type Err = uuid::Error;

			fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
				Ok(Self(Uuid::parse_str(s)?))
			}
		}
	};
}

define_id_type!(
	RoleId,
	"Opaque identifier presented together with a secret-id to obtain a token."
);
define_id_type!(
	SecretIdAccessor,
	"Lookup handle for a secret-id that does not itself grant access."
);
define_id_type!(
	TokenAccessor,
	"Lookup handle for an issued token's lease record."
);

// =============================================================================
// Client Context
// =============================================================================

/// Optional per-request client metadata supplied at token issuance.
///
/// The source address, when present, is checked against the secret-id's
/// CIDR list before the credential is consumed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientContext {
	/// Source address of the caller, when the transport knows it.
	pub source_addr: Option<IpAddr>,
	/// Free-form transport metadata; opaque to the engine.
	#[serde(default)]
	pub metadata: std::collections::HashMap<String, String>,
}

impl ClientContext {
	/// Context carrying only a source address.
	pub fn from_addr(addr: IpAddr) -> Self {
		Self {
			source_addr: Some(addr),
			metadata: std::collections::HashMap::new(),
		}
	}
}
