// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Storage collaborator contract and typed access layer.
//!
//! This module provides:
//! - [`StorageBackend`] - the injected key/value collaborator with
//!   compare-and-swap over versioned entries
//! - [`MemoryBackend`] - in-process backend for tests and single-instance
//!   deployments
//! - [`StorageClient`] - serde-typed wrapper that bounds every backend call
//!   with a timeout (timeouts surface as `Unavailable`, never `NotFound`)
//! - [`keys`] - the persisted key layout
//!
//! The backend is the single source of truth: the engine caches nothing
//! across requests, and no in-process lock is held across a backend await.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ApproleError, Result};

/// Default bound on any single storage call.
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// A stored value together with its write version.
///
/// Versions are per-key and strictly increasing; they exist solely to make
/// [`StorageBackend::compare_and_swap`] expressible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEntry {
	/// Write version of this entry.
	pub version: u64,
	/// Serialized record bytes.
	pub data: Vec<u8>,
}

/// Key/value collaborator this engine persists through.
///
/// Implementations must provide linearizable `compare_and_swap` per key;
/// the single-use secret-id check depends on it.
#[async_trait]
pub trait StorageBackend: Send + Sync {
	/// Read a key. `Ok(None)` when absent.
	async fn get(&self, key: &str) -> Result<Option<VersionedEntry>>;

	/// Unconditionally write a key.
	async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

	/// Delete a key. Deleting an absent key is a no-op.
	async fn delete(&self, key: &str) -> Result<()>;

	/// List all keys with the given prefix, in lexicographic order.
	async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>>;

	/// Atomically write `data` if the key's current version matches
	/// `expected`. `expected = None` means "key must be absent" and is used
	/// for create-if-absent. Returns false (without writing) on mismatch.
	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<u64>,
		data: Vec<u8>,
	) -> Result<bool>;
}

// =============================================================================
// In-memory backend
// =============================================================================

/// In-process [`StorageBackend`] backed by a `BTreeMap`.
///
/// Suitable for tests and single-instance deployments; multi-instance
/// deployments inject a shared backend instead.
#[derive(Debug, Default)]
pub struct MemoryBackend {
	entries: RwLock<BTreeMap<String, VersionedEntry>>,
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl StorageBackend for MemoryBackend {
	async fn get(&self, key: &str) -> Result<Option<VersionedEntry>> {
		let entries = self.entries.read().await;
		Ok(entries.get(key).cloned())
	}

	async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
		let mut entries = self.entries.write().await;
		let version = entries.get(key).map(|e| e.version + 1).unwrap_or(1);
		entries.insert(key.to_string(), VersionedEntry { version, data });
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<()> {
		let mut entries = self.entries.write().await;
		entries.remove(key);
		Ok(())
	}

	async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
		let entries = self.entries.read().await;
		Ok(entries
			.range(prefix.to_string()..)
			.take_while(|(k, _)| k.starts_with(prefix))
			.map(|(k, _)| k.clone())
			.collect())
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<u64>,
		data: Vec<u8>,
	) -> Result<bool> {
		let mut entries = self.entries.write().await;
		let current = entries.get(key).map(|e| e.version);
		if current != expected {
			return Ok(false);
		}
		let version = current.map(|v| v + 1).unwrap_or(1);
		entries.insert(key.to_string(), VersionedEntry { version, data });
		Ok(true)
	}
}

// =============================================================================
// Typed client
// =============================================================================

/// Serde-typed view over a [`StorageBackend`] with bounded call latency.
///
/// Every call runs under `tokio::time::timeout`; an elapsed timeout maps to
/// [`ApproleError::Unavailable`] so callers can distinguish an outage from
/// a missing record.
#[derive(Clone)]
pub struct StorageClient {
	backend: Arc<dyn StorageBackend>,
	timeout: Duration,
}

impl StorageClient {
	pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
		Self::with_timeout(backend, DEFAULT_STORAGE_TIMEOUT)
	}

	pub fn with_timeout(backend: Arc<dyn StorageBackend>, timeout: Duration) -> Self {
		Self { backend, timeout }
	}

	async fn bounded<T>(
		&self,
		op: &'static str,
		fut: impl std::future::Future<Output = Result<T>> + Send,
	) -> Result<T> {
		match tokio::time::timeout(self.timeout, fut).await {
			Ok(result) => result,
			Err(_) => {
				debug!(op, timeout_ms = self.timeout.as_millis() as u64, "storage call timed out");
				Err(ApproleError::Unavailable(format!("storage {op} timed out")))
			}
		}
	}

	/// Read and deserialize a record, returning its version alongside.
	pub async fn get_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(u64, T)>> {
		let entry = self.bounded("get", self.backend.get(key)).await?;
		match entry {
			Some(entry) => {
				let record = serde_json::from_slice(&entry.data)?;
				Ok(Some((entry.version, record)))
			}
			None => Ok(None),
		}
	}

	/// Serialize and unconditionally write a record.
	pub async fn put_record<T: Serialize>(&self, key: &str, record: &T) -> Result<()> {
		let data = serde_json::to_vec(record)?;
		self.bounded("put", self.backend.put(key, data)).await
	}

	/// Serialize and conditionally write a record. Returns false on version
	/// mismatch.
	pub async fn cas_record<T: Serialize>(
		&self,
		key: &str,
		expected: Option<u64>,
		record: &T,
	) -> Result<bool> {
		let data = serde_json::to_vec(record)?;
		self.bounded("cas", self.backend.compare_and_swap(key, expected, data))
			.await
	}

	/// Delete a key; absent keys are a no-op.
	pub async fn delete(&self, key: &str) -> Result<()> {
		self.bounded("delete", self.backend.delete(key)).await
	}

	/// List keys under a prefix.
	pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
		self.bounded("list", self.backend.list_prefix(prefix)).await
	}
}

// =============================================================================
// Key layout
// =============================================================================

/// Persisted key layout.
///
/// - `role/<name>` → role record
/// - `roleid/<role_id>` → role name (secondary index, verified on read)
/// - `role/<name>/secretid/<accessor>` → secret-id record (value hashed)
/// - `token/<accessor>` → token lease record
/// - `token-value/<digest>` → token accessor (lookup by presented value)
pub mod keys {
	use crate::types::{RoleId, SecretIdAccessor, TokenAccessor};

	pub fn role(name: &str) -> String {
		format!("role/{name}")
	}

	/// Prefix listing all role records. The scan also returns
	/// `role/<name>/secretid/...` children; callers filter on
	/// [`role_name_from_key`].
	pub fn role_prefix() -> &'static str {
		"role/"
	}

	/// Extracts the role name from a `role/<name>` key, rejecting
	/// secret-id child keys.
	pub fn role_name_from_key(key: &str) -> Option<&str> {
		let rest = key.strip_prefix("role/")?;
		if rest.is_empty() || rest.contains('/') {
			return None;
		}
		Some(rest)
	}

	pub fn role_id_index(role_id: &RoleId) -> String {
		format!("roleid/{role_id}")
	}

	pub fn secret_id(role_name: &str, accessor: &SecretIdAccessor) -> String {
		format!("role/{role_name}/secretid/{accessor}")
	}

	pub fn secret_id_prefix(role_name: &str) -> String {
		format!("role/{role_name}/secretid/")
	}

	pub fn token(accessor: &TokenAccessor) -> String {
		format!("token/{accessor}")
	}

	pub fn token_value_index(digest: &str) -> String {
		format!("token-value/{digest}")
	}
}
