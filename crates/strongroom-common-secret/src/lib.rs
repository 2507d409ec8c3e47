// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret wrapper type that prevents accidental logging of sensitive values.
//!
//! [`SecretString`] holds a sensitive string (credential values, token
//! material) and guarantees:
//!
//! - `Debug` and `Display` render `[REDACTED]`, never the inner value
//! - the inner value is zeroized on drop
//! - the only way to reach the plaintext is an explicit call to
//!   [`SecretString::expose_secret`], which is easy to grep for in review
//!
//! Serialization is feature-gated: with the default `serde` feature the
//! wrapper deserializes transparently (so credentials can be read from
//! request payloads) but **serializing emits the redaction marker**, so a
//! secret can never leak through a serialized response or log pipeline.

use zeroize::Zeroize;

/// Marker emitted wherever a secret would otherwise appear.
pub const REDACTED: &str = "[REDACTED]";

/// A string whose contents are sensitive.
///
/// Comparison is implemented in constant time with respect to the secret
/// length to avoid trivially timing-leaking prefixes during equality checks.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	/// Wrap a sensitive string.
	pub fn new(value: String) -> Self {
		Self(value)
	}

	/// Access the inner value.
	///
	/// Call sites of this method are the complete audit surface for
	/// plaintext secret handling.
	pub fn expose_secret(&self) -> &str {
		&self.0
	}

	/// Length of the inner value in bytes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if the inner value is empty.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl From<String> for SecretString {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

impl From<&str> for SecretString {
	fn from(value: &str) -> Self {
		Self::new(value.to_string())
	}
}

impl std::fmt::Debug for SecretString {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "SecretString({REDACTED})")
	}
}

impl std::fmt::Display for SecretString {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{REDACTED}")
	}
}

impl PartialEq for SecretString {
	fn eq(&self, other: &Self) -> bool {
		let a = self.0.as_bytes();
		let b = other.0.as_bytes();
		if a.len() != b.len() {
			return false;
		}
		let mut diff = 0u8;
		for (x, y) in a.iter().zip(b.iter()) {
			diff |= x ^ y;
		}
		diff == 0
	}
}

impl Eq for SecretString {}

impl Drop for SecretString {
	fn drop(&mut self) {
		self.0.zeroize();
	}
}

#[cfg(feature = "serde")]
impl serde::Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str(REDACTED)
	}
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let value = String::deserialize(deserializer)?;
		Ok(Self::new(value))
	}
}
