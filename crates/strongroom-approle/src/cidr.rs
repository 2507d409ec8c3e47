// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! CIDR allow-list handling.
//!
//! Roles carry an allow-list of networks; a secret-id may narrow it with a
//! per-credential override. The override must be a subset of the role's
//! list, and token issuance checks the caller's source address against the
//! credential's effective list. An empty list means unrestricted.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::{ApproleError, Result};

/// Parses a list of CIDR strings, failing `InvalidConfig` on the first
/// malformed entry. Bare addresses are accepted as /32 (or /128) networks.
pub fn parse_cidrs(cidrs: &[String]) -> Result<Vec<IpNet>> {
	cidrs
		.iter()
		.map(|raw| {
			raw.parse::<IpNet>()
				.or_else(|_| raw.parse::<IpAddr>().map(IpNet::from))
				.map_err(|_| ApproleError::InvalidConfig(format!("invalid CIDR: {raw}")))
		})
		.collect()
}

/// Whether every network in `child` falls inside some network of `parent`.
///
/// An empty `parent` is unrestricted, so any child passes. An empty `child`
/// passes trivially (it inherits the parent list).
pub fn is_subset(child: &[IpNet], parent: &[IpNet]) -> bool {
	if parent.is_empty() {
		return true;
	}
	child
		.iter()
		.all(|c| parent.iter().any(|p| p.contains(c)))
}

/// Whether `addr` is allowed by the list. An empty list is unrestricted.
pub fn addr_allowed(addr: IpAddr, list: &[IpNet]) -> bool {
	if list.is_empty() {
		return true;
	}
	list.iter().any(|net| net.contains(&addr))
}
