// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end lifecycle tests: role → secret-id → token, under the same
//! wiring a deployment uses (service facade over the storage collaborator).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use strongroom_approle::{
	ApproleError, ApproleService, CallerIdentity, ClientContext, ManualClock, MemoryBackend,
	RoleDefinition, RolePatch, StaticPolicyRegistry,
};

fn service_with_clock() -> (ApproleService, Arc<ManualClock>) {
	let clock = Arc::new(ManualClock::starting_at(Utc::now()));
	let service = ApproleService::new(
		Arc::new(MemoryBackend::new()),
		Arc::new(StaticPolicyRegistry::new([
			"read-billing",
			"write-billing",
			"read-payroll",
		])),
		clock.clone(),
	);
	(service, clock)
}

fn billing_definition() -> RoleDefinition {
	RoleDefinition {
		name: "billing-svc".to_string(),
		policies: vec!["read-billing".to_string()],
		token_ttl: 3600,
		token_max_ttl: 7200,
		secret_id_ttl: 0,
		secret_id_num_uses: 1,
		secret_id_bound_cidrs: vec![],
		shared_to: vec![],
	}
}

#[tokio::test]
async fn billing_svc_end_to_end() {
	let (service, _) = service_with_clock();
	let admin = CallerIdentity::admin("ops");

	// Create role billing-svc with policies {read-billing}, TTL 3600s,
	// usage-limit 1.
	let role = service.create_role(&admin, billing_definition()).await.unwrap();

	// Generate a secret-id; the value surfaces exactly here.
	let generated = service
		.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
		.await
		.unwrap();
	let secret = generated.secret.expose_secret().to_string();

	// Exchange for a token carrying the role's policies.
	let issued = service
		.issue_token(&role.role_id, &secret, None)
		.await
		.unwrap();
	assert_eq!(issued.policies, vec!["read-billing".to_string()]);

	let status = service
		.validate_token(issued.token.expose_secret())
		.await
		.unwrap();
	assert_eq!(status.policies, vec!["read-billing".to_string()]);
	assert_eq!(status.role_name, "billing-svc");

	// The same secret-id cannot buy a second token.
	let err = service
		.issue_token(&role.role_id, &secret, None)
		.await
		.unwrap_err();
	assert!(matches!(err, ApproleError::Exhausted));
}

#[tokio::test]
async fn concurrent_issuance_spends_exactly_the_usage_budget() {
	let (service, _) = service_with_clock();
	let admin = CallerIdentity::admin("ops");

	let mut definition = billing_definition();
	definition.secret_id_num_uses = 3;
	let role = service.create_role(&admin, definition).await.unwrap();
	let generated = service
		.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
		.await
		.unwrap();
	let secret = generated.secret.expose_secret().to_string();

	let service = Arc::new(service);
	let mut handles = Vec::new();
	for _ in 0..16 {
		let service = service.clone();
		let role_id = role.role_id;
		let secret = secret.clone();
		handles.push(tokio::spawn(async move {
			service.issue_token(&role_id, &secret, None).await
		}));
	}

	let mut issued = 0;
	let mut exhausted = 0;
	for handle in handles {
		match handle.await.unwrap() {
			Ok(_) => issued += 1,
			Err(ApproleError::Exhausted) => exhausted += 1,
			Err(other) => panic!("unexpected error: {other:?}"),
		}
	}
	assert_eq!(issued, 3);
	assert_eq!(exhausted, 13);
}

#[tokio::test]
async fn oversized_ttls_are_rejected_at_role_creation() {
	let (service, _) = service_with_clock();
	let admin = CallerIdentity::admin("ops");

	// Type-valid but absurd TTLs must fail validation up front; they can
	// never reach expiry arithmetic on the issuance path.
	let mut definition = billing_definition();
	definition.token_ttl = 10_000_000_000_000_000;
	definition.token_max_ttl = 10_000_000_000_000_000;
	let err = service.create_role(&admin, definition).await.unwrap_err();
	assert!(matches!(err, ApproleError::InvalidConfig(_)));

	let mut definition = billing_definition();
	definition.secret_id_ttl = u64::MAX;
	let err = service.create_role(&admin, definition).await.unwrap_err();
	assert!(matches!(err, ApproleError::InvalidConfig(_)));
}

#[tokio::test]
async fn secret_id_expiry_beats_remaining_uses() {
	let (service, clock) = service_with_clock();
	let admin = CallerIdentity::admin("ops");

	let mut definition = billing_definition();
	definition.secret_id_ttl = 300;
	definition.secret_id_num_uses = 10;
	let role = service.create_role(&admin, definition).await.unwrap();
	let generated = service
		.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
		.await
		.unwrap();
	let secret = generated.secret.expose_secret().to_string();

	clock.advance(Duration::seconds(301));
	let err = service
		.issue_token(&role.role_id, &secret, None)
		.await
		.unwrap_err();
	assert!(matches!(err, ApproleError::Expired));
}

#[tokio::test]
async fn revocation_is_terminal_and_idempotent() {
	let (service, _) = service_with_clock();
	let admin = CallerIdentity::admin("ops");

	let role = service.create_role(&admin, billing_definition()).await.unwrap();
	let generated = service
		.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
		.await
		.unwrap();
	let secret = generated.secret.expose_secret().to_string();

	service
		.revoke_secret_id(&admin, "billing-svc", &generated.accessor)
		.await
		.unwrap();
	// Second revoke is a no-op success.
	service
		.revoke_secret_id(&admin, "billing-svc", &generated.accessor)
		.await
		.unwrap();

	let err = service
		.issue_token(&role.role_id, &secret, None)
		.await
		.unwrap_err();
	assert!(matches!(err, ApproleError::InvalidCredential));
}

#[tokio::test]
async fn renewals_are_clamped_to_the_max_ttl_ceiling() {
	let (service, clock) = service_with_clock();
	let admin = CallerIdentity::admin("ops");

	let role = service.create_role(&admin, billing_definition()).await.unwrap();
	let generated = service
		.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
		.await
		.unwrap();
	let issued = service
		.issue_token(&role.role_id, generated.secret.expose_secret(), None)
		.await
		.unwrap();
	let ceiling = issued.issued_at + Duration::seconds(7200);

	// Stack renewals far beyond the ceiling; expiry must clamp each time.
	for _ in 0..6 {
		clock.advance(Duration::seconds(900));
		let status = service
			.renew_token(issued.token.expose_secret(), Some(3600))
			.await
			.unwrap();
		assert!(status.expires_at <= ceiling);
	}

	// Ride past the ceiling: the token is now expired for good.
	clock.advance(Duration::seconds(3600));
	let err = service
		.validate_token(issued.token.expose_secret())
		.await
		.unwrap_err();
	assert!(matches!(err, ApproleError::Expired));
}

#[tokio::test]
async fn role_deletion_cascades_but_spares_issued_tokens() {
	let (service, _) = service_with_clock();
	let admin = CallerIdentity::admin("ops");

	let role = service.create_role(&admin, billing_definition()).await.unwrap();
	let first = service
		.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
		.await
		.unwrap();
	let second = service
		.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
		.await
		.unwrap();
	let issued = service
		.issue_token(&role.role_id, first.secret.expose_secret(), None)
		.await
		.unwrap();

	service.delete_role(&admin, "billing-svc").await.unwrap();

	// The unspent secret-id died with the role.
	let err = service
		.issue_token(&role.role_id, second.secret.expose_secret(), None)
		.await
		.unwrap_err();
	assert!(matches!(err, ApproleError::InvalidCredential));

	// The already-issued token rides out its own TTL.
	let status = service
		.validate_token(issued.token.expose_secret())
		.await
		.unwrap();
	assert_eq!(status.policies, vec!["read-billing".to_string()]);

	// Immediate death requires an explicit token revoke.
	service
		.revoke_token(issued.token.expose_secret())
		.await
		.unwrap();
	assert!(matches!(
		service
			.validate_token(issued.token.expose_secret())
			.await
			.unwrap_err(),
		ApproleError::InvalidCredential
	));
}

#[tokio::test]
async fn regenerating_the_role_id_cuts_over_atomically() {
	let (service, _) = service_with_clock();
	let admin = CallerIdentity::admin("ops");

	let role = service.create_role(&admin, billing_definition()).await.unwrap();
	let generated = service
		.generate_secret_id(&admin, "billing-svc", HashMap::new(), None)
		.await
		.unwrap();
	let secret = generated.secret.expose_secret().to_string();

	let updated = service
		.update_role(
			&admin,
			"billing-svc",
			RolePatch {
				regenerate_role_id: true,
				..RolePatch::default()
			},
		)
		.await
		.unwrap();
	assert_ne!(updated.role_id, role.role_id);

	// The old role-id no longer logs in; the new one does.
	let err = service
		.issue_token(&role.role_id, &secret, None)
		.await
		.unwrap_err();
	assert!(matches!(err, ApproleError::InvalidCredential));
	service
		.issue_token(&updated.role_id, &secret, None)
		.await
		.unwrap();
}

#[tokio::test]
async fn cidr_override_narrows_where_a_secret_id_can_be_redeemed() {
	let (service, _) = service_with_clock();
	let admin = CallerIdentity::admin("ops");

	let mut definition = billing_definition();
	definition.secret_id_bound_cidrs = vec!["10.0.0.0/8".to_string()];
	definition.secret_id_num_uses = 0;
	let role = service.create_role(&admin, definition).await.unwrap();

	let generated = service
		.generate_secret_id(
			&admin,
			"billing-svc",
			HashMap::new(),
			Some(vec!["10.1.0.0/16".to_string()]),
		)
		.await
		.unwrap();
	let secret = generated.secret.expose_secret().to_string();

	// Inside the role's list but outside the override: refused.
	let err = service
		.issue_token(
			&role.role_id,
			&secret,
			Some(&ClientContext::from_addr("10.200.0.1".parse().unwrap())),
		)
		.await
		.unwrap_err();
	assert!(matches!(err, ApproleError::PolicyViolation(_)));

	service
		.issue_token(
			&role.role_id,
			&secret,
			Some(&ClientContext::from_addr("10.1.44.5".parse().unwrap())),
		)
		.await
		.unwrap();
}

#[tokio::test]
async fn unprivileged_probes_cannot_distinguish_existing_roles() {
	let (service, _) = service_with_clock();
	let admin = CallerIdentity::admin("ops");
	service.create_role(&admin, billing_definition()).await.unwrap();

	let mallory = CallerIdentity::user("mallory");
	for target in ["billing-svc", "never-created"] {
		let read = service.read_role(&mallory, target).await.unwrap_err();
		assert!(matches!(read, ApproleError::NotFound), "read {target}");

		let generate = service
			.generate_secret_id(&mallory, target, HashMap::new(), None)
			.await
			.unwrap_err();
		assert!(matches!(generate, ApproleError::NotFound), "generate {target}");

		let revoke = service
			.revoke_all_secret_ids(&mallory, target)
			.await
			.unwrap_err();
		assert!(matches!(revoke, ApproleError::NotFound), "revoke {target}");
	}
}
