// std
use std::sync::Arc;
// crates.io
use time::{Duration, OffsetDateTime, macros};
// self
use authkeep::{
	auth::{HmacKey, RefreshTokenId, RefreshTokenRecord, UserId},
	store::{MemoryStore, RefreshTokenStore, RotateOutcome, StoreError},
};

const ISSUED: OffsetDateTime = macros::datetime!(2025-11-10 12:00 UTC);

fn user(value: &str) -> UserId {
	UserId::new(value).expect("Failed to build user identifier for memory store tests.")
}

fn build_record(user_id: &UserId, raw: &[u8]) -> RefreshTokenRecord {
	let key = HmacKey::new(1, vec![42; 32]).expect("Fingerprint key fixture should build.");

	RefreshTokenRecord {
		id: RefreshTokenId::generate(),
		user_id: user_id.clone(),
		fingerprint: key.fingerprint(raw),
		key_id: key.id(),
		issued_at: ISSUED,
		expires_at: ISSUED + Duration::days(30),
		revoked_at: None,
	}
}

#[tokio::test]
async fn create_and_find_round_trip() {
	let store = MemoryStore::default();
	let record = build_record(&user("alice"), b"secret-1");

	store
		.create(record.clone())
		.await
		.expect("Saving record fixture into memory store should succeed.");

	let by_fingerprint = store
		.find_by_fingerprint(&record.fingerprint)
		.await
		.expect("Fetching by fingerprint should succeed.")
		.expect("Stored record should remain present.");
	let by_id = store
		.find_by_id(&record.id)
		.await
		.expect("Fetching by id should succeed.")
		.expect("Stored record should remain present.");

	assert_eq!(by_fingerprint, record);
	assert_eq!(by_id, record);
	assert!(
		store
			.find_by_id(&RefreshTokenId::generate())
			.await
			.expect("Fetching a missing id should succeed.")
			.is_none()
	);
}

#[tokio::test]
async fn duplicate_fingerprints_are_rejected() {
	let store = MemoryStore::default();
	let alice = user("alice");
	let first = build_record(&alice, b"same-secret");
	let second = build_record(&alice, b"same-secret");

	store.create(first).await.expect("First insert should succeed.");

	let err = store.create(second).await.expect_err("Duplicate fingerprint should be rejected.");

	assert!(matches!(err, StoreError::Conflict { .. }));
	assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn rotate_only_succeeds_for_active_records() {
	let store = MemoryStore::default();
	let alice = user("alice");
	let current = build_record(&alice, b"current");
	let next = build_record(&alice, b"next");
	let late = build_record(&alice, b"late");

	store.create(current.clone()).await.expect("Insert should succeed.");

	let instant = ISSUED + Duration::hours(1);

	assert_eq!(
		store.rotate(&current.id, instant, next.clone()).await.expect("Rotate should succeed."),
		RotateOutcome::Rotated
	);
	assert_eq!(
		store.rotate(&current.id, instant, late.clone()).await.expect("Rotate should succeed."),
		RotateOutcome::NotActive
	);
	assert!(
		store
			.find_by_fingerprint(&late.fingerprint)
			.await
			.expect("Lookup should succeed.")
			.is_none(),
		"A losing rotation must not store its replacement."
	);

	let revoked = store
		.find_by_id(&current.id)
		.await
		.expect("Lookup should succeed.")
		.expect("Rotated record should remain until it expires.");

	assert_eq!(revoked.revoked_at, Some(instant));
}

#[tokio::test]
async fn rotate_rejects_expired_records() {
	let store = MemoryStore::default();
	let alice = user("alice");
	let current = build_record(&alice, b"current");

	store.create(current.clone()).await.expect("Insert should succeed.");

	let outcome = store
		.rotate(&current.id, current.expires_at, build_record(&alice, b"next"))
		.await
		.expect("Rotate should succeed.");

	assert_eq!(outcome, RotateOutcome::NotActive);
	assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn revocations_report_how_many_rows_changed() {
	let store = MemoryStore::default();
	let alice = user("alice");
	let bob = user("bob");
	let a1 = build_record(&alice, b"a1");
	let a2 = build_record(&alice, b"a2");
	let b1 = build_record(&bob, b"b1");

	for record in [a1.clone(), a2.clone(), b1.clone()] {
		store.create(record).await.expect("Insert should succeed.");
	}

	let instant = ISSUED + Duration::minutes(5);

	assert!(store.revoke_by_id(&a1.id, instant).await.expect("Revoke should succeed."));
	assert!(!store.revoke_by_id(&a1.id, instant).await.expect("Revoke should succeed."));
	assert_eq!(store.revoke_by_user_id(&alice, instant).await.expect("Revoke should succeed."), 1);
	assert_eq!(store.revoke_by_user_id(&alice, instant).await.expect("Revoke should succeed."), 0);
	assert!(store.records_for(&alice).iter().all(RefreshTokenRecord::is_revoked));
	assert!(store.records_for(&bob).iter().all(|record| !record.is_revoked()));
}

#[tokio::test]
async fn delete_expired_removes_rows_and_their_index() {
	let store = MemoryStore::default();
	let alice = user("alice");
	let short = RefreshTokenRecord {
		expires_at: ISSUED + Duration::hours(1),
		..build_record(&alice, b"short")
	};
	let long = build_record(&alice, b"long");

	store.create(short.clone()).await.expect("Insert should succeed.");
	store.create(long.clone()).await.expect("Insert should succeed.");

	assert_eq!(
		store.delete_expired(short.expires_at).await.expect("Delete should succeed."),
		1
	);
	assert!(
		store
			.find_by_fingerprint(&short.fingerprint)
			.await
			.expect("Lookup should succeed.")
			.is_none()
	);

	// The fingerprint index no longer blocks reuse of the deleted digest.
	store.create(RefreshTokenRecord { id: RefreshTokenId::generate(), ..short }).await.expect(
		"Re-inserting a deleted fingerprint should succeed.",
	);
	assert_eq!(store.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotations_have_a_single_winner() {
	let store = Arc::new(MemoryStore::default());
	let alice = user("alice");
	let current = build_record(&alice, b"contended");

	store.create(current.clone()).await.expect("Insert should succeed.");

	let mut tasks = Vec::new();

	for i in 0..32_u8 {
		let store = store.clone();
		let replacement = build_record(&alice, &[i; 8]);
		let id = current.id;

		tasks.push(tokio::spawn(async move {
			store.rotate(&id, ISSUED + Duration::minutes(1), replacement).await
		}));
	}

	let mut rotated = 0;

	for task in tasks {
		let outcome =
			task.await.expect("Rotation task should not panic.").expect("Rotate should succeed.");

		if outcome == RotateOutcome::Rotated {
			rotated += 1;
		}
	}

	assert_eq!(rotated, 1);
	assert_eq!(store.len(), 2);
}
