//! Thread-safe in-memory [`RefreshTokenStore`] for single-process deployments and tests.

// self
use crate::{
	_prelude::*,
	auth::{Fingerprint, RefreshTokenId, RefreshTokenRecord, UserId},
	store::{RefreshTokenStore, RotateOutcome, StoreError, StoreFuture},
};

/// Records keyed by id with a unique fingerprint index.
#[derive(Clone, Debug, Default)]
pub(crate) struct RecordTable {
	records: HashMap<RefreshTokenId, RefreshTokenRecord>,
	by_fingerprint: HashMap<Fingerprint, RefreshTokenId>,
}
impl RecordTable {
	pub(crate) fn from_records(
		records: impl IntoIterator<Item = RefreshTokenRecord>,
	) -> Result<Self, StoreError> {
		let mut table = Self::default();

		for record in records {
			table.insert(record)?;
		}

		Ok(table)
	}

	pub(crate) fn records(&self) -> impl Iterator<Item = &RefreshTokenRecord> {
		self.records.values()
	}

	pub(crate) fn len(&self) -> usize {
		self.records.len()
	}

	pub(crate) fn insert(&mut self, record: RefreshTokenRecord) -> Result<(), StoreError> {
		if self.records.contains_key(&record.id) {
			return Err(StoreError::Conflict { message: format!("record {} exists", record.id) });
		}
		if self.by_fingerprint.contains_key(&record.fingerprint) {
			return Err(StoreError::Conflict { message: "fingerprint already stored".into() });
		}

		self.by_fingerprint.insert(record.fingerprint, record.id);
		self.records.insert(record.id, record);

		Ok(())
	}

	pub(crate) fn find_by_fingerprint(
		&self,
		fingerprint: &Fingerprint,
	) -> Option<&RefreshTokenRecord> {
		self.by_fingerprint.get(fingerprint).and_then(|id| self.records.get(id))
	}

	pub(crate) fn find_by_id(&self, id: &RefreshTokenId) -> Option<&RefreshTokenRecord> {
		self.records.get(id)
	}

	pub(crate) fn revoke_by_user_id(&mut self, user_id: &UserId, instant: OffsetDateTime) -> usize {
		let mut changed = 0;

		for record in self.records.values_mut() {
			if &record.user_id == user_id && !record.is_revoked() {
				record.revoke(instant);

				changed += 1;
			}
		}

		changed
	}

	pub(crate) fn revoke_by_id(&mut self, id: &RefreshTokenId, instant: OffsetDateTime) -> bool {
		match self.records.get_mut(id) {
			Some(record) if !record.is_revoked() => {
				record.revoke(instant);

				true
			},
			_ => false,
		}
	}

	pub(crate) fn delete_expired(&mut self, now: OffsetDateTime) -> usize {
		let before = self.records.len();
		let by_fingerprint = &mut self.by_fingerprint;

		self.records.retain(|_, record| {
			let keep = !record.is_expired_at(now);

			if !keep {
				by_fingerprint.remove(&record.fingerprint);
			}

			keep
		});

		before - self.records.len()
	}

	pub(crate) fn rotate(
		&mut self,
		current: &RefreshTokenId,
		instant: OffsetDateTime,
		replacement: RefreshTokenRecord,
	) -> Result<RotateOutcome, StoreError> {
		if !self.records.get(current).is_some_and(|record| record.is_active_at(instant)) {
			return Ok(RotateOutcome::NotActive);
		}

		// Insert first so a conflicting replacement leaves the current record untouched.
		self.insert(replacement)?;

		if let Some(record) = self.records.get_mut(current) {
			record.revoke(instant);
		}

		Ok(RotateOutcome::Rotated)
	}
}

type StoreMap = Arc<RwLock<RecordTable>>;

/// Thread-safe storage backend that keeps records in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of records currently held, including revoked ones.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when the store holds no records.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Clones every record belonging to `user_id`.
	pub fn records_for(&self, user_id: &UserId) -> Vec<RefreshTokenRecord> {
		self.0.read().records().filter(|record| &record.user_id == user_id).cloned().collect()
	}

	fn create_now(map: StoreMap, record: RefreshTokenRecord) -> Result<(), StoreError> {
		map.write().insert(record)
	}

	fn find_by_fingerprint_now(map: StoreMap, fingerprint: Fingerprint) -> Option<RefreshTokenRecord> {
		map.read().find_by_fingerprint(&fingerprint).cloned()
	}

	fn find_by_id_now(map: StoreMap, id: RefreshTokenId) -> Option<RefreshTokenRecord> {
		map.read().find_by_id(&id).cloned()
	}

	fn rotate_now(
		map: StoreMap,
		current: RefreshTokenId,
		instant: OffsetDateTime,
		replacement: RefreshTokenRecord,
	) -> Result<RotateOutcome, StoreError> {
		map.write().rotate(&current, instant, replacement)
	}
}
impl RefreshTokenStore for MemoryStore {
	fn create(&self, record: RefreshTokenRecord) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move { Self::create_now(map, record) })
	}

	fn find_by_fingerprint<'a>(
		&'a self,
		fingerprint: &'a Fingerprint,
	) -> StoreFuture<'a, Option<RefreshTokenRecord>> {
		let map = self.0.clone();
		let fingerprint = *fingerprint;

		Box::pin(async move { Ok(Self::find_by_fingerprint_now(map, fingerprint)) })
	}

	fn find_by_id<'a>(
		&'a self,
		id: &'a RefreshTokenId,
	) -> StoreFuture<'a, Option<RefreshTokenRecord>> {
		let map = self.0.clone();
		let id = *id;

		Box::pin(async move { Ok(Self::find_by_id_now(map, id)) })
	}

	fn revoke_by_user_id<'a>(
		&'a self,
		user_id: &'a UserId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, usize> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().revoke_by_user_id(user_id, instant)) })
	}

	fn revoke_by_id<'a>(
		&'a self,
		id: &'a RefreshTokenId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, bool> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().revoke_by_id(id, instant)) })
	}

	fn delete_expired(&self, now: OffsetDateTime) -> StoreFuture<'_, usize> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().delete_expired(now)) })
	}

	fn rotate<'a>(
		&'a self,
		current: &'a RefreshTokenId,
		instant: OffsetDateTime,
		replacement: RefreshTokenRecord,
	) -> StoreFuture<'a, RotateOutcome> {
		let map = self.0.clone();
		let current = *current;

		Box::pin(async move { Self::rotate_now(map, current, instant, replacement) })
	}
}
