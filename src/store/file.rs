//! Simple file-backed [`RefreshTokenStore`] for lightweight single-node deployments.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{Fingerprint, RefreshTokenId, RefreshTokenRecord, UserId},
	store::{RefreshTokenStore, RotateOutcome, StoreError, StoreFuture, memory::RecordTable},
};

/// Persists refresh-token records to a JSON file after each mutation.
///
/// Mutations are applied to a copy of the table, written through a temp file + rename, and
/// only then published in memory, so a failed write leaves both disk and memory unchanged.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<RecordTable>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let table = if path.exists() { Self::load_snapshot(&path)? } else { RecordTable::default() };

		Ok(Self { path, inner: Arc::new(RwLock::new(table)) })
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<RecordTable, StoreError> {
		let metadata = path.metadata().map_err(|e| StoreError::Backend {
			message: format!("Failed to inspect {}: {e}", path.display()),
		})?;

		if metadata.len() == 0 {
			return Ok(RecordTable::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;
		let records: Vec<RefreshTokenRecord> =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		RecordTable::from_records(records)
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist(&self, table: &RecordTable) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let snapshot: Vec<_> = table.records().collect();
		let serialized =
			serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	/// Applies `f` to a copy of the table and publishes it once persisted.
	///
	/// The copy is only written when `changed` reports a modification.
	fn mutate<T>(
		&self,
		f: impl FnOnce(&mut RecordTable) -> Result<T, StoreError>,
		changed: impl FnOnce(&T) -> bool,
	) -> Result<T, StoreError> {
		let mut guard = self.inner.write();
		let mut draft = guard.clone();
		let outcome = f(&mut draft)?;

		if changed(&outcome) {
			self.persist(&draft)?;

			*guard = draft;
		}

		Ok(outcome)
	}
}
impl RefreshTokenStore for FileStore {
	fn create(&self, record: RefreshTokenRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|table| table.insert(record), |_| true) })
	}

	fn find_by_fingerprint<'a>(
		&'a self,
		fingerprint: &'a Fingerprint,
	) -> StoreFuture<'a, Option<RefreshTokenRecord>> {
		Box::pin(async move { Ok(self.inner.read().find_by_fingerprint(fingerprint).cloned()) })
	}

	fn find_by_id<'a>(
		&'a self,
		id: &'a RefreshTokenId,
	) -> StoreFuture<'a, Option<RefreshTokenRecord>> {
		Box::pin(async move { Ok(self.inner.read().find_by_id(id).cloned()) })
	}

	fn revoke_by_user_id<'a>(
		&'a self,
		user_id: &'a UserId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, usize> {
		Box::pin(async move {
			self.mutate(|table| Ok(table.revoke_by_user_id(user_id, instant)), |n| *n > 0)
		})
	}

	fn revoke_by_id<'a>(
		&'a self,
		id: &'a RefreshTokenId,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, bool> {
		Box::pin(async move { self.mutate(|table| Ok(table.revoke_by_id(id, instant)), |c| *c) })
	}

	fn delete_expired(&self, now: OffsetDateTime) -> StoreFuture<'_, usize> {
		Box::pin(async move { self.mutate(|table| Ok(table.delete_expired(now)), |n| *n > 0) })
	}

	fn rotate<'a>(
		&'a self,
		current: &'a RefreshTokenId,
		instant: OffsetDateTime,
		replacement: RefreshTokenRecord,
	) -> StoreFuture<'a, RotateOutcome> {
		Box::pin(async move {
			self.mutate(
				|table| table.rotate(current, instant, replacement),
				|outcome| matches!(outcome, RotateOutcome::Rotated),
			)
		})
	}
}
