// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! OS keyring backend (macOS Keychain, Windows Credential Manager, Secret
//! Service) through the `keyring` crate.
//!
//! Generic items only. The access group becomes the keyring target, tiers
//! and user-presence gating are left to the platform defaults, and key pair
//! operations report `UNIMPLEMENTED`.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::access_control::{AccessConstraint, AccessControl, Protection};
use crate::accessibility::Accessibility;
use crate::backend::{
	BackendCapabilities, ItemQuery, KeyHandle, KeyPairFailure, KeyPairRequest, KeychainBackend,
};
use crate::identity::StoreIdentity;
use crate::status::OsStatus;

/// Account name of the per-identity entry listing stored item keys.
const INDEX_ACCOUNT: &str = "__loom_keychain_index__";

#[derive(Debug, Default)]
pub struct KeyringBackend {
	// Serializes read-modify-write of the index entries.
	index_lock: Mutex<()>,
}

impl KeyringBackend {
	pub fn new() -> Self {
		Self::default()
	}

	fn entry(identity: &StoreIdentity, account: &str) -> Result<keyring::Entry, OsStatus> {
		let entry = match identity.access_group() {
			Some(group) => keyring::Entry::new_with_target(group, identity.service(), account),
			None => keyring::Entry::new(identity.service(), account),
		};
		entry.map_err(map_error)
	}

	fn read_index(identity: &StoreIdentity) -> Result<BTreeSet<String>, OsStatus> {
		let entry = Self::entry(identity, INDEX_ACCOUNT)?;
		match entry.get_secret() {
			Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
				warn!(identity = %identity, error = %e, "keychain index is corrupt");
				OsStatus::DECODE
			}),
			Err(keyring::Error::NoEntry) => Ok(BTreeSet::new()),
			Err(e) => Err(map_error(e)),
		}
	}

	fn write_index(identity: &StoreIdentity, keys: &BTreeSet<String>) -> Result<(), OsStatus> {
		let entry = Self::entry(identity, INDEX_ACCOUNT)?;
		if keys.is_empty() {
			return match entry.delete_credential() {
				Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
				Err(e) => Err(map_error(e)),
			};
		}
		let raw = serde_json::to_vec(keys).map_err(|_| OsStatus::ALLOCATE)?;
		entry.set_secret(&raw).map_err(map_error)
	}
}

fn map_error(error: keyring::Error) -> OsStatus {
	match error {
		keyring::Error::NoEntry => OsStatus::ITEM_NOT_FOUND,
		keyring::Error::NoStorageAccess(_) => OsStatus::INTERACTION_NOT_ALLOWED,
		keyring::Error::BadEncoding(_) => OsStatus::DECODE,
		keyring::Error::TooLong(_, _) | keyring::Error::Invalid(_, _) => OsStatus::PARAM,
		keyring::Error::Ambiguous(_) => OsStatus::DUPLICATE_ITEM,
		other => {
			warn!(error = %other, "keyring platform failure");
			OsStatus::NOT_AVAILABLE
		}
	}
}

/// Write an item, then record it in the index. An item that cannot be
/// indexed is removed again so `delete_all` never misses it.
fn store_indexed<W, I, U>(write: W, index: I, undo: U) -> Result<(), OsStatus>
where
	W: FnOnce() -> Result<(), OsStatus>,
	I: FnOnce() -> Result<(), OsStatus>,
	U: FnOnce() -> Result<(), OsStatus>,
{
	write()?;
	if let Err(status) = index() {
		if let Err(undo_status) = undo() {
			warn!(status = %undo_status, "failed to remove unindexed keyring item");
		}
		return Err(status);
	}
	Ok(())
}

fn check_account(key: &str) -> Result<(), OsStatus> {
	if key == INDEX_ACCOUNT {
		return Err(OsStatus::PARAM);
	}
	Ok(())
}

impl KeychainBackend for KeyringBackend {
	fn capabilities(&self) -> BackendCapabilities {
		BackendCapabilities::default()
	}

	fn create_access_control(
		&self,
		_accessibility: Accessibility,
		_constraint: AccessConstraint,
	) -> Result<AccessControl, OsStatus> {
		Err(OsStatus::UNIMPLEMENTED)
	}

	fn add(&self, query: &ItemQuery<'_>, payload: &[u8], protection: &Protection) -> Result<(), OsStatus> {
		check_account(query.key)?;
		let _guard = self.index_lock.lock();
		let entry = Self::entry(query.identity, query.key)?;
		match entry.get_secret() {
			Ok(_) => return Err(OsStatus::DUPLICATE_ITEM),
			Err(keyring::Error::NoEntry) => {}
			Err(e) => return Err(map_error(e)),
		}
		store_indexed(
			|| entry.set_secret(payload).map_err(map_error),
			|| {
				let mut index = Self::read_index(query.identity)?;
				index.insert(query.key.to_string());
				Self::write_index(query.identity, &index)
			},
			|| entry.delete_credential().map_err(map_error),
		)?;
		debug!(
			accessibility = %protection.accessibility(),
			"stored keyring item with platform default accessibility"
		);
		Ok(())
	}

	fn update(&self, query: &ItemQuery<'_>, payload: &[u8]) -> Result<(), OsStatus> {
		check_account(query.key)?;
		let entry = Self::entry(query.identity, query.key)?;
		match entry.get_secret() {
			Ok(_) => entry.set_secret(payload).map_err(map_error),
			Err(e) => Err(map_error(e)),
		}
	}

	fn query(&self, query: &ItemQuery<'_>, want_data: bool) -> Result<Option<Vec<u8>>, OsStatus> {
		check_account(query.key)?;
		let secret = Self::entry(query.identity, query.key)?
			.get_secret()
			.map_err(map_error)?;
		Ok(want_data.then_some(secret))
	}

	fn delete(&self, query: &ItemQuery<'_>) -> Result<(), OsStatus> {
		check_account(query.key)?;
		let _guard = self.index_lock.lock();
		Self::entry(query.identity, query.key)?
			.delete_credential()
			.map_err(map_error)?;

		let mut index = Self::read_index(query.identity)?;
		if index.remove(query.key) {
			Self::write_index(query.identity, &index)?;
		}
		Ok(())
	}

	fn delete_all(&self, identity: &StoreIdentity) -> Result<(), OsStatus> {
		let _guard = self.index_lock.lock();
		let index = Self::read_index(identity)?;
		let mut removed = 0usize;
		for key in &index {
			match Self::entry(identity, key)?.delete_credential() {
				Ok(()) => removed += 1,
				Err(keyring::Error::NoEntry) => {}
				Err(e) => return Err(map_error(e)),
			}
		}
		Self::write_index(identity, &BTreeSet::new())?;
		if removed == 0 {
			return Err(OsStatus::ITEM_NOT_FOUND);
		}
		debug!(identity = %identity, removed, "cleared keyring items");
		Ok(())
	}

	fn generate_key_pair(&self, _request: &KeyPairRequest<'_>) -> Result<(), KeyPairFailure> {
		Err(OsStatus::UNIMPLEMENTED.into())
	}

	fn key_data(&self, _tag: &str) -> Result<Vec<u8>, OsStatus> {
		Err(OsStatus::UNIMPLEMENTED)
	}

	fn key_reference(&self, _tag: &str) -> Result<KeyHandle, OsStatus> {
		Err(OsStatus::UNIMPLEMENTED)
	}

	fn contains_key(&self, _tag: &str) -> Result<(), OsStatus> {
		Err(OsStatus::UNIMPLEMENTED)
	}

	fn delete_key(&self, _tag: &str) -> Result<(), OsStatus> {
		Err(OsStatus::UNIMPLEMENTED)
	}
}
