// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! RSA key pairs held by the secure storage backend.
//!
//! The two halves of a pair are independent entries addressed by tag. No
//! record links them; callers keep track of which tags belong together. The
//! RSA math itself happens in the backend.

use std::fmt;
use std::sync::Arc;

use loom_common_secret::SecretBytes;
use tracing::{debug, error, instrument, warn};

use crate::backend::{KeyHandle, KeyPairRequest};
use crate::error::{KeychainError, KeychainResult};
use crate::identity::StoreIdentity;
use crate::keychain::{collapse, KeychainContext};
use crate::status::OsStatus;

/// Supported RSA modulus sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RsaKeySize {
	Bits512,
	Bits1024,
	Bits2048,
}

impl RsaKeySize {
	pub fn bits(&self) -> usize {
		match self {
			RsaKeySize::Bits512 => 512,
			RsaKeySize::Bits1024 => 1024,
			RsaKeySize::Bits2048 => 2048,
		}
	}
}

impl TryFrom<u32> for RsaKeySize {
	type Error = KeychainError;

	fn try_from(bits: u32) -> Result<Self, Self::Error> {
		match bits {
			512 => Ok(RsaKeySize::Bits512),
			1024 => Ok(RsaKeySize::Bits1024),
			2048 => Ok(RsaKeySize::Bits2048),
			other => Err(KeychainError::WrongParameter(format!(
				"unsupported RSA key length: {other} bits"
			))),
		}
	}
}

impl fmt::Display for RsaKeySize {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} bits", self.bits())
	}
}

/// Generates, exports and removes RSA keys by tag.
///
/// Obtained from [`Keychain::key_pairs`](crate::Keychain::key_pairs); shares
/// the store's identity and backend. Key tags live in their own namespace
/// and never collide with item keys.
#[derive(Debug, Clone)]
pub struct KeyPairManager {
	context: Arc<KeychainContext>,
}

impl KeyPairManager {
	pub(crate) fn new(context: Arc<KeychainContext>) -> Self {
		Self { context }
	}

	pub fn identity(&self) -> &StoreIdentity {
		&self.context.identity
	}

	pub fn lossy(&self) -> LossyKeyPairManager<'_> {
		LossyKeyPairManager { manager: self }
	}

	/// Generate a persistent key pair under two unused tags.
	///
	/// Fails with [`KeychainError::DuplicateItem`] if either tag is taken. If
	/// the backend fails part-way, the halves it reports having written are
	/// removed before the error is returned; entries owned by anyone else are
	/// left alone.
	#[instrument(skip_all, fields(size = %size, public_tag = %public_tag, private_tag = %private_tag))]
	pub fn generate_rsa_key_pair(
		&self,
		size: RsaKeySize,
		public_tag: &str,
		private_tag: &str,
	) -> KeychainResult<()> {
		validate_tag(public_tag)?;
		validate_tag(private_tag)?;
		if public_tag == private_tag {
			return Err(KeychainError::WrongParameter(
				"public and private key tags must differ".to_string(),
			));
		}
		if self.has_key(public_tag)? || self.has_key(private_tag)? {
			debug!("key tag already in use");
			return Err(KeychainError::DuplicateItem);
		}

		let request = KeyPairRequest {
			size,
			public_tag,
			private_tag,
		};
		match self.context.backend.generate_key_pair(&request) {
			Ok(()) => {
				debug!("generated RSA key pair");
				Ok(())
			}
			Err(failure) => {
				let written: Vec<&str> = [
					(failure.public_persisted, public_tag),
					(failure.private_persisted, private_tag),
				]
				.into_iter()
				.filter_map(|(persisted, tag)| persisted.then_some(tag))
				.collect();
				warn!(
					status = %failure.status,
					rolled_back = written.len(),
					"RSA key pair generation failed"
				);
				self.roll_back(&written);
				Err(failure.status.into())
			}
		}
	}

	/// Export the key stored under `tag` in the backend's external format.
	pub fn key_data(&self, tag: &str) -> KeychainResult<SecretBytes> {
		validate_tag(tag)?;
		let data = self.context.backend.key_data(tag)?;
		debug!(tag, len = data.len(), "exported key data");
		Ok(SecretBytes::new(data))
	}

	/// A live reference for cryptographic operations without exporting the
	/// key. The caller owns it; each call returns a fresh reference.
	pub fn key_handle(&self, tag: &str) -> KeychainResult<KeyHandle> {
		validate_tag(tag)?;
		Ok(self.context.backend.key_reference(tag)?)
	}

	pub fn delete_key(&self, tag: &str) -> KeychainResult<()> {
		validate_tag(tag)?;
		self.context.backend.delete_key(tag)?;
		debug!(tag, "deleted key");
		Ok(())
	}

	pub fn has_key(&self, tag: &str) -> KeychainResult<bool> {
		validate_tag(tag)?;
		match self.context.backend.contains_key(tag) {
			Ok(()) => Ok(true),
			Err(OsStatus::ITEM_NOT_FOUND) => Ok(false),
			Err(status) => Err(status.into()),
		}
	}

	fn roll_back(&self, tags: &[&str]) {
		for tag in tags {
			match self.context.backend.delete_key(tag) {
				Ok(()) => warn!(tag, "removed half of a partially generated key pair"),
				Err(OsStatus::ITEM_NOT_FOUND) => {}
				Err(status) => {
					error!(tag, status = %status, "failed to remove partially generated key")
				}
			}
		}
	}
}

/// `bool`/`Option` view over a [`KeyPairManager`].
#[derive(Debug, Clone, Copy)]
pub struct LossyKeyPairManager<'a> {
	manager: &'a KeyPairManager,
}

impl LossyKeyPairManager<'_> {
	pub fn generate_rsa_key_pair(&self, size: RsaKeySize, public_tag: &str, private_tag: &str) -> bool {
		collapse(
			"generate_rsa_key_pair",
			self.manager
				.generate_rsa_key_pair(size, public_tag, private_tag),
		)
		.is_some()
	}

	pub fn key_data(&self, tag: &str) -> Option<SecretBytes> {
		collapse("key_data", self.manager.key_data(tag))
	}

	pub fn key_handle(&self, tag: &str) -> Option<KeyHandle> {
		collapse("key_handle", self.manager.key_handle(tag))
	}

	pub fn delete_key(&self, tag: &str) -> bool {
		collapse("delete_key", self.manager.delete_key(tag)).is_some()
	}

	pub fn has_key(&self, tag: &str) -> bool {
		collapse("has_key", self.manager.has_key(tag)).unwrap_or(false)
	}
}

fn validate_tag(tag: &str) -> KeychainResult<()> {
	if tag.is_empty() {
		return Err(KeychainError::WrongParameter(
			"key tag must not be empty".to_string(),
		));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::access_control::{AccessConstraint, AccessControl, Protection};
	use crate::accessibility::Accessibility;
	use crate::backend::{BackendCapabilities, ItemQuery, KeyClass, KeyPairFailure, KeychainBackend};
	use crate::backend_memory::{MemoryBackend, MemoryKey};
	use crate::keychain::Keychain;

	fn manager() -> (Arc<MemoryBackend>, Keychain) {
		let backend = Arc::new(MemoryBackend::new());
		let keychain = Keychain::with_service(backend.clone(), "com.example.keys");
		(backend, keychain)
	}

	#[test]
	fn key_size_from_bits() {
		assert_eq!(RsaKeySize::try_from(512).unwrap(), RsaKeySize::Bits512);
		assert_eq!(RsaKeySize::try_from(1024).unwrap(), RsaKeySize::Bits1024);
		assert_eq!(RsaKeySize::try_from(2048).unwrap(), RsaKeySize::Bits2048);
		assert!(matches!(
			RsaKeySize::try_from(4096),
			Err(KeychainError::WrongParameter(_))
		));
		assert_eq!(RsaKeySize::Bits1024.to_string(), "1024 bits");
	}

	#[test]
	fn generate_then_fetch_and_delete() {
		let (_, keychain) = manager();
		let keys = keychain.key_pairs();
		keys.generate_rsa_key_pair(RsaKeySize::Bits512, "app.pub", "app.priv")
			.unwrap();

		assert!(keys.has_key("app.pub").unwrap());
		assert!(keys.has_key("app.priv").unwrap());
		assert!(!keys.key_data("app.pub").unwrap().is_empty());

		keys.delete_key("app.pub").unwrap();
		assert!(!keys.has_key("app.pub").unwrap());
		assert!(keys.has_key("app.priv").unwrap());
		assert_eq!(
			keys.delete_key("app.pub").unwrap_err(),
			KeychainError::ItemNotFound
		);
	}

	#[test]
	fn occupied_tag_fails_without_new_entries() {
		let (backend, keychain) = manager();
		let keys = keychain.key_pairs();
		keys.generate_rsa_key_pair(RsaKeySize::Bits512, "a.pub", "a.priv")
			.unwrap();

		assert_eq!(
			keys.generate_rsa_key_pair(RsaKeySize::Bits512, "b.pub", "a.priv")
				.unwrap_err(),
			KeychainError::DuplicateItem
		);
		assert!(!keys.has_key("b.pub").unwrap());
		assert_eq!(backend.key_count(), 2);
	}

	#[test]
	fn partial_generation_is_rolled_back() {
		let (backend, keychain) = manager();
		let keys = keychain.key_pairs();
		backend.fail_next_private_key_insert();

		assert!(!keys
			.lossy()
			.generate_rsa_key_pair(RsaKeySize::Bits512, "p.pub", "p.priv"));
		assert!(!keys.has_key("p.pub").unwrap());
		assert!(!keys.has_key("p.priv").unwrap());
		assert_eq!(backend.key_count(), 0);

		keys.generate_rsa_key_pair(RsaKeySize::Bits512, "p.pub", "p.priv")
			.unwrap();
	}

	#[test]
	fn tags_are_validated() {
		let (_, keychain) = manager();
		let keys = keychain.key_pairs();
		assert!(matches!(
			keys.generate_rsa_key_pair(RsaKeySize::Bits512, "same", "same"),
			Err(KeychainError::WrongParameter(_))
		));
		assert!(matches!(
			keys.key_data(""),
			Err(KeychainError::WrongParameter(_))
		));
		assert!(!keys.lossy().has_key(""));
	}

	#[test]
	fn key_handle_is_backend_reference() {
		let (_, keychain) = manager();
		let keys = keychain.key_pairs();
		keys.generate_rsa_key_pair(RsaKeySize::Bits512, "h.pub", "h.priv")
			.unwrap();

		let public = keys.key_handle("h.pub").unwrap();
		let private = keys.key_handle("h.priv").unwrap();
		assert_eq!(public.tag(), "h.pub");
		assert_eq!(public.class(), KeyClass::Public);
		assert_eq!(private.class(), KeyClass::Private);

		let public = public.as_any().downcast_ref::<MemoryKey>().unwrap();
		let private = private.as_any().downcast_ref::<MemoryKey>().unwrap();
		let ciphertext = public.encrypt(b"wrapped secret").unwrap();
		assert_eq!(private.decrypt(&ciphertext).unwrap(), b"wrapped secret");

		assert!(keys.lossy().key_handle("missing").is_none());
	}

	#[test]
	fn key_tags_do_not_collide_with_items() {
		let (_, keychain) = manager();
		keychain.set_string("shared-name", "item", None).unwrap();

		let keys = keychain.key_pairs();
		assert!(!keys.has_key("shared-name").unwrap());
		keys.generate_rsa_key_pair(RsaKeySize::Bits512, "shared-name", "shared-name.priv")
			.unwrap();

		assert_eq!(
			keychain.string("shared-name", None).unwrap().expose(),
			"item"
		);
		keys.delete_key("shared-name").unwrap();
		assert!(keychain.contains("shared-name").unwrap());
	}

	/// Another writer claims the public tag between the occupancy check and
	/// the backend call.
	#[derive(Debug)]
	struct ContendedBackend {
		inner: MemoryBackend,
		rival_public_tag: &'static str,
		rival_private_tag: &'static str,
	}

	impl KeychainBackend for ContendedBackend {
		fn capabilities(&self) -> BackendCapabilities {
			self.inner.capabilities()
		}

		fn create_access_control(
			&self,
			accessibility: Accessibility,
			constraint: AccessConstraint,
		) -> Result<AccessControl, OsStatus> {
			self.inner.create_access_control(accessibility, constraint)
		}

		fn add(&self, query: &ItemQuery<'_>, payload: &[u8], protection: &Protection) -> Result<(), OsStatus> {
			self.inner.add(query, payload, protection)
		}

		fn update(&self, query: &ItemQuery<'_>, payload: &[u8]) -> Result<(), OsStatus> {
			self.inner.update(query, payload)
		}

		fn query(&self, query: &ItemQuery<'_>, want_data: bool) -> Result<Option<Vec<u8>>, OsStatus> {
			self.inner.query(query, want_data)
		}

		fn delete(&self, query: &ItemQuery<'_>) -> Result<(), OsStatus> {
			self.inner.delete(query)
		}

		fn delete_all(&self, identity: &StoreIdentity) -> Result<(), OsStatus> {
			self.inner.delete_all(identity)
		}

		fn generate_key_pair(&self, request: &KeyPairRequest<'_>) -> Result<(), KeyPairFailure> {
			self.inner.generate_key_pair(&KeyPairRequest {
				size: request.size,
				public_tag: self.rival_public_tag,
				private_tag: self.rival_private_tag,
			})?;
			self.inner.generate_key_pair(request)
		}

		fn key_data(&self, tag: &str) -> Result<Vec<u8>, OsStatus> {
			self.inner.key_data(tag)
		}

		fn key_reference(&self, tag: &str) -> Result<KeyHandle, OsStatus> {
			self.inner.key_reference(tag)
		}

		fn contains_key(&self, tag: &str) -> Result<(), OsStatus> {
			self.inner.contains_key(tag)
		}

		fn delete_key(&self, tag: &str) -> Result<(), OsStatus> {
			self.inner.delete_key(tag)
		}
	}

	#[test]
	fn lost_race_leaves_other_writers_key() {
		let backend = Arc::new(ContendedBackend {
			inner: MemoryBackend::new(),
			rival_public_tag: "x.pub",
			rival_private_tag: "rival.priv",
		});
		let keychain = Keychain::with_service(backend.clone(), "com.example.keys");
		let keys = keychain.key_pairs();

		assert_eq!(
			keys.generate_rsa_key_pair(RsaKeySize::Bits512, "x.pub", "x.priv")
				.unwrap_err(),
			KeychainError::DuplicateItem
		);
		assert!(keys.has_key("x.pub").unwrap());
		assert!(keys.has_key("rival.priv").unwrap());
		assert!(!keys.has_key("x.priv").unwrap());
		assert_eq!(backend.inner.key_count(), 2);
	}

	#[test]
	fn rollback_removes_only_reported_halves() {
		let (backend, keychain) = manager();
		let keys = keychain.key_pairs();
		backend.fail_next_private_key_insert();

		assert_eq!(
			keys.generate_rsa_key_pair(RsaKeySize::Bits512, "r.pub", "r.priv")
				.unwrap_err(),
			KeychainError::Allocation
		);
		assert_eq!(backend.key_count(), 0);
	}
}
