// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The secure item store.

use std::sync::Arc;
use std::time::Duration;

use loom_common_secret::{SecretBytes, SecretString};
use tracing::{debug, instrument};

use crate::access_control::{AccessControlDescriptor, AuthenticationContext};
use crate::accessibility::Accessibility;
use crate::backend::{ItemQuery, KeychainBackend};
use crate::config::KeychainConfig;
use crate::error::{KeychainError, KeychainResult};
use crate::identity::StoreIdentity;
use crate::key_pair::KeyPairManager;
use crate::status::OsStatus;

/// Identity, backend and capabilities shared by a [`Keychain`] and the
/// [`KeyPairManager`] it hands out.
#[derive(Debug)]
pub(crate) struct KeychainContext {
	pub(crate) identity: StoreIdentity,
	pub(crate) backend: Arc<dyn KeychainBackend>,
	pub(crate) descriptor: AccessControlDescriptor,
}

/// Stores small secrets under a fixed `(service, access group)` identity.
///
/// Every operation has a `Result` form that preserves the failure kind;
/// [`Keychain::lossy`] offers `bool`/`Option` sugar on top of it.
///
/// Calls block, and may wait on a biometric or passcode prompt. Run them off
/// any thread that must stay responsive.
///
/// ```
/// use std::sync::Arc;
/// use loom_cli_keychain::{Keychain, MemoryBackend};
///
/// let keychain = Keychain::with_service(Arc::new(MemoryBackend::new()), "com.example.app");
/// keychain.set_string("refresh_token", "rt_abc", None)?;
/// assert_eq!(keychain.string("refresh_token", None)?.expose(), "rt_abc");
/// # Ok::<(), loom_cli_keychain::KeychainError>(())
/// ```
#[derive(Debug)]
pub struct Keychain {
	context: Arc<KeychainContext>,
	default_accessibility: Accessibility,
	use_access_control: bool,
	authentication: AuthenticationContext,
}

impl Keychain {
	/// Store under the host process identity with no access group.
	pub fn new(backend: Arc<dyn KeychainBackend>) -> Self {
		Self::with_identity(backend, StoreIdentity::default())
	}

	pub fn with_service(backend: Arc<dyn KeychainBackend>, service: impl Into<String>) -> Self {
		Self::with_identity(backend, StoreIdentity::new(service, None))
	}

	pub fn with_access_group(
		backend: Arc<dyn KeychainBackend>,
		service: impl Into<String>,
		access_group: impl Into<String>,
	) -> Self {
		Self::with_identity(
			backend,
			StoreIdentity::new(service, Some(access_group.into())),
		)
	}

	pub fn with_identity(backend: Arc<dyn KeychainBackend>, identity: StoreIdentity) -> Self {
		let descriptor = AccessControlDescriptor::new(backend.capabilities());
		debug!(
			identity = %identity,
			supports_access_control = descriptor.capabilities().supports_access_control,
			"keychain created"
		);
		Self {
			context: Arc::new(KeychainContext {
				identity,
				backend,
				descriptor,
			}),
			default_accessibility: Accessibility::default(),
			use_access_control: false,
			authentication: AuthenticationContext::new(),
		}
	}

	/// Build a store from configuration, validating the reuse duration
	/// against the backend.
	#[instrument(skip_all)]
	pub fn from_config(
		backend: Arc<dyn KeychainBackend>,
		config: &KeychainConfig,
	) -> KeychainResult<Self> {
		let mut keychain = Self::with_identity(backend, config.identity());
		keychain.set_default_accessibility(config.default_accessibility);
		keychain.set_use_access_control(config.use_access_control);
		if let Some(reuse) = config.authentication_reuse() {
			keychain.set_authentication_reuse_duration(reuse)?;
		}
		Ok(keychain)
	}

	pub fn identity(&self) -> &StoreIdentity {
		&self.context.identity
	}

	pub fn service(&self) -> &str {
		self.context.identity.service()
	}

	pub fn access_group(&self) -> Option<&str> {
		self.context.identity.access_group()
	}

	pub fn default_accessibility(&self) -> Accessibility {
		self.default_accessibility
	}

	/// Tier for items added from now on. Existing items keep theirs.
	pub fn set_default_accessibility(&mut self, accessibility: Accessibility) {
		self.default_accessibility = accessibility;
	}

	pub fn use_access_control(&self) -> bool {
		self.use_access_control
	}

	/// Gate items added from now on behind user presence. Ignored by backends
	/// without access-control support.
	pub fn set_use_access_control(&mut self, enabled: bool) {
		self.use_access_control = enabled;
	}

	pub fn authentication_context(&self) -> &AuthenticationContext {
		&self.authentication
	}

	/// How long a successful biometric/passcode authentication may be reused
	/// before prompting again. `Duration::ZERO` disables reuse.
	///
	/// Values above the backend maximum are rejected, not truncated.
	pub fn set_authentication_reuse_duration(&mut self, duration: Duration) -> KeychainResult<()> {
		let duration = self.context.descriptor.validate_reuse_duration(duration)?;
		self.authentication.set_reuse_duration(Some(duration));
		debug!(reuse_secs = duration.as_secs_f64(), "authentication reuse updated");
		Ok(())
	}

	/// The key pair manager sharing this store's identity and backend.
	pub fn key_pairs(&self) -> KeyPairManager {
		KeyPairManager::new(Arc::clone(&self.context))
	}

	/// Boolean/optional view of this store.
	pub fn lossy(&self) -> LossyKeychain<'_> {
		LossyKeychain { keychain: self }
	}

	/// Insert or replace the payload stored under `key`.
	///
	/// An existing item is updated in place and keeps its original
	/// protection; otherwise a new item is added with the current default
	/// accessibility and access-control setting.
	#[instrument(skip_all, fields(identity = %self.context.identity, key = %key))]
	pub fn set_data(&self, key: &str, data: &[u8], prompt: Option<&str>) -> KeychainResult<()> {
		validate_key(key)?;
		// Existing items keep their own gating, whatever the current setting.
		let update_query = self.item_query(key, non_empty(prompt), false);
		let backend = self.context.backend.as_ref();

		match backend.update(&update_query, data) {
			Ok(()) => {
				debug!(len = data.len(), "updated keychain item");
				Ok(())
			}
			Err(OsStatus::ITEM_NOT_FOUND) => {
				let protection = self.context.descriptor.build(
					backend,
					self.default_accessibility,
					self.use_access_control,
				)?;
				let add_query = self.item_query(key, self.write_prompt(prompt), false);
				backend.add(&add_query, data, &protection)?;
				debug!(
					len = data.len(),
					accessibility = %protection.accessibility(),
					user_presence = protection.requires_user_presence(),
					"added keychain item"
				);
				Ok(())
			}
			Err(status) => {
				debug!(status = %status, "keychain update failed");
				Err(status.into())
			}
		}
	}

	/// Store `value` as UTF-8.
	pub fn set_string(&self, key: &str, value: &str, prompt: Option<&str>) -> KeychainResult<()> {
		self.set_data(key, value.as_bytes(), prompt)
	}

	/// Fetch the payload stored under `key`.
	///
	/// Fails with [`KeychainError::ItemNotFound`] when nothing is stored and
	/// with [`KeychainError::AuthenticationFailed`] or
	/// [`KeychainError::InteractionNotAllowed`] when the item exists but
	/// could not be unlocked.
	#[instrument(skip_all, fields(identity = %self.context.identity, key = %key))]
	pub fn data(&self, key: &str, prompt: Option<&str>) -> KeychainResult<SecretBytes> {
		validate_key(key)?;
		let query = self.item_query(key, non_empty(prompt), false);

		match self.context.backend.query(&query, true) {
			Ok(Some(bytes)) => {
				debug!(len = bytes.len(), "fetched keychain item");
				Ok(SecretBytes::new(bytes))
			}
			Ok(None) => Err(KeychainError::Platform(
				"backend returned no payload for a data query".to_string(),
			)),
			Err(status) => {
				debug!(status = %status, "keychain fetch failed");
				Err(status.into())
			}
		}
	}

	/// Fetch the payload under `key` as UTF-8 text.
	pub fn string(&self, key: &str, prompt: Option<&str>) -> KeychainResult<SecretString> {
		let bytes = self.data(key, prompt)?;
		// Decode in place so a rejected payload is never copied out of the secret.
		std::str::from_utf8(bytes.expose_bytes())
			.map(|text| SecretString::new(text.to_owned()))
			.map_err(|e| KeychainError::Decode(format!("item is not valid UTF-8: {e}")))
	}

	/// Remove the item stored under `key`.
	#[instrument(skip_all, fields(identity = %self.context.identity, key = %key))]
	pub fn delete(&self, key: &str) -> KeychainResult<()> {
		validate_key(key)?;
		let query = self.item_query(key, None, false);
		self.context.backend.delete(&query)?;
		debug!("deleted keychain item");
		Ok(())
	}

	/// Remove every item under this store's identity. Succeeds when there
	/// is nothing to remove.
	#[instrument(skip_all, fields(identity = %self.context.identity))]
	pub fn clear_all(&self) -> KeychainResult<()> {
		match self.context.backend.delete_all(&self.context.identity) {
			Ok(()) => {
				debug!("cleared keychain items");
				Ok(())
			}
			Err(OsStatus::ITEM_NOT_FOUND) => Ok(()),
			Err(status) => Err(status.into()),
		}
	}

	/// Whether an item is stored under `key`.
	///
	/// Reads attributes only and never prompts. An item that exists but is
	/// currently locked counts as present.
	pub fn contains(&self, key: &str) -> KeychainResult<bool> {
		validate_key(key)?;
		let query = self.item_query(key, None, true);

		match self.context.backend.query(&query, false) {
			Ok(_) => Ok(true),
			Err(OsStatus::ITEM_NOT_FOUND) => Ok(false),
			Err(OsStatus::INTERACTION_NOT_ALLOWED) | Err(OsStatus::AUTH_FAILED) => Ok(true),
			Err(status) => Err(status.into()),
		}
	}

	fn item_query<'a>(
		&'a self,
		key: &'a str,
		prompt: Option<&'a str>,
		skip_authentication_ui: bool,
	) -> ItemQuery<'a> {
		ItemQuery {
			identity: &self.context.identity,
			key,
			prompt,
			context: &self.authentication,
			skip_authentication_ui,
		}
	}

	fn write_prompt<'a>(&self, prompt: Option<&'a str>) -> Option<&'a str> {
		if self
			.context
			.descriptor
			.is_effective(self.use_access_control)
		{
			non_empty(prompt)
		} else {
			None
		}
	}
}

/// `bool`/`Option` view over a [`Keychain`].
///
/// Every failure, including "not found", collapses to `false` or `None`.
/// Use the [`Keychain`] methods when the reason matters.
#[derive(Debug, Clone, Copy)]
pub struct LossyKeychain<'a> {
	keychain: &'a Keychain,
}

impl LossyKeychain<'_> {
	pub fn set_data(&self, key: &str, data: &[u8], prompt: Option<&str>) -> bool {
		collapse("set_data", self.keychain.set_data(key, data, prompt)).is_some()
	}

	pub fn set_string(&self, key: &str, value: &str, prompt: Option<&str>) -> bool {
		collapse("set_string", self.keychain.set_string(key, value, prompt)).is_some()
	}

	pub fn data(&self, key: &str, prompt: Option<&str>) -> Option<SecretBytes> {
		collapse("data", self.keychain.data(key, prompt))
	}

	pub fn string(&self, key: &str, prompt: Option<&str>) -> Option<SecretString> {
		collapse("string", self.keychain.string(key, prompt))
	}

	/// `false` both when nothing was stored and when removal was refused.
	pub fn delete(&self, key: &str) -> bool {
		collapse("delete", self.keychain.delete(key)).is_some()
	}

	pub fn clear_all(&self) {
		collapse("clear_all", self.keychain.clear_all());
	}

	pub fn contains(&self, key: &str) -> bool {
		collapse("contains", self.keychain.contains(key)).unwrap_or(false)
	}
}

pub(crate) fn collapse<T>(operation: &'static str, result: KeychainResult<T>) -> Option<T> {
	match result {
		Ok(value) => Some(value),
		Err(e) => {
			debug!(operation, error = %e, "keychain operation failed");
			None
		}
	}
}

fn validate_key(key: &str) -> KeychainResult<()> {
	if key.is_empty() {
		return Err(KeychainError::WrongParameter(
			"item key must not be empty".to_string(),
		));
	}
	Ok(())
}

fn non_empty(prompt: Option<&str>) -> Option<&str> {
	prompt.filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::BackendCapabilities;
	use crate::backend_memory::{MemoryBackend, UserPresence};
	use proptest::prelude::*;

	fn keychain(service: &str) -> (Arc<MemoryBackend>, Keychain) {
		let backend = Arc::new(MemoryBackend::new());
		let keychain = Keychain::with_service(backend.clone(), service);
		(backend, keychain)
	}

	#[test]
	fn set_and_fetch_data() {
		let (_, keychain) = keychain("com.example.app");
		keychain.set_data("session", &[0x01, 0x02, 0x03], None).unwrap();
		let data = keychain.data("session", None).unwrap();
		assert_eq!(data.expose_bytes(), &[0x01, 0x02, 0x03]);
	}

	#[test]
	fn set_twice_replaces_payload() {
		let (backend, keychain) = keychain("com.example.app");
		keychain.set_string("token", "first", None).unwrap();
		keychain.set_string("token", "second", None).unwrap();

		assert_eq!(keychain.string("token", None).unwrap().expose(), "second");
		assert_eq!(backend.item_count(), 1);
	}

	#[test]
	fn identical_store_is_idempotent() {
		let (backend, keychain) = keychain("com.example.app");
		assert!(keychain.lossy().set_data("k", b"v", None));
		assert!(keychain.lossy().set_data("k", b"v", None));
		assert_eq!(backend.item_count(), 1);
		assert_eq!(keychain.data("k", None).unwrap().expose_bytes(), b"v");
	}

	#[test]
	fn missing_item_is_not_found() {
		let (_, keychain) = keychain("com.example.app");
		assert_eq!(
			keychain.data("missing", None).unwrap_err(),
			KeychainError::ItemNotFound
		);
		assert!(keychain.lossy().data("missing", None).is_none());
		assert!(keychain.lossy().string("missing", None).is_none());
	}

	#[test]
	fn empty_key_is_wrong_parameter() {
		let (_, keychain) = keychain("com.example.app");
		assert!(matches!(
			keychain.set_data("", b"v", None),
			Err(KeychainError::WrongParameter(_))
		));
		assert!(matches!(
			keychain.data("", None),
			Err(KeychainError::WrongParameter(_))
		));
		assert!(!keychain.lossy().contains(""));
	}

	#[test]
	fn invalid_utf8_is_decode_error() {
		let (_, keychain) = keychain("com.example.app");
		keychain.set_data("blob", &[0xff, 0xfe, 0xfd], None).unwrap();

		match keychain.string("blob", None) {
			Err(KeychainError::Decode(message)) => {
				assert!(message.contains("invalid utf-8"), "{message}");
			}
			other => panic!("expected decode error, got {other:?}"),
		}
		assert!(keychain.lossy().string("blob", None).is_none());
		assert_eq!(
			keychain.data("blob", None).unwrap().expose_bytes(),
			&[0xff, 0xfe, 0xfd]
		);
	}

	#[test]
	fn empty_string_roundtrips() {
		let (_, keychain) = keychain("com.example.app");
		keychain.set_string("empty", "", None).unwrap();
		assert_eq!(keychain.string("empty", None).unwrap().expose(), "");
	}

	#[test]
	fn delete_reports_then_collapses() {
		let (_, keychain) = keychain("com.example.app");
		keychain.set_string("k", "v", None).unwrap();

		assert!(keychain.lossy().delete("k"));
		assert!(!keychain.lossy().delete("k"));
		assert_eq!(keychain.delete("k").unwrap_err(), KeychainError::ItemNotFound);
	}

	#[test]
	fn clear_all_on_empty_store_succeeds() {
		let (_, keychain) = keychain("com.example.app");
		keychain.clear_all().unwrap();
	}

	#[test]
	fn default_accessibility_applies_to_new_items_only() {
		let (backend, mut keychain) = keychain("com.example.app");
		keychain.set_string("old", "v", None).unwrap();

		keychain.set_default_accessibility(Accessibility::WhenUnlockedThisDeviceOnly);
		keychain.set_string("new", "v", None).unwrap();
		keychain.set_string("old", "v2", None).unwrap();

		let identity = keychain.identity();
		assert_eq!(
			backend.protection_of(identity, "old").unwrap().accessibility(),
			Accessibility::AfterFirstUnlock
		);
		assert_eq!(
			backend.protection_of(identity, "new").unwrap().accessibility(),
			Accessibility::WhenUnlockedThisDeviceOnly
		);
	}

	#[test]
	fn access_control_gates_reads() {
		let (backend, mut keychain) = keychain("com.example.app");
		keychain.set_use_access_control(true);
		keychain
			.set_string("pin", "1234", Some("Save your PIN"))
			.unwrap();
		assert!(backend
			.protection_of(keychain.identity(), "pin")
			.unwrap()
			.requires_user_presence());

		assert_eq!(
			keychain.string("pin", Some("Unlock your PIN")).unwrap().expose(),
			"1234"
		);
		assert_eq!(backend.prompts_shown(), vec!["Unlock your PIN".to_string()]);

		backend.set_user_presence(UserPresence::Deny);
		assert_eq!(
			keychain.data("pin", Some("Unlock again")).unwrap_err(),
			KeychainError::AuthenticationFailed
		);

		backend.set_user_presence(UserPresence::Unavailable);
		assert_eq!(
			keychain.data("pin", None).unwrap_err(),
			KeychainError::InteractionNotAllowed
		);
	}

	#[test]
	fn contains_never_prompts() {
		let (backend, mut keychain) = keychain("com.example.app");
		keychain.set_use_access_control(true);
		keychain.set_string("pin", "1234", None).unwrap();
		backend.set_user_presence(UserPresence::Deny);

		assert!(keychain.contains("pin").unwrap());
		assert!(!keychain.contains("other").unwrap());
		assert!(backend.prompts_shown().is_empty());
	}

	#[test]
	fn prompt_ignored_without_access_control() {
		let (backend, keychain) = keychain("com.example.app");
		keychain.set_string("k", "v", Some("Save")).unwrap();
		keychain.set_string("k", "v2", Some("Save again")).unwrap();
		assert!(backend.prompts_shown().is_empty());
	}

	#[test]
	fn update_of_gated_item_keeps_prompt_after_gating_is_disabled() {
		let (backend, mut keychain) = keychain("com.example.app");
		keychain.set_use_access_control(true);
		keychain.set_string("pin", "1234", None).unwrap();

		keychain.set_use_access_control(false);
		keychain
			.set_string("pin", "5678", Some("Change your PIN"))
			.unwrap();
		assert_eq!(backend.prompts_shown(), vec!["Change your PIN".to_string()]);

		keychain.set_string("plain", "v", Some("Unused")).unwrap();
		keychain.set_string("plain", "v2", Some("Unused")).unwrap();
		assert_eq!(backend.prompts_shown().len(), 1);
		assert_eq!(keychain.string("pin", Some("Read")).unwrap().expose(), "5678");
	}

	#[test]
	fn unsupported_access_control_falls_back() {
		let backend = Arc::new(MemoryBackend::with_capabilities(BackendCapabilities {
			supports_access_control: false,
			..BackendCapabilities::default()
		}));
		let mut keychain = Keychain::with_service(backend.clone(), "com.example.app");
		keychain.set_use_access_control(true);
		keychain.set_string("k", "v", None).unwrap();

		let protection = backend.protection_of(keychain.identity(), "k").unwrap();
		assert!(!protection.requires_user_presence());
		assert_eq!(keychain.string("k", None).unwrap().expose(), "v");
	}

	#[test]
	fn reuse_duration_above_maximum_is_configuration_error() {
		let (_, mut keychain) = keychain("com.example.app");
		assert!(matches!(
			keychain.set_authentication_reuse_duration(Duration::from_secs(301)),
			Err(KeychainError::Configuration(_))
		));
		assert_eq!(keychain.authentication_context().reuse_duration(), None);

		keychain
			.set_authentication_reuse_duration(Duration::from_secs(30))
			.unwrap();
		assert_eq!(
			keychain.authentication_context().reuse_duration(),
			Some(Duration::from_secs(30))
		);
	}

	#[test]
	fn reuse_window_skips_second_prompt() {
		let (backend, mut keychain) = keychain("com.example.app");
		keychain.set_use_access_control(true);
		keychain
			.set_authentication_reuse_duration(Duration::from_secs(60))
			.unwrap();
		keychain.set_string("pin", "1234", None).unwrap();

		keychain.data("pin", Some("first")).unwrap();
		backend.set_user_presence(UserPresence::Deny);
		assert_eq!(keychain.string("pin", Some("second")).unwrap().expose(), "1234");
		assert_eq!(backend.prompts_shown(), vec!["first".to_string()]);
	}

	#[test]
	fn without_reuse_every_read_prompts() {
		let (backend, mut keychain) = keychain("com.example.app");
		keychain.set_use_access_control(true);
		keychain.set_string("pin", "1234", None).unwrap();

		keychain.data("pin", Some("first")).unwrap();
		backend.set_user_presence(UserPresence::Deny);
		assert_eq!(
			keychain.data("pin", Some("second")).unwrap_err(),
			KeychainError::AuthenticationFailed
		);
	}

	#[test]
	fn key_pairs_share_identity() {
		let (_, keychain) = keychain("com.example.app");
		let manager = keychain.key_pairs();
		assert_eq!(manager.identity(), keychain.identity());
	}

	proptest! {
		#[test]
		fn data_roundtrips(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
			let (_, keychain) = keychain("com.example.prop");
			keychain.set_data("k", &payload, None).unwrap();
			let fetched = keychain.data("k", None).unwrap();
			prop_assert_eq!(fetched.expose_bytes(), payload.as_slice());
		}

		#[test]
		fn string_roundtrips(value in ".*") {
			let (_, keychain) = keychain("com.example.prop");
			keychain.set_string("k", &value, None).unwrap();
			let fetched = keychain.string("k", None).unwrap();
			prop_assert_eq!(fetched.expose(), &value);
		}
	}
}
