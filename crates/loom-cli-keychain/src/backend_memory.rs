// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process keychain backend.
//!
//! Behaves like the platform store closely enough to exercise every code
//! path of [`Keychain`](crate::Keychain): accessibility tiers are enforced
//! against a simulated device lock state, user-presence prompts are
//! simulated, and key pairs are real RSA keys. Nothing is persisted.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use loom_common_secret::SecretBytes;
use parking_lot::Mutex;
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use tracing::{debug, warn};

use crate::access_control::{AccessConstraint, AccessControl, Protection};
use crate::accessibility::Accessibility;
use crate::backend::{
	BackendCapabilities, ItemQuery, KeyClass, KeyHandle, KeyPairFailure, KeyPairRequest,
	KeyReference, KeychainBackend,
};
use crate::error::{KeychainError, KeychainResult};
use crate::identity::StoreIdentity;
use crate::status::OsStatus;

/// Outcome of the next simulated biometric/passcode prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserPresence {
	/// The user authenticates.
	#[default]
	Approve,
	/// The user cancels or fails to authenticate.
	Deny,
	/// No prompt can be shown, e.g. the process is in the background.
	Unavailable,
}

#[derive(Debug)]
struct StoredItem {
	payload: SecretBytes,
	protection: Protection,
}

#[derive(Debug)]
struct DeviceState {
	locked: bool,
	unlocked_since_boot: bool,
	passcode_set: bool,
}

impl Default for DeviceState {
	fn default() -> Self {
		Self {
			locked: false,
			unlocked_since_boot: true,
			passcode_set: true,
		}
	}
}

impl DeviceState {
	fn allows(&self, accessibility: Accessibility) -> bool {
		if accessibility.requires_passcode() && !self.passcode_set {
			return false;
		}
		if accessibility.requires_unlocked_device() && self.locked {
			return false;
		}
		!(accessibility.requires_first_unlock() && !self.unlocked_since_boot)
	}
}

#[derive(Debug, Default)]
struct MemoryState {
	items: HashMap<(StoreIdentity, String), StoredItem>,
	keys: HashMap<String, MemoryKey>,
	device: DeviceState,
	presence: UserPresence,
	last_authentication: HashMap<u64, Instant>,
	prompts: Vec<String>,
	rejected_access_control: HashSet<Accessibility>,
	fail_private_key_insert: bool,
}

impl MemoryState {
	fn authorize(&mut self, query: &ItemQuery<'_>, protection: &Protection) -> Result<(), OsStatus> {
		if !self.device.allows(protection.accessibility()) {
			return Err(OsStatus::INTERACTION_NOT_ALLOWED);
		}
		if !protection.requires_user_presence() {
			return Ok(());
		}
		if query.skip_authentication_ui {
			return Err(OsStatus::INTERACTION_NOT_ALLOWED);
		}

		let context_id = query.context.id();
		if let (Some(window), Some(at)) = (
			query.context.reuse_duration(),
			self.last_authentication.get(&context_id),
		) {
			if at.elapsed() <= window {
				debug!(context_id, "reusing earlier authentication");
				return Ok(());
			}
		}

		match self.presence {
			UserPresence::Unavailable => Err(OsStatus::INTERACTION_NOT_ALLOWED),
			presence => {
				if let Some(prompt) = query.prompt {
					self.prompts.push(prompt.to_string());
				}
				if presence == UserPresence::Deny {
					return Err(OsStatus::AUTH_FAILED);
				}
				self.last_authentication.insert(context_id, Instant::now());
				Ok(())
			}
		}
	}
}

/// Keychain backend holding everything in memory.
#[derive(Debug)]
pub struct MemoryBackend {
	capabilities: BackendCapabilities,
	state: Mutex<MemoryState>,
}

impl MemoryBackend {
	/// A backend with access-control support and an unlocked device.
	pub fn new() -> Self {
		Self::with_capabilities(BackendCapabilities {
			supports_access_control: true,
			..BackendCapabilities::default()
		})
	}

	pub fn with_capabilities(capabilities: BackendCapabilities) -> Self {
		Self {
			capabilities,
			state: Mutex::new(MemoryState::default()),
		}
	}

	pub fn lock_device(&self) {
		self.state.lock().device.locked = true;
	}

	pub fn unlock_device(&self) {
		let mut state = self.state.lock();
		state.device.locked = false;
		state.device.unlocked_since_boot = true;
	}

	/// Restart the simulated device: locked, and not unlocked since boot.
	/// Authentication reuse does not survive.
	pub fn reboot(&self) {
		let mut state = self.state.lock();
		state.device.locked = true;
		state.device.unlocked_since_boot = false;
		state.last_authentication.clear();
	}

	/// Removing the device passcode destroys every item stored with a
	/// passcode-only tier.
	pub fn set_passcode(&self, enabled: bool) {
		let mut state = self.state.lock();
		state.device.passcode_set = enabled;
		if !enabled {
			let before = state.items.len();
			state
				.items
				.retain(|_, item| !item.protection.accessibility().requires_passcode());
			let removed = before - state.items.len();
			if removed > 0 {
				warn!(removed, "passcode removed, dropped passcode-bound items");
			}
		}
	}

	pub fn set_user_presence(&self, presence: UserPresence) {
		self.state.lock().presence = presence;
	}

	/// Messages of every prompt shown so far, oldest first.
	pub fn prompts_shown(&self) -> Vec<String> {
		self.state.lock().prompts.clone()
	}

	pub fn item_count(&self) -> usize {
		self.state.lock().items.len()
	}

	pub fn key_count(&self) -> usize {
		self.state.lock().keys.len()
	}

	pub fn protection_of(&self, identity: &StoreIdentity, key: &str) -> Option<Protection> {
		self.state
			.lock()
			.items
			.get(&(identity.clone(), key.to_string()))
			.map(|item| item.protection.clone())
	}

	/// Make the next key-pair generation fail after storing the public half.
	pub fn fail_next_private_key_insert(&self) {
		self.state.lock().fail_private_key_insert = true;
	}

	/// Refuse to create access control objects for `accessibility`.
	pub fn reject_access_control_for(&self, accessibility: Accessibility) {
		self.state.lock().rejected_access_control.insert(accessibility);
	}
}

impl Default for MemoryBackend {
	fn default() -> Self {
		Self::new()
	}
}

fn item_key(query: &ItemQuery<'_>) -> (StoreIdentity, String) {
	(query.identity.clone(), query.key.to_string())
}

impl KeychainBackend for MemoryBackend {
	fn capabilities(&self) -> BackendCapabilities {
		self.capabilities
	}

	fn create_access_control(
		&self,
		accessibility: Accessibility,
		constraint: AccessConstraint,
	) -> Result<AccessControl, OsStatus> {
		if !self.capabilities.supports_access_control {
			return Err(OsStatus::UNIMPLEMENTED);
		}
		if self
			.state
			.lock()
			.rejected_access_control
			.contains(&accessibility)
		{
			return Err(OsStatus::PARAM);
		}
		Ok(AccessControl::new(accessibility, constraint))
	}

	fn add(&self, query: &ItemQuery<'_>, payload: &[u8], protection: &Protection) -> Result<(), OsStatus> {
		let mut state = self.state.lock();
		if protection.accessibility().requires_passcode() && !state.device.passcode_set {
			return Err(OsStatus::NOT_AVAILABLE);
		}
		let key = item_key(query);
		if state.items.contains_key(&key) {
			return Err(OsStatus::DUPLICATE_ITEM);
		}
		state.items.insert(
			key,
			StoredItem {
				payload: SecretBytes::from(payload),
				protection: protection.clone(),
			},
		);
		Ok(())
	}

	fn update(&self, query: &ItemQuery<'_>, payload: &[u8]) -> Result<(), OsStatus> {
		let mut state = self.state.lock();
		let key = item_key(query);
		let protection = match state.items.get(&key) {
			Some(item) => item.protection.clone(),
			None => return Err(OsStatus::ITEM_NOT_FOUND),
		};
		state.authorize(query, &protection)?;
		if let Some(item) = state.items.get_mut(&key) {
			item.payload = SecretBytes::from(payload);
		}
		Ok(())
	}

	fn query(&self, query: &ItemQuery<'_>, want_data: bool) -> Result<Option<Vec<u8>>, OsStatus> {
		let mut state = self.state.lock();
		let key = item_key(query);
		let protection = match state.items.get(&key) {
			Some(item) => item.protection.clone(),
			None => return Err(OsStatus::ITEM_NOT_FOUND),
		};
		if !want_data {
			return Ok(None);
		}
		state.authorize(query, &protection)?;
		Ok(state
			.items
			.get(&key)
			.map(|item| item.payload.expose_bytes().to_vec()))
	}

	fn delete(&self, query: &ItemQuery<'_>) -> Result<(), OsStatus> {
		match self.state.lock().items.remove(&item_key(query)) {
			Some(_) => Ok(()),
			None => Err(OsStatus::ITEM_NOT_FOUND),
		}
	}

	fn delete_all(&self, identity: &StoreIdentity) -> Result<(), OsStatus> {
		let mut state = self.state.lock();
		let before = state.items.len();
		state.items.retain(|(owner, _), _| owner != identity);
		if state.items.len() == before {
			return Err(OsStatus::ITEM_NOT_FOUND);
		}
		Ok(())
	}

	fn generate_key_pair(&self, request: &KeyPairRequest<'_>) -> Result<(), KeyPairFailure> {
		{
			let state = self.state.lock();
			if state.keys.contains_key(request.public_tag) || state.keys.contains_key(request.private_tag)
			{
				return Err(OsStatus::DUPLICATE_ITEM.into());
			}
		}

		let mut rng = rand::thread_rng();
		let private_key = RsaPrivateKey::new(&mut rng, request.size.bits()).map_err(|e| {
			warn!(error = %e, size = %request.size, "RSA key generation failed");
			OsStatus::PARAM
		})?;
		let public_key = private_key.to_public_key();

		let mut state = self.state.lock();
		if state.keys.contains_key(request.public_tag) || state.keys.contains_key(request.private_tag) {
			return Err(OsStatus::DUPLICATE_ITEM.into());
		}
		state.keys.insert(
			request.public_tag.to_string(),
			MemoryKey::public(request.public_tag, public_key),
		);
		if std::mem::take(&mut state.fail_private_key_insert) {
			return Err(KeyPairFailure::persisted(OsStatus::ALLOCATE, true, false));
		}
		state.keys.insert(
			request.private_tag.to_string(),
			MemoryKey::private(request.private_tag, private_key),
		);
		Ok(())
	}

	fn key_data(&self, tag: &str) -> Result<Vec<u8>, OsStatus> {
		let state = self.state.lock();
		let key = state.keys.get(tag).ok_or(OsStatus::ITEM_NOT_FOUND)?;
		key.to_pkcs1_der()
	}

	fn key_reference(&self, tag: &str) -> Result<KeyHandle, OsStatus> {
		let state = self.state.lock();
		let key = state.keys.get(tag).ok_or(OsStatus::ITEM_NOT_FOUND)?;
		Ok(Box::new(key.clone()))
	}

	fn contains_key(&self, tag: &str) -> Result<(), OsStatus> {
		if self.state.lock().keys.contains_key(tag) {
			Ok(())
		} else {
			Err(OsStatus::ITEM_NOT_FOUND)
		}
	}

	fn delete_key(&self, tag: &str) -> Result<(), OsStatus> {
		match self.state.lock().keys.remove(tag) {
			Some(_) => Ok(()),
			None => Err(OsStatus::ITEM_NOT_FOUND),
		}
	}
}

#[derive(Clone)]
enum KeyMaterial {
	Public(RsaPublicKey),
	Private(RsaPrivateKey),
}

/// Reference to an RSA key held by a [`MemoryBackend`].
#[derive(Clone)]
pub struct MemoryKey {
	tag: String,
	material: KeyMaterial,
}

impl MemoryKey {
	fn public(tag: &str, key: RsaPublicKey) -> Self {
		Self {
			tag: tag.to_string(),
			material: KeyMaterial::Public(key),
		}
	}

	fn private(tag: &str, key: RsaPrivateKey) -> Self {
		Self {
			tag: tag.to_string(),
			material: KeyMaterial::Private(key),
		}
	}

	/// Encrypt with PKCS#1 v1.5 padding. A private key encrypts with its
	/// public half.
	pub fn encrypt(&self, plaintext: &[u8]) -> KeychainResult<Vec<u8>> {
		let mut rng = rand::thread_rng();
		let result = match &self.material {
			KeyMaterial::Public(key) => key.encrypt(&mut rng, Pkcs1v15Encrypt, plaintext),
			KeyMaterial::Private(key) => {
				key.to_public_key()
					.encrypt(&mut rng, Pkcs1v15Encrypt, plaintext)
			}
		};
		result.map_err(|e| KeychainError::WrongParameter(format!("RSA encryption failed: {e}")))
	}

	pub fn decrypt(&self, ciphertext: &[u8]) -> KeychainResult<Vec<u8>> {
		match &self.material {
			KeyMaterial::Private(key) => key
				.decrypt(Pkcs1v15Encrypt, ciphertext)
				.map_err(|e| KeychainError::Decode(format!("RSA decryption failed: {e}"))),
			KeyMaterial::Public(_) => Err(KeychainError::WrongParameter(
				"cannot decrypt with a public key".to_string(),
			)),
		}
	}

	fn to_pkcs1_der(&self) -> Result<Vec<u8>, OsStatus> {
		let encoded = match &self.material {
			KeyMaterial::Public(key) => key.to_pkcs1_der().map(|doc| doc.as_bytes().to_vec()),
			KeyMaterial::Private(key) => key.to_pkcs1_der().map(|doc| doc.as_bytes().to_vec()),
		};
		encoded.map_err(|e| {
			warn!(tag = %self.tag, error = %e, "failed to encode key");
			OsStatus::DECODE
		})
	}
}

impl KeyReference for MemoryKey {
	fn tag(&self) -> &str {
		&self.tag
	}

	fn class(&self) -> KeyClass {
		match self.material {
			KeyMaterial::Public(_) => KeyClass::Public,
			KeyMaterial::Private(_) => KeyClass::Private,
		}
	}

	fn as_any(&self) -> &dyn Any {
		self
	}
}

impl fmt::Debug for MemoryKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryKey")
			.field("tag", &self.tag)
			.field("class", &self.class())
			.finish_non_exhaustive()
	}
}
