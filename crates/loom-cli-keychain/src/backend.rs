// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secure storage backend abstraction.
//!
//! The keychain issues typed requests through [`KeychainBackend`] and
//! translates the [`OsStatus`] it gets back into
//! [`KeychainError`](crate::KeychainError). Implementations:
//! - [`MemoryBackend`](crate::MemoryBackend): in-process, for tests and hosts
//!   without an OS store
//! - [`KeyringBackend`](crate::KeyringBackend): OS keyring via the `keyring`
//!   crate (feature `keyring`)
//!
//! All methods block; a backend may hold the calling thread while a
//! user-presence prompt is on screen.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use crate::access_control::{
	AccessConstraint, AccessControl, AuthenticationContext, Protection, MAX_AUTHENTICATION_REUSE,
};
use crate::accessibility::Accessibility;
use crate::identity::StoreIdentity;
use crate::key_pair::RsaKeySize;
use crate::status::OsStatus;

/// What a backend can do, resolved once when a store is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
	/// Whether user-presence access control objects can be created.
	pub supports_access_control: bool,
	/// Longest authentication reuse window the backend honours.
	pub max_reuse_duration: Duration,
}

impl Default for BackendCapabilities {
	fn default() -> Self {
		Self {
			supports_access_control: false,
			max_reuse_duration: MAX_AUTHENTICATION_REUSE,
		}
	}
}

/// Addresses one generic item.
#[derive(Debug, Clone, Copy)]
pub struct ItemQuery<'a> {
	pub identity: &'a StoreIdentity,
	pub key: &'a str,
	/// Message shown if the backend has to authenticate the user.
	pub prompt: Option<&'a str>,
	pub context: &'a AuthenticationContext,
	/// Fail with `INTERACTION_NOT_ALLOWED` instead of prompting.
	pub skip_authentication_ui: bool,
}

/// Request to generate a persistent RSA key pair.
#[derive(Debug, Clone, Copy)]
pub struct KeyPairRequest<'a> {
	pub size: RsaKeySize,
	pub public_tag: &'a str,
	pub private_tag: &'a str,
}

/// Which half of a key pair an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyClass {
	Public,
	Private,
}

impl fmt::Display for KeyClass {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			KeyClass::Public => f.write_str("public"),
			KeyClass::Private => f.write_str("private"),
		}
	}
}

/// A failed key pair generation, with the halves the backend had already
/// persisted when it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPairFailure {
	pub status: OsStatus,
	pub public_persisted: bool,
	pub private_persisted: bool,
}

impl KeyPairFailure {
	pub fn persisted(status: OsStatus, public_persisted: bool, private_persisted: bool) -> Self {
		Self {
			status,
			public_persisted,
			private_persisted,
		}
	}
}

/// Nothing was persisted.
impl From<OsStatus> for KeyPairFailure {
	fn from(status: OsStatus) -> Self {
		Self::persisted(status, false, false)
	}
}

/// A live backend reference to a stored key.
///
/// Concrete types belong to the backend; downcast through
/// [`KeyReference::as_any`] to reach backend-specific operations.
pub trait KeyReference: fmt::Debug + Send + Sync {
	fn tag(&self) -> &str;

	fn class(&self) -> KeyClass;

	fn as_any(&self) -> &dyn Any;
}

/// Caller-owned key reference. Dropping it releases the backend resource;
/// the keychain never keeps or reuses one.
pub type KeyHandle = Box<dyn KeyReference>;

/// Secure storage primitives.
///
/// Items are addressed by `(identity, key)`. Key entries live in a separate
/// namespace addressed only by tag, so an item key and a key tag with the
/// same text never collide.
pub trait KeychainBackend: Send + Sync + fmt::Debug {
	fn capabilities(&self) -> BackendCapabilities;

	/// Create an access-control object for `accessibility` gated by
	/// `constraint`, or refuse the combination.
	fn create_access_control(
		&self,
		accessibility: Accessibility,
		constraint: AccessConstraint,
	) -> Result<AccessControl, OsStatus>;

	/// Insert a new item. `DUPLICATE_ITEM` if one already exists.
	fn add(&self, query: &ItemQuery<'_>, payload: &[u8], protection: &Protection)
		-> Result<(), OsStatus>;

	/// Replace the payload of an existing item, keeping its protection.
	/// `ITEM_NOT_FOUND` if there is none.
	fn update(&self, query: &ItemQuery<'_>, payload: &[u8]) -> Result<(), OsStatus>;

	/// Look an item up. With `want_data` false only attributes are read and
	/// no authentication is performed; the result is then `Ok(None)`.
	fn query(&self, query: &ItemQuery<'_>, want_data: bool) -> Result<Option<Vec<u8>>, OsStatus>;

	fn delete(&self, query: &ItemQuery<'_>) -> Result<(), OsStatus>;

	/// Delete every item of `identity`. `ITEM_NOT_FOUND` if there were none.
	fn delete_all(&self, identity: &StoreIdentity) -> Result<(), OsStatus>;

	/// Generate and persist both halves of an RSA key pair.
	///
	/// May fail after persisting one half. The failure names exactly the
	/// halves this call wrote, so callers roll back only those; entries
	/// that already existed are never reported.
	fn generate_key_pair(&self, request: &KeyPairRequest<'_>) -> Result<(), KeyPairFailure>;

	/// Export the key's external representation.
	fn key_data(&self, tag: &str) -> Result<Vec<u8>, OsStatus>;

	fn key_reference(&self, tag: &str) -> Result<KeyHandle, OsStatus>;

	/// Attribute-only existence check for a key entry.
	fn contains_key(&self, tag: &str) -> Result<(), OsStatus>;

	fn delete_key(&self, tag: &str) -> Result<(), OsStatus>;
}
