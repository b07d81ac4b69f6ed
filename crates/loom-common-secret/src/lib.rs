// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wrapper type for values read out of, or headed into, a secure store.
//!
//! [`Secret<T>`] keeps keychain payloads, verifiers and tokens out of logs:
//!
//! - `Debug` and `Display` print `[REDACTED]`
//! - serializing writes `"[REDACTED]"` (behind the `serde` feature)
//! - the inner value is zeroized on drop
//! - reading it requires an explicit `.expose()`
//!
//! ```
//! use loom_common_secret::{SecretBytes, SecretString};
//!
//! let token = SecretString::new("refresh-token".to_string());
//! assert_eq!(format!("{token}"), "[REDACTED]");
//! assert_eq!(token.expose(), "refresh-token");
//!
//! let blob = SecretBytes::new(vec![0x01, 0x02, 0x03]);
//! assert_eq!(format!("{blob:?}"), "Secret(\"[REDACTED]\")");
//! assert_eq!(blob.expose_bytes(), &[0x01, 0x02, 0x03]);
//! ```
//!
//! Structured logging goes through the same redacted impls:
//!
//! ```
//! use loom_common_secret::SecretBytes;
//! use tracing::debug;
//!
//! let payload = SecretBytes::new(b"session".to_vec());
//! debug!(payload = %payload, "stored item");
//! ```

use std::fmt;
use zeroize::Zeroize;

/// Placeholder printed in place of any secret value.
pub const REDACTED: &str = "[REDACTED]";

/// A sensitive value that is redacted in every textual output and wiped on drop.
///
/// There is no `Deref`; call [`Secret::expose`] where the value is actually
/// needed so each access is visible in review.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct Secret<T>
where
	T: Zeroize,
{
	inner: T,
}

/// Secret text, e.g. a string payload fetched from the keychain.
pub type SecretString = Secret<String>;

/// Secret binary payload, e.g. a data item or exported key material.
pub type SecretBytes = Secret<Vec<u8>>;

impl<T> Secret<T>
where
	T: Zeroize,
{
	pub fn new(inner: T) -> Self {
		Self { inner }
	}

	/// Borrow the inner value.
	pub fn expose(&self) -> &T {
		&self.inner
	}

	pub fn expose_mut(&mut self) -> &mut T {
		&mut self.inner
	}

	/// Return an owned copy of the inner value.
	///
	/// The wrapper's own memory is still zeroized when `self` drops; the
	/// returned copy is the caller's responsibility.
	pub fn into_inner(self) -> T
	where
		T: Clone,
	{
		self.inner.clone()
	}
}

impl Secret<Vec<u8>> {
	pub fn expose_bytes(&self) -> &[u8] {
		self.inner.as_slice()
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}
}

impl From<Vec<u8>> for Secret<Vec<u8>> {
	fn from(bytes: Vec<u8>) -> Self {
		Self::new(bytes)
	}
}

impl From<&[u8]> for Secret<Vec<u8>> {
	fn from(bytes: &[u8]) -> Self {
		Self::new(bytes.to_vec())
	}
}

impl From<String> for Secret<String> {
	fn from(text: String) -> Self {
		Self::new(text)
	}
}

impl<T> Clone for Secret<T>
where
	T: Zeroize + Clone,
{
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<T> fmt::Debug for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Secret").field(&REDACTED).finish()
	}
}

impl<T> fmt::Display for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl<T> PartialEq for Secret<T>
where
	T: Zeroize + PartialEq,
{
	fn eq(&self, other: &Self) -> bool {
		self.inner == other.inner
	}
}

impl<T> Eq for Secret<T> where T: Zeroize + Eq {}

#[cfg(feature = "serde")]
mod serde_impl {
	use super::{Secret, REDACTED};
	use serde::{Deserialize, Deserializer, Serialize, Serializer};
	use zeroize::Zeroize;

	impl<T> Serialize for Secret<T>
	where
		T: Serialize + Zeroize,
	{
		fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
		where
			S: Serializer,
		{
			serializer.serialize_str(REDACTED)
		}
	}

	impl<'de, T> Deserialize<'de> for Secret<T>
	where
		T: Deserialize<'de> + Zeroize,
	{
		fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
		where
			D: Deserializer<'de>,
		{
			T::deserialize(deserializer).map(Secret::new)
		}
	}
}
