// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backend-native status codes.
//!
//! Backends speak in Security.framework-style `OSStatus` integers. These stay
//! on the backend side of the boundary; callers only ever see
//! [`KeychainError`](crate::KeychainError).

use std::fmt;

/// A status code returned by a secure-storage backend.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsStatus(i32);

impl OsStatus {
	pub const SUCCESS: OsStatus = OsStatus(0);
	pub const UNIMPLEMENTED: OsStatus = OsStatus(-4);
	pub const PARAM: OsStatus = OsStatus(-50);
	pub const ALLOCATE: OsStatus = OsStatus(-108);
	pub const NOT_AVAILABLE: OsStatus = OsStatus(-25291);
	pub const AUTH_FAILED: OsStatus = OsStatus(-25293);
	pub const DUPLICATE_ITEM: OsStatus = OsStatus(-25299);
	pub const ITEM_NOT_FOUND: OsStatus = OsStatus(-25300);
	pub const INTERACTION_NOT_ALLOWED: OsStatus = OsStatus(-25308);
	pub const DECODE: OsStatus = OsStatus(-26275);

	pub const fn from_code(code: i32) -> Self {
		OsStatus(code)
	}

	pub const fn code(self) -> i32 {
		self.0
	}

	pub fn is_success(self) -> bool {
		self == Self::SUCCESS
	}

	fn name(self) -> Option<&'static str> {
		Some(match self {
			Self::SUCCESS => "errSecSuccess",
			Self::UNIMPLEMENTED => "errSecUnimplemented",
			Self::PARAM => "errSecParam",
			Self::ALLOCATE => "errSecAllocate",
			Self::NOT_AVAILABLE => "errSecNotAvailable",
			Self::AUTH_FAILED => "errSecAuthFailed",
			Self::DUPLICATE_ITEM => "errSecDuplicateItem",
			Self::ITEM_NOT_FOUND => "errSecItemNotFound",
			Self::INTERACTION_NOT_ALLOWED => "errSecInteractionNotAllowed",
			Self::DECODE => "errSecDecode",
			_ => return None,
		})
	}
}

impl fmt::Debug for OsStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.name() {
			Some(name) => write!(f, "OsStatus({name})"),
			None => write!(f, "OsStatus({})", self.0),
		}
	}
}

impl fmt::Display for OsStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.name() {
			Some(name) => write!(f, "{name} ({})", self.0),
			None => write!(f, "{}", self.0),
		}
	}
}
