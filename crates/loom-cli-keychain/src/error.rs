// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Keychain error types.

use thiserror::Error;

use crate::status::OsStatus;

/// Result type alias for keychain operations.
pub type KeychainResult<T> = Result<T, KeychainError>;

/// Errors that can occur during keychain operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeychainError {
	// =========================================================================
	// Lookup
	// =========================================================================
	#[error("item not found")]
	ItemNotFound,

	#[error("item already exists")]
	DuplicateItem,

	// =========================================================================
	// Authentication
	// =========================================================================
	#[error("user authentication failed or was cancelled")]
	AuthenticationFailed,

	#[error("user interaction is required but not allowed")]
	InteractionNotAllowed,

	// =========================================================================
	// Caller errors
	// =========================================================================
	#[error("invalid parameter: {0}")]
	WrongParameter(String),

	#[error("configuration error: {0}")]
	Configuration(String),

	#[error("stored value could not be decoded: {0}")]
	Decode(String),

	// =========================================================================
	// Platform errors
	// =========================================================================
	#[error("backend failed to allocate memory")]
	Allocation,

	#[error("secure storage is not available")]
	NotAvailable,

	#[error("operation is not implemented by this backend")]
	Unimplemented,

	#[error("platform error: {0}")]
	Platform(String),
}

impl KeychainError {
	/// Returns true for the benign "nothing stored" outcome.
	pub fn is_not_found(&self) -> bool {
		matches!(self, KeychainError::ItemNotFound)
	}

	/// Returns true when the item exists but the user must (re)authenticate.
	pub fn requires_authentication(&self) -> bool {
		matches!(
			self,
			KeychainError::AuthenticationFailed | KeychainError::InteractionNotAllowed
		)
	}

	/// Returns true for hard failures of the storage platform itself.
	pub fn is_internal(&self) -> bool {
		matches!(
			self,
			KeychainError::Allocation
				| KeychainError::NotAvailable
				| KeychainError::Unimplemented
				| KeychainError::Platform(_)
		)
	}
}

impl From<OsStatus> for KeychainError {
	fn from(status: OsStatus) -> Self {
		match status {
			OsStatus::ITEM_NOT_FOUND => KeychainError::ItemNotFound,
			OsStatus::DUPLICATE_ITEM => KeychainError::DuplicateItem,
			OsStatus::AUTH_FAILED => KeychainError::AuthenticationFailed,
			OsStatus::INTERACTION_NOT_ALLOWED => KeychainError::InteractionNotAllowed,
			OsStatus::PARAM => {
				KeychainError::WrongParameter("rejected by secure storage backend".to_string())
			}
			OsStatus::DECODE => KeychainError::Decode("backend could not decode item".to_string()),
			OsStatus::ALLOCATE => KeychainError::Allocation,
			OsStatus::NOT_AVAILABLE => KeychainError::NotAvailable,
			OsStatus::UNIMPLEMENTED => KeychainError::Unimplemented,
			OsStatus::SUCCESS => {
				KeychainError::Platform("backend reported success as a failure".to_string())
			}
			other => KeychainError::Platform(format!("unrecognised backend status {}", other.code())),
		}
	}
}
