// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Store identity: the `(service, access group)` namespace items live under.

use std::fmt;

/// Service name used when the process identity cannot be resolved.
pub const FALLBACK_SERVICE: &str = "loom";

/// The namespace a [`Keychain`](crate::Keychain) reads and writes.
///
/// Fixed for the lifetime of a store. Two stores with a different service or
/// access group never see each other's items.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreIdentity {
	service: String,
	access_group: Option<String>,
}

impl StoreIdentity {
	pub fn new(service: impl Into<String>, access_group: Option<String>) -> Self {
		Self {
			service: service.into(),
			access_group,
		}
	}

	pub fn service(&self) -> &str {
		&self.service
	}

	/// Group that allows sharing items across processes, if any.
	pub fn access_group(&self) -> Option<&str> {
		self.access_group.as_deref()
	}
}

impl Default for StoreIdentity {
	fn default() -> Self {
		Self::new(default_service(), None)
	}
}

impl fmt::Display for StoreIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.access_group {
			Some(group) => write!(f, "{}@{}", self.service, group),
			None => f.write_str(&self.service),
		}
	}
}

/// The host process identity: the running executable's file stem.
pub fn default_service() -> String {
	std::env::current_exe()
		.ok()
		.and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
		.filter(|stem| !stem.is_empty())
		.unwrap_or_else(|| FALLBACK_SERVICE.to_string())
}
