// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Access control: user-presence gating layered on top of an accessibility tier.
//!
//! When a store has access control enabled and the backend supports it, new
//! items are written with an [`AccessControl`] object requiring biometric or
//! passcode authentication. Backends without support get the plain tier.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::accessibility::Accessibility;
use crate::backend::{BackendCapabilities, KeychainBackend};
use crate::error::{KeychainError, KeychainResult};

/// Longest authentication reuse window Security.framework accepts
/// (`LATouchIDAuthenticationMaximumAllowableReuseDuration`).
pub const MAX_AUTHENTICATION_REUSE: Duration = Duration::from_secs(300);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// What the user must do before an access-controlled item can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessConstraint {
	/// Biometric match or device passcode.
	UserPresence,
}

/// Backend-created access-control object bound to an accessibility tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessControl {
	accessibility: Accessibility,
	constraint: AccessConstraint,
}

impl AccessControl {
	/// Backends call this once they have accepted the combination.
	pub fn new(accessibility: Accessibility, constraint: AccessConstraint) -> Self {
		Self {
			accessibility,
			constraint,
		}
	}

	pub fn accessibility(&self) -> Accessibility {
		self.accessibility
	}

	pub fn constraint(&self) -> AccessConstraint {
		self.constraint
	}
}

/// Protection attached to an item when it is first added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protection {
	Accessible(Accessibility),
	AccessControlled(AccessControl),
}

impl Protection {
	pub fn accessibility(&self) -> Accessibility {
		match self {
			Protection::Accessible(tier) => *tier,
			Protection::AccessControlled(ac) => ac.accessibility(),
		}
	}

	/// Returns `true` if reading the item needs user presence.
	pub fn requires_user_presence(&self) -> bool {
		matches!(self, Protection::AccessControlled(_))
	}
}

/// Authentication context shared by every operation of one store.
///
/// Mirrors a `LAContext`: authentications performed through it may be reused
/// by later operations for up to `reuse_duration`. The setting lives for the
/// process; it is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationContext {
	id: u64,
	reuse_duration: Option<Duration>,
}

impl AuthenticationContext {
	pub fn new() -> Self {
		Self {
			id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
			reuse_duration: None,
		}
	}

	/// Identifies this context to the backend so reuse can be tracked.
	pub fn id(&self) -> u64 {
		self.id
	}

	/// How long a successful authentication may be reused. `None` means
	/// every gated access prompts.
	pub fn reuse_duration(&self) -> Option<Duration> {
		self.reuse_duration
	}

	pub(crate) fn set_reuse_duration(&mut self, duration: Option<Duration>) {
		self.reuse_duration = duration.filter(|d| !d.is_zero());
	}
}

impl Default for AuthenticationContext {
	fn default() -> Self {
		Self::new()
	}
}

/// Builds the protection for new items from a tier and the access-control
/// toggle, using backend capabilities resolved once at store construction.
#[derive(Debug, Clone, Copy)]
pub struct AccessControlDescriptor {
	capabilities: BackendCapabilities,
}

impl AccessControlDescriptor {
	pub fn new(capabilities: BackendCapabilities) -> Self {
		Self { capabilities }
	}

	pub fn capabilities(&self) -> BackendCapabilities {
		self.capabilities
	}

	/// Returns `true` if items written with access control enabled will
	/// actually be gated.
	pub fn is_effective(&self, use_access_control: bool) -> bool {
		use_access_control && self.capabilities.supports_access_control
	}

	/// Resolve the protection for an item about to be added.
	///
	/// A backend refusing the tier/gating combination is a
	/// [`KeychainError::Configuration`], not a storage failure.
	pub fn build(
		&self,
		backend: &dyn KeychainBackend,
		accessibility: Accessibility,
		use_access_control: bool,
	) -> KeychainResult<Protection> {
		if !use_access_control {
			return Ok(Protection::Accessible(accessibility));
		}
		if !self.capabilities.supports_access_control {
			warn!(
				accessibility = %accessibility,
				"backend has no fine-grained access control, using plain accessibility"
			);
			return Ok(Protection::Accessible(accessibility));
		}

		let access_control = backend
			.create_access_control(accessibility, AccessConstraint::UserPresence)
			.map_err(|status| {
				KeychainError::Configuration(format!(
					"backend rejected user-presence access control for {accessibility}: {status}"
				))
			})?;
		debug!(accessibility = %accessibility, "built user-presence access control");
		Ok(Protection::AccessControlled(access_control))
	}

	/// Check a reuse duration against the backend maximum.
	pub fn validate_reuse_duration(&self, duration: Duration) -> KeychainResult<Duration> {
		let max = self.capabilities.max_reuse_duration;
		if duration > max {
			return Err(KeychainError::Configuration(format!(
				"authentication reuse duration {}s exceeds backend maximum of {}s",
				duration.as_secs_f64(),
				max.as_secs_f64()
			)));
		}
		Ok(duration)
	}
}
