// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Accessibility tiers for stored items.
//!
//! A tier decides when an item may be read relative to the device lock state
//! and whether it may leave the device (backups, sync). Changing a store's
//! default tier only affects items written afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KeychainError;

/// When a stored item can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accessibility {
	/// Readable only while the device is unlocked.
	WhenUnlocked,
	/// Readable once the device has been unlocked after boot.
	#[default]
	AfterFirstUnlock,
	/// Readable regardless of lock state.
	Always,
	/// Readable while unlocked, only if a passcode is set; never migrates.
	WhenPasscodeSetThisDeviceOnly,
	/// As `WhenUnlocked`, never migrates to another device.
	WhenUnlockedThisDeviceOnly,
	/// As `AfterFirstUnlock`, never migrates to another device.
	AfterFirstUnlockThisDeviceOnly,
	/// As `Always`, never migrates to another device.
	AlwaysThisDeviceOnly,
}

impl Accessibility {
	pub const ALL: [Accessibility; 7] = [
		Accessibility::WhenUnlocked,
		Accessibility::AfterFirstUnlock,
		Accessibility::Always,
		Accessibility::WhenPasscodeSetThisDeviceOnly,
		Accessibility::WhenUnlockedThisDeviceOnly,
		Accessibility::AfterFirstUnlockThisDeviceOnly,
		Accessibility::AlwaysThisDeviceOnly,
	];

	/// The backend-native `kSecAttrAccessible` value for this tier.
	pub fn backend_constant(&self) -> &'static str {
		match self {
			Accessibility::WhenUnlocked => "ak",
			Accessibility::AfterFirstUnlock => "ck",
			Accessibility::Always => "dk",
			Accessibility::WhenPasscodeSetThisDeviceOnly => "akpu",
			Accessibility::WhenUnlockedThisDeviceOnly => "aku",
			Accessibility::AfterFirstUnlockThisDeviceOnly => "cku",
			Accessibility::AlwaysThisDeviceOnly => "dku",
		}
	}

	/// Inverse of [`Accessibility::backend_constant`].
	pub fn from_backend_constant(constant: &str) -> Option<Self> {
		Self::ALL
			.into_iter()
			.find(|tier| tier.backend_constant() == constant)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Accessibility::WhenUnlocked => "when_unlocked",
			Accessibility::AfterFirstUnlock => "after_first_unlock",
			Accessibility::Always => "always",
			Accessibility::WhenPasscodeSetThisDeviceOnly => "when_passcode_set_this_device_only",
			Accessibility::WhenUnlockedThisDeviceOnly => "when_unlocked_this_device_only",
			Accessibility::AfterFirstUnlockThisDeviceOnly => "after_first_unlock_this_device_only",
			Accessibility::AlwaysThisDeviceOnly => "always_this_device_only",
		}
	}

	/// Returns `true` if the device must be unlocked at the time of access.
	pub fn requires_unlocked_device(&self) -> bool {
		matches!(
			self,
			Accessibility::WhenUnlocked
				| Accessibility::WhenPasscodeSetThisDeviceOnly
				| Accessibility::WhenUnlockedThisDeviceOnly
		)
	}

	/// Returns `true` if the item is unreadable after a reboot until the
	/// first unlock.
	pub fn requires_first_unlock(&self) -> bool {
		!matches!(
			self,
			Accessibility::Always | Accessibility::AlwaysThisDeviceOnly
		)
	}

	/// Returns `true` if the item is bound to this device and excluded from
	/// backups and sync.
	pub fn is_device_bound(&self) -> bool {
		matches!(
			self,
			Accessibility::WhenPasscodeSetThisDeviceOnly
				| Accessibility::WhenUnlockedThisDeviceOnly
				| Accessibility::AfterFirstUnlockThisDeviceOnly
				| Accessibility::AlwaysThisDeviceOnly
		)
	}

	/// Returns `true` if the item can only be stored while a device passcode
	/// is set, and is destroyed if the passcode is removed.
	pub fn requires_passcode(&self) -> bool {
		matches!(self, Accessibility::WhenPasscodeSetThisDeviceOnly)
	}
}

impl fmt::Display for Accessibility {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Accessibility {
	type Err = KeychainError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|tier| tier.as_str() == s)
			.ok_or_else(|| KeychainError::Configuration(format!("unknown accessibility tier: {s}")))
	}
}
