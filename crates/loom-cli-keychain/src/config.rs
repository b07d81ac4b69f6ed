// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Keychain configuration.
//!
//! Loaded from environment variables or a TOML document:
//! - `LOOM_KEYCHAIN_SERVICE` - service name (default: executable name)
//! - `LOOM_KEYCHAIN_ACCESS_GROUP` - access group for sharing (default: none)
//! - `LOOM_KEYCHAIN_ACCESSIBILITY` - default tier (default: `after_first_unlock`)
//! - `LOOM_KEYCHAIN_USE_ACCESS_CONTROL` - gate new items behind user presence
//! - `LOOM_KEYCHAIN_REUSE_SECS` - authentication reuse window in seconds

use std::time::Duration;

use serde::Deserialize;
use tracing::instrument;

use crate::accessibility::Accessibility;
use crate::error::{KeychainError, KeychainResult};
use crate::identity::{default_service, StoreIdentity};

const ENV_SERVICE: &str = "LOOM_KEYCHAIN_SERVICE";
const ENV_ACCESS_GROUP: &str = "LOOM_KEYCHAIN_ACCESS_GROUP";
const ENV_ACCESSIBILITY: &str = "LOOM_KEYCHAIN_ACCESSIBILITY";
const ENV_USE_ACCESS_CONTROL: &str = "LOOM_KEYCHAIN_USE_ACCESS_CONTROL";
const ENV_REUSE_SECS: &str = "LOOM_KEYCHAIN_REUSE_SECS";

/// Settings for a [`Keychain`](crate::Keychain).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeychainConfig {
	pub service: Option<String>,
	pub access_group: Option<String>,
	pub default_accessibility: Accessibility,
	pub use_access_control: bool,
	pub authentication_reuse_secs: Option<u64>,
}

impl KeychainConfig {
	/// Load configuration from `LOOM_KEYCHAIN_*` environment variables.
	#[instrument(skip_all)]
	pub fn from_env() -> KeychainResult<Self> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Parse a flat TOML document with the same field names as this struct.
	pub fn from_toml_str(contents: &str) -> KeychainResult<Self> {
		toml::from_str(contents)
			.map_err(|e| KeychainError::Configuration(format!("invalid keychain config: {e}")))
	}

	pub(crate) fn from_lookup<F>(lookup: F) -> KeychainResult<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

		let default_accessibility = match non_empty(ENV_ACCESSIBILITY) {
			Some(value) => value.parse()?,
			None => Accessibility::default(),
		};

		let use_access_control = match non_empty(ENV_USE_ACCESS_CONTROL) {
			Some(value) => parse_bool(ENV_USE_ACCESS_CONTROL, &value)?,
			None => false,
		};

		let authentication_reuse_secs = non_empty(ENV_REUSE_SECS)
			.map(|value| {
				value.parse::<u64>().map_err(|_| {
					KeychainError::Configuration(format!(
						"{ENV_REUSE_SECS} must be a whole number of seconds, got {value:?}"
					))
				})
			})
			.transpose()?;

		Ok(Self {
			service: non_empty(ENV_SERVICE),
			access_group: non_empty(ENV_ACCESS_GROUP),
			default_accessibility,
			use_access_control,
			authentication_reuse_secs,
		})
	}

	/// The store identity, resolving the default service if none is set.
	pub fn identity(&self) -> StoreIdentity {
		let service = self.service.clone().unwrap_or_else(default_service);
		StoreIdentity::new(service, self.access_group.clone())
	}

	pub fn authentication_reuse(&self) -> Option<Duration> {
		self.authentication_reuse_secs.map(Duration::from_secs)
	}
}

fn parse_bool(name: &str, value: &str) -> KeychainResult<bool> {
	match value.to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		_ => Err(KeychainError::Configuration(format!(
			"{name} must be a boolean, got {value:?}"
		))),
	}
}
