// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secure storage of small secrets and RSA key pairs for Loom.
//!
//! A [`Keychain`] stores byte and string payloads under a fixed
//! `(service, access group)` identity, on top of a pluggable
//! [`KeychainBackend`].
//!
//! # Features
//!
//! - **Accessibility tiers**: seven tiers controlling when items are readable
//!   relative to device lock state
//! - **Access control**: optional user-presence gating with a configurable
//!   authentication reuse window
//! - **Key pairs**: RSA 512/1024/2048 generation, export, handles and
//!   deletion by tag through [`KeyPairManager`]
//! - **MemoryBackend**: in-process backend for tests
//! - **KeyringBackend**: OS keyring via the `keyring` crate (feature `keyring`)
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use loom_cli_keychain::{Accessibility, Keychain, KeychainError, MemoryBackend, RsaKeySize};
//!
//! let mut keychain = Keychain::with_service(Arc::new(MemoryBackend::new()), "com.example.app");
//! keychain.set_default_accessibility(Accessibility::WhenUnlockedThisDeviceOnly);
//! keychain.set_data("session", &[1, 2, 3], None)?;
//! assert!(keychain.contains("session")?);
//!
//! let keys = keychain.key_pairs();
//! keys.generate_rsa_key_pair(RsaKeySize::Bits512, "app.pub", "app.priv")?;
//! assert!(keys.has_key("app.priv")?);
//! # Ok::<(), KeychainError>(())
//! ```

mod access_control;
mod accessibility;
mod backend;
#[cfg(feature = "keyring")]
mod backend_keyring;
mod backend_memory;
mod config;
mod error;
mod identity;
mod key_pair;
mod keychain;
mod status;

pub use access_control::{
	AccessConstraint, AccessControl, AccessControlDescriptor, AuthenticationContext, Protection,
	MAX_AUTHENTICATION_REUSE,
};
pub use accessibility::Accessibility;
pub use backend::{
	BackendCapabilities, ItemQuery, KeyClass, KeyHandle, KeyPairFailure, KeyPairRequest,
	KeyReference, KeychainBackend,
};
#[cfg(feature = "keyring")]
pub use backend_keyring::KeyringBackend;
pub use backend_memory::{MemoryBackend, MemoryKey, UserPresence};
pub use config::KeychainConfig;
pub use error::{KeychainError, KeychainResult};
pub use identity::{default_service, StoreIdentity, FALLBACK_SERVICE};
pub use key_pair::{KeyPairManager, LossyKeyPairManager, RsaKeySize};
pub use keychain::{Keychain, LossyKeychain};
pub use status::OsStatus;
