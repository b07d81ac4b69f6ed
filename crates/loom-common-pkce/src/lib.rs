// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! PKCE (Proof Key for Code Exchange) for OAuth 2.0 authorization flows.
//!
//! Implements RFC 7636 with the S256 challenge method:
//!
//! - `verifier` = base64url-no-pad(32 random bytes), 43 characters
//! - `challenge` = base64url-no-pad(SHA-256(ASCII bytes of `verifier`))
//! - `method` = `"S256"`
//!
//! ```
//! use loom_common_pkce::Pkce;
//!
//! let pkce = Pkce::generate()?;
//! assert_eq!(pkce.verifier().len(), 43);
//! assert_eq!(pkce.method(), "S256");
//! assert!(pkce.verify(pkce.verifier()));
//! # Ok::<(), loom_common_pkce::PkceError>(())
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use loom_common_secret::SecretString;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Number of random bytes drawn for a verifier (256 bits).
pub const VERIFIER_ENTROPY_BYTES: usize = 32;

/// Errors from PKCE generation.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
	/// The secure random source failed; there is no fallback.
	#[error("secure random source failed: {0}")]
	Entropy(#[from] getrandom::Error),
}

/// A verifier/challenge/method triple for one code-exchange attempt.
///
/// The verifier is the client-held secret and is redacted in `Debug`. The
/// challenge and method are safe to send in the authorization request.
#[derive(Debug, Clone)]
pub struct Pkce {
	verifier: SecretString,
	challenge: String,
}

impl Pkce {
	/// Identifier of the transform used to derive the challenge.
	pub const METHOD: &'static str = "S256";

	/// Generate a fresh pair from the operating system's secure random source.
	pub fn generate() -> Result<Self, PkceError> {
		Self::generate_with(getrandom::getrandom)
	}

	/// Generate a pair from a caller-supplied secure random source.
	///
	/// `fill` must write [`VERIFIER_ENTROPY_BYTES`] cryptographically secure
	/// bytes into the buffer it is given. Its error is returned unchanged.
	pub fn generate_with<F>(fill: F) -> Result<Self, PkceError>
	where
		F: FnOnce(&mut [u8]) -> Result<(), getrandom::Error>,
	{
		let mut entropy = [0u8; VERIFIER_ENTROPY_BYTES];
		if let Err(e) = fill(&mut entropy) {
			tracing::error!(error = %e, "PKCE entropy source failed");
			return Err(PkceError::Entropy(e));
		}
		let pkce = Self::from_entropy(&entropy);
		entropy.fill(0);
		Ok(pkce)
	}

	/// Derive a pair from raw verifier bytes.
	///
	/// The derivation is a pure function of `entropy`. Any length is
	/// accepted; RFC 7636 expects at least 32 bytes.
	pub fn from_entropy(entropy: &[u8]) -> Self {
		if entropy.len() < VERIFIER_ENTROPY_BYTES {
			tracing::debug!(
				len = entropy.len(),
				"PKCE verifier entropy shorter than recommended"
			);
		}
		let verifier = URL_SAFE_NO_PAD.encode(entropy);
		let challenge = derive_challenge(&verifier);

		Self {
			verifier: SecretString::new(verifier),
			challenge,
		}
	}

	/// The code verifier, sent only in the token exchange.
	pub fn verifier(&self) -> &str {
		self.verifier.expose()
	}

	/// The code challenge, sent in the authorization request.
	pub fn challenge(&self) -> &str {
		&self.challenge
	}

	/// Always [`Pkce::METHOD`].
	pub fn method(&self) -> &'static str {
		Self::METHOD
	}

	/// Check that `verifier` hashes to this pair's challenge.
	pub fn verify(&self, verifier: &str) -> bool {
		let candidate = derive_challenge(verifier);
		candidate.as_bytes().ct_eq(self.challenge.as_bytes()).into()
	}

	/// `code_challenge` and `code_challenge_method` query parameters.
	pub fn authorization_params(&self) -> [(&'static str, &str); 2] {
		[
			("code_challenge", self.challenge.as_str()),
			("code_challenge_method", Self::METHOD),
		]
	}
}

fn derive_challenge(verifier: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(verifier.as_bytes());
	URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn is_base64url(s: &str) -> bool {
		s.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
	}

	#[test]
	fn test_pkce_generation() {
		let pkce = Pkce::generate().unwrap();

		assert!(!pkce.verifier().is_empty());
		assert!(!pkce.challenge().is_empty());
		assert_ne!(pkce.verifier(), pkce.challenge());
	}

	#[test]
	fn test_pkce_verifier_length() {
		let pkce = Pkce::generate().unwrap();
		assert_eq!(pkce.verifier().len(), 43);
		assert_eq!(pkce.challenge().len(), 43);
	}

	#[test]
	fn test_pkce_method_is_s256() {
		let pkce = Pkce::generate().unwrap();
		assert_eq!(pkce.method(), "S256");
		assert_eq!(Pkce::from_entropy(&[]).method(), "S256");
	}

	#[test]
	fn test_pkce_uniqueness() {
		let pkce1 = Pkce::generate().unwrap();
		let pkce2 = Pkce::generate().unwrap();

		assert_ne!(pkce1.verifier(), pkce2.verifier());
		assert_ne!(pkce1.challenge(), pkce2.challenge());
	}

	#[test]
	fn test_pkce_rfc7636_appendix_b() {
		let entropy: [u8; 32] = [
			116, 24, 223, 180, 151, 153, 224, 37, 79, 250, 96, 125, 216, 173, 187, 186, 22, 212, 37, 77,
			105, 214, 191, 240, 91, 88, 5, 88, 83, 132, 141, 121,
		];
		let pkce = Pkce::from_entropy(&entropy);

		assert_eq!(pkce.verifier(), "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
		assert_eq!(
			pkce.challenge(),
			"E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
		);
	}

	#[test]
	fn test_pkce_challenge_hashes_verifier_text() {
		let entropy = [7u8; 32];
		let pkce = Pkce::from_entropy(&entropy);

		let raw_hash = URL_SAFE_NO_PAD.encode(Sha256::digest(entropy));
		assert_ne!(pkce.challenge(), raw_hash);

		let text_hash = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier().as_bytes()));
		assert_eq!(pkce.challenge(), text_hash);
	}

	#[test]
	fn test_pkce_verify() {
		let pkce = Pkce::generate().unwrap();
		assert!(pkce.verify(pkce.verifier()));
		assert!(!pkce.verify("not-the-verifier"));
	}

	#[test]
	fn test_pkce_entropy_failure_is_reported() {
		let result = Pkce::generate_with(|_| Err(getrandom::Error::UNSUPPORTED));
		assert!(matches!(result, Err(PkceError::Entropy(_))));
	}

	#[test]
	fn test_pkce_generate_with_uses_supplied_bytes() {
		let pkce = Pkce::generate_with(|buf| {
			buf.fill(0xab);
			Ok(())
		})
		.unwrap();
		let expected = Pkce::from_entropy(&[0xab; 32]);

		assert_eq!(pkce.verifier(), expected.verifier());
		assert_eq!(pkce.challenge(), expected.challenge());
	}

	#[test]
	fn test_pkce_debug_redacts_verifier() {
		let pkce = Pkce::generate().unwrap();
		let debug = format!("{pkce:?}");
		assert!(!debug.contains(pkce.verifier()));
		assert!(debug.contains(pkce.challenge()));
	}

	#[test]
	fn test_pkce_authorization_params() {
		let pkce = Pkce::generate().unwrap();
		let params = pkce.authorization_params();
		assert_eq!(params[0], ("code_challenge", pkce.challenge()));
		assert_eq!(params[1], ("code_challenge_method", "S256"));
	}

	proptest! {
		#[test]
		fn derivation_is_deterministic(entropy in proptest::collection::vec(any::<u8>(), 0..96)) {
			let a = Pkce::from_entropy(&entropy);
			let b = Pkce::from_entropy(&entropy);
			prop_assert_eq!(a.verifier(), b.verifier());
			prop_assert_eq!(a.challenge(), b.challenge());
		}

		#[test]
		fn outputs_are_unpadded_base64url(entropy in proptest::collection::vec(any::<u8>(), 1..96)) {
			let pkce = Pkce::from_entropy(&entropy);
			prop_assert!(is_base64url(pkce.verifier()));
			prop_assert!(is_base64url(pkce.challenge()));
			prop_assert!(!pkce.challenge().contains('='));
		}

		#[test]
		fn verifier_decodes_to_entropy(entropy in proptest::collection::vec(any::<u8>(), 32..64)) {
			let pkce = Pkce::from_entropy(&entropy);
			let decoded = URL_SAFE_NO_PAD.decode(pkce.verifier()).unwrap();
			prop_assert_eq!(decoded, entropy);
			prop_assert!(pkce.verify(pkce.verifier()));
		}
	}
}
