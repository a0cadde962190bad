//! PKCE (RFC 7636) verifier/challenge pair.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Only the S256 method is offered; `plain` leaks the verifier.
const METHOD: &str = "S256";

/// PKCE code challenge and verifier pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    verifier: String,
    challenge: String,
}

impl PkceChallenge {
    /// Generates a fresh pair from 32 random bytes (43-character verifier).
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Rebuilds the pair from a stored verifier.
    #[must_use]
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }

    /// Returns the verifier sent with the code exchange.
    #[must_use]
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// Returns the challenge sent with the authorization request.
    #[must_use]
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Returns the challenge method.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        METHOD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_url_safe_and_long_enough() {
        let pkce = PkceChallenge::generate();
        assert_eq!(pkce.verifier().len(), 43);
        assert!(
            pkce.verifier()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_eq!(pkce.method(), "S256");
    }

    #[test]
    fn challenge_is_stable_for_a_verifier() {
        let a = PkceChallenge::from_verifier("stored-verifier");
        let b = PkceChallenge::from_verifier("stored-verifier");
        assert_eq!(a.challenge(), b.challenge());
        assert_ne!(a.challenge(), a.verifier());
        // SHA-256 digest, unpadded base64url.
        assert_eq!(a.challenge().len(), 43);
    }

    #[test]
    fn generated_pairs_differ() {
        let first = PkceChallenge::generate();
        let second = PkceChallenge::generate();
        assert_ne!(first.verifier(), second.verifier());
    }
}
