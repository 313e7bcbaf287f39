//! PKCE helpers for the X authorization-code flow (RFC 7636, S256 only).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Value of the `code_challenge_method` parameter.
pub const CHALLENGE_METHOD: &str = "S256";

/// 48 bytes encode to 64 characters, inside RFC 7636's 43..=128 window.
const VERIFIER_BYTES: usize = 48;
const STATE_BYTES: usize = 16;

fn random_token<const N: usize>() -> String {
    let bytes: [u8; N] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Fresh verifier for one X sign-in.
///
/// It is stored under `twitter_code_verifier` until the redirect comes back,
/// then sent to the backend alongside the authorization code.
#[must_use]
pub fn generate_code_verifier() -> String {
    random_token::<VERIFIER_BYTES>()
}

/// `BASE64URL(SHA256(verifier))`, sent to X as `code_challenge`.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Opaque `state` for the X authorize URL (22 characters).
#[must_use]
pub fn generate_state() -> String {
    random_token::<STATE_BYTES>()
}
