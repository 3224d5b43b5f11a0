//! Opaque secret generation and hashing (device API keys, refresh tokens)

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};

/// Device key prefix
pub const DEVICE_KEY_PREFIX: &str = "sdk_";
/// Refresh token prefix
pub const REFRESH_TOKEN_PREFIX: &str = "srt_";

/// 48 alphanumeric chars: 48 * log2(62) ≈ 285 bits of entropy
const SECRET_LEN: usize = 48;
const KEY_PREFIX_LEN: usize = 8;

/// Opaque secret generator
pub struct ApiKeyGenerator;

impl ApiKeyGenerator {
    /// Generate a new device API key
    /// Format: sdk_<48-char-random>
    pub fn device_key() -> String {
        format!("{}{}", DEVICE_KEY_PREFIX, Self::random_secret())
    }

    /// Generate a new refresh token
    /// Format: srt_<48-char-random>
    pub fn refresh_token() -> String {
        format!("{}{}", REFRESH_TOKEN_PREFIX, Self::random_secret())
    }

    /// Public identifier of a key (first 8 chars after the type prefix)
    pub fn key_prefix(key: &str) -> String {
        let body = key.split_once('_').map(|(_, rest)| rest).unwrap_or(key);
        body.chars().take(KEY_PREFIX_LEN).collect()
    }

    /// Hash a secret for storage using SHA-256
    pub fn hash(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn random_secret() -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_LEN)
            .map(char::from)
            .collect()
    }
}
