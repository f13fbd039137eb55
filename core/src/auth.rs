use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a session token. Returns `(full_token, sha256_hash)`.
/// Format: `lm_ses_` + 32 random bytes hex-encoded. Only the hash is stored;
/// the full token goes to the client once and is never recoverable.
pub fn generate_session_token() -> (String, String) {
    let raw = random_hex(32);
    let full_token = format!("lm_ses_{raw}");
    let hash = hash_token(&full_token);
    (full_token, hash)
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate `n` random bytes and return as hex string.
fn random_hex(n: usize) -> String {
    let bytes: Vec<u8> = (0..n).map(|_| rand::thread_rng().r#gen::<u8>()).collect();
    hex::encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_token_roundtrip() {
        let (token, hash) = generate_session_token();
        assert!(token.starts_with("lm_ses_"));
        assert_eq!(hash, hash_token(&token));
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }
}
