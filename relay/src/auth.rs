//! Token authentication: SHA-256 hashing plus constant-time comparison,
//! so that timing differences on a rejected token never leak how many
//! leading bytes matched.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hash a raw bearer token to the hex digest stored in `TokenRecord`.
pub fn hash_token(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)
}

/// Compare a raw token against a stored hex digest in constant time.
pub fn verify_token(raw: &str, stored_hash_hex: &str) -> bool {
    let computed = hash_token(raw);
    let (Ok(a), Ok(b)) = (hex::decode(&computed), hex::decode(stored_hash_hex)) else {
        return false;
    };
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(&b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_token_verifies() {
        let hash = hash_token("s3cr3t");
        assert!(verify_token("s3cr3t", &hash));
    }

    #[test]
    fn mismatched_token_fails() {
        let hash = hash_token("s3cr3t");
        assert!(!verify_token("wrong", &hash));
    }

    #[test]
    fn malformed_stored_hash_fails_closed() {
        assert!(!verify_token("s3cr3t", "not-hex"));
    }
}
