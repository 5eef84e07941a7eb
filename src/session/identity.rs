//! Deterministic user identity and namespace derivation.
//!
//! The same email must always map to the same user id and namespace, so
//! session rotation and temporary-to-permanent upgrade preserve a user's
//! history across session ids.

use sha2::{Digest, Sha256};

use crate::constants::identity;

/// Salted hash of the email; stable for the lifetime of the master secret.
#[must_use]
pub fn permanent_user_id(email: &str, master_secret: &str) -> String {
    let material = format!("{}:{}", email.trim().to_lowercase(), master_secret);
    let digest = Sha256::digest(material.as_bytes());
    format!("{}{}", identity::PERMANENT_PREFIX, &hex::encode(digest)[..32])
}

#[must_use]
pub fn temporary_user_id() -> String {
    format!("{}{}", identity::TEMPORARY_PREFIX, &random_hex_token()[..32])
}

#[must_use]
pub fn namespace_for(user_id: &str) -> String {
    format!("{}{user_id}", identity::NAMESPACE_PREFIX)
}

/// 256-bit random token as a 64-char hex string (URL- and cookie-safe).
#[must_use]
pub fn random_hex_token() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_email_same_identity() {
        let a = permanent_user_id("Alice@Example.com", "secret");
        let b = permanent_user_id("  alice@example.com ", "secret");
        assert_eq!(a, b);
        assert!(a.starts_with("u_"));
        assert_eq!(namespace_for(&a), format!("ns_{a}"));
    }

    #[test]
    fn test_identity_depends_on_secret() {
        assert_ne!(
            permanent_user_id("alice@example.com", "secret-a"),
            permanent_user_id("alice@example.com", "secret-b")
        );
    }

    #[test]
    fn test_temporary_ids_are_unique() {
        let a = temporary_user_id();
        let b = temporary_user_id();
        assert_ne!(a, b);
        assert!(a.starts_with("t_"));
    }

    #[test]
    fn test_token_shape() {
        let token = random_hex_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
