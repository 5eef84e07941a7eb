//! Tamper-evidence for persisted session records.
//!
//! Every stored session carries a keyed MAC over its canonical serialized
//! form. The signing key is derived from the master secret with a fixed
//! domain-separation context; verification is constant-time. A failed
//! verification is tampering, not a retryable error.

use subtle::ConstantTimeEq;

use crate::constants::signing::SESSION_KEY_CONTEXT;
use crate::entities::sessions;

#[derive(Clone)]
pub struct SessionSigner {
    key: [u8; 32],
}

impl SessionSigner {
    #[must_use]
    pub fn new(master_secret: &str) -> Self {
        Self {
            key: blake3::derive_key(SESSION_KEY_CONTEXT, master_secret.as_bytes()),
        }
    }

    /// MAC over the canonical form, hex-encoded for storage.
    #[must_use]
    pub fn sign(&self, record: &sessions::Model) -> String {
        let mac = blake3::keyed_hash(&self.key, canonical_form(record).as_bytes());
        hex::encode(mac.as_bytes())
    }

    /// Constant-time verification against the record's stored signature.
    #[must_use]
    pub fn verify(&self, record: &sessions::Model) -> bool {
        let expected = blake3::keyed_hash(&self.key, canonical_form(record).as_bytes());
        let Ok(stored) = hex::decode(&record.signature) else {
            return false;
        };
        if stored.len() != expected.as_bytes().len() {
            return false;
        }
        bool::from(stored.as_slice().ct_eq(expected.as_bytes()))
    }
}

/// Canonical `|`-joined serialization of the identity-bearing fields.
/// Observational fields that mutate outside the manager's signed writes
/// (current ip, vendor context) are deliberately excluded.
fn canonical_form(record: &sessions::Model) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
        record.id,
        record.user_id,
        record.namespace,
        record.email.as_deref().unwrap_or(""),
        i32::from(record.is_temporary),
        record.created_at,
        record.expires_at,
        record.last_rotated_at,
        record.rotation_count,
        record.fingerprint_strict,
        record.fingerprint_loose,
        record.original_ip.as_deref().unwrap_or(""),
        record.csrf_token,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> sessions::Model {
        sessions::Model {
            id: "a".repeat(64),
            user_id: "u_123".to_string(),
            namespace: "ns_u_123".to_string(),
            email: Some("alice@example.com".to_string()),
            is_temporary: false,
            created_at: "2025-03-01T00:00:00+00:00".to_string(),
            expires_at: "2025-03-15T00:00:00+00:00".to_string(),
            last_rotated_at: "2025-03-01T00:00:00+00:00".to_string(),
            rotation_count: 0,
            fingerprint_strict: "fp-strict".to_string(),
            fingerprint_loose: "fp-loose".to_string(),
            original_ip: Some("1.1.1.1".to_string()),
            current_ip: Some("1.1.1.1".to_string()),
            csrf_token: "b".repeat(64),
            vendor_context: None,
            signature: String::new(),
        }
    }

    #[test]
    fn test_sign_then_verify() {
        let signer = SessionSigner::new("master-secret");
        let mut record = sample_record();
        record.signature = signer.sign(&record);
        assert!(signer.verify(&record));
    }

    #[test]
    fn test_any_covered_field_mutation_fails_verification() {
        let signer = SessionSigner::new("master-secret");
        let mut record = sample_record();
        record.signature = signer.sign(&record);

        let mut tampered = record.clone();
        tampered.user_id = "u_456".to_string();
        assert!(!signer.verify(&tampered));

        let mut tampered = record.clone();
        tampered.rotation_count += 1;
        assert!(!signer.verify(&tampered));

        let mut tampered = record.clone();
        tampered.expires_at = "2035-03-15T00:00:00+00:00".to_string();
        assert!(!signer.verify(&tampered));

        let mut tampered = record;
        tampered.signature = "zz".to_string();
        assert!(!signer.verify(&tampered));
    }

    #[test]
    fn test_observational_fields_do_not_invalidate() {
        let signer = SessionSigner::new("master-secret");
        let mut record = sample_record();
        record.signature = signer.sign(&record);

        record.current_ip = Some("8.8.8.8".to_string());
        record.vendor_context = Some("vendor-7".to_string());
        assert!(signer.verify(&record));
    }

    #[test]
    fn test_keys_are_secret_scoped() {
        let mut record = sample_record();
        record.signature = SessionSigner::new("secret-a").sign(&record);
        assert!(!SessionSigner::new("secret-b").verify(&record));
    }
}
