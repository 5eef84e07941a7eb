//! Device/browser fingerprints derived from request headers.
//!
//! Two tiers: strict hashes all inputs byte-stable; loose collapses the
//! version noise in the user agent so a routine browser auto-update does
//! not read as a new device. Pure functions, no I/O.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

static UA_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(?:\.\d+)+").expect("static regex"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FingerprintTier {
    Strict,
    Loose,
}

#[must_use]
pub fn fingerprint(
    user_agent: &str,
    accept_language: &str,
    accept_encoding: &str,
    tier: FingerprintTier,
) -> String {
    let material = match tier {
        FingerprintTier::Strict => {
            format!("{user_agent}|{accept_language}|{accept_encoding}")
        }
        FingerprintTier::Loose => {
            format!("{}|{accept_language}", normalize_user_agent(user_agent))
        }
    };

    let digest = Sha256::digest(material.as_bytes());
    hex::encode(digest)
}

/// Collapse `Firefox/128.0.2` style versions to their major component.
fn normalize_user_agent(user_agent: &str) -> String {
    UA_VERSION.replace_all(user_agent, "$1").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0.2";

    #[test]
    fn test_deterministic() {
        let a = fingerprint(UA, "en-US,en;q=0.5", "gzip, br", FingerprintTier::Strict);
        let b = fingerprint(UA, "en-US,en;q=0.5", "gzip, br", FingerprintTier::Strict);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_strict_changes_with_any_input() {
        let base = fingerprint(UA, "en-US", "gzip", FingerprintTier::Strict);
        assert_ne!(base, fingerprint(UA, "de-DE", "gzip", FingerprintTier::Strict));
        assert_ne!(base, fingerprint(UA, "en-US", "br", FingerprintTier::Strict));
    }

    #[test]
    fn test_loose_survives_minor_browser_update() {
        let before = fingerprint(UA, "en-US", "gzip", FingerprintTier::Loose);
        let updated = UA.replace("128.0.2", "128.0.3");
        let after = fingerprint(&updated, "en-US", "gzip", FingerprintTier::Loose);
        assert_eq!(before, after);

        // A major-version jump is a real change.
        let major = UA.replace("Firefox/128.0.2", "Firefox/129.0.1");
        assert_ne!(before, fingerprint(&major, "en-US", "gzip", FingerprintTier::Loose));
    }

    #[test]
    fn test_loose_ignores_accept_encoding() {
        let a = fingerprint(UA, "en-US", "gzip", FingerprintTier::Loose);
        let b = fingerprint(UA, "en-US", "zstd", FingerprintTier::Loose);
        assert_eq!(a, b);
    }
}
