use sha2::{Digest, Sha256};
use std::env;

// Token issuance/storage lives with the session layer; this module only
// derives and checks the per-subject token that state-changing requests must
// echo back in their `csrf_token` field.

fn secret() -> String {
    env::var("CSRF_SECRET")
        .or_else(|_| env::var("JWT_SECRET"))
        .expect("CSRF_SECRET or JWT_SECRET not set")
}

/// Per-subject CSRF token: hex SHA-256 over `secret:subject`.
pub fn issue(subject: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret().as_bytes());
    hasher.update(b":");
    hasher.update(subject.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Check a client-supplied token for the given subject.
pub fn verify(subject: &str, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    // Both sides are fixed-length hex digests of a server secret.
    issue(subject) == token
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_secret() {
        std::env::set_var("CSRF_SECRET", "csrf-unit-test-secret-0123456789!!");
    }

    #[test]
    fn issued_token_verifies() {
        set_secret();
        let token = issue("42");
        assert!(verify("42", &token));
    }

    #[test]
    fn token_is_subject_bound() {
        set_secret();
        let token = issue("42");
        assert!(!verify("43", &token));
    }

    #[test]
    fn garbage_and_empty_tokens_fail() {
        set_secret();
        assert!(!verify("42", ""));
        assert!(!verify("42", "deadbeef"));
    }
}
