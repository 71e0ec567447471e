use rand::RngCore;
use sha1::{Digest, Sha1};

/// Prefix letter so that tokens are valid module identifiers for the
/// interpreted pipeline (the stored file is imported under this name).
const PREFIX: char = 'a';

/// Issues an opaque per-client identity token.
///
/// The token is the hex SHA-1 digest of a random 128-bit value, prefixed
/// with a fixed letter. It is unguessable and safe to use as a filesystem
/// path segment and session key. Persisting it (cookie, header, ...) is
/// the caller's job.
pub fn issue() -> String {
    let mut seed = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut seed);

    let digest = Sha1::digest(seed);
    format!("{PREFIX}{}", hex::encode(digest))
}

/// Checks that a client-supplied token has the shape `issue` produces.
///
/// Anything else is rejected before it can reach the artifact store as a
/// path component.
pub fn is_valid(token: &str) -> bool {
    let mut chars = token.chars();
    if chars.next() != Some(PREFIX) {
        return false;
    }

    let rest = &token[PREFIX.len_utf8()..];
    rest.len() == Sha1::output_size() * 2 && rest.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_are_valid() {
        let token = issue();
        assert!(is_valid(&token), "token {token} should validate");
        assert_eq!(token.len(), 41); // 'a' + 40 hex chars
    }

    #[test]
    fn issued_tokens_are_unique() {
        assert_ne!(issue(), issue());
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(!is_valid(""));
        assert!(!is_valid("a"));
        assert!(!is_valid("bdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef"));
        assert!(!is_valid("a../../../etc/passwd"));
        assert!(!is_valid("adeadbeef")); // too short
    }
}
