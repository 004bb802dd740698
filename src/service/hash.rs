use crate::error::app_error::AppError;
use argon2::Argon2;
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, Salt, SaltString};
use std::sync::LazyLock;

/// A real Argon2 hash generated once at startup, used as a timing decoy
/// so that login requests for non-existent users take the same time as
/// requests for existing users.
static DUMMY_HASH: LazyLock<String> = LazyLock::new(|| {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(b"dummy-never-matches", Salt::from(&salt))
        .expect("failed to generate dummy hash")
        .to_string()
});

/// Argon2id with a fresh random salt. Used for account passwords and for
/// refresh tokens at rest; neither is ever stored or compared in plaintext.
pub fn hash_secret(secret: &str) -> Result<String, AppError> {
    let salt_string = SaltString::generate(&mut OsRng);
    let salt = Salt::from(&salt_string);
    let digest = PasswordHash::generate(Argon2::default(), secret.as_bytes(), salt)?;

    Ok(digest.to_string())
}

/// Constant-time comparison from the underlying primitive. An unparsable
/// digest counts as a mismatch rather than an error so callers stay on the
/// uniform rejection path.
pub fn verify_secret(secret: &str, digest: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(digest) else {
        return false;
    };
    Argon2::default().verify_password(secret.as_bytes(), &parsed).is_ok()
}

/// Perform a throwaway Argon2 verification to equalize response timing
/// regardless of whether the target account exists. This prevents attackers
/// from distinguishing existing vs non-existing accounts by measuring
/// response latency.
pub fn dummy_verify(secret: &str) {
    let hash = PasswordHash::new(&DUMMY_HASH).expect("invalid dummy hash");
    let _ = Argon2::default().verify_password(secret.as_bytes(), &hash);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_never_contains_the_raw_secret() {
        let digest = hash_secret("correct horse battery staple").expect("hash");
        assert!(!digest.contains("correct horse battery staple"));
        assert!(digest.starts_with("$argon2"));
    }

    #[test]
    fn matching_secret_verifies() {
        let digest = hash_secret("s3cret").expect("hash");
        assert!(verify_secret("s3cret", &digest));
    }

    #[test]
    fn one_bit_flip_fails_verification() {
        let secret = "s3cret";
        let digest = hash_secret(secret).expect("hash");

        let mut bytes = secret.as_bytes().to_vec();
        bytes[0] ^= 0x01;
        let flipped = String::from_utf8(bytes).expect("utf8");

        assert!(!verify_secret(&flipped, &digest));
    }

    #[test]
    fn two_hashes_of_the_same_secret_differ() {
        // Fresh salt per call.
        let a = hash_secret("s3cret").expect("hash");
        let b = hash_secret("s3cret").expect("hash");
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_digest_is_a_mismatch_not_a_panic() {
        assert!(!verify_secret("s3cret", "not-a-phc-string"));
    }

    #[test]
    fn dummy_verify_does_not_panic() {
        dummy_verify("anything");
    }
}
