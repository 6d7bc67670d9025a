//! Argon2id password hashing.
//!
//! Hashes are stored in PHC string format, so parameters and salt travel
//! with the hash and can change without a migration.

use std::sync::OnceLock;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Hashes a password with a fresh random salt.
///
/// # Errors
/// Returns `argon2::password_hash::Error` if hashing fails (rare).
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verifies a password against a stored hash.
///
/// A malformed stored hash verifies as `false`.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Hash checked when an account does not exist, so a miss costs the same
/// as a wrong password.
pub(crate) static DUMMY_HASH: OnceLock<String> = OnceLock::new();

/// Runs a full verification against a hash no caller knows the password
/// for. Always `false`.
#[must_use]
pub fn verify_dummy(password: &str) -> bool {
    let hash = DUMMY_HASH.get_or_init(|| {
        hash_password("tollgate-missing-account").unwrap_or_default()
    });
    let _ = verify_password(password, hash);
    false
}
