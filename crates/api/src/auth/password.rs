//! Password hashing with Argon2

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hashing(e.to_string()))
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| PasswordError::InvalidHash(e.to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Validate password strength
pub fn validate_password_strength(password: &str) -> Result<(), PasswordValidationError> {
    if password.len() < 12 {
        return Err(PasswordValidationError::TooShort);
    }

    if password.len() > 128 {
        return Err(PasswordValidationError::TooLong);
    }

    let has_lowercase = password.chars().any(|c| c.is_ascii_lowercase());
    let has_uppercase = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if !has_lowercase {
        return Err(PasswordValidationError::MissingLowercase);
    }

    if !has_uppercase {
        return Err(PasswordValidationError::MissingUppercase);
    }

    if !has_digit {
        return Err(PasswordValidationError::MissingDigit);
    }

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    Hashing(String),
    #[error("Invalid password hash: {0}")]
    InvalidHash(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PasswordValidationError {
    #[error("Password must be at least 12 characters")]
    TooShort,
    #[error("Password must be at most 128 characters")]
    TooLong,
    #[error("Password must contain a lowercase letter")]
    MissingLowercase,
    #[error("Password must contain an uppercase letter")]
    MissingUppercase,
    #[error("Password must contain a digit")]
    MissingDigit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_round_trip() {
        let hash = hash_password("Correct-Horse-1").unwrap();
        assert!(verify_password("Correct-Horse-1", &hash).unwrap());
        assert!(!verify_password("Wrong-Horse-1xx", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("Correct-Horse-1").unwrap();
        let b = hash_password("Correct-Horse-1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_password_strength_rules() {
        assert!(validate_password_strength("Str0ngEnough-pw").is_ok());
        assert!(matches!(
            validate_password_strength("Sh0rt"),
            Err(PasswordValidationError::TooShort)
        ));
        assert!(matches!(
            validate_password_strength("nouppercase-123"),
            Err(PasswordValidationError::MissingUppercase)
        ));
        assert!(matches!(
            validate_password_strength("NOLOWERCASE-123"),
            Err(PasswordValidationError::MissingLowercase)
        ));
        assert!(matches!(
            validate_password_strength("NoDigitsAtAllHere"),
            Err(PasswordValidationError::MissingDigit)
        ));
    }
}
