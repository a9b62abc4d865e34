//! Password-strength rule applied at registration.

use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 6;
const SPECIAL_CHARACTERS: &str = "@$!%*#?&";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PasswordRuleError {
    #[error("password must be at least 6 characters")]
    TooShort,
    #[error("password may only contain letters, digits and @$!%*#?& (found '{0}')")]
    InvalidCharacter(char),
    #[error("password must include a letter")]
    MissingLetter,
    #[error("password must include a number")]
    MissingDigit,
    #[error("password must include one of @$!%*#?&")]
    MissingSpecial,
}

fn is_special(c: char) -> bool {
    SPECIAL_CHARACTERS.contains(c)
}

pub fn validate_password(password: &str) -> Result<(), PasswordRuleError> {
    if let Some(invalid) = password
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || is_special(*c)))
    {
        return Err(PasswordRuleError::InvalidCharacter(invalid));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PasswordRuleError::TooShort);
    }
    if !password.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err(PasswordRuleError::MissingLetter);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PasswordRuleError::MissingDigit);
    }
    if !password.chars().any(is_special) {
        return Err(PasswordRuleError::MissingSpecial);
    }
    Ok(())
}
