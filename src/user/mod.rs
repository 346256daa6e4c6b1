// Registration input validation: required fields, email syntax,
// national id format and password strength.

mod validation;

pub use validation::{
    is_valid_email, validate_password, AcceptAnyNationalId, DefaultFormValidator, FormError, FormValidator,
    NationalIdValidator, PasswordRequirement, PasswordValidationError, RegistrationForm, SanitizedForm,
};

/// Minimum password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// A password needs at least one of these
pub const PASSWORD_SPECIAL_CHARS: &str = "@$!%*?&";

/// Digits in a national id
pub const NATIONAL_ID_LEN: usize = 10;

/// Email regex pattern for validation
pub const EMAIL_REGEX: &str = r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$";
