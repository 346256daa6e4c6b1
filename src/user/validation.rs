use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::user::{EMAIL_REGEX, MIN_PASSWORD_LENGTH, NATIONAL_ID_LEN, PASSWORD_SPECIAL_CHARS};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(EMAIL_REGEX).expect("email pattern is valid");
}

/// Password requirement types for validation
#[derive(Debug, Clone, PartialEq)]
pub enum PasswordRequirement {
    MinimumLength(usize),
    ContainsUppercase,
    ContainsNumbers,
    ContainsSpecialChars,
}

impl fmt::Display for PasswordRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordRequirement::MinimumLength(len) => write!(f, "Password must be at least {} characters long", len),
            PasswordRequirement::ContainsUppercase => write!(f, "Password must contain at least one uppercase letter"),
            PasswordRequirement::ContainsNumbers => write!(f, "Password must contain at least one number"),
            PasswordRequirement::ContainsSpecialChars => {
                write!(f, "Password must contain at least one of {}", PASSWORD_SPECIAL_CHARS)
            }
        }
    }
}

/// Password validation error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PasswordValidationError {
    #[error("Password policy requirements not met: {0}")]
    RequirementsNotMet(String),
}

/// Registration form validation error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Invalid national id: {0}")]
    InvalidNationalId(String),

    #[error(transparent)]
    WeakPassword(#[from] PasswordValidationError),
}

/// Raw registration input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationForm {
    pub first_name: String,
    pub last_name: String,
    pub national_id: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Trimmed, normalised form fields. The password is not carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedForm {
    pub first_name: String,
    pub last_name: String,
    pub national_id: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Format and strength policy for registration input
pub trait FormValidator: Send + Sync {
    fn validate(&self, form: &RegistrationForm) -> Result<SanitizedForm, FormError>;
}

/// National id check beyond the basic digit format
pub trait NationalIdValidator: Send + Sync {
    fn validate(&self, national_id: &str) -> Result<(), String>;
}

/// Accepts any id that passed the digit-count check
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAnyNationalId;

impl NationalIdValidator for AcceptAnyNationalId {
    fn validate(&self, _national_id: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Required fields, email syntax, 10-digit national id and password strength
#[derive(Clone)]
pub struct DefaultFormValidator {
    national_id: Arc<dyn NationalIdValidator>,
}

impl DefaultFormValidator {
    pub fn new(national_id: Arc<dyn NationalIdValidator>) -> Self {
        Self { national_id }
    }
}

impl Default for DefaultFormValidator {
    fn default() -> Self {
        Self::new(Arc::new(AcceptAnyNationalId))
    }
}

impl FormValidator for DefaultFormValidator {
    fn validate(&self, form: &RegistrationForm) -> Result<SanitizedForm, FormError> {
        let first_name = required("first_name", &form.first_name)?;
        let last_name = required("last_name", &form.last_name)?;
        let national_id = required("national_id", &form.national_id)?;
        let email = required("email", &form.email)?.to_lowercase();
        if form.password.is_empty() {
            return Err(FormError::MissingField("password"));
        }

        if !is_valid_email(&email) {
            return Err(FormError::InvalidEmail);
        }

        if national_id.len() != NATIONAL_ID_LEN || !national_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FormError::InvalidNationalId(format!("must be {} digits", NATIONAL_ID_LEN)));
        }
        self.national_id
            .validate(&national_id)
            .map_err(FormError::InvalidNationalId)?;

        validate_password(&form.password)?;

        debug!("Registration form passed validation");
        Ok(SanitizedForm {
            first_name,
            last_name,
            national_id,
            email,
            phone: optional(&form.phone),
            address: optional(&form.address),
        })
    }
}

fn required(name: &'static str, value: &str) -> Result<String, FormError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(FormError::MissingField(name))
    } else {
        Ok(trimmed.to_string())
    }
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Validate a password against the registration policy
pub fn validate_password(password: &str) -> Result<(), PasswordValidationError> {
    let mut failed_requirements = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        failed_requirements.push(PasswordRequirement::MinimumLength(MIN_PASSWORD_LENGTH));
    }

    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        failed_requirements.push(PasswordRequirement::ContainsUppercase);
    }

    if !password.chars().any(|c| c.is_ascii_digit()) {
        failed_requirements.push(PasswordRequirement::ContainsNumbers);
    }

    if !password.chars().any(|c| PASSWORD_SPECIAL_CHARS.contains(c)) {
        failed_requirements.push(PasswordRequirement::ContainsSpecialChars);
    }

    if !failed_requirements.is_empty() {
        let requirements_str = failed_requirements
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<String>>()
            .join(", ");

        return Err(PasswordValidationError::RequirementsNotMet(requirements_str));
    }

    Ok(())
}
