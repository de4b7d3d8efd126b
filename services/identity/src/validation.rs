//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

use crate::models::Contact;

fn email_regex() -> &'static Regex {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    })
}

fn phone_regex() -> &'static Regex {
    static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
    PHONE_REGEX.get_or_init(|| {
        Regex::new(r"^\+?[0-9]{6,15}$").expect("Failed to compile phone regex")
    })
}

/// Decide whether `raw` is an email address or a phone number.
pub fn classify_contact(raw: &str, country_code: Option<&str>) -> Result<Contact, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("Email or phone is required".to_string());
    }

    if email_regex().is_match(raw) {
        validate_email(raw)?;
        return Ok(Contact::Email(raw.to_lowercase()));
    }

    if phone_regex().is_match(raw) {
        return Ok(Contact::Phone {
            number: raw.to_string(),
            country_code: country_code.map(str::to_string),
        });
    }

    Err("Invalid email or phone format".to_string())
}

/// Validate email
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email must be at most 254 characters long".to_string());
    }

    if !email_regex().is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate password
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    if password.len() < 8 {
        return Err("Password must be at least 8 characters long".to_string());
    }

    if password.len() > 128 {
        return Err("Password must be at most 128 characters long".to_string());
    }

    let mut has_upper = false;
    let mut has_lower = false;
    let mut has_digit = false;
    let mut has_special = false;

    for c in password.chars() {
        if c.is_ascii_uppercase() {
            has_upper = true;
        } else if c.is_ascii_lowercase() {
            has_lower = true;
        } else if c.is_ascii_digit() {
            has_digit = true;
        } else if !c.is_alphanumeric() {
            has_special = true;
        }
    }

    if !has_upper {
        return Err("Password must contain at least one uppercase letter".to_string());
    }

    if !has_lower {
        return Err("Password must contain at least one lowercase letter".to_string());
    }

    if !has_digit {
        return Err("Password must contain at least one digit".to_string());
    }

    if !has_special {
        return Err("Password must contain at least one special character".to_string());
    }

    Ok(())
}

/// Validate a 6-digit OTP
pub fn validate_otp(code: u32) -> Result<(), String> {
    if !(100_000..=999_999).contains(&code) {
        return Err("OTP must be a 6-digit number".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_contacts_are_normalised() {
        let contact = classify_contact(" U@Example.com ", None).unwrap();
        assert_eq!(contact, Contact::Email("u@example.com".into()));
    }

    #[test]
    fn phone_contacts_keep_country_code() {
        let contact = classify_contact("+237650000000", Some("CM")).unwrap();
        assert_eq!(contact.phone(), Some("+237650000000"));
        assert_eq!(contact.country_code(), Some("CM"));
        assert_eq!(contact.email(), None);
    }

    #[test]
    fn garbage_contact_is_rejected() {
        assert!(classify_contact("not a contact", None).is_err());
    }

    #[test]
    fn weak_password_is_rejected() {
        assert!(validate_password("password").is_err());
        assert!(validate_password("Passw0rd!").is_ok());
    }

    #[test]
    fn otp_must_have_six_digits() {
        assert!(validate_otp(12345).is_err());
        assert!(validate_otp(123456).is_ok());
    }
}
