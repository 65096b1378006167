//! Input validation for the auth surface

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

static HANDLE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_]{3,15}$").unwrap());

/// Handles that can never be registered.
const RESERVED_HANDLES: &[&str] = &[
    "admin", "root", "support", "help", "api", "wire", "thewire", "about", "terms", "privacy",
    "settings", "search", "notifications", "home", "feed", "media", "moderation", "auth",
    "signup", "login", "logout", "me", "everyone", "system",
];

pub fn validate_email(email: &str) -> bool {
    !email.is_empty() && email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

/// 3-15 chars of `[a-z0-9_]` (callers fold case first), no leading
/// underscore, not reserved.
pub fn validate_handle(handle: &str) -> bool {
    HANDLE_REGEX.is_match(handle)
        && !handle.starts_with('_')
        && !RESERVED_HANDLES.contains(&handle)
}

/// 8-128 characters with at least one uppercase, one lowercase, and one
/// digit.
pub fn validate_password(password: &str) -> bool {
    let len = password.chars().count();
    if !(8..=128).contains(&len) {
        return false;
    }
    let has_uppercase = password.chars().any(|c| c.is_uppercase());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    has_uppercase && has_lowercase && has_digit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_email() {
        assert!(validate_email("user@example.com"));
        assert!(validate_email("test.user+tag@sub.example.co.uk"));
    }

    #[test]
    fn test_invalid_email() {
        assert!(!validate_email("invalid"));
        assert!(!validate_email("@example.com"));
        assert!(!validate_email("user@"));
        assert!(!validate_email(&format!("{}@example.com", "x".repeat(250))));
    }

    #[test]
    fn test_valid_handle() {
        assert!(validate_handle("alice"));
        assert!(validate_handle("bob_42"));
        assert!(validate_handle("abc"));
        assert!(validate_handle("exactly15chars_"));
    }

    #[test]
    fn test_invalid_handle() {
        assert!(!validate_handle("ab")); // too short
        assert!(!validate_handle("sixteencharslong")); // too long
        assert!(!validate_handle("Alice")); // not folded
        assert!(!validate_handle("_alice")); // leading underscore
        assert!(!validate_handle("a-b")); // bad character
        assert!(!validate_handle("admin")); // reserved
        assert!(!validate_handle("moderation")); // reserved
    }

    #[test]
    fn test_valid_password() {
        assert!(validate_password("Password1"));
        assert!(validate_password("aVeryL0ngPassphrase"));
    }

    #[test]
    fn test_invalid_password() {
        assert!(!validate_password("Pass1")); // too short
        assert!(!validate_password("password1")); // no uppercase
        assert!(!validate_password("PASSWORD1")); // no lowercase
        assert!(!validate_password("Passwords")); // no digit
        assert!(!validate_password(&format!("Aa1{}", "x".repeat(130)))); // too long
    }
}
