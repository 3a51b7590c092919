//! Generated credential material.

use crate::template::TemplateVars;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const PASSWORD_CHARS: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

/// Format used for `{{expiration}}` in statement templates: ISO-8601 in UTC,
/// so the target never reads it in its own session time zone.
pub const EXPIRATION_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsernameCase {
    Mixed,
    Lower,
    Upper,
}

/// Shape of the credentials a provider generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialPolicy {
    pub username_length: usize,
    pub password_length: usize,
    pub username_case: UsernameCase,
}

impl CredentialPolicy {
    pub const fn new(username_length: usize, password_length: usize) -> Self {
        Self {
            username_length,
            password_length,
            username_case: UsernameCase::Mixed,
        }
    }

    pub const fn with_case(mut self, case: UsernameCase) -> Self {
        self.username_case = case;
        self
    }

    pub fn generate(&self) -> CredentialMaterial {
        let mut rng = rand::thread_rng();
        // First character is always a letter so the username is a valid bare identifier.
        let mut username = String::with_capacity(self.username_length);
        if self.username_length > 0 {
            username.push(LETTERS[rng.gen_range(0..LETTERS.len())] as char);
        }
        for _ in 1..self.username_length {
            username.push(ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())] as char);
        }
        match self.username_case {
            UsernameCase::Mixed => {}
            UsernameCase::Lower => username.make_ascii_lowercase(),
            UsernameCase::Upper => username.make_ascii_uppercase(),
        }

        let password = (0..self.password_length)
            .map(|_| PASSWORD_CHARS[rng.gen_range(0..PASSWORD_CHARS.len())] as char)
            .collect();

        CredentialMaterial { username, password }
    }
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self::new(32, 48)
    }
}

/// Ephemeral username/password pair. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CredentialMaterial {
    pub username: String,
    pub password: String,
}

impl CredentialMaterial {
    /// Standard variables for a creation statement.
    pub fn template_vars(&self, expire_at: DateTime<Utc>) -> TemplateVars {
        TemplateVars::new()
            .with("username", self.username.as_str())
            .with("password", self.password.as_str())
            .with("expiration", format_expiration(expire_at))
    }
}

impl fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialMaterial")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

pub fn format_expiration(expire_at: DateTime<Utc>) -> String {
    expire_at.format(EXPIRATION_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generate_shape() {
        let policy = CredentialPolicy::new(32, 64).with_case(UsernameCase::Lower);
        let material = policy.generate();
        assert_eq!(material.username.len(), 32);
        assert_eq!(material.password.len(), 64);
        assert!(material.username.chars().next().unwrap().is_ascii_alphabetic());
        assert!(!material.username.chars().any(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn test_generate_is_random() {
        let policy = CredentialPolicy::default();
        assert_ne!(policy.generate().username, policy.generate().username);
    }

    #[test]
    fn test_template_vars() {
        let material = CredentialMaterial {
            username: "u".to_string(),
            password: "p".to_string(),
        };
        let expire_at = Utc.with_ymd_and_hms(2030, 5, 1, 12, 30, 0).unwrap();
        let vars = material.template_vars(expire_at);
        assert_eq!(vars.get("expiration"), Some("2030-05-01T12:30:00.000Z"));
        assert_eq!(vars.get("password"), Some("p"));
    }

    #[test]
    fn test_expiration_keeps_millis_and_utc_marker() {
        let expire_at = Utc.timestamp_millis_opt(1_893_456_000_250).unwrap();
        assert_eq!(format_expiration(expire_at), "2030-01-01T00:00:00.250Z");

        let parsed = DateTime::parse_from_rfc3339(&format_expiration(expire_at)).unwrap();
        assert_eq!(parsed.with_timezone(&Utc), expire_at);
    }

    #[test]
    fn test_debug_redacts_password() {
        let material = CredentialMaterial {
            username: "u".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", material).contains("hunter2"));
    }
}
