//! Authenticated caller.
//!
//! A `Principal` exists only as the result of successful token validation;
//! it cannot be built outside the crate. Identifiers are redacted in Debug.

use std::fmt;

/// The caller identified by a validated bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    subject: Option<String>,
    email: Option<String>,
}

impl Principal {
    pub(crate) fn new(subject: Option<String>, email: Option<String>) -> Self {
        Self { subject, email }
    }

    /// The `email` claim, if the token carried one.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// The `sub` claim, if the token carried one.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Name used in response messages; falls back when no email is present.
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or("unknown user")
    }
}

/// Custom Debug implementation that redacts identifiers.
impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("subject", &self.subject.as_ref().map(|_| "[REDACTED]"))
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_identifiers() {
        let principal = Principal::new(
            Some("00000000-aaaa".to_string()),
            Some("alice@example.com".to_string()),
        );
        let debug_str = format!("{principal:?}");

        assert!(!debug_str.contains("alice@example.com"));
        assert!(!debug_str.contains("00000000-aaaa"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn test_display_name_fallback() {
        let principal = Principal::new(None, None);
        assert_eq!(principal.display_name(), "unknown user");
        assert!(principal.email().is_none());

        let principal = Principal::new(None, Some("bob@example.com".to_string()));
        assert_eq!(principal.display_name(), "bob@example.com");
    }
}
