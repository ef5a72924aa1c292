//! Database auth token (type-safe).

use secrecy::{ExposeSecret, SecretString};

/// Bearer token for the remote database.
///
/// Wraps the token in a `secrecy::SecretString` so it is never logged or
/// displayed. An empty token means "not configured".
#[derive(Clone)]
pub struct AuthToken(SecretString);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::new(token.into().into()))
    }

    /// The unconfigured token.
    pub fn empty() -> Self {
        Self::new(String::new())
    }

    /// Expose the token value (only for building auth headers and persisting).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }
}

impl Default for AuthToken {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for AuthToken {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for AuthToken {}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthToken([REDACTED, {} chars])", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let token = AuthToken::new("eyJhbGciOi.secret");
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_only_zero_length_token_is_empty() {
        assert!(AuthToken::empty().is_empty());
        assert!(AuthToken::new(String::new()).is_empty());
        assert!(!AuthToken::new("  ").is_empty());
        assert!(!AuthToken::new("t").is_empty());
    }

    #[test]
    fn test_equality_compares_values() {
        assert_eq!(AuthToken::new("a"), AuthToken::new("a"));
        assert_ne!(AuthToken::new("a"), AuthToken::new("b"));
    }
}
