//! Runtime environment detection.
//!
//! Provides a single source of truth for determining the runtime environment
//! (test, development, production) based on the `OSAURUS_ENV` environment
//! variable.
//!
//! # Environment Variable
//!
//! Set `OSAURUS_ENV` to one of:
//! - `test` - Test mode (skips keyring, uses file storage instead)
//! - `development` or `dev` - Development mode
//! - (anything else or unset) - Production mode

/// Runtime environment for the gateway client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment - skips keyring, uses file storage.
    Test,
}

impl Environment {
    /// Detect current environment from `OSAURUS_ENV`.
    #[must_use]
    pub fn current() -> Self {
        match std::env::var("OSAURUS_ENV").as_deref() {
            Ok("test") => Self::Test,
            Ok("development") | Ok("dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Returns `true` if this is the production environment.
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Returns `true` if this is the development environment.
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Convenience function to check if running in test mode.
#[must_use]
pub fn is_test_mode() -> bool {
    #[cfg(test)]
    {
        return true;
    }
    #[cfg(not(test))]
    {
        Environment::current().is_test()
    }
}

/// Returns `true` if keyring access should be bypassed in favor of file storage.
#[must_use]
pub fn should_skip_keyring() -> bool {
    is_test_mode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Production.to_string(), "production");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Test.to_string(), "test");
    }

    #[test]
    fn test_environment_is_methods() {
        assert!(Environment::Test.is_test());
        assert!(!Environment::Test.is_production());
        assert!(Environment::Production.is_production());
        assert!(Environment::Development.is_development());
    }

    #[test]
    fn test_should_skip_keyring_in_unit_tests() {
        assert!(should_skip_keyring());
    }
}
