//! API Credential Management
//!
//! Secure handling of exchange credentials loaded from environment variables.
//! Credentials are never logged at INFO/WARN levels and are masked when
//! displayed.

use std::fmt;

/// Secure string wrapper that masks sensitive data in logs.
///
/// Debug output shows only `SecretString(***)`; Display shows a truncated
/// `first4...last4` form.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: String) -> Self {
        SecretString(value)
    }

    /// Returns the raw secret. Only use this for signing requests; never log
    /// or display the returned value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        let s = &self.0;
        if s.len() <= 8 {
            return "***".to_string();
        }
        format!("{}...{}", &s[..4], &s[s.len() - 4..])
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.masked())
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        SecretString::new(s)
    }
}

/// Exchange API credentials loaded from environment variables.
///
/// The key/secret pair is read from `BK`/`BS`; their absence selects mock
/// mode rather than an error (see `order_dispatcher`).
#[derive(Clone, Debug)]
pub struct Credentials {
    pub api_key: SecretString,
    pub secret_key: SecretString,
}

impl Credentials {
    /// Loads `BK` (api key) and `BS` (secret key) from the environment.
    /// Returns `Err` if either is missing or empty after trimming; callers
    /// treat that as "no credentials" and run in mock mode.
    pub fn from_env() -> Result<Self, String> {
        let api_key = std::env::var("BK").map_err(|_| "BK not set".to_string())?;
        let secret_key = std::env::var("BS").map_err(|_| "BS not set".to_string())?;

        let api_key = api_key.trim().to_string();
        let secret_key = secret_key.trim().to_string();

        if api_key.is_empty() {
            return Err("BK is empty after trimming whitespace".to_string());
        }
        if secret_key.is_empty() {
            return Err("BS is empty after trimming whitespace".to_string());
        }

        Ok(Self {
            api_key: SecretString::new(api_key),
            secret_key: SecretString::new(secret_key),
        })
    }
}
