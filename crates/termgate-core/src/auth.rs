//! Token verification

use subtle::ConstantTimeEq;
use termgate_config::AuthConfig;

/// Outcome of checking a presented token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No token is configured; everyone is let in
    Open,
    Match,
    Mismatch,
}

/// Holds the configured token and compares presented ones against it
#[derive(Clone)]
pub struct AuthGate {
    token: Option<Vec<u8>>,
}

impl AuthGate {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: token.map(|t| t.as_bytes().to_vec()),
        }
    }

    pub fn from_config(auth: &AuthConfig) -> Self {
        Self::new(auth.token.as_deref())
    }

    pub fn is_open(&self) -> bool {
        self.token.is_none()
    }

    /// Compare in constant time with respect to content. Length differences
    /// return early.
    pub fn verify(&self, presented: &str) -> Verdict {
        match &self.token {
            None => Verdict::Open,
            Some(expected) => {
                if bool::from(expected.as_slice().ct_eq(presented.as_bytes())) {
                    Verdict::Match
                } else {
                    Verdict::Mismatch
                }
            }
        }
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("open", &self.is_open())
            .finish()
    }
}

/// First four characters followed by `****`, for logs
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{}****", prefix)
}
