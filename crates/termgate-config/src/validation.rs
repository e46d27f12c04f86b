//! Configuration validation

use crate::schema::RawConfig;
use thiserror::Error;

/// Characters that count as "special" for token strength
pub const TOKEN_SPECIAL_CHARS: &str = "!@#$%^&*(),.?\":{}|<>";

/// Minimum token length
pub const MIN_TOKEN_LENGTH: usize = 15;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error(
        "Authentication token is too weak: needs at least 15 characters with uppercase, lowercase, digit, and special character"
    )]
    WeakToken,

    #[error("Invalid port {0}: must be between 1 and 65535")]
    InvalidPort(u32),

    #[error("'{field}' must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("Shell program cannot be empty")]
    EmptyShellProgram,

    #[error("ledger.idle_eviction_seconds ({idle}s) must not be shorter than auth.ban_seconds ({ban}s)")]
    EvictionShorterThanBan { idle: u64, ban: u64 },
}

/// Check token complexity: length, upper, lower, digit, special
pub fn is_strong_token(token: &str) -> bool {
    token.chars().count() >= MIN_TOKEN_LENGTH
        && token.chars().any(|c| c.is_ascii_uppercase())
        && token.chars().any(|c| c.is_ascii_lowercase())
        && token.chars().any(|c| c.is_ascii_digit())
        && token.chars().any(|c| TOKEN_SPECIAL_CHARS.contains(c))
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(token) = &config.auth.token
        && !is_strong_token(token)
    {
        errors.push(ValidationError::WeakToken);
    }

    if let Some(port) = config.server.port
        && !(1..=65535).contains(&port)
    {
        errors.push(ValidationError::InvalidPort(port));
    }

    let non_zero: [(&'static str, Option<u64>); 6] = [
        ("auth.timeout_ms", config.auth.timeout_ms),
        ("auth.max_failures", config.auth.max_failures.map(u64::from)),
        ("auth.ban_seconds", config.auth.ban_seconds),
        ("ledger.sweep_interval_seconds", config.ledger.sweep_interval_seconds),
        ("shell.cols", config.shell.cols.map(u64::from)),
        ("shell.rows", config.shell.rows.map(u64::from)),
    ];
    for (field, value) in non_zero {
        if value == Some(0) {
            errors.push(ValidationError::ZeroValue { field });
        }
    }

    if let Some(program) = &config.shell.program
        && program.trim().is_empty()
    {
        errors.push(ValidationError::EmptyShellProgram);
    }

    if let Some(idle) = config.ledger.idle_eviction_seconds {
        let ban = config
            .auth
            .ban_seconds
            .unwrap_or(crate::DEFAULT_BAN_SECONDS);
        if idle < ban {
            errors.push(ValidationError::EvictionShorterThanBan { idle, ban });
        }
    }

    errors
}
