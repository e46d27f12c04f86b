//! Client -> server frames

use serde_json::Value;

/// Credential extracted from the first frame(s) a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub token: String,
    /// Whether the frame was a structured JSON envelope
    pub structured: bool,
}

impl AuthRequest {
    /// Extract a token from an inbound frame.
    ///
    /// Accepts `{"type":"auth","token":"..."}` (with `password` as an alias).
    /// Anything that is not a JSON object carrying a non-empty token is
    /// treated as a bare credential: the trimmed payload itself.
    pub fn from_frame(payload: &str) -> Self {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(payload) {
            let field = |name: &str| {
                map.get(name)
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };

            if let Some(token) = field("token").or_else(|| field("password")) {
                return Self {
                    token,
                    structured: true,
                };
            }
        }

        Self {
            token: payload.trim().to_string(),
            structured: false,
        }
    }
}
