use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid API key")]
    InvalidApiKey,
    #[error("invalid username or public API key")]
    InvalidUsername,
    #[error("invalid password")]
    InvalidPassword,
    #[error("the provided authentication token is invalid")]
    InvalidToken,
}

/// Tokens returned by a login or a session refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// A way of logging in to the admin API.
#[derive(Debug, Clone)]
pub enum AuthProvider {
    /// Cloud programmatic API key: the username is the public key.
    ApiKey { username: String, api_key: String },
    UsernamePassword { username: String, password: String },
}

impl AuthProvider {
    pub fn provider_type(&self) -> &'static str {
        match self {
            Self::ApiKey { .. } => "mongodb-cloud",
            Self::UsernamePassword { .. } => "local-userpass",
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Self::ApiKey { username, .. } | Self::UsernamePassword { username, .. } => username,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::ApiKey { username, api_key } => json!({
                "username": username,
                "apiKey": api_key,
            }),
            Self::UsernamePassword { username, password } => json!({
                "username": username,
                "password": password,
            }),
        }
    }

    /// Local sanity checks run before any request is made.
    pub fn validate(&self) -> Result<(), AuthError> {
        match self {
            Self::ApiKey { username, api_key } => {
                if api_key.is_empty() || !api_key.contains('-') {
                    return Err(AuthError::InvalidApiKey);
                }
                if username.is_empty() {
                    return Err(AuthError::InvalidUsername);
                }
            }
            Self::UsernamePassword { username, password } => {
                if username.is_empty() {
                    return Err(AuthError::InvalidUsername);
                }
                if password.is_empty() {
                    return Err(AuthError::InvalidPassword);
                }
            }
        }
        Ok(())
    }
}

/// The subset of JWT claims the client cares about.
#[derive(Debug, Deserialize)]
pub struct Jwt {
    #[serde(default)]
    pub exp: i64,
}

impl Jwt {
    pub fn parse(token: &str) -> Result<Self, AuthError> {
        let claims = token.split('.').nth(1).ok_or(AuthError::InvalidToken)?;
        let decoded = general_purpose::URL_SAFE_NO_PAD
            .decode(claims.trim_end_matches('='))
            .map_err(|_| AuthError::InvalidToken)?;
        serde_json::from_slice(&decoded).map_err(|_| AuthError::InvalidToken)
    }

    pub fn expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default();
        now > self.exp
    }
}

/// True only when the token parses as a JWT whose `exp` has passed.
/// Opaque tokens are never considered expired.
pub fn token_known_expired(token: &str) -> bool {
    Jwt::parse(token).map(|jwt| jwt.expired()).unwrap_or(false)
}

#[cfg(test)]
pub(crate) fn jwt_with_exp(exp: i64) -> String {
    let claims = general_purpose::URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp}}}"));
    format!("eyJhbGciOiJIUzI1NiJ9.{claims}.signature")
}

#[cfg(test)]
mod tests {
    use super::{AuthError, AuthProvider, Jwt, jwt_with_exp, token_known_expired};

    #[test]
    fn api_key_provider_requires_dashed_key() {
        let provider = AuthProvider::ApiKey {
            username: "public".to_string(),
            api_key: "nodashes".to_string(),
        };
        assert_eq!(provider.validate(), Err(AuthError::InvalidApiKey));

        let provider = AuthProvider::ApiKey {
            username: String::new(),
            api_key: "abc-def".to_string(),
        };
        assert_eq!(provider.validate(), Err(AuthError::InvalidUsername));
    }

    #[test]
    fn password_provider_requires_both_fields() {
        let provider = AuthProvider::UsernamePassword {
            username: "user@example.com".to_string(),
            password: String::new(),
        };
        assert_eq!(provider.validate(), Err(AuthError::InvalidPassword));
        assert_eq!(provider.provider_type(), "local-userpass");
    }

    #[test]
    fn api_key_payload_uses_wire_field_names() {
        let provider = AuthProvider::ApiKey {
            username: "public".to_string(),
            api_key: "abc-def".to_string(),
        };
        assert_eq!(provider.payload()["apiKey"], "abc-def");
        assert_eq!(provider.payload()["username"], "public");
        assert_eq!(provider.provider_type(), "mongodb-cloud");
    }

    #[test]
    fn parses_expiry_claim() {
        let jwt = Jwt::parse(&jwt_with_exp(1)).expect("parse");
        assert_eq!(jwt.exp, 1);
        assert!(jwt.expired());

        let jwt = Jwt::parse(&jwt_with_exp(i64::MAX)).expect("parse");
        assert!(!jwt.expired());
    }

    #[test]
    fn opaque_tokens_are_not_known_expired() {
        assert!(!token_known_expired("old.access.token"));
        assert!(!token_known_expired(""));
        assert!(token_known_expired(&jwt_with_exp(1)));
    }
}
