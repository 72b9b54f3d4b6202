use async_trait::async_trait;
use catalog_admin_core::{Principal, PrincipalId, Result as CoreResult, SessionResolver};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("JWT encoding error: {0}")]
    JwtEncode(#[from] jsonwebtoken::errors::Error),

    #[error("Missing configuration: {0}")]
    MissingConfig(String),
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HS256 signing secret
    pub secret: String,
    /// Lifetime of tokens issued by [`JwtSessionResolver::issue`]
    pub token_ttl_secs: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            token_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub user_id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
}

impl Claims {
    fn into_principal(self) -> Principal {
        Principal::new(PrincipalId::from(self.user_id), self.email, self.roles)
    }
}

/// Resolves `Authorization: Bearer` / session-cookie tokens signed with HS256
#[derive(Clone)]
pub struct JwtSessionResolver {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    token_ttl: Duration,
}

impl std::fmt::Debug for JwtSessionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSessionResolver")
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

impl JwtSessionResolver {
    pub fn new(config: &JwtConfig) -> AuthResult<Self> {
        if config.secret.is_empty() {
            return Err(AuthError::MissingConfig("jwt secret".to_string()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            token_ttl: Duration::seconds(config.token_ttl_secs),
        })
    }

    /// Sign a session token for `principal`
    pub fn issue(&self, principal: &Principal) -> AuthResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: principal.id.to_string(),
            exp: (now + self.token_ttl).timestamp(),
            iat: now.timestamp(),
            user_id: *principal.id.as_uuid(),
            email: principal.email.clone(),
            roles: principal.roles.clone(),
        };

        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?)
    }

    /// Decode and validate a token
    pub fn decode(&self, token: &str) -> std::result::Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &self.validation).map(|data| data.claims)
    }
}

#[async_trait]
impl SessionResolver for JwtSessionResolver {
    async fn resolve_session(&self, token: &str) -> CoreResult<Option<Principal>> {
        match self.decode(token) {
            Ok(claims) => Ok(Some(claims.into_principal())),
            Err(e) => {
                match e.kind() {
                    ErrorKind::ExpiredSignature => tracing::debug!("Session token expired"),
                    kind => tracing::debug!(error = ?kind, "Session token rejected"),
                }
                Ok(None)
            }
        }
    }
}
