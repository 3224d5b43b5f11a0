//! JWT access token generation and validation
//!
//! Access tokens are stateless: they carry the user's active role bindings so
//! that authorization needs no store round trip. The snapshot can be stale for
//! at most `access_token_exp_secs`.

use crate::{
    config::AppConfig,
    error::AppError,
    models::{
        permission::GrantSet,
        role::{BindingStatus, RoleBinding, RoleName},
        user::{User, UserType},
    },
};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    principal::{BindingSnapshot, Principal},
    AuthError,
};

const ACCESS_TOKEN_TYPE: &str = "access";

/// Role binding snapshot embedded in the access token
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RoleClaim {
    pub company_id: Option<Uuid>,
    pub role: RoleName,
    #[serde(default)]
    pub primary: bool,
    /// Per-binding overrides; absent means the role template applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<GrantSet>,
}

impl From<&RoleBinding> for RoleClaim {
    fn from(binding: &RoleBinding) -> Self {
        Self {
            company_id: binding.company_id,
            role: binding.role,
            primary: binding.is_primary,
            permissions: binding.overrides.clone(),
        }
    }
}

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,

    pub user_type: UserType,

    /// Active role bindings at issuance
    pub roles: Vec<RoleClaim>,

    /// Token type (always "access")
    pub token_type: String,

    /// Issued at
    pub iat: i64,

    /// Expiration
    pub exp: i64,

    /// JWT ID (unique token identifier)
    pub jti: String,
}

/// Why a token was rejected. Logged only; callers see `Unauthenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Expired,
    BadSignature,
    Malformed,
    WrongType,
}

impl TokenRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenRejection::Expired => "expired",
            TokenRejection::BadSignature => "bad_signature",
            TokenRejection::Malformed => "malformed",
            TokenRejection::WrongType => "wrong_type",
        }
    }
}

impl AccessClaims {
    /// Converts verified claims into a typed principal
    pub fn into_principal(self) -> Result<Principal, TokenRejection> {
        let user_id = Uuid::parse_str(&self.sub).map_err(|_| TokenRejection::Malformed)?;

        match self.user_type {
            UserType::SuperUser => Ok(Principal::SuperUser { user_id }),
            UserType::CompanyUser => Ok(Principal::CompanyUser {
                user_id,
                bindings: self
                    .roles
                    .into_iter()
                    .map(|claim| BindingSnapshot {
                        company_id: claim.company_id,
                        role: claim.role,
                        is_primary: claim.primary,
                        status: BindingStatus::Active,
                        overrides: claim.permissions.filter(|p| !p.is_empty()),
                    })
                    .collect(),
            }),
            // 设备只通过 API Key 认证
            UserType::DeviceUser => Err(TokenRejection::WrongType),
        }
    }
}

/// Token pair response
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64, // seconds until access token expires
}

/// JWT service
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_exp_secs: u64,
}

impl JwtService {
    /// Create JWT service from config
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            config.security.jwt_secret.expose_secret(),
            config.security.access_token_exp_secs,
        )
    }

    pub fn new(secret: &str, access_token_exp_secs: u64) -> Result<Self, AppError> {
        // Ensure secret is at least 32 bytes for HS256
        if secret.len() < 32 {
            return Err(AppError::Config("JWT secret too short (min 32 chars)".to_string()));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_exp_secs,
        })
    }

    pub fn access_token_exp_secs(&self) -> u64 {
        self.access_token_exp_secs
    }

    /// Generate access token with a snapshot of the user's active bindings
    pub fn generate_access_token(
        &self,
        user: &User,
        bindings: &[RoleBinding],
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let expiration = now + Duration::seconds(self.access_token_exp_secs as i64);

        let roles = match user.user_type {
            UserType::CompanyUser => bindings
                .iter()
                .filter(|b| b.user_id == user.id && b.is_active())
                .map(RoleClaim::from)
                .collect(),
            _ => Vec::new(),
        };

        let claims = AccessClaims {
            sub: user.id.to_string(),
            user_type: user.user_type,
            roles,
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            iat: now.timestamp(),
            exp: expiration.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        self.encode_claims(&claims)
    }

    pub(crate) fn encode_claims(&self, claims: &AccessClaims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode access token: {:?}", e);
            AuthError::Encoding(format!("Failed to encode access token: {}", e))
        })
    }

    /// Validate access token: signature, expiry (no leeway) and token type
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, TokenRejection> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenRejection::Expired,
                ErrorKind::InvalidSignature => TokenRejection::BadSignature,
                _ => TokenRejection::Malformed,
            })?
            .claims;

        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(TokenRejection::WrongType);
        }

        Ok(claims)
    }
}
