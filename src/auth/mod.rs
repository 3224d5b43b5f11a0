//! Authentication: credentials, principals and the request-level resolver

pub mod api_key;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod principal;

pub use api_key::ApiKeyGenerator;
pub use jwt::{AccessClaims, JwtService, RoleClaim, TokenPair};
pub use middleware::{extract_credential, require_principal, PresentedCredential, PrincipalResolver};
pub use password::PasswordHasher;
pub use principal::{BindingSnapshot, Principal};

use crate::repository::StoreError;

/// Authentication failure as seen by callers.
///
/// Expired, malformed, forged and revoked credentials all collapse into
/// `Unauthenticated`; the precise cause is only logged.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("more than one credential type presented")]
    AmbiguousCredential,

    /// Unknown, expired, revoked or replayed refresh token
    #[error("invalid refresh token")]
    InvalidToken,

    /// Credential store I/O failure; retryable, never a denial
    #[error("credential store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("token encoding failed: {0}")]
    Encoding(String),
}
