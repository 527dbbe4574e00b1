use thiserror::Error;

/// Error kinds surfaced to RPC clients. The numeric code becomes the
/// JSON-RPC `error.code`; the display string becomes `error.message`.
///
/// Internal failures are logged server-side and surfaced as a bare 500.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Envelope or embedded-token signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// Request timestamp is more than a minute old.
    #[error("signature expired")]
    SignatureExpired,

    /// Missing/unknown invitation code or double-spent token.
    #[error("not authorized")]
    NotAuthorized,

    /// The presented key does not own the addressed resource.
    #[error("permission denied")]
    PermissionDenied,

    /// The presented key is on the role's key list but the signature failed.
    #[error("invalid signature")]
    ActorSignatureInvalid,

    /// The presented key is not on the required role's key list.
    #[error("not authorized")]
    NotOnKeyList,

    /// Root-key verification failed for a root-only operation.
    #[error("invalid signature")]
    RootSignatureInvalid,

    #[error("not found")]
    NotFound,

    /// Input failed validation before the handler ran.
    #[error("invalid input: {0}")]
    Malformed(String),

    #[error("internal error")]
    Internal,
}

impl ApiError {
    /// JSON-RPC `error.code` per the wire protocol.
    pub fn code(&self) -> i32 {
        match self {
            ApiError::InvalidSignature | ApiError::Malformed(_) => 400,
            ApiError::NotAuthorized
            | ApiError::PermissionDenied
            | ApiError::ActorSignatureInvalid => 401,
            ApiError::NotOnKeyList | ApiError::RootSignatureInvalid => 403,
            ApiError::NotFound => 404,
            ApiError::SignatureExpired => 410,
            ApiError::Internal => 500,
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        ApiError::Malformed(detail.into())
    }
}
