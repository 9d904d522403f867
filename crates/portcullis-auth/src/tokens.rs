//! Opaque secret tokens.
//!
//! OAuth states, password reset codes, email verification codes and
//! refresh tokens are 32 random bytes rendered as a kind prefix followed by
//! unpadded URL-safe base64. Only the SHA-256 of the raw bytes is stored, so
//! a database read never yields a usable secret.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{ApiError, ApiResult};

const TOKEN_BYTES: usize = 32;

/// Kinds of secret token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretTokenKind {
    OAuthState,
    PasswordResetCode,
    EmailVerificationChallengeCode,
    SessionRefreshToken,
}

impl SecretTokenKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::OAuthState => "oauth_state_",
            Self::PasswordResetCode => "password_reset_code_",
            Self::EmailVerificationChallengeCode => "email_verification_challenge_code_",
            Self::SessionRefreshToken => "session_refresh_token_",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::OAuthState => "oauth state",
            Self::PasswordResetCode => "password reset code",
            Self::EmailVerificationChallengeCode => "email verification code",
            Self::SessionRefreshToken => "refresh token",
        }
    }
}

/// A freshly generated token and its digest.
///
/// The plaintext is handed to the caller once; only [`sha256`](Self::sha256)
/// is persisted.
pub struct SecretToken {
    plaintext: String,
    sha256: Vec<u8>,
}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretToken")
            .field("plaintext", &"[REDACTED]")
            .finish()
    }
}

impl SecretToken {
    /// Generate a token of `kind` from OS randomness.
    pub fn generate(kind: SecretTokenKind) -> Self {
        let mut raw = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut raw);

        Self {
            plaintext: format!("{}{}", kind.prefix(), URL_SAFE_NO_PAD.encode(raw)),
            sha256: Sha256::digest(raw).to_vec(),
        }
    }

    pub fn plaintext(&self) -> &str {
        &self.plaintext
    }

    pub fn sha256(&self) -> &[u8] {
        &self.sha256
    }

    pub fn into_parts(self) -> (String, Vec<u8>) {
        (self.plaintext, self.sha256)
    }
}

/// Digest of a caller-supplied token of `kind`.
///
/// Fails with `InvalidArgument` when the text is not a well-formed token of
/// that kind.
pub fn parse_token_digest(kind: SecretTokenKind, text: &str) -> ApiResult<Vec<u8>> {
    let malformed = || ApiError::invalid_argument(format!("malformed {}", kind.description()));

    let body = text.strip_prefix(kind.prefix()).ok_or_else(malformed)?;
    let raw = URL_SAFE_NO_PAD.decode(body).map_err(|_| malformed())?;
    if raw.len() != TOKEN_BYTES {
        return Err(malformed());
    }
    Ok(Sha256::digest(raw).to_vec())
}

/// Constant-time comparison of a stored digest with a candidate.
///
/// An absent stored digest never matches.
pub fn digest_matches(stored: Option<&[u8]>, candidate: &[u8]) -> bool {
    match stored {
        Some(stored) => stored.ct_eq(candidate).into(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_parses_to_its_digest() {
        let token = SecretToken::generate(SecretTokenKind::PasswordResetCode);
        assert!(token.plaintext().starts_with("password_reset_code_"));

        let digest = parse_token_digest(SecretTokenKind::PasswordResetCode, token.plaintext()).unwrap();
        assert_eq!(digest, token.sha256());
        assert!(digest_matches(Some(token.sha256()), &digest));
    }

    #[test]
    fn test_wrong_kind_is_invalid_argument() {
        let token = SecretToken::generate(SecretTokenKind::OAuthState);
        let err = parse_token_digest(SecretTokenKind::SessionRefreshToken, token.plaintext()).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[test]
    fn test_truncated_token_is_invalid_argument() {
        let token = SecretToken::generate(SecretTokenKind::OAuthState);
        let truncated = &token.plaintext()[..token.plaintext().len() - 4];
        assert!(parse_token_digest(SecretTokenKind::OAuthState, truncated).is_err());
    }

    #[test]
    fn test_missing_digest_never_matches() {
        assert!(!digest_matches(None, &[0u8; 32]));
        assert!(!digest_matches(Some(&[1u8; 32]), &[0u8; 32]));
    }

    #[test]
    fn test_tokens_are_distinct() {
        let a = SecretToken::generate(SecretTokenKind::SessionRefreshToken);
        let b = SecretToken::generate(SecretTokenKind::SessionRefreshToken);
        assert_ne!(a.plaintext(), b.plaintext());
    }
}
