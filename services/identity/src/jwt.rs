//! JWT service for token generation and validation
//!
//! This module signs the raw strings stored in the token ledger using the
//! RS256 algorithm. Whether a token is still usable is decided by the
//! ledger row, not by the signature alone.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Principal, PrincipalKind};

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Private key for signing tokens
    pub private_key: String,
    /// Public key for verifying tokens
    pub public_key: String,
    /// Access token expiration time in seconds (default: 15 minutes)
    pub access_token_expiry: u64,
    /// Refresh token expiration time in seconds (default: 7 days)
    pub refresh_token_expiry: u64,
    /// Verify/reset link token expiration time in seconds (default: 1 day)
    pub link_token_expiry: u64,
}

/// Read a PEM value that may be given inline or as a file path.
fn read_pem(var: &str) -> Result<String> {
    let value = std::env::var(var)
        .map_err(|_| anyhow::anyhow!("{} environment variable not set", var))?;

    if value.starts_with("-----BEGIN") {
        return Ok(value);
    }

    // Try CWD, then the crate root
    let pem = std::fs::read_to_string(&value)
        .or_else(|_| {
            let mut path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
            path.push(&value);
            std::fs::read_to_string(path)
        })
        .map_err(|e| anyhow::anyhow!("Failed to read key file for {}: {}", var, e))?;

    Ok(pem.trim().to_string())
}

fn expiry_var(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl JwtConfig {
    /// Create a new JwtConfig from environment variables
    ///
    /// # Environment Variables
    /// - `JWT_PRIVATE_KEY`: Private key for signing tokens (PEM format) or path to private key file
    /// - `JWT_PUBLIC_KEY`: Public key for verifying tokens (PEM format) or path to public key file
    /// - `JWT_ACCESS_TOKEN_EXPIRY`: Access token expiry in seconds (default: 900)
    /// - `JWT_REFRESH_TOKEN_EXPIRY`: Refresh token expiry in seconds (default: 604800)
    /// - `JWT_LINK_TOKEN_EXPIRY`: Verify/reset token expiry in seconds (default: 86400)
    pub fn from_env() -> Result<Self> {
        Ok(JwtConfig {
            private_key: read_pem("JWT_PRIVATE_KEY")?,
            public_key: read_pem("JWT_PUBLIC_KEY")?,
            access_token_expiry: expiry_var("JWT_ACCESS_TOKEN_EXPIRY", 900),
            refresh_token_expiry: expiry_var("JWT_REFRESH_TOKEN_EXPIRY", 604_800),
            link_token_expiry: expiry_var("JWT_LINK_TOKEN_EXPIRY", 86_400),
        })
    }
}

/// Token type enum
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Access token
    Access,
    /// Refresh token
    Refresh,
    /// Signup verification link token
    Verify,
    /// Password reset link token
    Reset,
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Principal ID
    pub sub: Uuid,
    /// Whether `sub` is a user or an admin
    pub principal_kind: PrincipalKind,
    /// Contact the token was issued for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// OTP carried by verify/reset tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<u32>,
    /// Role held when the token was minted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    /// Issued at time
    pub iat: i64,
    /// Expiration time
    pub exp: i64,
    /// Token type
    pub token_type: TokenType,
    /// Unique token ID; keeps raw strings distinct within the same second
    pub jti: Uuid,
}

impl Claims {
    pub fn principal(&self) -> Principal {
        Principal::new(self.principal_kind, self.sub)
    }
}

/// A signed token and the instant it stops being valid
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Optional claims carried alongside the principal
#[derive(Debug, Clone, Default)]
pub struct ClaimExtras {
    pub email: Option<String>,
    pub otp: Option<u32>,
    pub role_name: Option<String>,
}

/// JWT service
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    config: JwtConfig,
}

impl JwtService {
    /// Initialize a new JWT service
    pub fn new(config: JwtConfig) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(config.private_key.as_bytes())?;
        let decoding_key = DecodingKey::from_rsa_pem(config.public_key.as_bytes())?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;

        Ok(JwtService {
            encoding_key,
            decoding_key,
            validation,
            config,
        })
    }

    fn sign(
        &self,
        principal: Principal,
        token_type: TokenType,
        lifetime_secs: u64,
        extras: ClaimExtras,
    ) -> jsonwebtoken::errors::Result<SignedToken> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(lifetime_secs as i64);

        let claims = Claims {
            sub: principal.id(),
            principal_kind: principal.kind(),
            email: extras.email,
            otp: extras.otp,
            role_name: extras.role_name,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            token_type,
            jti: Uuid::new_v4(),
        };

        let token = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)?;
        Ok(SignedToken { token, expires_at })
    }

    /// Generate an access token for a principal
    pub fn generate_access_token(
        &self,
        principal: Principal,
        email: Option<String>,
        role_name: Option<String>,
    ) -> jsonwebtoken::errors::Result<SignedToken> {
        self.sign(
            principal,
            TokenType::Access,
            self.config.access_token_expiry,
            ClaimExtras {
                email,
                otp: None,
                role_name,
            },
        )
    }

    /// Generate a refresh token for a principal
    pub fn generate_refresh_token(
        &self,
        principal: Principal,
    ) -> jsonwebtoken::errors::Result<SignedToken> {
        self.sign(
            principal,
            TokenType::Refresh,
            self.config.refresh_token_expiry,
            ClaimExtras::default(),
        )
    }

    /// Generate a verify or reset token embedding the contact and OTP
    pub fn generate_link_token(
        &self,
        principal: Principal,
        token_type: TokenType,
        email: String,
        otp: u32,
    ) -> jsonwebtoken::errors::Result<SignedToken> {
        self.sign(
            principal,
            token_type,
            self.config.link_token_expiry,
            ClaimExtras {
                email: Some(email),
                otp: Some(otp),
                role_name: None,
            },
        )
    }

    /// Validate a token and return the claims
    pub fn validate_token(&self, token: &str) -> jsonwebtoken::errors::Result<Claims> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(token_data.claims)
    }

    /// Get the access token expiry time
    pub fn access_token_expiry(&self) -> u64 {
        self.config.access_token_expiry
    }

    /// Get the refresh token expiry time
    pub fn refresh_token_expiry(&self) -> u64 {
        self.config.refresh_token_expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new(JwtConfig {
            private_key: include_str!("../tests/fixtures/jwt_private.pem").to_string(),
            public_key: include_str!("../tests/fixtures/jwt_public.pem").to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604_800,
            link_token_expiry: 86_400,
        })
        .expect("fixture keys load")
    }

    #[test]
    fn link_token_carries_email_and_otp() {
        let jwt = service();
        let principal = Principal::User(Uuid::new_v4());
        let signed = jwt
            .generate_link_token(principal, TokenType::Verify, "u@example.com".into(), 123456)
            .unwrap();

        let claims = jwt.validate_token(&signed.token).unwrap();
        assert_eq!(claims.principal(), principal);
        assert_eq!(claims.token_type, TokenType::Verify);
        assert_eq!(claims.email.as_deref(), Some("u@example.com"));
        assert_eq!(claims.otp, Some(123456));
    }

    #[test]
    fn tokens_minted_together_differ() {
        let jwt = service();
        let principal = Principal::Admin(Uuid::new_v4());
        let a = jwt.generate_refresh_token(principal).unwrap();
        let b = jwt.generate_refresh_token(principal).unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let jwt = service();
        let signed = jwt
            .generate_access_token(Principal::User(Uuid::new_v4()), None, Some("user".into()))
            .unwrap();
        let tampered = format!("{}x", signed.token);
        assert!(jwt.validate_token(&tampered).is_err());
    }
}
