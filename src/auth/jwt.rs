use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::{config::JwtConfig, ids::PublicId};

/// Bearer token payload. `sub` is the user's public id; the internal key
/// never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: PublicId,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub jti: Uuid,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token could not be signed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    /// Malformed, badly signed, foreign or expired. Callers must not tell these apart.
    #[error("invalid token")]
    Invalid,
}

/// HS256 signing and verification keys derived from the server secret.
///
/// Signature checks go through `jsonwebtoken`'s HMAC verification, which
/// compares MACs in constant time.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&cfg.audience));
        validation.set_issuer(std::slice::from_ref(&cfg.issuer));
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        // Expiry is checked against our own clock in `verify_at`, with no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            validation,
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64) * 60),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, subject: &PublicId) -> Result<String, TokenError> {
        self.issue_at(subject, OffsetDateTime::now_utc())
    }

    /// Sign a token for `subject` valid from `now` until `now + ttl` (exclusive).
    pub fn issue_at(&self, subject: &PublicId, now: OffsetDateTime) -> Result<String, TokenError> {
        let exp = now + self.ttl;
        let claims = Claims {
            sub: subject.clone(),
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(subject = %subject, jti = %claims.jti, "token issued");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, OffsetDateTime::now_utc())
    }

    /// Valid iff the signature checks out and `now < exp`.
    pub fn verify_at(&self, token: &str, now: OffsetDateTime) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!(error = %e, "token rejected");
            TokenError::Invalid
        })?;
        if now.unix_timestamp() >= data.claims.exp {
            debug!(jti = %data.claims.jti, "token expired");
            return Err(TokenError::Invalid);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const B64URL: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

    fn make_keys(secret: &str, issuer: &str, audience: &str) -> JwtKeys {
        JwtKeys::new(&JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_minutes: 5,
        })
    }

    #[test]
    fn issue_then_verify_returns_subject() {
        let keys = make_keys("dev-secret", "test-issuer", "test-aud");
        let subject = PublicId::generate();
        let token = keys.issue(&subject).expect("issue");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.sub, subject);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp - claims.iat, 5 * 60);
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let issued = datetime!(2030-01-01 12:00 UTC);
        let token = keys.issue_at(&PublicId::generate(), issued).unwrap();
        let ttl = time::Duration::minutes(5);

        assert!(keys.verify_at(&token, issued).is_ok());
        assert!(keys.verify_at(&token, issued + ttl - time::Duration::seconds(1)).is_ok());
        assert!(matches!(
            keys.verify_at(&token, issued + ttl),
            Err(TokenError::Invalid)
        ));
        assert!(keys.verify_at(&token, issued + ttl + time::Duration::hours(1)).is_err());
    }

    #[test]
    fn flipping_any_signature_bit_invalidates() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let token = keys.issue(&PublicId::generate()).unwrap();
        let sig_start = token.rfind('.').unwrap() + 1;

        for pos in sig_start..token.len() {
            let original = token.as_bytes()[pos];
            let idx = B64URL.iter().position(|&c| c == original).unwrap();
            for bit in 0..6 {
                let mut bytes = token.clone().into_bytes();
                bytes[pos] = B64URL[idx ^ (1 << bit)];
                let forged = String::from_utf8(bytes).unwrap();
                assert!(
                    keys.verify(&forged).is_err(),
                    "bit {bit} at {pos} was accepted"
                );
            }
        }
    }

    #[test]
    fn rejects_other_secret_issuer_or_audience() {
        let good = make_keys("same-secret", "good-iss", "good-aud");
        let token = good.issue(&PublicId::generate()).unwrap();

        assert!(make_keys("other-secret", "good-iss", "good-aud").verify(&token).is_err());
        assert!(make_keys("same-secret", "bad-iss", "good-aud").verify(&token).is_err());
        assert!(make_keys("same-secret", "good-iss", "bad-aud").verify(&token).is_err());
    }

    #[test]
    fn rejects_garbage() {
        let keys = make_keys("dev-secret", "iss", "aud");
        assert!(keys.verify("").is_err());
        assert!(keys.verify("not.a.jwt").is_err());
        assert!(keys.verify("a.b").is_err());
    }

    #[test]
    fn every_token_gets_a_fresh_id() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let subject = PublicId::generate();
        let a = keys.verify(&keys.issue(&subject).unwrap()).unwrap();
        let b = keys.verify(&keys.issue(&subject).unwrap()).unwrap();
        assert_ne!(a.jti, b.jti);
    }
}
