//! Zello Free authentication tokens: short-lived RS256 JWTs minted from a
//! local private key.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;

use crate::constants::{AUTH_TOKEN_EXPIRY, AUTH_TOKEN_REFRESH_THRESHOLD};
use crate::internal::prelude::*;

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    exp: u64,
}

/// Mints development (Zello Free) tokens and tracks when the current one is
/// due for replacement.
pub struct TokenService {
    key_path: PathBuf,
    issuer: String,
    key: Option<EncodingKey>,
    expiry: Option<u64>,
}

impl TokenService {
    #[must_use]
    pub fn new(key_path: PathBuf, issuer: String) -> Self {
        Self {
            key_path,
            issuer,
            key: None,
            expiry: None,
        }
    }

    /// Signs a fresh token valid for [`AUTH_TOKEN_EXPIRY`]. The private key
    /// is read from disk once and cached.
    pub async fn mint(&mut self) -> Result<String> {
        if self.key.is_none() {
            let pem = tokio::fs::read(&self.key_path).await?;
            self.key = Some(EncodingKey::from_rsa_pem(&pem)?);
        }
        let key = self.key.as_ref().expect("key cached above");

        let exp = unix_now() + AUTH_TOKEN_EXPIRY.as_secs();
        let claims = Claims {
            iss: &self.issuer,
            exp,
        };

        let token = encode(&Header::new(Algorithm::RS256), &claims, key)?;
        self.expiry = Some(exp);

        Ok(token)
    }

    /// Whether the session should reauthenticate: true once the current
    /// token is within [`AUTH_TOKEN_REFRESH_THRESHOLD`] of expiry.
    #[must_use]
    pub fn needs_refresh(&self, now: u64) -> bool {
        self.expiry
            .is_some_and(|exp| exp.saturating_sub(now) <= AUTH_TOKEN_REFRESH_THRESHOLD.as_secs())
    }

    /// Records a refresh-token login; the server grants the same validity
    /// window as a minted token.
    pub fn note_refreshed(&mut self, now: u64) {
        self.expiry = Some(now + AUTH_TOKEN_EXPIRY.as_secs());
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::TokenService;

    #[test]
    fn needs_refresh_tracks_the_threshold() {
        let mut service = TokenService::new(PathBuf::from("/nonexistent"), String::new());
        assert!(!service.needs_refresh(1_000));

        service.expiry = Some(1_000 + 601);
        assert!(!service.needs_refresh(1_000));

        service.expiry = Some(1_000 + 600);
        assert!(service.needs_refresh(1_000));

        service.expiry = Some(500);
        assert!(service.needs_refresh(1_000));
    }

    #[test]
    fn refresh_login_extends_expiry() {
        let mut service = TokenService::new(PathBuf::from("/nonexistent"), String::new());
        service.expiry = Some(1_500);

        service.note_refreshed(1_000);
        assert_eq!(service.expiry, Some(1_000 + 3_600));
        assert!(!service.needs_refresh(1_000));
    }

    #[tokio::test]
    async fn mint_signs_with_a_real_key() {
        let key_path = PathBuf::from(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/resources/test_key.pem"
        ));
        let mut service = TokenService::new(key_path, "issuer".into());

        let token = service.mint().await.unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert!(service.expiry.is_some());

        let now = super::unix_now();
        assert!(!service.needs_refresh(now));
        assert!(service.needs_refresh(now + 3_100));
    }

    #[tokio::test]
    async fn mint_fails_cleanly_without_a_key() {
        let mut service = TokenService::new(PathBuf::from("/nonexistent.pem"), String::new());
        assert!(service.mint().await.is_err());
    }
}
