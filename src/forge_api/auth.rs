//! Installation-scoped credential minting.
//!
//! App credentials sign a short-lived JWT which is exchanged for an
//! installation token; tokens are cached per installation and refreshed when
//! under five minutes of validity remain. A long-lived personal token is the
//! fallback when app credentials are absent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::{GuardError, Result};

const REFRESH_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at - Utc::now() > Duration::minutes(REFRESH_MARGIN_MINUTES)
    }
}

pub struct CredentialBroker {
    app_id: Option<String>,
    private_key: Option<String>,
    fallback_token: Option<String>,
    base_url: String,
    http: reqwest::Client,
    cache: Mutex<HashMap<u64, CachedToken>>,
    /// Per-installation refresh locks so a miss mints exactly once.
    refresh_locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl CredentialBroker {
    pub fn new(
        app_id: Option<String>,
        private_key: Option<String>,
        fallback_token: Option<String>,
    ) -> Self {
        Self::with_base_url(app_id, private_key, fallback_token, "https://api.github.com")
    }

    pub fn with_base_url(
        app_id: Option<String>,
        private_key: Option<String>,
        fallback_token: Option<String>,
        base_url: &str,
    ) -> Self {
        Self {
            app_id,
            private_key,
            fallback_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    fn has_app_credentials(&self) -> bool {
        self.app_id.is_some() && self.private_key.is_some()
    }

    /// A bearer token for the given installation. Without an installation id
    /// (or without app credentials) the fallback token is returned; with
    /// neither available this is `AuthUnconfigured`.
    pub async fn token(&self, installation_id: Option<u64>) -> Result<String> {
        match installation_id {
            Some(id) if self.has_app_credentials() => self.installation_token(id).await,
            _ => self
                .fallback_token
                .clone()
                .ok_or(GuardError::AuthUnconfigured),
        }
    }

    async fn installation_token(&self, installation_id: u64) -> Result<String> {
        if let Some(cached) = self.cache.lock().await.get(&installation_id) {
            if cached.is_fresh() {
                return Ok(cached.token.clone());
            }
        }

        let lock = {
            let mut locks = self.refresh_locks.lock().await;
            Arc::clone(locks.entry(installation_id).or_default())
        };
        let _guard = lock.lock().await;

        // Another waiter may have refreshed while we queued on the lock.
        if let Some(cached) = self.cache.lock().await.get(&installation_id) {
            if cached.is_fresh() {
                return Ok(cached.token.clone());
            }
        }

        let minted = self.mint(installation_id).await?;
        debug!(
            installation_id,
            expires_at = %minted.expires_at,
            "minted installation token"
        );
        let token = minted.token.clone();
        self.cache.lock().await.insert(installation_id, minted);
        Ok(token)
    }

    async fn mint(&self, installation_id: u64) -> Result<CachedToken> {
        let jwt = self.app_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.base_url, installation_id
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "codeguard")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GuardError::from_status(status.as_u16(), body));
        }

        let parsed: InstallationTokenResponse = response
            .json()
            .await
            .map_err(|e| GuardError::Upstream(format!("bad token response: {}", e)))?;
        Ok(CachedToken {
            token: parsed.token,
            expires_at: parsed.expires_at,
        })
    }

    /// RS256 app JWT: issued a minute in the past to absorb clock skew,
    /// valid nine minutes.
    fn app_jwt(&self) -> Result<String> {
        let (app_id, key_pem) = match (&self.app_id, &self.private_key) {
            (Some(id), Some(key)) => (id, key),
            _ => return Err(GuardError::AuthUnconfigured),
        };
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - 60,
            exp: now + 540,
            iss: app_id.clone(),
        };
        let key = EncodingKey::from_rsa_pem(key_pem.as_bytes())
            .map_err(|e| GuardError::Unauthorized(format!("invalid app signing key: {}", e)))?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| GuardError::Unauthorized(format!("failed to sign app JWT: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_broker_fails_fast() {
        let broker = CredentialBroker::new(None, None, None);
        let err = broker.token(Some(42)).await.unwrap_err();
        assert!(matches!(err, GuardError::AuthUnconfigured));
        let err = broker.token(None).await.unwrap_err();
        assert!(matches!(err, GuardError::AuthUnconfigured));
    }

    #[tokio::test]
    async fn fallback_token_used_without_app_credentials() {
        let broker = CredentialBroker::new(None, None, Some("ghp_fallback".into()));
        assert_eq!(broker.token(Some(42)).await.unwrap(), "ghp_fallback");
        assert_eq!(broker.token(None).await.unwrap(), "ghp_fallback");
    }

    #[tokio::test]
    async fn app_jwt_requires_valid_pem() {
        let broker = CredentialBroker::new(
            Some("1234".into()),
            Some("not a pem".into()),
            Some("ghp_fallback".into()),
        );
        // App credentials present, so the installation path is taken and the
        // bogus key surfaces as Unauthorized rather than silently falling back.
        let err = broker.token(Some(42)).await.unwrap_err();
        assert!(matches!(err, GuardError::Unauthorized(_)));
    }

    #[test]
    fn freshness_margin_is_five_minutes() {
        let fresh = CachedToken {
            token: "t".into(),
            expires_at: Utc::now() + Duration::minutes(30),
        };
        assert!(fresh.is_fresh());
        let stale = CachedToken {
            token: "t".into(),
            expires_at: Utc::now() + Duration::minutes(4),
        };
        assert!(!stale.is_fresh());
    }
}
