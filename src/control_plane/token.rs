//! Bearer-token acquisition and caching.
//!
//! The cache is shared by every control-plane call in the process. Readers
//! take the last known good token; a single refresh runs at a time under the
//! refresh lock, and callers that queued behind it reuse its result instead
//! of fetching again.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::transport::{HttpMethod, HttpRequest, HttpTransport, RequestBody};
use super::ControlPlaneError;

const EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Client-credentials identity used to obtain bearer tokens.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServicePrincipal {
    /// Token authority base URL, e.g. `https://login.windows.net`.
    pub authority: String,
    /// Directory (tenant) identifier.
    pub tenant_id: String,
    /// Application (client) identifier.
    pub client_id: String,
    /// Application secret.
    pub client_secret: String,
    /// Resource the token is requested for.
    pub resource: String,
    /// API version passed to the token endpoint.
    pub api_version: String,
}

impl ServicePrincipal {
    fn token_uri(&self) -> String {
        format!(
            "{}/{}/oauth2/token?api-version={}",
            self.authority.trim_end_matches('/'),
            self.tenant_id,
            self.api_version
        )
    }
}

/// Bearer credential with its expiry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthToken {
    /// Opaque access token.
    pub access_token: String,
    /// Instant after which the token is no longer accepted.
    pub expires_at: SystemTime,
}

impl AuthToken {
    /// Whether the token is expired (or about to be) at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now + EXPIRY_SKEW >= self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_on: EpochSeconds,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EpochSeconds {
    Number(u64),
    Text(String),
}

impl EpochSeconds {
    fn to_system_time(&self) -> Result<SystemTime, ControlPlaneError> {
        let seconds = match self {
            Self::Number(value) => *value,
            Self::Text(text) => text.trim().parse().map_err(|_| ControlPlaneError::Decode {
                what: String::from("token expiry"),
                message: format!("'{text}' is not an epoch timestamp"),
            })?,
        };
        Ok(UNIX_EPOCH + Duration::from_secs(seconds))
    }
}

/// Process-wide bearer token cache.
#[derive(Debug)]
pub struct CredentialCache {
    principal: ServicePrincipal,
    token: RwLock<Option<AuthToken>>,
    refresh: Mutex<()>,
}

impl CredentialCache {
    /// Creates an empty cache; the first call acquires a token.
    #[must_use]
    pub fn new(principal: ServicePrincipal) -> Self {
        Self {
            principal,
            token: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Creates a cache pre-seeded with `token`.
    #[must_use]
    pub fn with_token(principal: ServicePrincipal, token: AuthToken) -> Self {
        Self {
            principal,
            token: RwLock::new(Some(token)),
            refresh: Mutex::new(()),
        }
    }

    /// Returns a valid bearer token, acquiring one when none is cached or
    /// the cached token has expired.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Authentication`] when the token endpoint
    /// rejects the credentials and [`ControlPlaneError::Transport`] for any
    /// other non-2xx status.
    pub async fn bearer<T: HttpTransport + ?Sized>(
        &self,
        transport: &T,
    ) -> Result<String, ControlPlaneError> {
        if let Some(token) = self.valid_token().await {
            return Ok(token);
        }

        let _guard = self.refresh.lock().await;
        if let Some(token) = self.valid_token().await {
            return Ok(token);
        }
        self.acquire(transport).await
    }

    /// Replaces a token the remote side rejected.
    ///
    /// When another caller has already swapped `rejected` for a newer token
    /// that one is returned without contacting the token endpoint.
    ///
    /// # Errors
    ///
    /// Same as [`CredentialCache::bearer`].
    pub async fn refresh_after_rejection<T: HttpTransport + ?Sized>(
        &self,
        transport: &T,
        rejected: &str,
    ) -> Result<String, ControlPlaneError> {
        let _guard = self.refresh.lock().await;
        if let Some(token) = self.valid_token().await
            && token != rejected
        {
            return Ok(token);
        }
        self.acquire(transport).await
    }

    async fn valid_token(&self) -> Option<String> {
        let now = SystemTime::now();
        self.token
            .read()
            .await
            .as_ref()
            .filter(|token| !token.is_expired_at(now))
            .map(|token| token.access_token.clone())
    }

    async fn acquire<T: HttpTransport + ?Sized>(
        &self,
        transport: &T,
    ) -> Result<String, ControlPlaneError> {
        debug!(tenant = %self.principal.tenant_id, "requesting access token");
        let request = HttpRequest {
            method: HttpMethod::Post,
            url: self.principal.token_uri(),
            bearer: None,
            body: RequestBody::Form(vec![
                (String::from("grant_type"), String::from("client_credentials")),
                (String::from("client_id"), self.principal.client_id.clone()),
                (
                    String::from("client_secret"),
                    self.principal.client_secret.clone(),
                ),
                (String::from("resource"), self.principal.resource.clone()),
                (String::from("scope"), String::from("user_impersonation")),
            ]),
        };

        let response = transport.send(request).await?;
        if response.status == 401 {
            return Err(ControlPlaneError::Authentication {
                message: String::from("invalid credentials"),
            });
        }
        if !response.is_success() {
            return Err(ControlPlaneError::Transport {
                status: response.status,
                context: String::from("get_token"),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&response.body)
            .map_err(|err| ControlPlaneError::decode("token response", &err))?;
        let token = AuthToken {
            expires_at: parsed.expires_on.to_system_time()?,
            access_token: parsed.access_token,
        };
        let access_token = token.access_token.clone();
        *self.token.write().await = Some(token);
        info!(tenant = %self.principal.tenant_id, "access token refreshed");
        Ok(access_token)
    }
}
