//! OAuth2 credential lifecycle for Google Drive.
//!
//! [`TokenStore`] owns the single [`Credential`] of the connected account: it
//! builds the consent URL, exchanges the authorization code, refreshes the
//! access token shortly before it expires and persists every change through
//! a [`SettingsStore`].

use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicErrorResponse, BasicTokenResponse};
use oauth2::{AuthUrl, ClientId, ClientSecret, RedirectUrl, TokenResponse, TokenUrl};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use drivemedia_common::AuthError;

use crate::settings::{Settings, SettingsStore};

/// OAuth2 authorization endpoint.
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// OAuth2 token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Google Drive API base URL.
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Redirect URL served by the local callback server.
pub const DEFAULT_REDIRECT_URL: &str = "http://localhost:8080/callback";

/// Read-only Drive scope.
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Refresh this long before the recorded expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// OAuth2 credential of the connected account.
///
/// Token strings are wiped from memory when the credential is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    access_token: String,
    refresh_token: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    #[zeroize(skip)]
    expires_at: DateTime<Utc>,
}

impl Credential {
    /// Create a credential from its three parts.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// When the access token expires.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// The long-lived refresh token.
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Whether both tokens are present.
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }

    /// Whether the access token is within the refresh margin at `now`.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// OAuth2 client registration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client id issued by the Google Cloud console.
    pub client_id: ClientId,
    /// Client secret issued with the client id.
    pub client_secret: ClientSecret,
    /// Redirect URL registered for the client.
    pub redirect_uri: RedirectUrl,
}

impl ClientConfig {
    /// Build a client configuration.
    ///
    /// # Errors
    /// - `redirect_uri` is not an absolute URL
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let redirect_uri = RedirectUrl::new(redirect_uri.into())
            .map_err(|e| AuthError::InvalidConfig(format!("invalid redirect URL: {}", e)))?;

        Ok(Self {
            client_id: ClientId::new(client_id.into()),
            client_secret: ClientSecret::new(client_secret.into()),
            redirect_uri,
        })
    }

    /// Build from persisted settings.
    pub fn from_settings(settings: &Settings, redirect_uri: &str) -> Result<Self, AuthError> {
        Self::new(
            settings.client_id.clone(),
            settings.client_secret.clone(),
            redirect_uri,
        )
    }

    /// True iff both client id and secret are non-empty.
    pub fn is_configured(&self) -> bool {
        !self.client_id.as_str().is_empty() && !self.client_secret.secret().is_empty()
    }
}

/// Provider endpoints.
///
/// Defaults to Google's production URLs; tests point these at a local server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoints {
    /// Consent page.
    pub auth_url: String,
    /// Token exchange and refresh.
    pub token_url: String,
    /// Drive v3 API root.
    pub api_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            api_base: DRIVE_API_BASE.to_string(),
        }
    }
}

impl Endpoints {
    /// Endpoints rooted at a single base URL, laid out like Google's.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            auth_url: format!("{}/o/oauth2/v2/auth", base),
            token_url: format!("{}/token", base),
            api_base: format!("{}/drive/v3", base),
        }
    }
}

/// Owner of the OAuth credential.
///
/// The credential sits behind an async `RwLock`. A refresh holds the write
/// lock and re-checks expiry after acquiring it, so callers racing on an
/// expiring token produce exactly one refresh request.
pub struct TokenStore {
    config: ClientConfig,
    auth_url: AuthUrl,
    token_url: TokenUrl,
    http: reqwest::Client,
    settings: Arc<dyn SettingsStore>,
    credential: RwLock<Option<Credential>>,
}

impl TokenStore {
    /// Create a token store.
    ///
    /// A credential missing either token is treated as absent.
    ///
    /// # Errors
    /// - Endpoint URLs are malformed
    pub fn new(
        config: ClientConfig,
        endpoints: &Endpoints,
        settings: Arc<dyn SettingsStore>,
        credential: Option<Credential>,
        http: reqwest::Client,
    ) -> Result<Self, AuthError> {
        let auth_url = AuthUrl::new(endpoints.auth_url.clone())
            .map_err(|e| AuthError::InvalidConfig(format!("invalid auth URL: {}", e)))?;
        let token_url = TokenUrl::new(endpoints.token_url.clone())
            .map_err(|e| AuthError::InvalidConfig(format!("invalid token URL: {}", e)))?;

        let credential = credential.filter(|c| {
            if !c.is_complete() {
                warn!("Ignoring stored credential without access or refresh token");
            }
            c.is_complete()
        });

        Ok(Self {
            config,
            auth_url,
            token_url,
            http,
            settings,
            credential: RwLock::new(credential),
        })
    }

    /// Load client configuration and credential from `settings`.
    pub async fn open(
        settings: Arc<dyn SettingsStore>,
        redirect_uri: &str,
        endpoints: &Endpoints,
        http: reqwest::Client,
    ) -> Result<Self, AuthError> {
        let stored = settings.load().await?;
        let config = ClientConfig::from_settings(&stored, redirect_uri)?;
        let credential = stored.credential.clone();

        Self::new(config, endpoints, settings, credential, http)
    }

    /// The client configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// True iff client id and secret are both set.
    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// True iff configured and a refresh token is stored.
    pub async fn is_connected(&self) -> bool {
        self.is_configured()
            && self
                .credential
                .read()
                .await
                .as_ref()
                .is_some_and(Credential::is_complete)
    }

    /// Expiry of the stored access token, if connected.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.credential.read().await.as_ref().map(|c| c.expires_at)
    }

    /// Consent URL requesting offline, read-only access with forced consent.
    ///
    /// The URL is a pure function of the configuration.
    pub fn authorization_url(&self) -> Url {
        self.build_authorization_url(None)
    }

    /// Consent URL carrying an opaque `state` echoed back to the callback.
    pub fn authorization_url_with_state(&self, state: &str) -> Url {
        self.build_authorization_url(Some(state))
    }

    fn build_authorization_url(&self, state: Option<&str>) -> Url {
        let mut url = self.auth_url.url().clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", self.config.client_id.as_str())
                .append_pair("redirect_uri", self.config.redirect_uri.url().as_str())
                .append_pair("response_type", "code")
                .append_pair("scope", DRIVE_SCOPE)
                .append_pair("access_type", "offline")
                .append_pair("prompt", "consent");
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }
        url
    }

    /// Exchange an authorization code and persist the resulting credential.
    ///
    /// # Errors
    /// - `NotConfigured` without client credentials; no request is made
    /// - `ExchangeFailed` on transport errors, error responses, or a response
    ///   without access or refresh token
    /// - `Store` if the credential cannot be persisted
    pub async fn complete_authorization(&self, code: &str) -> Result<(), AuthError> {
        self.ensure_configured()?;

        let response = self
            .request_token(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.secret().as_str()),
                ("redirect_uri", self.config.redirect_uri.url().as_str()),
                ("grant_type", "authorization_code"),
            ])
            .await
            .map_err(AuthError::ExchangeFailed)?;

        let access_token = response.access_token().secret();
        if access_token.is_empty() {
            return Err(AuthError::ExchangeFailed(
                "token response carried an empty access_token".to_string(),
            ));
        }

        let refresh_token = response
            .refresh_token()
            .map(|t| t.secret().as_str())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AuthError::ExchangeFailed(
                    "no refresh_token received; offline access with consent prompt is required"
                        .to_string(),
                )
            })?;

        let credential = Credential::new(
            access_token.as_str(),
            refresh_token,
            expiry_after(response.expires_in()),
        );

        let mut slot = self.credential.write().await;
        self.settings.save_credential(Some(&credential)).await?;
        *slot = Some(credential);

        info!("Connected to Google Drive");
        Ok(())
    }

    /// Forget the stored credential. Safe to call when not connected.
    pub async fn disconnect(&self) -> Result<(), AuthError> {
        let mut slot = self.credential.write().await;
        self.settings.save_credential(None).await?;
        let was_connected = slot.take().is_some();

        if was_connected {
            info!("Disconnected from Google Drive");
        }
        Ok(())
    }

    /// A valid access token, refreshing it first when it is about to expire.
    ///
    /// A failed refresh leaves the stored credential as it was; the next call
    /// tries again.
    ///
    /// # Errors
    /// - `NotConfigured` / `NotConnected` before any request is made
    /// - `RefreshFailed` if the refresh request fails
    pub async fn access_token(&self) -> Result<String, AuthError> {
        self.ensure_configured()?;

        {
            let slot = self.credential.read().await;
            let credential = slot.as_ref().ok_or(AuthError::NotConnected)?;
            if !credential.needs_refresh(Utc::now()) {
                return Ok(credential.access_token.clone());
            }
        }

        let mut slot = self.credential.write().await;
        let credential = slot.as_mut().ok_or(AuthError::NotConnected)?;

        // Another caller may have refreshed while we waited for the lock.
        if !credential.needs_refresh(Utc::now()) {
            return Ok(credential.access_token.clone());
        }

        debug!(expires_at = %credential.expires_at, "Refreshing access token");

        let response = self
            .request_token(&[
                ("refresh_token", credential.refresh_token.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.secret().as_str()),
                ("grant_type", "refresh_token"),
            ])
            .await
            .map_err(|e| {
                warn!("Access token refresh failed: {}", e);
                AuthError::RefreshFailed(e)
            })?;

        let access_token = response.access_token().secret();
        if access_token.is_empty() {
            return Err(AuthError::RefreshFailed(
                "token response carried an empty access_token".to_string(),
            ));
        }

        credential.access_token.zeroize();
        credential.access_token = access_token.clone();
        credential.expires_at = expiry_after(response.expires_in());

        if let Err(e) = self.settings.save_credential(Some(&*credential)).await {
            warn!("Refreshed access token could not be persisted: {}", e);
        }

        info!(expires_at = %credential.expires_at, "Refreshed access token");
        Ok(credential.access_token.clone())
    }

    fn ensure_configured(&self) -> Result<(), AuthError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(AuthError::NotConfigured)
        }
    }

    /// POST a form to the token endpoint and parse the token response.
    async fn request_token(&self, form: &[(&str, &str)]) -> Result<BasicTokenResponse, String> {
        let response = self
            .http
            .post(self.token_url.url().as_str())
            .form(form)
            .send()
            .await
            .map_err(|e| format!("token request failed: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read token response: {}", e))?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<BasicErrorResponse>(&body) {
                Ok(err) => match err.error_description() {
                    Some(description) => format!("{} ({}): {}", err.error(), status, description),
                    None => format!("{} ({})", err.error(), status),
                },
                Err(_) => format!("token endpoint returned {}", status),
            });
        }

        serde_json::from_str(&body).map_err(|e| format!("unexpected token response: {}", e))
    }
}

fn expiry_after(expires_in: Option<std::time::Duration>) -> DateTime<Utc> {
    let lifetime = expires_in
        .and_then(|d| Duration::from_std(d).ok())
        .unwrap_or_else(|| Duration::seconds(DEFAULT_EXPIRES_IN_SECS));
    Utc::now() + lifetime
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemoryStore;
    use async_trait::async_trait;
    use drivemedia_common::StoreError;
    use mockito::{Matcher, Server};

    /// Settings store whose writes always fail.
    struct ReadOnlyStore(Settings);

    #[async_trait]
    impl SettingsStore for ReadOnlyStore {
        async fn load(&self) -> Result<Settings, StoreError> {
            Ok(self.0.clone())
        }

        async fn save(&self, _settings: &Settings) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::new("test_id", "test_secret", DEFAULT_REDIRECT_URL).unwrap()
    }

    fn token_store(
        server_url: &str,
        credential: Option<Credential>,
    ) -> (TokenStore, Arc<MemoryStore>) {
        let settings = Arc::new(MemoryStore::default());
        let store = TokenStore::new(
            config(),
            &Endpoints::with_base(server_url),
            settings.clone(),
            credential,
            reqwest::Client::new(),
        )
        .unwrap();
        (store, settings)
    }

    fn fresh() -> Credential {
        Credential::new("access-1", "refresh-1", Utc::now() + Duration::hours(1))
    }

    fn expiring() -> Credential {
        Credential::new("access-1", "refresh-1", Utc::now() + Duration::seconds(30))
    }

    #[test]
    fn test_needs_refresh_margin() {
        let now = Utc::now();
        assert!(Credential::new("a", "r", now - Duration::hours(1)).needs_refresh(now));
        assert!(Credential::new("a", "r", now + Duration::seconds(60)).needs_refresh(now));
        assert!(!Credential::new("a", "r", now + Duration::seconds(61)).needs_refresh(now));
    }

    #[test]
    fn test_is_configured() {
        assert!(config().is_configured());
        assert!(!ClientConfig::new("", "secret", DEFAULT_REDIRECT_URL)
            .unwrap()
            .is_configured());
        assert!(!ClientConfig::new("id", "", DEFAULT_REDIRECT_URL)
            .unwrap()
            .is_configured());
        assert!(ClientConfig::new("id", "secret", "not a url").is_err());
    }

    #[test]
    fn test_authorization_url_generation() {
        let (store, _) = token_store("http://127.0.0.1:1", None);
        let url = store.authorization_url();

        assert_eq!(url.path(), "/o/oauth2/v2/auth");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("client_id"), Some("test_id"));
        assert_eq!(get("redirect_uri"), Some(DEFAULT_REDIRECT_URL));
        assert_eq!(get("response_type"), Some("code"));
        assert_eq!(get("scope"), Some(DRIVE_SCOPE));
        assert_eq!(get("access_type"), Some("offline"));
        assert_eq!(get("prompt"), Some("consent"));
        assert_eq!(get("state"), None);

        assert_eq!(store.authorization_url(), url);
    }

    #[test]
    fn test_authorization_url_with_state() {
        let (store, _) = token_store("http://127.0.0.1:1", None);
        let url = store.authorization_url_with_state("xyz");
        assert!(url.query_pairs().any(|(k, v)| k == "state" && v == "xyz"));
    }

    #[tokio::test]
    async fn test_complete_authorization_connects_and_persists() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "auth-code".into()),
                Matcher::UrlEncoded("client_id".into(), "test_id".into()),
                Matcher::UrlEncoded("client_secret".into(), "test_secret".into()),
                Matcher::UrlEncoded("redirect_uri".into(), DEFAULT_REDIRECT_URL.into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"at","refresh_token":"rt","expires_in":3599,"token_type":"Bearer","scope":"https://www.googleapis.com/auth/drive.readonly"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let (store, settings) = token_store(&server.url(), None);
        assert!(!store.is_connected().await);

        store.complete_authorization("auth-code").await.unwrap();

        mock.assert_async().await;
        assert!(store.is_connected().await);
        assert_eq!(store.access_token().await.unwrap(), "at");

        let persisted = settings.snapshot().await.credential.unwrap();
        assert_eq!(persisted.refresh_token(), "rt");
        let remaining = persisted.expires_at() - Utc::now();
        assert!(remaining > Duration::seconds(3500) && remaining <= Duration::seconds(3599));
    }

    #[tokio::test]
    async fn test_exchange_without_access_token_fails() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"refresh_token":"rt","token_type":"Bearer"}"#)
            .create_async()
            .await;

        let (store, settings) = token_store(&server.url(), None);
        let err = store.complete_authorization("code").await.unwrap_err();

        assert!(matches!(err, AuthError::ExchangeFailed(_)));
        assert!(!store.is_connected().await);
        assert_eq!(settings.save_count(), 0);
    }

    #[tokio::test]
    async fn test_exchange_without_refresh_token_fails() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at","expires_in":3600,"token_type":"Bearer"}"#)
            .create_async()
            .await;

        let (store, _) = token_store(&server.url(), None);
        let err = store.complete_authorization("code").await.unwrap_err();

        assert!(matches!(err, AuthError::ExchangeFailed(_)));
        assert!(!store.is_connected().await);
    }

    #[tokio::test]
    async fn test_exchange_error_response_is_reported() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"Bad Request"}"#)
            .create_async()
            .await;

        let (store, _) = token_store(&server.url(), None);
        match store.complete_authorization("used-code").await {
            Err(AuthError::ExchangeFailed(msg)) => assert!(msg.contains("invalid_grant")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exchange_transport_error() {
        let (store, _) = token_store("http://127.0.0.1:1", None);
        let err = store.complete_authorization("code").await.unwrap_err();
        assert!(matches!(err, AuthError::ExchangeFailed(_)));
    }

    #[tokio::test]
    async fn test_unconfigured_store_makes_no_requests() {
        let mut server = Server::new_async().await;
        let mock = server.mock("POST", "/token").expect(0).create_async().await;

        let store = TokenStore::new(
            ClientConfig::new("", "", DEFAULT_REDIRECT_URL).unwrap(),
            &Endpoints::with_base(&server.url()),
            Arc::new(MemoryStore::default()),
            Some(expiring()),
            reqwest::Client::new(),
        )
        .unwrap();

        assert!(!store.is_connected().await);
        assert!(matches!(
            store.complete_authorization("code").await,
            Err(AuthError::NotConfigured)
        ));
        assert!(matches!(
            store.access_token().await,
            Err(AuthError::NotConfigured)
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fresh_token_is_returned_without_refresh() {
        let mut server = Server::new_async().await;
        let mock = server.mock("POST", "/token").expect(0).create_async().await;

        let (store, settings) = token_store(&server.url(), Some(fresh()));
        assert_eq!(store.access_token().await.unwrap(), "access-1");
        assert_eq!(store.access_token().await.unwrap(), "access-1");

        mock.assert_async().await;
        assert_eq!(settings.save_count(), 0);
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_once() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "refresh-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"access-2","refresh_token":"rotated","expires_in":3600,"token_type":"Bearer"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let (store, settings) = token_store(&server.url(), Some(expiring()));
        let before = store.expires_at().await.unwrap();

        assert_eq!(store.access_token().await.unwrap(), "access-2");
        assert_eq!(store.access_token().await.unwrap(), "access-2");
        mock.assert_async().await;

        assert!(store.expires_at().await.unwrap() > before);
        let persisted = settings.snapshot().await.credential.unwrap();
        assert_eq!(persisted.refresh_token(), "refresh-1");
        assert!(persisted.expires_at() > before);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"access-2","expires_in":3600,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let (store, _) = token_store(&server.url(), Some(expiring()));
        let (a, b, c) = tokio::join!(
            store.access_token(),
            store.access_token(),
            store.access_token()
        );

        assert_eq!(a.unwrap(), "access-2");
        assert_eq!(b.unwrap(), "access-2");
        assert_eq!(c.unwrap(), "access-2");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_credential_and_retries_next_call() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant"}"#)
            .expect(2)
            .create_async()
            .await;

        let original = expiring();
        let (store, settings) = token_store(&server.url(), Some(original.clone()));

        assert!(matches!(
            store.access_token().await,
            Err(AuthError::RefreshFailed(_))
        ));
        assert!(store.is_connected().await);
        assert_eq!(store.expires_at().await, Some(original.expires_at()));

        assert!(matches!(
            store.access_token().await,
            Err(AuthError::RefreshFailed(_))
        ));
        mock.assert_async().await;
        assert_eq!(settings.save_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_without_access_token_fails() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"expires_in":3600,"token_type":"Bearer"}"#)
            .create_async()
            .await;

        let (store, _) = token_store(&server.url(), Some(expiring()));
        assert!(matches!(
            store.access_token().await,
            Err(AuthError::RefreshFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (store, settings) = token_store("http://127.0.0.1:1", Some(fresh()));
        assert!(store.is_connected().await);

        store.disconnect().await.unwrap();
        assert!(!store.is_connected().await);
        assert!(matches!(
            store.access_token().await,
            Err(AuthError::NotConnected)
        ));
        assert!(settings.snapshot().await.credential.is_none());

        store.disconnect().await.unwrap();
        assert!(!store.is_connected().await);
    }

    #[tokio::test]
    async fn test_partial_credential_counts_as_absent() {
        let now = Utc::now() + Duration::hours(1);
        for partial in [
            Credential::new("access-1", "", now),
            Credential::new("", "refresh-1", now),
        ] {
            let (store, _) = token_store("http://127.0.0.1:1", Some(partial));
            assert!(!store.is_connected().await);
            assert!(store.expires_at().await.is_none());
            assert!(matches!(
                store.access_token().await,
                Err(AuthError::NotConnected)
            ));
        }
    }

    #[tokio::test]
    async fn test_open_ignores_partial_stored_credential() {
        let settings = Arc::new(MemoryStore::new(Settings {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            credential: Some(Credential::new(
                "access-1",
                "",
                Utc::now() + Duration::hours(1),
            )),
            ..Settings::default()
        }));

        let store = TokenStore::open(
            settings,
            DEFAULT_REDIRECT_URL,
            &Endpoints::default(),
            reqwest::Client::new(),
        )
        .await
        .unwrap();

        assert!(store.is_configured());
        assert!(!store.is_connected().await);
    }

    #[tokio::test]
    async fn test_failed_disconnect_keeps_credential() {
        let store = TokenStore::new(
            config(),
            &Endpoints::with_base("http://127.0.0.1:1"),
            Arc::new(ReadOnlyStore(Settings::default())),
            Some(fresh()),
            reqwest::Client::new(),
        )
        .unwrap();

        let err = store.disconnect().await.unwrap_err();
        assert!(matches!(err, AuthError::Store(_)));
        assert!(store.is_connected().await);
        assert_eq!(store.access_token().await.unwrap(), "access-1");
    }

    #[tokio::test]
    async fn test_open_loads_persisted_state() {
        let settings = Arc::new(MemoryStore::new(Settings {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            credential: Some(fresh()),
            ..Settings::default()
        }));

        let store = TokenStore::open(
            settings,
            DEFAULT_REDIRECT_URL,
            &Endpoints::default(),
            reqwest::Client::new(),
        )
        .await
        .unwrap();

        assert!(store.is_configured());
        assert!(store.is_connected().await);
        assert_eq!(store.access_token().await.unwrap(), "access-1");
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let rendered = format!("{:?}", fresh());
        assert!(!rendered.contains("access-1"));
        assert!(!rendered.contains("refresh-1"));
    }
}
