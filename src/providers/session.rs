//! OAuth implicit-flow session state for redirect-authenticated providers.
//!
//! The session is explicit: it is loaded from a file-backed [`TokenStore`]
//! when opened, populated from a redirect with [`PhotosSession::accept_redirect`],
//! promoted by [`PhotosSession::establish`], and torn down by
//! [`PhotosSession::logout`].

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::AuthError;

/// Access token as persisted on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredToken {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// JSON file holding at most one [`StoredToken`].
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the stored token. A missing file is `Ok(None)`.
    pub async fn load(&self) -> Result<Option<StoredToken>, AuthError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::TokenStore(e.to_string())),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| AuthError::TokenStore(format!("{}: {e}", self.path.display())))
    }

    pub async fn save(&self, token: &StoredToken) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| AuthError::TokenStore(e.to_string()))?;
            }
        }
        let json = serde_json::to_string_pretty(token)
            .map_err(|e| AuthError::TokenStore(e.to_string()))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| AuthError::TokenStore(e.to_string()))
    }

    /// Remove the stored token. Clearing an empty store is not an error.
    pub async fn clear(&self) -> Result<(), AuthError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::TokenStore(e.to_string())),
        }
    }
}

/// How [`PhotosSession::establish`] obtained its token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSource {
    /// Token delivered by a redirect since the last `establish`.
    Redirect,
    /// Token loaded from the store and still live.
    Cached,
}

struct ActiveToken {
    secret: SecretString,
    expires_at: DateTime<Utc>,
}

impl From<StoredToken> for ActiveToken {
    fn from(token: StoredToken) -> Self {
        Self {
            secret: SecretString::from(token.access_token),
            expires_at: token.expires_at,
        }
    }
}

impl ActiveToken {
    fn to_stored(&self) -> StoredToken {
        StoredToken {
            access_token: self.secret.expose_secret().to_string(),
            expires_at: self.expires_at,
        }
    }
}

#[derive(Default)]
struct SessionState {
    /// Live token used for requests.
    active: Option<ActiveToken>,
    /// Token parsed from a redirect, not yet promoted.
    pending: Option<ActiveToken>,
}

/// Process-wide session for one OAuth provider.
pub struct PhotosSession {
    provider: String,
    store: TokenStore,
    state: RwLock<SessionState>,
}

impl PhotosSession {
    /// Open a session, probing the store for a live token. An expired token
    /// is removed from the store.
    pub async fn open(provider: &str, store: TokenStore) -> Result<Self, AuthError> {
        let mut state = SessionState::default();
        match store.load().await? {
            Some(token) if token.is_live(Utc::now()) => {
                debug!(provider, expires_at = %token.expires_at, "Restored stored token");
                state.active = Some(token.into());
            }
            Some(_) => {
                debug!(provider, "Stored token expired");
                store.clear().await?;
            }
            None => {}
        }
        Ok(Self {
            provider: provider.to_string(),
            store,
            state: RwLock::new(state),
        })
    }

    /// Accept the URL (or bare fragment) the consent screen redirected to.
    /// The token becomes active on the next [`establish`](Self::establish).
    pub async fn accept_redirect(&self, redirect: &str) -> Result<(), AuthError> {
        let token = parse_redirect(&self.provider, redirect, Utc::now())?;
        self.state.write().await.pending = Some(token.into());
        debug!(provider = %self.provider, "Redirect token accepted");
        Ok(())
    }

    /// Resolve the session. A pending redirect token wins over a cached one
    /// and is persisted. Returns `None` when a new consent redirect is needed.
    pub async fn establish(&self) -> Result<Option<SessionSource>, AuthError> {
        let mut state = self.state.write().await;

        if let Some(token) = state.pending.take() {
            self.store.save(&token.to_stored()).await?;
            info!(provider = %self.provider, expires_at = %token.expires_at, "Session established from redirect");
            state.active = Some(token);
            return Ok(Some(SessionSource::Redirect));
        }

        let live = state.active.as_ref().map(|token| token.expires_at > Utc::now());
        match live {
            Some(true) => Ok(Some(SessionSource::Cached)),
            Some(false) => {
                info!(provider = %self.provider, "Session expired");
                state.active = None;
                self.store.clear().await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// The live access token, if any.
    pub async fn access_token(&self) -> Option<SecretString> {
        let state = self.state.read().await;
        state
            .active
            .as_ref()
            .filter(|token| token.expires_at > Utc::now())
            .map(|token| SecretString::from(token.secret.expose_secret().to_string()))
    }

    pub async fn is_authenticated(&self) -> bool {
        self.access_token().await.is_some()
    }

    /// Forget every token, in memory and on disk.
    pub async fn logout(&self) -> Result<(), AuthError> {
        {
            let mut state = self.state.write().await;
            state.active = None;
            state.pending = None;
        }
        if let Err(e) = self.store.clear().await {
            warn!(provider = %self.provider, error = %e, "Failed to clear token store");
            return Err(e);
        }
        info!(provider = %self.provider, "Logged out");
        Ok(())
    }
}

/// Parse `access_token` / `expires_in` out of an implicit-flow redirect.
///
/// Accepts a full URL, a `#fragment`, or the bare fragment.
pub fn parse_redirect(
    provider: &str,
    redirect: &str,
    now: DateTime<Utc>,
) -> Result<StoredToken, AuthError> {
    let redirect = redirect.trim();
    let fragment = match url::Url::parse(redirect) {
        Ok(url) => url
            .fragment()
            .map(str::to_string)
            .ok_or_else(|| AuthError::InvalidRedirect("URL has no fragment".into()))?,
        Err(_) => redirect.trim_start_matches('#').to_string(),
    };

    let mut access_token = None;
    let mut expires_in = None;
    for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
        match key.as_ref() {
            "access_token" => access_token = Some(value.into_owned()),
            "expires_in" => expires_in = Some(value.into_owned()),
            "error" => {
                return Err(AuthError::Rejected {
                    provider: provider.to_string(),
                    reason: value.into_owned(),
                });
            }
            _ => {}
        }
    }

    let access_token = access_token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AuthError::InvalidRedirect("missing access_token".into()))?;
    let expires_in: i64 = expires_in
        .ok_or_else(|| AuthError::InvalidRedirect("missing expires_in".into()))?
        .parse()
        .map_err(|_| AuthError::InvalidRedirect("expires_in is not a number".into()))?;

    let expires_at = Duration::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| AuthError::InvalidRedirect("expires_in is out of range".into()))?;

    Ok(StoredToken {
        access_token,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn parses_full_redirect_url() {
        let token = parse_redirect(
            "google-photos",
            "http://localhost:8080/oauth/callback#access_token=ya29.abc&token_type=Bearer&expires_in=3599",
            now(),
        )
        .unwrap();
        assert_eq!(token.access_token, "ya29.abc");
        assert_eq!(token.expires_at, now() + Duration::seconds(3599));
    }

    #[test]
    fn parses_bare_fragment() {
        let token = parse_redirect("google-photos", "#access_token=t1&expires_in=60", now()).unwrap();
        assert_eq!(token.access_token, "t1");
        let token = parse_redirect("google-photos", "access_token=t2&expires_in=60", now()).unwrap();
        assert_eq!(token.access_token, "t2");
    }

    #[test]
    fn rejects_incomplete_redirects() {
        for input in [
            "http://localhost:8080/oauth/callback",
            "#expires_in=60",
            "#access_token=t1",
            "#access_token=t1&expires_in=soon",
        ] {
            assert!(
                matches!(
                    parse_redirect("google-photos", input, now()),
                    Err(AuthError::InvalidRedirect(_))
                ),
                "accepted {input}"
            );
        }
    }

    #[test]
    fn consent_denied_is_rejected() {
        let err = parse_redirect("google-photos", "#error=access_denied", now()).unwrap_err();
        assert!(matches!(err, AuthError::Rejected { reason, .. } if reason == "access_denied"));
    }

    #[tokio::test]
    async fn token_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested/token.json"));
        assert_eq!(store.load().await.unwrap(), None);

        let token = StoredToken {
            access_token: "abc".into(),
            expires_at: now(),
        };
        store.save(&token).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(token));

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            TokenStore::new(path).load().await,
            Err(AuthError::TokenStore(_))
        ));
    }

    #[tokio::test]
    async fn fresh_session_needs_a_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let session = PhotosSession::open("google-photos", TokenStore::new(dir.path().join("t.json")))
            .await
            .unwrap();
        assert_eq!(session.establish().await.unwrap(), None);
        assert!(!session.is_authenticated().await);
    }

    #[tokio::test]
    async fn redirect_token_is_persisted_then_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");

        let session = PhotosSession::open("google-photos", TokenStore::new(&path)).await.unwrap();
        session
            .accept_redirect("#access_token=live&expires_in=3600")
            .await
            .unwrap();
        // Not active until established.
        assert!(!session.is_authenticated().await);
        assert_eq!(session.establish().await.unwrap(), Some(SessionSource::Redirect));
        assert_eq!(
            session.access_token().await.unwrap().expose_secret(),
            "live"
        );

        let reopened = PhotosSession::open("google-photos", TokenStore::new(&path)).await.unwrap();
        assert_eq!(reopened.establish().await.unwrap(), Some(SessionSource::Cached));
    }

    #[tokio::test]
    async fn expired_stored_token_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("t.json"));
        store
            .save(&StoredToken {
                access_token: "old".into(),
                expires_at: Utc::now() - Duration::seconds(5),
            })
            .await
            .unwrap();

        let session = PhotosSession::open("google-photos", store.clone()).await.unwrap();
        assert_eq!(session.establish().await.unwrap(), None);
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn logout_clears_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("t.json"));
        let session = PhotosSession::open("google-photos", store.clone()).await.unwrap();
        session
            .accept_redirect("#access_token=live&expires_in=3600")
            .await
            .unwrap();
        session.establish().await.unwrap();

        session.logout().await.unwrap();
        assert!(!session.is_authenticated().await);
        assert_eq!(store.load().await.unwrap(), None);
        assert_eq!(session.establish().await.unwrap(), None);
    }
}
