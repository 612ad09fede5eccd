//! Google Photos provider — pages through the user's media library with an
//! implicit-flow OAuth token held in a [`PhotosSession`].

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::session::{PhotosSession, SessionSource, TokenStore};
use super::{CardProvider, fetch_error};
use crate::cards::model::{Card, CardPayload};
use crate::config::GooglePhotosConfig;
use crate::error::{AuthError, CommitError, FetchError};

const PROVIDER: &str = "google-photos";

/// One media item from the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoItem {
    pub id: String,
    /// Base URL of the image bytes. Short-lived, per the Photos API.
    pub url: String,
    pub filename: String,
    pub mime_type: String,
    pub creation_time: Option<DateTime<Utc>>,
    pub width: u32,
    pub height: u32,
}

impl CardPayload for PhotoItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> Option<&str> {
        Some("photo")
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.creation_time
    }

    fn describe(&self) -> String {
        format!("{} ({}x{})", self.filename, self.width, self.height)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaItemsResponse {
    #[serde(default)]
    media_items: Vec<MediaItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaItem {
    id: String,
    base_url: String,
    filename: String,
    mime_type: String,
    #[serde(default)]
    media_metadata: MediaMetadata,
}

/// Width and height arrive as decimal strings.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaMetadata {
    creation_time: Option<DateTime<Utc>>,
    width: Option<String>,
    height: Option<String>,
}

impl From<MediaItem> for PhotoItem {
    fn from(item: MediaItem) -> Self {
        let dimension = |value: Option<String>| value.and_then(|v| v.parse().ok()).unwrap_or(0);
        Self {
            id: item.id,
            url: item.base_url,
            filename: item.filename,
            mime_type: item.mime_type,
            creation_time: item.media_metadata.creation_time,
            width: dimension(item.media_metadata.width),
            height: dimension(item.media_metadata.height),
        }
    }
}

/// Library cursor.
///
/// A page without a next token is the end of the library for now. The cursor
/// then stays on that page and re-reads it on later fetches, handing out only
/// items it has not seen yet; `tail` holds the ids already handed out from it.
#[derive(Debug, Default)]
struct Paging {
    page_token: Option<String>,
    tail: Option<HashSet<String>>,
}

pub struct GooglePhotosProvider {
    config: GooglePhotosConfig,
    client: reqwest::Client,
    session: Arc<PhotosSession>,
    paging: Mutex<Paging>,
}

impl GooglePhotosProvider {
    /// Build the provider and open its session from the configured token file.
    pub async fn new(config: GooglePhotosConfig) -> Result<Self, AuthError> {
        let store = TokenStore::new(config.token_path.clone());
        let session = PhotosSession::open(PROVIDER, store).await?;
        Self::with_session(config, Arc::new(session))
    }

    pub fn with_session(config: GooglePhotosConfig, session: Arc<PhotosSession>) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AuthError::Http(e.to_string()))?;
        Ok(Self {
            config,
            client,
            session,
            paging: Mutex::new(Paging::default()),
        })
    }

    pub fn session(&self) -> &Arc<PhotosSession> {
        &self.session
    }

    /// The consent-screen URL the user must visit to grant access.
    pub fn consent_url(&self) -> Result<String, AuthError> {
        let url = url::Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_id", self.config.client_id.expose_secret()),
                ("scope", self.config.scope.as_str()),
                ("response_type", "token"),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ],
        )
        .map_err(|e| AuthError::InvalidRedirect(format!("bad auth_url: {e}")))?;
        Ok(url.into())
    }

    fn media_items_url(&self) -> String {
        format!("{}/v1/mediaItems", self.config.api_base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CardProvider for GooglePhotosProvider {
    type Payload = PhotoItem;

    fn name(&self) -> &str {
        PROVIDER
    }

    async fn authenticate(&self) -> Result<(), AuthError> {
        match self.session.establish().await? {
            Some(SessionSource::Redirect) => {
                info!("Authenticated with Google Photos from redirect");
                Ok(())
            }
            Some(SessionSource::Cached) => {
                debug!("Reusing stored Google Photos token");
                Ok(())
            }
            None => Err(AuthError::RedirectRequired {
                url: self.consent_url()?,
            }),
        }
    }

    async fn fetch_next_page(&self, page_size: usize) -> Result<Vec<Card<PhotoItem>>, FetchError> {
        let mut paging = self.paging.lock().await;

        let Some(token) = self.session.access_token().await else {
            return Err(FetchError::NotReady {
                provider: PROVIDER.into(),
                reason: "Not authenticated with Google Photos".into(),
            });
        };

        let mut query = vec![("pageSize", page_size.to_string())];
        if let Some(page_token) = &paging.page_token {
            query.push(("pageToken", page_token.clone()));
        }

        let resp = self
            .client
            .get(self.media_items_url())
            .bearer_auth(token.expose_secret())
            .query(&query)
            .send()
            .await
            .map_err(|e| fetch_error(PROVIDER, self.config.timeout, e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("Google Photos rejected the access token, clearing session");
            if let Err(e) = self.session.logout().await {
                warn!(error = %e, "Session teardown failed");
            }
            return Err(FetchError::Unauthorized {
                provider: PROVIDER.into(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Provider {
                provider: PROVIDER.into(),
                reason: format!("Failed to fetch photos: HTTP {status}"),
            });
        }

        let body: MediaItemsResponse = resp
            .json()
            .await
            .map_err(|e| fetch_error(PROVIDER, self.config.timeout, e))?;

        let seen = paging.tail.take().unwrap_or_default();
        let items: Vec<PhotoItem> = body.media_items.into_iter().map(PhotoItem::from).collect();
        match body.next_page_token {
            Some(next) => paging.page_token = Some(next),
            None => {
                let mut tail = seen.clone();
                tail.extend(items.iter().map(|item| item.id.clone()));
                paging.tail = Some(tail);
            }
        }

        let fresh: Vec<Card<PhotoItem>> = items
            .into_iter()
            .filter(|item| !seen.contains(&item.id))
            .map(Card::new)
            .collect();
        debug!(items = fresh.len(), at_end = paging.tail.is_some(), "Photos page fetched");
        Ok(fresh)
    }

    async fn on_left_commit(&self, card: &Card<PhotoItem>) -> Result<(), CommitError> {
        info!(card_id = %card.id(), filename = %card.payload().filename, "Photo rejected");
        Ok(())
    }

    async fn on_right_commit(&self, card: &Card<PhotoItem>) -> Result<(), CommitError> {
        info!(card_id = %card.id(), filename = %card.payload().filename, "Photo kept");
        Ok(())
    }
}
