//! Deck of Cards provider — draws pages from the deckofcardsapi.com REST API.
//!
//! `authenticate` shuffles a fresh remote deck; each page is a `draw` call
//! sized to `min(page_size, remaining)`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CardProvider, fetch_error};
use crate::cards::model::{Card, CardPayload};
use crate::config::DeckOfCardsConfig;
use crate::error::{AuthError, FetchError};

const PROVIDER: &str = "deck-of-cards";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardImages {
    pub svg: String,
    pub png: String,
}

/// A card drawn from the remote deck.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawnCard {
    /// Two-character code such as `"6H"`, unique within a deck.
    pub code: String,
    pub value: String,
    pub suit: String,
    pub image: String,
    pub images: CardImages,
}

impl CardPayload for DrawnCard {
    fn id(&self) -> &str {
        &self.code
    }

    fn kind(&self) -> Option<&str> {
        Some("playing-card")
    }

    fn describe(&self) -> String {
        format!("{} of {}", self.value.to_lowercase(), self.suit.to_lowercase())
    }
}

#[derive(Debug, Deserialize)]
struct ShuffleResponse {
    success: bool,
    deck_id: Option<String>,
    #[serde(default)]
    remaining: usize,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DrawResponse {
    success: bool,
    #[serde(default)]
    cards: Vec<DrawnCard>,
    #[serde(default)]
    remaining: usize,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default)]
struct RemoteDeck {
    deck_id: Option<String>,
    remaining: usize,
}

pub struct DeckOfCardsProvider {
    config: DeckOfCardsConfig,
    client: reqwest::Client,
    remote: Mutex<RemoteDeck>,
}

impl DeckOfCardsProvider {
    pub fn new(config: DeckOfCardsConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            client,
            remote: Mutex::new(RemoteDeck::default()),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/deck/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Cards the remote deck reports as not yet drawn.
    pub async fn remote_remaining(&self) -> usize {
        self.remote.lock().await.remaining
    }
}

#[async_trait]
impl CardProvider for DeckOfCardsProvider {
    type Payload = DrawnCard;

    fn name(&self) -> &str {
        PROVIDER
    }

    async fn authenticate(&self) -> Result<(), AuthError> {
        let resp = self
            .client
            .get(self.api_url("new/shuffle/"))
            .send()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        let body: ShuffleResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        let deck_id = match (body.success, body.deck_id) {
            (true, Some(id)) => id,
            (_, _) => {
                return Err(AuthError::Rejected {
                    provider: PROVIDER.into(),
                    reason: body
                        .error
                        .unwrap_or_else(|| "Failed to initialize deck".to_string()),
                });
            }
        };

        info!(deck_id = %deck_id, remaining = body.remaining, "Remote deck shuffled");

        let mut remote = self.remote.lock().await;
        remote.deck_id = Some(deck_id);
        remote.remaining = body.remaining;
        Ok(())
    }

    async fn fetch_next_page(&self, page_size: usize) -> Result<Vec<Card<DrawnCard>>, FetchError> {
        let mut remote = self.remote.lock().await;

        let Some(deck_id) = remote.deck_id.clone() else {
            return Err(FetchError::NotReady {
                provider: PROVIDER.into(),
                reason: "Deck not initialized".into(),
            });
        };

        if remote.remaining == 0 {
            debug!(deck_id = %deck_id, "Remote deck is empty");
            return Ok(Vec::new());
        }

        let count = page_size.min(remote.remaining);
        let resp = self
            .client
            .get(self.api_url(&format!("{deck_id}/draw/")))
            .query(&[("count", count)])
            .send()
            .await
            .map_err(|e| fetch_error(PROVIDER, self.timeout(), e))?;

        let body: DrawResponse = resp
            .json()
            .await
            .map_err(|e| fetch_error(PROVIDER, self.timeout(), e))?;

        if !body.success {
            return Err(FetchError::Provider {
                provider: PROVIDER.into(),
                reason: body.error.unwrap_or_else(|| "Failed to draw cards".to_string()),
            });
        }

        remote.remaining = body.remaining;
        debug!(deck_id = %deck_id, drawn = body.cards.len(), remaining = body.remaining, "Cards drawn");

        Ok(body.cards.into_iter().map(Card::new).collect())
    }
}
