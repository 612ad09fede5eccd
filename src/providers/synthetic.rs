//! Synthetic provider — an in-memory 52-card playing deck, no auth.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::CardProvider;
use crate::cards::model::{Card, CardPayload};
use crate::error::{AuthError, CommitError, FetchError};

const SUITS: [Suit; 4] = [Suit::Hearts, Suit::Diamonds, Suit::Clubs, Suit::Spades];
const VALUES: [&str; 13] = [
    "A", "2", "3", "4", "5", "6", "7", "8", "9", "10", "J", "Q", "K",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Suit {
    Hearts,
    Diamonds,
    Clubs,
    Spades,
}

impl std::fmt::Display for Suit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hearts => write!(f, "hearts"),
            Self::Diamonds => write!(f, "diamonds"),
            Self::Clubs => write!(f, "clubs"),
            Self::Spades => write!(f, "spades"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardColor {
    Red,
    Black,
}

/// One synthetic playing card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayingCard {
    pub id: String,
    pub suit: Suit,
    pub value: String,
    pub color: CardColor,
    pub created_at: DateTime<Utc>,
}

impl PlayingCard {
    fn new(suit: Suit, value: &str) -> Self {
        let color = match suit {
            Suit::Hearts | Suit::Diamonds => CardColor::Red,
            Suit::Clubs | Suit::Spades => CardColor::Black,
        };
        Self {
            id: format!("{suit}-{value}"),
            suit,
            value: value.to_string(),
            color,
            created_at: Utc::now(),
        }
    }
}

impl CardPayload for PlayingCard {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> Option<&str> {
        Some("playing-card")
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }

    fn describe(&self) -> String {
        format!("{} of {}", self.value, self.suit)
    }
}

/// Hands out a standard deck page by page, then reports exhaustion.
pub struct SyntheticProvider {
    order: Vec<(Suit, &'static str)>,
    cursor: Mutex<usize>,
}

impl SyntheticProvider {
    /// Suits in hearts, diamonds, clubs, spades order; A through K within each.
    pub fn new() -> Self {
        let order = SUITS
            .iter()
            .flat_map(|suit| VALUES.iter().map(move |value| (*suit, *value)))
            .collect();
        Self {
            order,
            cursor: Mutex::new(0),
        }
    }

    /// A reproducibly shuffled deck.
    pub fn shuffled(seed: u64) -> Self {
        let mut provider = Self::new();
        provider.order.shuffle(&mut StdRng::seed_from_u64(seed));
        provider
    }
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CardProvider for SyntheticProvider {
    type Payload = PlayingCard;

    fn name(&self) -> &str {
        "synthetic"
    }

    async fn authenticate(&self) -> Result<(), AuthError> {
        Ok(())
    }

    async fn fetch_next_page(&self, page_size: usize) -> Result<Vec<Card<PlayingCard>>, FetchError> {
        let mut cursor = self.cursor.lock().await;
        let start = (*cursor).min(self.order.len());
        let end = (start + page_size).min(self.order.len());
        *cursor = end;

        Ok(self.order[start..end]
            .iter()
            .map(|(suit, value)| Card::new(PlayingCard::new(*suit, value)))
            .collect())
    }

    async fn on_left_commit(&self, card: &Card<PlayingCard>) -> Result<(), CommitError> {
        debug!(card_id = %card.id(), "Synthetic card rejected");
        Ok(())
    }

    async fn on_right_commit(&self, card: &Card<PlayingCard>) -> Result<(), CommitError> {
        debug!(card_id = %card.id(), "Synthetic card kept");
        Ok(())
    }
}
