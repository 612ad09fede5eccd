//! Data providers — the capability set a deck is generic over.

pub mod deck_of_cards;
pub mod google_photos;
pub mod session;
pub mod synthetic;

pub use deck_of_cards::{DeckOfCardsProvider, DrawnCard};
pub use google_photos::{GooglePhotosProvider, PhotoItem};
pub use session::{PhotosSession, SessionSource, StoredToken, TokenStore};
pub use synthetic::{PlayingCard, SyntheticProvider};

use async_trait::async_trait;

use crate::cards::model::{Card, CardPayload};
use crate::error::{AuthError, CommitError, FetchError};

/// A source of cards that can authenticate, hand out ordered pages, and
/// react to committed decisions.
///
/// Providers keep their own cursor state behind interior mutability; the
/// deck serializes fetches, so implementations never see two concurrent
/// `fetch_next_page` calls from the same deck.
#[async_trait]
pub trait CardProvider: Send + Sync + 'static {
    type Payload: CardPayload;

    /// Provider name for logs and events.
    fn name(&self) -> &str;

    /// Provider-specific setup (session init, token acquisition).
    async fn authenticate(&self) -> Result<(), AuthError>;

    /// Return the next ordered batch of at most `page_size` cards.
    /// An empty batch means "exhausted for now".
    async fn fetch_next_page(
        &self,
        page_size: usize,
    ) -> Result<Vec<Card<Self::Payload>>, FetchError>;

    /// Side effect for a card committed to the left.
    async fn on_left_commit(&self, _card: &Card<Self::Payload>) -> Result<(), CommitError> {
        Ok(())
    }

    /// Side effect for a card committed to the right.
    async fn on_right_commit(&self, _card: &Card<Self::Payload>) -> Result<(), CommitError> {
        Ok(())
    }
}

/// Map a reqwest failure onto the fetch taxonomy.
pub(crate) fn fetch_error(provider: &str, timeout: std::time::Duration, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            provider: provider.to_string(),
            timeout,
        }
    } else if e.is_decode() {
        FetchError::InvalidResponse {
            provider: provider.to_string(),
            reason: e.to_string(),
        }
    } else {
        FetchError::Provider {
            provider: provider.to_string(),
            reason: e.to_string(),
        }
    }
}
