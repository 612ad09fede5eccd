//! Card data model — payload capability, card wrapper, swipe directions, and deck events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use super::gesture::{Point, Surface};

/// Capability set every card payload supplies.
///
/// The deck only ever reads `id()`; the rest is for renderers and logs.
pub trait CardPayload: Send + Sync + 'static {
    /// Stable identifier, unique within a deck's lifetime.
    fn id(&self) -> &str;

    /// Advisory payload kind (e.g. "playing-card").
    fn kind(&self) -> Option<&str> {
        None
    }

    /// Advisory creation time. Not used for ordering.
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// One-line human description, used by text renderers.
    fn describe(&self) -> String;
}

/// Identity metadata derived from a card's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardMetadata {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl CardMetadata {
    fn from_payload<T: CardPayload>(payload: &T) -> Self {
        Self {
            id: payload.id().to_string(),
            kind: payload.kind().map(str::to_string),
            timestamp: payload.timestamp(),
        }
    }
}

/// One unit of decision payload plus its identity metadata.
///
/// Immutable after construction; clones share the payload.
#[derive(Debug)]
pub struct Card<T> {
    payload: Arc<T>,
    metadata: CardMetadata,
}

impl<T> Clone for Card<T> {
    fn clone(&self) -> Self {
        Self {
            payload: Arc::clone(&self.payload),
            metadata: self.metadata.clone(),
        }
    }
}

impl<T: CardPayload> Card<T> {
    pub fn new(payload: T) -> Self {
        let metadata = CardMetadata::from_payload(&payload);
        Self {
            payload: Arc::new(payload),
            metadata,
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn metadata(&self) -> &CardMetadata {
        &self.metadata
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn describe(&self) -> String {
        self.payload.describe()
    }
}

impl<T: CardPayload + Serialize> Serialize for Card<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Card", 3)?;
        state.serialize_field("metadata", &self.metadata)?;
        state.serialize_field("description", &self.payload.describe())?;
        state.serialize_field("payload", self.payload.as_ref())?;
        state.end()
    }
}

/// Direction a card was swiped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwipeDirection {
    /// Reject / discard.
    Left,
    /// Keep / favour.
    Right,
}

impl std::fmt::Display for SwipeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

impl std::str::FromStr for SwipeDirection {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            _ => Err(format!("Unknown swipe direction: {}", s)),
        }
    }
}

/// Events a deck broadcasts to presentation clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeckEvent {
    /// The provider accepted the deck's credentials.
    Authenticated { provider: String },
    /// A fetch appended cards to the tail of the queue.
    CardsAppended {
        count: usize,
        total: usize,
        remaining: usize,
    },
    /// A card was committed in a direction and the pointer advanced.
    Swiped {
        card: CardMetadata,
        direction: SwipeDirection,
        remaining: usize,
    },
    /// A fetch returned no cards; the provider is exhausted for now.
    Exhausted { remaining: usize },
    /// A background preload failed. Already-visible cards remain usable.
    PreloadFailed { reason: String },
    /// The provider rejected the session. The deck needs a fresh `authenticate`.
    SessionExpired { provider: String },
}

/// Client → server actions on the presentation boundary.
///
/// Drag actions drive a per-connection gesture; the drop commits only the
/// card the drag started on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeckAction {
    /// Commit the current card in a direction.
    Swipe { direction: SwipeDirection },
    /// Retry fetching the next page.
    Refill,
    /// Start dragging the top card.
    PointerDown { card_id: String, pointer: Point },
    /// Pointer moved during a drag.
    PointerMove {
        pointer: Point,
        card_center: Point,
        surface: Surface,
    },
    /// The drag ended without a drop.
    DragEnd,
    /// The card was released.
    Drop,
}
