//! Gesture coordinator — folds button taps and pointer drags into one
//! commit decision per card.
//!
//! Drag state is transient and lives only here. The deck is touched only
//! when a commit fires (drop inside a zone, or a tap).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::{Card, SwipeDirection};
use super::queue::Deck;
use crate::error::Result;
use crate::providers::CardProvider;

/// Fraction of the surface width below which the pointer is in the left zone.
const LEFT_ZONE_LIMIT: f64 = 0.33;

/// Fraction of the surface width above which the pointer is in the right zone.
const RIGHT_ZONE_LIMIT: f64 = 0.67;

/// Where the pointer hovers during a drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoverZone {
    Left,
    Right,
    #[default]
    None,
}

impl HoverZone {
    /// The direction a drop in this zone commits to.
    pub fn direction(self) -> Option<SwipeDirection> {
        match self {
            Self::Left => Some(SwipeDirection::Left),
            Self::Right => Some(SwipeDirection::Right),
            Self::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Horizontal extent of the drop surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub left: f64,
    pub width: f64,
}

impl Surface {
    pub fn new(left: f64, width: f64) -> Self {
        Self { left, width }
    }

    /// Classify a horizontal pointer position.
    ///
    /// Strictly below 33% is left, strictly above 67% is right, and the
    /// inclusive band between is no zone.
    pub fn zone_at(&self, x: f64) -> HoverZone {
        if self.width.is_nan() || self.width <= 0.0 {
            return HoverZone::None;
        }
        let fraction = (x - self.left) / self.width;
        if fraction < LEFT_ZONE_LIMIT {
            HoverZone::Left
        } else if fraction > RIGHT_ZONE_LIMIT {
            HoverZone::Right
        } else {
            HoverZone::None
        }
    }
}

/// Transient drag state. Reset to the zero value on every drag end or drop.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GestureState {
    pub dragging: bool,
    pub pointer_offset: Point,
    pub hover_zone: HoverZone,
}

/// What a drop or tap resolved to.
#[derive(Debug)]
pub enum Decision<T> {
    /// The card was committed and the deck advanced.
    Committed {
        direction: SwipeDirection,
        card: Card<T>,
    },
    /// Dropped outside a zone, or no drag was active.
    Cancelled,
    /// A previous commit is still settling.
    Busy,
    /// There was no current card to commit.
    Empty,
}

#[derive(Default)]
struct Drag {
    card_id: Option<String>,
    anchor: Point,
    gesture: GestureState,
}

/// Clears the commit flag when the commit settles, including on error.
struct CommitGuard<'a>(&'a AtomicBool);

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Reconciles taps and drags into `Deck::swipe` calls.
pub struct GestureCoordinator<P: CardProvider> {
    deck: Arc<Deck<P>>,
    drag: std::sync::Mutex<Drag>,
    committing: AtomicBool,
}

impl<P: CardProvider> GestureCoordinator<P> {
    pub fn new(deck: Arc<Deck<P>>) -> Self {
        Self {
            deck,
            drag: std::sync::Mutex::new(Drag::default()),
            committing: AtomicBool::new(false),
        }
    }

    pub fn deck(&self) -> &Arc<Deck<P>> {
        &self.deck
    }

    /// Current drag state.
    pub fn state(&self) -> GestureState {
        self.lock_drag().gesture
    }

    /// Whether a commit is awaiting the deck. Both commit paths are
    /// disabled while this is true.
    pub fn is_committing(&self) -> bool {
        self.committing.load(Ordering::SeqCst)
    }

    /// Start dragging `card_id` at `pointer`. Only the top card may be
    /// dragged. Returns whether the drag started.
    pub async fn pointer_down(&self, card_id: &str, pointer: Point) -> bool {
        if self.is_committing() {
            return false;
        }
        let is_top = self
            .deck
            .current_card()
            .await
            .is_some_and(|card| card.id() == card_id);
        if !is_top {
            debug!(card_id, "Drag ignored: not the top card");
            return false;
        }

        let mut drag = self.lock_drag();
        drag.card_id = Some(card_id.to_string());
        drag.anchor = pointer;
        drag.gesture = GestureState {
            dragging: true,
            ..GestureState::default()
        };
        true
    }

    /// Track the pointer. Returns the updated state.
    pub fn pointer_move(&self, pointer: Point, card_center: Point, surface: Surface) -> GestureState {
        let mut drag = self.lock_drag();
        if drag.gesture.dragging {
            drag.gesture.pointer_offset = Point::new(pointer.x - card_center.x, pointer.y - card_center.y);
            drag.gesture.hover_zone = surface.zone_at(pointer.x);
        }
        drag.gesture
    }

    /// The drag ended without a drop. Never commits.
    pub fn drag_end(&self) {
        let mut drag = self.lock_drag();
        if drag.gesture.dragging {
            debug!(
                card_id = ?drag.card_id,
                anchor_x = drag.anchor.x,
                zone = ?drag.gesture.hover_zone,
                "Drag aborted"
            );
        }
        *drag = Drag::default();
    }

    /// The card was dropped. Commits if the pointer was over a zone.
    pub async fn drop_card(&self) -> Result<Decision<P::Payload>> {
        let (card_id, zone) = {
            let drag = std::mem::take(&mut *self.lock_drag());
            (drag.card_id, drag.gesture.hover_zone)
        };

        let (Some(card_id), Some(direction)) = (card_id, zone.direction()) else {
            return Ok(Decision::Cancelled);
        };

        // The deck may have moved on (another client swiped) since the drag began.
        let decision = self.commit(direction, Some(card_id.as_str())).await?;
        if matches!(decision, Decision::Empty) {
            debug!(%card_id, "Drop ignored: dragged card is no longer on top");
            return Ok(Decision::Cancelled);
        }
        Ok(decision)
    }

    /// A button (or key) commit. Clears any drag in progress.
    pub async fn tap(&self, direction: SwipeDirection) -> Result<Decision<P::Payload>> {
        *self.lock_drag() = Drag::default();
        self.commit(direction, None).await
    }

    /// Commit through the deck. With `card_id`, only that card may be committed.
    async fn commit(&self, direction: SwipeDirection, card_id: Option<&str>) -> Result<Decision<P::Payload>> {
        if self
            .committing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(%direction, "Commit ignored: previous commit still settling");
            return Ok(Decision::Busy);
        }
        let _guard = CommitGuard(&self.committing);

        let committed = match card_id {
            Some(card_id) => self.deck.swipe_if_current(card_id, direction).await?,
            None => self.deck.swipe(direction).await?,
        };
        Ok(match committed {
            Some(card) => Decision::Committed { direction, card },
            None => Decision::Empty,
        })
    }

    fn lock_drag(&self) -> std::sync::MutexGuard<'_, Drag> {
        self.drag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Map a key name to a tap. Arrow keys plus `h`/`l`.
pub fn direction_for_key(key: &str) -> Option<SwipeDirection> {
    match key.trim().to_lowercase().as_str() {
        "arrowleft" | "left" | "h" => Some(SwipeDirection::Left),
        "arrowright" | "right" | "l" => Some(SwipeDirection::Right),
        _ => None,
    }
}
