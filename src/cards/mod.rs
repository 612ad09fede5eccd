//! Cards, the deck engine, gestures, and the presentation boundary.

pub mod gesture;
pub mod model;
pub mod queue;
pub mod stack;
pub mod ws;

pub use gesture::{Decision, GestureCoordinator, GestureState, HoverZone, Point, Surface};
pub use model::{Card, CardMetadata, CardPayload, DeckAction, DeckEvent, SwipeDirection};
pub use queue::{Deck, DeckSnapshot};
pub use stack::{StackOffset, StackSlot};
