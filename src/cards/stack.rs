//! Stack layout — the visible window of cards and their fixed offsets.

use serde::Serialize;

use super::model::{Card, CardPayload};

/// Number of cards shown in the stack.
pub const VISIBLE_WINDOW: usize = 3;

/// Vertical back-translation per level of depth, in pixels.
const DEPTH_TRANSLATE_Y: f32 = 8.0;

/// Scale reduction per level of depth.
const DEPTH_SCALE_STEP: f32 = 0.05;

/// Layout transform for one stack position. Depends only on depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StackOffset {
    pub translate_y: f32,
    pub scale: f32,
}

impl StackOffset {
    pub fn for_depth(depth: usize) -> Self {
        let depth = depth as f32;
        Self {
            translate_y: depth * DEPTH_TRANSLATE_Y,
            scale: 1.0 - depth * DEPTH_SCALE_STEP,
        }
    }
}

/// A card at a position in the visible stack. Only depth 0 is interactive.
#[derive(Debug, Clone, Serialize)]
#[serde(bound = "T: CardPayload + Serialize")]
pub struct StackSlot<T> {
    pub depth: usize,
    pub offset: StackOffset,
    pub interactive: bool,
    pub card: Card<T>,
}

/// `cards[start .. start + size]`, clamped to the end, with offsets.
pub fn window<T: CardPayload>(cards: &[Card<T>], start: usize, size: usize) -> Vec<StackSlot<T>> {
    cards
        .iter()
        .skip(start)
        .take(size)
        .enumerate()
        .map(|(depth, card)| StackSlot {
            depth,
            offset: StackOffset::for_depth(depth),
            interactive: depth == 0,
            card: card.clone(),
        })
        .collect()
}
