//! Decision Deck — a swipeable queue of cards over pluggable providers.

pub mod cards;
pub mod cli;
pub mod config;
pub mod error;
pub mod providers;
