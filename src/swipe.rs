//! Swipe classification and deck state
//!
//! Gestures are classified with a fixed dead zone; the deck only moves
//! forward until it is explicitly reset.

use crate::links::LinkAction;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Gesture deltas inside this distance are ignored
pub const DEAD_ZONE: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDirection {
    Left,
    Right,
    Top,
    #[default]
    None,
}

impl SwipeDirection {
    /// Action recorded for a swipe in this direction
    pub fn action(&self) -> Option<LinkAction> {
        match self {
            SwipeDirection::Right => Some(LinkAction::Like),
            SwipeDirection::Left => Some(LinkAction::Skip),
            SwipeDirection::Top => Some(LinkAction::Favorite),
            SwipeDirection::None => None,
        }
    }
}

/// Classify a gesture from its deltas in pixels
pub fn classify_gesture(dx: f64, dy: f64) -> SwipeDirection {
    let horizontal = dx.abs() > dy.abs();

    if horizontal && dx > DEAD_ZONE {
        SwipeDirection::Right
    } else if horizontal && dx < -DEAD_ZONE {
        SwipeDirection::Left
    } else if dy < -DEAD_ZONE {
        SwipeDirection::Top
    } else {
        SwipeDirection::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwipeState {
    pub direction: SwipeDirection,
    pub active_index: usize,
    pub is_finished: bool,
}

/// Move past card `current` of `total`
pub fn advance(current: usize, total: usize) -> SwipeState {
    SwipeState {
        direction: SwipeDirection::None,
        active_index: current + 1,
        is_finished: current + 1 >= total,
    }
}

pub fn reset() -> SwipeState {
    SwipeState::default()
}

/// Outcome of one gesture on the deck
#[derive(Debug, Clone, PartialEq)]
pub struct Swiped<T> {
    pub card: T,
    pub direction: SwipeDirection,
    pub action: LinkAction,
}

/// A stack of cards triaged one swipe at a time
#[derive(Debug, Clone)]
pub struct SwipeDeck<T> {
    cards: Vec<T>,
    state: SwipeState,
}

impl<T: Clone> SwipeDeck<T> {
    pub fn new(cards: Vec<T>) -> Self {
        let state = SwipeState {
            is_finished: cards.is_empty(),
            ..SwipeState::default()
        };
        Self { cards, state }
    }

    pub fn state(&self) -> SwipeState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Card currently on top, `None` once finished
    pub fn current(&self) -> Option<&T> {
        if self.state.is_finished {
            return None;
        }
        self.cards.get(self.state.active_index)
    }

    /// Cards not swiped yet
    pub fn remaining(&self) -> usize {
        self.cards.len().saturating_sub(self.state.active_index)
    }

    /// Apply a gesture
    ///
    /// Returns the swiped card and its action, or `None` when the gesture
    /// stays in the dead zone or the deck is finished.
    pub fn swipe(&mut self, dx: f64, dy: f64) -> Option<Swiped<T>> {
        let direction = classify_gesture(dx, dy);
        self.swipe_direction(direction)
    }

    /// Apply an already classified direction
    pub fn swipe_direction(&mut self, direction: SwipeDirection) -> Option<Swiped<T>> {
        let action = direction.action()?;
        let card = self.current()?.clone();

        self.state = SwipeState {
            direction,
            ..advance(self.state.active_index, self.cards.len())
        };
        debug!(
            "Swiped {:?} at card {}/{}",
            direction,
            self.state.active_index,
            self.cards.len()
        );

        Some(Swiped {
            card,
            direction,
            action,
        })
    }

    /// Back to the first card
    pub fn reset(&mut self) {
        self.state = SwipeState {
            is_finished: self.cards.is_empty(),
            ..reset()
        };
    }

    /// Replace the cards and start over
    pub fn replace(&mut self, cards: Vec<T>) {
        self.cards = cards;
        self.reset();
    }
}
