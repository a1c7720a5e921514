use std::time::Duration;

use crate::models::{ProcessedTurn, Role};

pub const DEFAULT_PIN_THRESHOLD_PX: f64 = 100.0;
pub const DEFAULT_SCROLL_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scroll_y: f64,
    pub viewport_height: f64,
    pub document_height: f64,
}

impl Viewport {
    pub fn distance_from_bottom(&self) -> f64 {
        self.document_height - (self.scroll_y + self.viewport_height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBehavior {
    Smooth,
    Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollCommand {
    /// Wait this long before scrolling so layout can settle.
    pub delay: Duration,
    pub behavior: ScrollBehavior,
}

#[derive(Debug, Clone)]
pub struct ScrollController {
    threshold: f64,
    delay: Duration,
    pinned: bool,
    last_scrolled_turn: Option<String>,
}

impl Default for ScrollController {
    fn default() -> Self {
        Self::new(DEFAULT_PIN_THRESHOLD_PX, DEFAULT_SCROLL_DELAY)
    }
}

impl ScrollController {
    pub fn new(threshold: f64, delay: Duration) -> Self {
        Self {
            threshold,
            delay,
            pinned: true,
            last_scrolled_turn: None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn on_viewport(&mut self, viewport: Viewport) -> bool {
        self.pinned = viewport.distance_from_bottom() <= self.threshold;
        self.pinned
    }

    /// Scrolls only for a user turn that has not been scrolled to yet, and
    /// only while pinned. Assistant updates never move the viewport.
    pub fn on_turns_updated(&mut self, turns: &[ProcessedTurn]) -> Option<ScrollCommand> {
        let last = turns.last()?;
        if last.role != Role::User || !self.pinned {
            return None;
        }
        if self.last_scrolled_turn.as_deref() == Some(last.id.as_str()) {
            return None;
        }

        self.last_scrolled_turn = Some(last.id.clone());
        Some(ScrollCommand {
            delay: self.delay,
            behavior: ScrollBehavior::Smooth,
        })
    }
}
