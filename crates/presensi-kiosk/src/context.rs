//! State shared between the UI surface and the attendance desk.
//!
//! Everything here is touched only from the interactive loop, so it is plain
//! owned data passed by `&mut`.

use crate::event::Mode;
use std::time::{Duration, Instant};

pub type Rgb = (u8, u8, u8);

/// Transient confirmation shown over the live feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Popup {
    pub lines: Vec<String>,
    pub color: Rgb,
    pub expires_at: Instant,
}

impl Popup {
    pub fn new(lines: Vec<String>, color: Rgb, ttl: Duration, now: Instant) -> Self {
        Self {
            lines,
            color,
            expires_at: now + ttl,
        }
    }
}

#[derive(Debug, Default)]
pub struct KioskContext {
    selected_mode: Option<Mode>,
    popup: Option<Popup>,
}

impl KioskContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a mode; a later selection replaces an unconsumed one.
    pub fn select_mode(&mut self, mode: Mode) {
        if let Some(previous) = self.selected_mode.replace(mode) {
            if previous != mode {
                tracing::debug!(%previous, %mode, "pending mode replaced");
            }
        }
    }

    pub fn pending_mode(&self) -> Option<Mode> {
        self.selected_mode
    }

    /// Consume the pending mode, if any.
    pub fn take_mode(&mut self) -> Option<Mode> {
        self.selected_mode.take()
    }

    pub fn show_popup(&mut self, popup: Popup) {
        self.popup = Some(popup);
    }

    pub fn popup(&self) -> Option<&Popup> {
        self.popup.as_ref()
    }

    /// Drop the popup once its deadline has passed.
    pub fn expire_popup(&mut self, now: Instant) {
        if self.popup.as_ref().is_some_and(|p| now >= p.expires_at) {
            self.popup = None;
        }
    }
}
