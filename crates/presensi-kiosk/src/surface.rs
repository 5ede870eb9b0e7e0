//! UI seam: what the loop shows and what the user can do.
//!
//! A `Surface` renders the live frame with the two mode buttons and an
//! optional popup, and reports clicks in screen coordinates plus a quit
//! request. Hit-testing against the fixed button regions lives here, not in
//! the surface implementation.

use crate::context::{Popup, Rgb};
use crate::event::Mode;
use presensi_core::IdentityKey;
use presensi_hw::Frame;
use std::io::BufRead;
use std::sync::mpsc;
use std::time::Instant;

const BUTTON_WIDTH: i32 = 260;
const BUTTON_HEIGHT: i32 = 70;
const BUTTON_SIDE_MARGIN: i32 = 80;
const BUTTON_BOTTOM_MARGIN: i32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    Click { x: i32, y: i32 },
    Quit,
}

/// Axis-aligned rectangle in screen pixels; edges are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Button {
    pub rect: Rect,
    pub mode: Mode,
    pub color: Rgb,
}

/// The two fixed hit regions along the bottom edge of the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonLayout {
    pub check_in: Button,
    pub check_out: Button,
}

impl ButtonLayout {
    pub fn for_screen(width: u32, height: u32) -> Self {
        let width = i32::try_from(width).unwrap_or(i32::MAX);
        let height = i32::try_from(height).unwrap_or(i32::MAX);
        let y = height - BUTTON_HEIGHT - BUTTON_BOTTOM_MARGIN;
        let rect = |x| Rect {
            x,
            y,
            width: BUTTON_WIDTH,
            height: BUTTON_HEIGHT,
        };
        Self {
            check_in: Button {
                rect: rect(BUTTON_SIDE_MARGIN),
                mode: Mode::CheckIn,
                color: (0, 200, 0),
            },
            check_out: Button {
                rect: rect(width - BUTTON_SIDE_MARGIN - BUTTON_WIDTH),
                mode: Mode::CheckOut,
                color: (200, 0, 0),
            },
        }
    }

    /// Mode selected by a click, if it landed on a button.
    pub fn hit(&self, x: i32, y: i32) -> Option<Mode> {
        [self.check_in, self.check_out]
            .into_iter()
            .find(|b| b.rect.contains(x, y))
            .map(|b| b.mode)
    }

    pub fn button(&self, mode: Mode) -> &Button {
        match mode {
            Mode::CheckIn => &self.check_in,
            Mode::CheckOut => &self.check_out,
        }
    }
}

/// Everything drawn on top of the frame for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct Overlay<'a> {
    pub buttons: &'a ButtonLayout,
    pub popup: Option<&'a Popup>,
    pub identity: Option<&'a IdentityKey>,
}

pub trait Surface {
    fn present(&mut self, frame: &Frame, overlay: &Overlay<'_>);
    /// Drain input received since the last call. Never blocks.
    fn poll(&mut self) -> Vec<SurfaceEvent>;
}

/// Parse one headless command line.
///
/// `in` and `out` press the corresponding button; `click X Y` is a raw click;
/// `q`, `quit` and `exit` request shutdown.
pub fn parse_command(line: &str, layout: &ButtonLayout) -> Option<SurfaceEvent> {
    let mut words = line.split_whitespace();
    let event = match words.next()? {
        "in" => {
            let (x, y) = layout.check_in.rect.center();
            SurfaceEvent::Click { x, y }
        }
        "out" => {
            let (x, y) = layout.check_out.rect.center();
            SurfaceEvent::Click { x, y }
        }
        "click" => {
            let x = words.next()?.parse().ok()?;
            let y = words.next()?.parse().ok()?;
            SurfaceEvent::Click { x, y }
        }
        "q" | "quit" | "exit" => SurfaceEvent::Quit,
        _ => return None,
    };
    Some(event)
}

/// Surface without a display: commands come from a line reader (stdin in
/// the daemon) and popups are logged.
pub struct HeadlessSurface {
    events: mpsc::Receiver<SurfaceEvent>,
    shown: Option<Instant>,
    identity: Option<IdentityKey>,
}

impl HeadlessSurface {
    pub fn stdin(layout: ButtonLayout) -> std::io::Result<Self> {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()), layout)
    }

    pub fn from_reader<R>(reader: R, layout: ButtonLayout) -> std::io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, events) = mpsc::channel();
        std::thread::Builder::new()
            .name("presensi-input".into())
            .spawn(move || {
                for line in reader.lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(err) => {
                            tracing::warn!(error = %err, "input read failed");
                            break;
                        }
                    };
                    match parse_command(&line, &layout) {
                        Some(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        None if line.trim().is_empty() => {}
                        None => tracing::warn!(%line, "unrecognised command (in | out | click X Y | q)"),
                    }
                }
                tracing::debug!("input closed");
            })?;

        Ok(Self {
            events,
            shown: None,
            identity: None,
        })
    }
}

impl Surface for HeadlessSurface {
    fn present(&mut self, _frame: &Frame, overlay: &Overlay<'_>) {
        if overlay.identity != self.identity.as_ref() {
            self.identity = overlay.identity.cloned();
            tracing::debug!(identity = ?self.identity, "in view");
        }

        let expires = overlay.popup.map(|p| p.expires_at);
        if expires != self.shown {
            self.shown = expires;
            if let Some(popup) = overlay.popup {
                tracing::info!(popup = %popup.lines.join(" | "), "popup");
            }
        }
    }

    fn poll(&mut self) -> Vec<SurfaceEvent> {
        self.events.try_iter().collect()
    }
}
