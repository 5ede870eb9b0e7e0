//! presensi-kiosk: the attendance pipeline.
//!
//! A capture thread fills a one-frame slot; the interactive loop throttles
//! recognition over it, drives display power, and turns a button press plus a
//! recognized face into a durable mark with a popup and a spoken
//! confirmation. Writes, speech and display toggles run as background tasks.

pub mod attendance;
pub mod capture;
pub mod config;
pub mod context;
pub mod event;
pub mod kiosk;
pub mod notify;
pub mod power;
pub mod scheduler;
pub mod slot;
pub mod store;
pub mod surface;
pub mod tasks;

pub use attendance::{announcement_text, AttendanceDesk, AttendanceMemory, Outcome, StatusPolicy};
pub use capture::Capture;
pub use config::{Config, ConfigError};
pub use context::{KioskContext, Popup};
pub use event::{AttendanceEvent, Mode};
pub use kiosk::{Kiosk, KioskParts, Step};
pub use notify::{Announced, Announcer, AudioPlayer, Cue, SpeechError, SpeechSynth};
pub use power::{PowerController, PowerState, Transition};
pub use scheduler::{Cycle, Recognition, RecognitionScheduler};
pub use slot::FrameSlot;
pub use store::{AttendanceStore, StoreError};
pub use surface::{ButtonLayout, HeadlessSurface, Overlay, Surface, SurfaceEvent};
pub use tasks::{InlineSpawner, Job, Spawn, ThreadSpawner};
