//! Sleep/wake state driven by face presence.

use crate::tasks::Spawn;
use presensi_hw::DisplayPower;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Awake,
    Asleep,
}

/// A state change the caller must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Sleep,
    Wake,
}

/// Counts consecutive recognition cycles without a face.
///
/// Only cycles that actually ran detection should be observed; reused
/// cycles carry no presence information.
#[derive(Debug)]
pub struct PowerController {
    state: PowerState,
    no_face: u32,
    threshold: u32,
}

impl PowerController {
    /// Sleep once more than `threshold` empty cycles have been observed.
    pub fn new(threshold: u32) -> Self {
        Self {
            state: PowerState::Awake,
            no_face: 0,
            threshold,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn is_asleep(&self) -> bool {
        self.state == PowerState::Asleep
    }

    pub fn observe(&mut self, faces: usize) -> Option<Transition> {
        if faces > 0 {
            self.no_face = 0;
            if self.state == PowerState::Asleep {
                self.state = PowerState::Awake;
                return Some(Transition::Wake);
            }
            return None;
        }

        self.no_face = self.no_face.saturating_add(1);
        if self.state == PowerState::Awake && self.no_face > self.threshold {
            self.state = PowerState::Asleep;
            return Some(Transition::Sleep);
        }
        None
    }
}

/// Apply a transition on a background task; failures are logged only.
pub fn dispatch(spawner: &dyn Spawn, display: &Arc<dyn DisplayPower>, transition: Transition) {
    let display = Arc::clone(display);
    let on = transition == Transition::Wake;
    tracing::info!(?transition, "display power change");
    spawner.spawn("display-power", Box::new(move || Ok(display.set_power(on)?)));
}
