//! The interactive loop.
//!
//! Single-threaded and cooperative: every step drains UI input, consumes the
//! newest frame if there is one, runs the throttled recognition, updates
//! display power, renders and, when a mode is pending and someone is
//! recognized, hands off to the attendance desk. Anything slow is spawned.

use crate::attendance::{AttendanceDesk, Outcome};
use crate::context::KioskContext;
use crate::power::{self, PowerController};
use crate::scheduler::RecognitionScheduler;
use crate::slot::FrameSlot;
use crate::surface::{ButtonLayout, Overlay, Surface, SurfaceEvent};
use crate::tasks::Spawn;
use chrono::NaiveDateTime;
use presensi_core::{Detect, Embed};
use presensi_hw::DisplayPower;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wait when the slot has nothing new.
const IDLE_WAIT: Duration = Duration::from_millis(10);

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// No frame newer than the last one consumed.
    Idle,
    /// A frame was consumed while the display sleeps.
    Asleep,
    /// A frame was consumed and rendered.
    Ran,
    /// The user asked to quit.
    Quit,
}

pub struct KioskParts<D, E, S> {
    pub slot: Arc<FrameSlot>,
    pub scheduler: RecognitionScheduler<D, E>,
    pub desk: AttendanceDesk,
    pub power: PowerController,
    pub display: Arc<dyn DisplayPower>,
    pub spawner: Arc<dyn Spawn>,
    pub surface: S,
    pub buttons: ButtonLayout,
    pub cooldown: Duration,
}

pub struct Kiosk<D, E, S> {
    slot: Arc<FrameSlot>,
    scheduler: RecognitionScheduler<D, E>,
    desk: AttendanceDesk,
    power: PowerController,
    display: Arc<dyn DisplayPower>,
    spawner: Arc<dyn Spawn>,
    surface: S,
    buttons: ButtonLayout,
    cooldown: Duration,
    ctx: KioskContext,
    ready_at: Option<Instant>,
    seen: u64,
}

impl<D: Detect, E: Embed, S: Surface> Kiosk<D, E, S> {
    pub fn new(parts: KioskParts<D, E, S>) -> Self {
        Self {
            slot: parts.slot,
            scheduler: parts.scheduler,
            desk: parts.desk,
            power: parts.power,
            display: parts.display,
            spawner: parts.spawner,
            surface: parts.surface,
            buttons: parts.buttons,
            cooldown: parts.cooldown,
            ctx: KioskContext::new(),
            ready_at: None,
            seen: 0,
        }
    }

    pub fn context(&self) -> &KioskContext {
        &self.ctx
    }

    pub fn is_asleep(&self) -> bool {
        self.power.is_asleep()
    }

    /// Run until the user quits or `shutdown` is set.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        tracing::info!("kiosk loop started");
        while !shutdown.load(Ordering::Relaxed) {
            let now = chrono::Local::now().naive_local();
            match self.step(Instant::now(), now) {
                Step::Quit => {
                    tracing::info!("quit requested");
                    break;
                }
                Step::Idle => std::thread::sleep(IDLE_WAIT),
                Step::Asleep | Step::Ran => {}
            }
        }
        tracing::info!("kiosk loop stopped");
    }

    /// One iteration. `clock` drives popup and cooldown deadlines, `now` is
    /// the wall-clock time stamped on marks.
    pub fn step(&mut self, clock: Instant, now: NaiveDateTime) -> Step {
        for event in self.surface.poll() {
            match event {
                SurfaceEvent::Quit => return Step::Quit,
                SurfaceEvent::Click { .. } if self.power.is_asleep() => {
                    tracing::debug!("click ignored while asleep");
                }
                SurfaceEvent::Click { x, y } => {
                    if let Some(mode) = self.buttons.hit(x, y) {
                        tracing::debug!(%mode, "mode selected");
                        self.ctx.select_mode(mode);
                    }
                }
            }
        }

        let Some((generation, frame)) = self.slot.latest_after(self.seen) else {
            return Step::Idle;
        };
        self.seen = generation;

        let cycle = self.scheduler.on_frame(&frame);
        if let Some(faces) = cycle.faces {
            if let Some(transition) = self.power.observe(faces) {
                power::dispatch(self.spawner.as_ref(), &self.display, transition);
            }
        }
        if self.power.is_asleep() {
            return Step::Asleep;
        }

        self.ctx.expire_popup(clock);
        let identity = cycle.identity.identity();
        self.surface.present(
            &frame,
            &Overlay {
                buttons: &self.buttons,
                popup: self.ctx.popup(),
                identity,
            },
        );

        let cooled = self.ready_at.map_or(true, |at| clock >= at);
        if let (true, Some(name)) = (cooled, identity) {
            if let Some(outcome) = self.desk.handle(&mut self.ctx, name, now, clock) {
                if let Outcome::Recorded(event) = &outcome {
                    tracing::info!(%event, "attendance marked");
                }
                self.ready_at = Some(clock + self.cooldown);
            }
        }
        Step::Ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::StatusPolicy;
    use crate::event::Mode;
    use crate::notify::{Announcer, AudioPlayer, SpeechError, SpeechSynth};
    use crate::store::AttendanceStore;
    use crate::tasks::InlineSpawner;
    use chrono::NaiveDate;
    use image::RgbImage;
    use presensi_core::{BoundingBox, DetectorError, Embedding, IdentityStore, RecognizerError};
    use presensi_hw::{DisplayError, Frame};
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;
    use std::sync::Mutex;

    struct Faces(Arc<Mutex<usize>>);

    impl Detect for Faces {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            let n = *self.0.lock().unwrap();
            Ok(vec![
                BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 4.0,
                    height: 4.0,
                    confidence: 0.9,
                    landmarks: None,
                };
                n
            ])
        }
    }

    struct Alice;

    impl Embed for Alice {
        fn embed(&mut self, _image: &RgbImage, _face: &BoundingBox) -> Result<Embedding, RecognizerError> {
            Ok(Embedding::new(vec![0.0, 0.0]))
        }
    }

    #[derive(Default)]
    struct Script {
        events: VecDeque<Vec<SurfaceEvent>>,
        presented: usize,
    }

    impl Surface for Script {
        fn present(&mut self, _frame: &Frame, _overlay: &Overlay<'_>) {
            self.presented += 1;
        }

        fn poll(&mut self) -> Vec<SurfaceEvent> {
            self.events.pop_front().unwrap_or_default()
        }
    }

    struct Quiet;

    impl SpeechSynth for Quiet {
        fn synthesize(&self, _text: &str, out: &Path) -> Result<(), SpeechError> {
            std::fs::write(out, b"audio").map_err(|source| SpeechError::Io {
                path: out.display().to_string(),
                source,
            })
        }
    }

    impl AudioPlayer for Quiet {
        fn play(&self, _file: &Path) -> Result<(), SpeechError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Screen(Mutex<Vec<bool>>);

    impl DisplayPower for Screen {
        fn set_power(&self, on: bool) -> Result<(), DisplayError> {
            self.0.lock().unwrap().push(on);
            Ok(())
        }
    }

    struct Rig {
        _dir: tempfile::TempDir,
        kiosk: Kiosk<Faces, Alice, Script>,
        slot: Arc<FrameSlot>,
        faces: Arc<Mutex<usize>>,
        store: Arc<AttendanceStore>,
        screen: Arc<Screen>,
        start: Instant,
    }

    fn rig(script: Vec<Vec<SurfaceEvent>>) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let spawner: Arc<dyn Spawn> = Arc::new(InlineSpawner);
        let catalog = Arc::new(
            IdentityStore::from_parts(vec![vec![0.0, 0.0]], vec!["alice".into()], HashMap::new()).unwrap(),
        );
        let store = Arc::new(AttendanceStore::open(&dir.path().join("a.db"), Arc::clone(&spawner)).unwrap());
        let announcer = Announcer::new(
            &dir.path().join("speech"),
            "mp3",
            Arc::new(Quiet),
            Arc::new(Quiet),
            Arc::clone(&spawner),
        )
        .unwrap();
        let faces = Arc::new(Mutex::new(1));
        let slot = Arc::new(FrameSlot::new());
        let screen = Arc::new(Screen::default());

        let kiosk = Kiosk::new(KioskParts {
            slot: Arc::clone(&slot),
            scheduler: RecognitionScheduler::new(Faces(Arc::clone(&faces)), Alice, Arc::clone(&catalog), 0.45, 1, 0.5),
            desk: AttendanceDesk::new(
                catalog,
                Arc::clone(&store),
                Arc::new(announcer),
                StatusPolicy::default(),
                Duration::from_millis(4500),
            ),
            power: PowerController::new(2),
            display: screen.clone(),
            spawner,
            surface: Script {
                events: script.into(),
                presented: 0,
            },
            buttons: ButtonLayout::for_screen(1024, 600),
            cooldown: Duration::from_millis(550),
        });

        Rig {
            _dir: dir,
            kiosk,
            slot,
            faces,
            store,
            screen,
            start: Instant::now(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    impl Rig {
        fn step(&mut self, after_ms: u64) -> Step {
            self.slot.put(Frame::new(vec![0; 8 * 8 * 3], 8, 8, 0).unwrap());
            self.kiosk.step(
                self.start + Duration::from_millis(after_ms),
                today().and_hms_opt(8, 0, 0).unwrap(),
            )
        }
    }

    fn press(mode: Mode) -> Vec<SurfaceEvent> {
        let (x, y) = ButtonLayout::for_screen(1024, 600).button(mode).rect.center();
        vec![SurfaceEvent::Click { x, y }]
    }

    #[test]
    fn test_press_then_recognize_marks_once() {
        let mut rig = rig(vec![press(Mode::CheckIn), vec![], press(Mode::CheckIn)]);
        assert_eq!(rig.step(0), Step::Ran);
        let history = rig.store.history(today()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "on time");
        assert!(rig.kiosk.context().popup().is_some());
        assert!(rig.kiosk.context().pending_mode().is_none());

        rig.step(100);
        // Second press lands inside the cooldown and stays pending.
        rig.step(200);
        assert_eq!(rig.kiosk.context().pending_mode(), Some(Mode::CheckIn));
        rig.step(600);
        assert!(rig.kiosk.context().pending_mode().is_none());
        assert_eq!(rig.store.history(today()).unwrap().len(), 1);
    }

    #[test]
    fn test_idle_without_new_frame() {
        let mut rig = rig(vec![]);
        assert_eq!(rig.step(0), Step::Ran);
        let again = rig.kiosk.step(rig.start, today().and_hms_opt(8, 0, 0).unwrap());
        assert_eq!(again, Step::Idle);
        assert_eq!(rig.kiosk.surface.presented, 1);
    }

    #[test]
    fn test_unknown_face_does_not_consume_mode() {
        let mut rig = rig(vec![press(Mode::CheckOut)]);
        *rig.faces.lock().unwrap() = 0;
        rig.step(0);
        assert_eq!(rig.kiosk.context().pending_mode(), Some(Mode::CheckOut));
        assert!(rig.store.history(today()).unwrap().is_empty());
    }

    #[test]
    fn test_sleep_skips_render_and_wakes() {
        let mut rig = rig(vec![vec![], vec![], vec![], press(Mode::CheckIn)]);
        *rig.faces.lock().unwrap() = 0;
        assert_eq!(rig.step(0), Step::Ran);
        assert_eq!(rig.step(10), Step::Ran);
        assert_eq!(rig.step(20), Step::Asleep);
        assert!(rig.kiosk.is_asleep());

        // Clicks while asleep are dropped.
        assert_eq!(rig.step(30), Step::Asleep);
        assert_eq!(rig.kiosk.surface.presented, 2);

        *rig.faces.lock().unwrap() = 1;
        assert_eq!(rig.step(40), Step::Ran);
        assert!(!rig.kiosk.is_asleep());
        assert!(rig.kiosk.context().pending_mode().is_none());
        assert_eq!(*rig.screen.0.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn test_quit_and_shutdown_flag() {
        let mut rig = rig(vec![vec![SurfaceEvent::Quit]]);
        assert_eq!(rig.step(0), Step::Quit);

        let shutdown = AtomicBool::new(true);
        rig.kiosk.run(&shutdown);
    }
}
