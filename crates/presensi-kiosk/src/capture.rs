//! Dedicated capture thread feeding the shared frame slot.

use crate::slot::FrameSlot;
use presensi_hw::FrameSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

/// Pause between captures; yields the slot lock to the consumer.
const CAPTURE_PAUSE: Duration = Duration::from_millis(1);
/// Back-off after a failed capture before retrying.
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Handle to a running capture thread.
pub struct Capture {
    running: Arc<AtomicBool>,
    done: mpsc::Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl Capture {
    /// Spawn the capture loop. The source is moved onto the thread and
    /// dropped there, which releases the device.
    pub fn start<S>(mut source: S, slot: Arc<FrameSlot>) -> std::io::Result<Self>
    where
        S: FrameSource + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done) = mpsc::channel();
        let flag = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name("presensi-capture".into())
            .spawn(move || {
                tracing::info!("capture thread started");
                let mut failures = 0u64;
                while flag.load(Ordering::Relaxed) {
                    match source.next_frame() {
                        Ok(frame) => {
                            slot.put(frame);
                            std::thread::sleep(CAPTURE_PAUSE);
                        }
                        Err(err) => {
                            failures += 1;
                            tracing::warn!(error = %err, failures, "frame capture failed; skipping");
                            std::thread::sleep(ERROR_BACKOFF);
                        }
                    }
                }
                drop(source);
                tracing::info!("capture thread exiting");
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            running,
            done,
            thread: Some(thread),
        })
    }

    /// Ask the thread to stop and wait up to `timeout` for it to release the
    /// device. Returns `false` if the thread was abandoned.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.running.store(false, Ordering::Relaxed);
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        tracing::error!("capture thread panicked");
                    }
                }
                true
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(?timeout, "capture thread did not stop in time; abandoning");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presensi_hw::{CameraError, Frame};

    struct Flaky {
        seq: u32,
    }

    impl FrameSource for Flaky {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            self.seq += 1;
            if self.seq % 3 == 0 {
                return Err(CameraError::CaptureFailed("synthetic".into()));
            }
            Ok(Frame::new(vec![0; 4 * 4 * 3], 4, 4, self.seq).unwrap())
        }
    }

    struct Stuck;

    impl FrameSource for Stuck {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            std::thread::sleep(Duration::from_secs(5));
            Err(CameraError::DeviceBusy)
        }
    }

    #[test]
    fn test_capture_fills_slot_and_survives_errors() {
        let slot = Arc::new(FrameSlot::new());
        let capture = Capture::start(Flaky { seq: 0 }, Arc::clone(&slot)).unwrap();

        let mut seen = 0;
        for _ in 0..200 {
            if let Some(f) = slot.get() {
                seen = f.sequence;
                if seen > 3 {
                    break;
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(seen > 3, "capture should continue past a failed cycle, saw {seen}");
        assert!(capture.stop(Duration::from_secs(2)));
    }

    #[test]
    fn test_stop_is_bounded() {
        let slot = Arc::new(FrameSlot::new());
        let capture = Capture::start(Stuck, slot).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let started = std::time::Instant::now();
        assert!(!capture.stop(Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
