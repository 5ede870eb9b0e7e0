//! Throttled recognition over the live feed.
//!
//! Recognition runs on every Nth consumed frame; the cycles between reuse
//! the previous result. Only one identity is produced per cycle: the first
//! detected region that matches the catalog wins, so two people in front of
//! the camera at once yield at most one mark.

use presensi_core::{
    Detect, DetectorError, DistanceMatcher, Embed, IdentityKey, IdentityStore, RecognizerError,
};
use presensi_hw::Frame;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
enum CycleError {
    #[error("frame buffer does not match its dimensions")]
    BadFrame,
    #[error("detection: {0}")]
    Detect(#[from] DetectorError),
    #[error("embedding: {0}")]
    Embed(#[from] RecognizerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Recognition {
    #[default]
    Unknown,
    Known(IdentityKey),
}

impl Recognition {
    pub fn identity(&self) -> Option<&IdentityKey> {
        match self {
            Recognition::Known(key) => Some(key),
            Recognition::Unknown => None,
        }
    }
}

/// Result of one consumed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    /// Face count when detection ran and succeeded this cycle; `None` on
    /// reused or failed cycles.
    pub faces: Option<usize>,
    pub identity: Recognition,
}

pub struct RecognitionScheduler<D, E> {
    detector: D,
    embedder: E,
    catalog: Arc<IdentityStore>,
    matcher: DistanceMatcher,
    every: u64,
    scale: f32,
    counter: u64,
    last: Recognition,
}

impl<D: Detect, E: Embed> RecognitionScheduler<D, E> {
    pub fn new(
        detector: D,
        embedder: E,
        catalog: Arc<IdentityStore>,
        tolerance: f32,
        every: u32,
        scale: f32,
    ) -> Self {
        Self {
            detector,
            embedder,
            catalog,
            matcher: DistanceMatcher::new(tolerance),
            every: u64::from(every.max(1)),
            scale,
            counter: 0,
            last: Recognition::Unknown,
        }
    }

    pub fn on_frame(&mut self, frame: &Frame) -> Cycle {
        self.counter += 1;
        if self.counter % self.every != 0 {
            return Cycle {
                faces: None,
                identity: self.last.clone(),
            };
        }

        tracing::trace!(
            sequence = frame.sequence,
            age_ms = frame.age().as_millis() as u64,
            "recognition cycle"
        );
        let cycle = match self.recognize(frame) {
            Ok((faces, identity)) => Cycle {
                faces: Some(faces),
                identity,
            },
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    sequence = frame.sequence,
                    age_ms = frame.age().as_millis() as u64,
                    "recognition cycle failed"
                );
                Cycle {
                    faces: None,
                    identity: Recognition::Unknown,
                }
            }
        };

        if cycle.identity != self.last {
            tracing::debug!(identity = ?cycle.identity, "recognition changed");
        }
        self.last = cycle.identity.clone();
        cycle
    }

    fn recognize(&mut self, frame: &Frame) -> Result<(usize, Recognition), CycleError> {
        let image = frame.downscale(self.scale).ok_or(CycleError::BadFrame)?;
        let faces = self.detector.detect(&image)?;
        if faces.is_empty() || self.catalog.is_empty() {
            return Ok((faces.len(), Recognition::Unknown));
        }

        let dim = self.catalog.dimension();
        for face in &faces {
            let probe = self.embedder.embed(&image, face)?;
            if Some(probe.dim()) != dim {
                tracing::warn!(
                    probe = probe.dim(),
                    catalog = dim.unwrap_or(0),
                    "embedding dimension does not match catalog; skipping region"
                );
                continue;
            }
            let (name, result) = self.catalog.identify(&self.matcher, &probe);
            if let Some(name) = name {
                tracing::debug!(%name, distance = result.distance, "face matched");
                return Ok((faces.len(), Recognition::Known(name.clone())));
            }
        }
        Ok((faces.len(), Recognition::Unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use presensi_core::{BoundingBox, Embedding};
    use std::collections::{HashMap, VecDeque};

    struct FakeDetector {
        faces: usize,
        calls: usize,
        fail: bool,
    }

    impl Detect for FakeDetector {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            self.calls += 1;
            if self.fail {
                return Err(DetectorError::InferenceFailed("synthetic".into()));
            }
            Ok((0..self.faces)
                .map(|i| BoundingBox {
                    x: i as f32 * 10.0,
                    y: 0.0,
                    width: 8.0,
                    height: 8.0,
                    confidence: 0.9,
                    landmarks: None,
                })
                .collect())
        }
    }

    /// Hands out queued probes, then repeats the fallback.
    struct FakeEmbedder {
        queue: VecDeque<Vec<f32>>,
        fallback: Vec<f32>,
    }

    impl Embed for FakeEmbedder {
        fn embed(&mut self, _image: &RgbImage, _face: &BoundingBox) -> Result<Embedding, RecognizerError> {
            Ok(Embedding::new(self.queue.pop_front().unwrap_or_else(|| self.fallback.clone())))
        }
    }

    fn catalog() -> Arc<IdentityStore> {
        Arc::new(
            IdentityStore::from_parts(
                vec![vec![0.0, 0.0], vec![1.0, 0.0]],
                vec!["alice".into(), "bob".into()],
                HashMap::new(),
            )
            .unwrap(),
        )
    }

    fn frame() -> Frame {
        Frame::new(vec![0; 16 * 16 * 3], 16, 16, 1).unwrap()
    }

    fn scheduler(
        faces: usize,
        probes: Vec<Vec<f32>>,
        catalog: Arc<IdentityStore>,
    ) -> RecognitionScheduler<FakeDetector, FakeEmbedder> {
        RecognitionScheduler::new(
            FakeDetector { faces, calls: 0, fail: false },
            FakeEmbedder {
                queue: probes.into(),
                fallback: vec![0.0, 0.1],
            },
            catalog,
            0.45,
            6,
            0.25,
        )
    }

    #[test]
    fn test_runs_every_sixth_frame() {
        let mut s = scheduler(1, vec![], catalog());
        let cycles: Vec<Cycle> = (0..12).map(|_| s.on_frame(&frame())).collect();
        assert_eq!(s.detector.calls, 2);
        let ran: Vec<usize> = cycles
            .iter()
            .enumerate()
            .filter(|(_, c)| c.faces.is_some())
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(ran, vec![6, 12]);
    }

    #[test]
    fn test_reuses_previous_identity_between_runs() {
        let mut s = scheduler(1, vec![], catalog());
        for _ in 0..5 {
            assert_eq!(s.on_frame(&frame()).identity, Recognition::Unknown);
        }
        let run = s.on_frame(&frame());
        assert_eq!(run.identity, Recognition::Known(IdentityKey::new("alice")));
        let reused = s.on_frame(&frame());
        assert_eq!(reused.faces, None);
        assert_eq!(reused.identity, Recognition::Known(IdentityKey::new("alice")));
    }

    #[test]
    fn test_first_matching_region_wins() {
        // Region 0 is nobody, region 1 is bob, region 2 is alice.
        let probes = vec![vec![5.0, 5.0], vec![1.0, 0.1], vec![0.0, 0.0]];
        let mut s = scheduler(3, probes, catalog());
        s.every = 1;
        let cycle = s.on_frame(&frame());
        assert_eq!(cycle.faces, Some(3));
        assert_eq!(cycle.identity, Recognition::Known(IdentityKey::new("bob")));
    }

    #[test]
    fn test_distance_at_tolerance_is_unknown() {
        let mut s = scheduler(1, vec![vec![0.0, 0.45]], catalog());
        s.every = 1;
        assert_eq!(s.on_frame(&frame()).identity, Recognition::Unknown);
    }

    #[test]
    fn test_zero_faces_is_unknown_with_count() {
        let mut s = scheduler(0, vec![], catalog());
        s.every = 1;
        assert_eq!(
            s.on_frame(&frame()),
            Cycle {
                faces: Some(0),
                identity: Recognition::Unknown
            }
        );
    }

    #[test]
    fn test_empty_catalog_is_unknown_but_counts_faces() {
        let empty = Arc::new(IdentityStore::from_parts(vec![], vec![], HashMap::new()).unwrap());
        let mut s = scheduler(2, vec![], empty);
        s.every = 1;
        let cycle = s.on_frame(&frame());
        assert_eq!(cycle.faces, Some(2));
        assert_eq!(cycle.identity, Recognition::Unknown);
    }

    #[test]
    fn test_dimension_mismatch_skips_region() {
        let probes = vec![vec![0.0, 0.0, 0.0], vec![0.0, 0.0]];
        let mut s = scheduler(2, probes, catalog());
        s.every = 1;
        assert_eq!(
            s.on_frame(&frame()).identity,
            Recognition::Known(IdentityKey::new("alice"))
        );
    }

    #[test]
    fn test_detector_error_is_transient() {
        let mut s = scheduler(1, vec![], catalog());
        s.every = 1;
        assert!(s.on_frame(&frame()).identity.identity().is_some());

        s.detector.fail = true;
        let failed = s.on_frame(&frame());
        assert_eq!(failed.faces, None);
        assert_eq!(failed.identity, Recognition::Unknown);

        s.detector.fail = false;
        assert!(s.on_frame(&frame()).identity.identity().is_some());
    }
}
