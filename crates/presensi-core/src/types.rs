use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector. Dimensionality is fixed per catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings of equal dimension.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Face-region detection over an RGB image.
///
/// Implemented by [`crate::ScrfdDetector`]; any detector returning regions in
/// the coordinate space of the image it was given will do.
pub trait Detect {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Embedding extraction for one detected region.
pub trait Embed {
    fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError>;
}

/// Nearest catalog entry for a probe embedding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Index of the accepted catalog entry, if any.
    pub index: Option<usize>,
    /// Distance to the nearest entry (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
}

impl MatchResult {
    pub fn matched(&self) -> bool {
        self.index.is_some()
    }
}

/// Strategy for comparing a probe embedding against a gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[Embedding]) -> MatchResult;
}

/// Minimum Euclidean distance matcher.
///
/// A match is accepted only when the nearest distance is strictly below the
/// tolerance. The accept decision is this single comparison; there is no
/// second classifier that could disagree at the boundary.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    pub tolerance: f32,
}

impl DistanceMatcher {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

impl Matcher for DistanceMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[Embedding]) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, known) in gallery.iter().enumerate() {
            let dist = probe.distance(known);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        MatchResult {
            index: best_idx.filter(|_| best_dist < self.tolerance),
            distance: best_dist,
        }
    }
}
