//! Per-frame face matching against the reference registry.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::registry::Registry;
use crate::types::{BoundingBox, Embedding, MatchPolicy, Matcher};
use image::RgbImage;
use thiserror::Error;

/// Default maximum Euclidean distance between two L2-normalized ArcFace
/// encodings of the same person (cosine similarity ≈ 0.40).
pub const DEFAULT_TOLERANCE: f32 = 1.10;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Locates faces in a frame and computes their encodings.
pub trait FaceEncoder {
    /// Face boxes, most confident first.
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EncodeError>;

    fn encode(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, EncodeError>;
}

/// SCRFD detection followed by ArcFace encoding.
pub struct FacePipeline {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FacePipeline {
    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, EncodeError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for FacePipeline {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EncodeError> {
        Ok(self.detector.detect(image)?)
    }

    fn encode(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, EncodeError> {
        Ok(self.recognizer.extract(image, face)?)
    }
}

/// Faces found in one frame, as parallel lists.
#[derive(Debug, Clone, Default)]
pub struct Recognition {
    pub boxes: Vec<BoundingBox>,
    /// Registry name per box, `"Unknown"` when unmatched.
    pub names: Vec<String>,
}

/// Resolves faces in a frame to registry names.
pub struct FaceMatcher {
    registry: Registry,
    policy: MatchPolicy,
    tolerance: f32,
}

impl FaceMatcher {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            policy: MatchPolicy::default(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Detect every face in `image` and resolve a name for each.
    pub fn recognize<E>(&self, encoder: &mut E, image: &RgbImage) -> Result<Recognition, EncodeError>
    where
        E: FaceEncoder + ?Sized,
    {
        let boxes = encoder.locate(image)?;
        if boxes.is_empty() {
            return Ok(Recognition::default());
        }

        let mut names = Vec::with_capacity(boxes.len());
        for face in &boxes {
            let probe = encoder.encode(image, face)?;
            let entries = self.registry.entries();
            let result = self.policy.compare(&probe, entries, self.tolerance);
            let cosine = result
                .index
                .and_then(|i| entries.get(i))
                .map(|entry| probe.similarity(&entry.embedding));
            tracing::trace!(name = result.label(), distance = result.distance, ?cosine, "face compared");
            names.push(result.label().to_string());
        }

        Ok(Recognition { boxes, names })
    }
}
