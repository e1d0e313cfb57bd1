//! Person counting with a MobileNet-SSD detector via ONNX Runtime.
//!
//! The network is the Caffe MobileNet-SSD (`mobilenet_iter_73000`) exported
//! to ONNX. Its single output holds rows of
//! `[image_id, class_id, confidence, x1, y1, x2, y2]` with coordinates
//! normalized to the input frame.

use crate::onnx::{self, ModelError, ModelKind};
use crate::overlay::{self, PEOPLE_COLOR};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use serde::Serialize;
use thiserror::Error;

const SSD_INPUT_SIZE: u32 = 300;
const SSD_MEAN: f32 = 127.5;
const SSD_SCALE: f32 = 0.007843;
const SSD_ROW_LEN: usize = 7;

const MOBILENET_SSD: ModelKind = ModelKind {
    name: "MobileNet-SSD",
    hint: "export the Caffe mobilenet_iter_73000 model to ONNX",
};

/// VOC class id for "person" in MobileNet-SSD.
pub const PERSON_CLASS_ID: i32 = 15;
/// Default minimum confidence for a detection to be counted.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.2;

#[derive(Error, Debug)]
pub enum PersonError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("detector produced no output tensor")]
    NoOutput,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One raw detector row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: i32,
    pub confidence: f32,
    /// Normalized corners `[x1, y1, x2, y2]`.
    pub corners: [f32; 4],
}

impl RawDetection {
    /// Parse flat `[image_id, class_id, confidence, x1, y1, x2, y2]` rows.
    /// A trailing partial row is ignored.
    pub fn from_rows(data: &[f32]) -> Vec<RawDetection> {
        data.chunks_exact(SSD_ROW_LEN)
            .map(|row| RawDetection {
                class_id: row[1] as i32,
                confidence: row[2],
                corners: [row[3], row[4], row[5], row[6]],
            })
            .collect()
    }
}

/// Pixel-space box of a counted person.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PersonBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
}

/// People found in one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PersonCount {
    pub count: usize,
    /// Mean confidence of the counted detections, 0.0 when none were counted.
    pub average_confidence: f32,
    pub boxes: Vec<PersonBox>,
}

/// Keep detections of the person class strictly above `threshold` and
/// scale their boxes to a `width`×`height` frame.
pub fn count_people(detections: &[RawDetection], width: u32, height: u32, threshold: f32) -> PersonCount {
    let (w, h) = (width as f32, height as f32);
    let boxes: Vec<PersonBox> = detections
        .iter()
        .filter(|d| d.confidence > threshold && d.class_id == PERSON_CLASS_ID)
        .map(|d| {
            let [x1, y1, x2, y2] = d.corners;
            PersonBox {
                x1: (x1 * w) as i32,
                y1: (y1 * h) as i32,
                x2: (x2 * w) as i32,
                y2: (y2 * h) as i32,
                confidence: d.confidence,
            }
        })
        .collect();

    let total: f32 = boxes.iter().map(|b| b.confidence).sum();
    let average_confidence = total / boxes.len().max(1) as f32;

    PersonCount {
        count: boxes.len(),
        average_confidence,
        boxes,
    }
}

/// MobileNet-SSD person detector.
pub struct PersonDetector {
    session: Session,
    threshold: f32,
}

impl PersonDetector {
    pub fn load(model_path: &str) -> Result<Self, PersonError> {
        Ok(Self {
            session: onnx::open_session(MOBILENET_SSD, model_path)?,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Run the network over an RGB frame and return every raw detection.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>, PersonError> {
        let outputs = onnx::infer(&mut self.session, &preprocess(image))?;
        let rows = outputs.first().ok_or(PersonError::NoOutput)?;
        Ok(RawDetection::from_rows(rows))
    }

    /// Count the people in `image` and outline each one in green.
    pub fn count_and_draw(&mut self, image: &mut RgbImage) -> Result<PersonCount, PersonError> {
        let detections = self.detect(image)?;
        let count = count_people(&detections, image.width(), image.height(), self.threshold);
        for b in &count.boxes {
            overlay::draw_box(image, b.x1, b.y1, b.x2, b.y2, PEOPLE_COLOR);
        }
        tracing::trace!(count = count.count, avg = count.average_confidence, "people counted");
        Ok(count)
    }
}

/// Resize to 300×300 and build a BGR-ordered NCHW tensor (Caffe channel order).
fn preprocess(image: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(image, SSD_INPUT_SIZE, SSD_INPUT_SIZE, FilterType::Triangle);
    onnx::planar(&resized, [2, 1, 0], |v| (f32::from(v) - SSD_MEAN) * SSD_SCALE)
}
