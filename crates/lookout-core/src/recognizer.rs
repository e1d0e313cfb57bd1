//! ArcFace (w600k_r50) encoder: aligned 112×112 crop in, unit-length
//! 512-d encoding out.

use crate::alignment;
use crate::onnx::{self, ModelError, ModelKind};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use thiserror::Error;

const ENCODING_LEN: usize = 512;
const ENCODER_TAG: &str = "w600k_r50";
/// Pixels map to [-1, 1].
const PIXEL_CENTER: f32 = 127.5;

const ARCFACE: ModelKind = ModelKind {
    name: "ArcFace",
    hint: "w600k_r50.onnx ships in the insightface buffalo_l pack",
};

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("encoding has {0} values, expected 512")]
    WrongLength(usize),
    #[error("cannot align a face without detector landmarks")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        let session = onnx::open_session(ARCFACE, model_path)?;
        Ok(Self { session })
    }

    /// Encode one detected face of `image`. The face must carry landmarks.
    pub fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let points = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let crop = alignment::align_face(image, points);

        let outputs = onnx::infer(&mut self.session, &to_input(&crop))?;
        let mut values = outputs.into_iter().next().unwrap_or_default();
        if values.len() != ENCODING_LEN {
            return Err(RecognizerError::WrongLength(values.len()));
        }
        normalize_in_place(&mut values);

        Ok(Embedding {
            values,
            model_version: Some(ENCODER_TAG.to_string()),
        })
    }
}

fn to_input(crop: &RgbImage) -> Array4<f32> {
    onnx::planar(crop, [0, 1, 2], |v| (f32::from(v) - PIXEL_CENTER) / PIXEL_CENTER)
}

/// Scale to unit length; an all-zero vector is left alone.
fn normalize_in_place(values: &mut [f32]) {
    let length = values.iter().fold(0.0f32, |acc, v| acc + v * v).sqrt();
    if length > 0.0 {
        values.iter_mut().for_each(|v| *v /= length);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::ALIGNED_SIZE;
    use image::Rgb;

    #[test]
    fn input_is_rgb_in_unit_range() {
        let crop = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([255, 127, 0]));
        let input = to_input(&crop);
        assert_eq!(input.shape(), &[1, 3, 112, 112]);
        assert!((input[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((input[[0, 1, 5, 5]] + 0.5 / 127.5).abs() < 1e-6);
        assert!((input[[0, 2, 5, 5]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_scales_to_unit_length() {
        let mut v = [3.0, 4.0];
        normalize_in_place(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);

        let mut zero = [0.0, 0.0];
        normalize_in_place(&mut zero);
        assert_eq!(zero, [0.0, 0.0]);
    }
}
