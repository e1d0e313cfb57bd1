//! lookout-core — person counting and face recognition engine.
//!
//! MobileNet-SSD counts people, SCRFD finds faces and ArcFace encodes them,
//! all running via ONNX Runtime on the CPU. Encodings are matched against a
//! registry built from a folder of reference images.

pub mod alignment;
pub mod detector;
pub mod matcher;
pub mod onnx;
pub mod overlay;
pub mod person;
pub mod recognizer;
pub mod registry;
pub mod types;

pub use detector::FaceDetector;
pub use matcher::{FaceEncoder, FaceMatcher, FacePipeline, Recognition};
pub use overlay::Label;
pub use person::{PersonCount, PersonDetector};
pub use recognizer::FaceRecognizer;
pub use registry::Registry;
pub use types::{BoundingBox, Embedding, MatchPolicy, MatchResult, Matcher, Reference};

/// File name of the SCRFD face detection model.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";
/// File name of the MobileNet-SSD person detection model.
pub const PERSON_MODEL_FILE: &str = "mobilenet_ssd.onnx";
