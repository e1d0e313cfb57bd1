use anyhow::{Context, Result};
use lookout_core::matcher::DEFAULT_TOLERANCE;
use lookout_core::person::DEFAULT_CONFIDENCE_THRESHOLD;
use lookout_core::MatchPolicy;
use lookout_hw::CameraSpec;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File the capture step saves the reference photo as.
pub const REFERENCE_PHOTO: &str = "Person_Found.jpg";

/// CLI configuration: defaults, then an optional TOML file, then
/// `LOOKOUT_*` environment variables. Command-line flags are applied last
/// by `main`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device index, device path or MJPEG stream URL.
    pub camera: String,
    /// Folder of reference images, one person per file, named by file stem.
    pub reference_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum encoding distance for a face to take a registry name.
    pub face_tolerance: f32,
    pub match_policy: MatchPolicy,
    /// Minimum person detection confidence.
    pub person_confidence: f32,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Overlay text size in window pixels.
    pub font_size: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "0".to_string(),
            reference_dir: PathBuf::from("images"),
            model_dir: PathBuf::from("models"),
            face_tolerance: DEFAULT_TOLERANCE,
            match_policy: MatchPolicy::default(),
            person_confidence: DEFAULT_CONFIDENCE_THRESHOLD,
            frame_width: 640,
            frame_height: 480,
            font_size: 28.0,
        }
    }
}

impl Config {
    /// Load the file named by `path` (or `LOOKOUT_CONFIG`), then apply the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("LOOKOUT_CONFIG").map(PathBuf::from));

        let mut config = match file {
            Some(file) => Self::from_file(&file)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Override fields from `LOOKOUT_*` variables. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LOOKOUT_CAMERA") {
            self.camera = v;
        }
        if let Some(v) = lookup("LOOKOUT_REFERENCE_DIR") {
            self.reference_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOOKOUT_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        env_parse(&lookup, "LOOKOUT_FACE_TOLERANCE", &mut self.face_tolerance);
        env_parse(&lookup, "LOOKOUT_MATCH_POLICY", &mut self.match_policy);
        env_parse(&lookup, "LOOKOUT_PERSON_CONFIDENCE", &mut self.person_confidence);
        env_parse(&lookup, "LOOKOUT_FRAME_WIDTH", &mut self.frame_width);
        env_parse(&lookup, "LOOKOUT_FRAME_HEIGHT", &mut self.frame_height);
        env_parse(&lookup, "LOOKOUT_FONT_SIZE", &mut self.font_size);
    }

    pub fn camera_spec(&self) -> Result<CameraSpec> {
        self.camera
            .parse()
            .map_err(|e: String| anyhow::anyhow!("invalid camera {:?}: {e}", self.camera))
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_path(lookout_core::SCRFD_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_path(lookout_core::ARCFACE_MODEL_FILE)
    }

    /// Path to the MobileNet-SSD person model.
    pub fn person_model_path(&self) -> String {
        self.model_path(lookout_core::PERSON_MODEL_FILE)
    }

    pub fn reference_photo_path(&self) -> PathBuf {
        self.reference_dir.join(REFERENCE_PHOTO)
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

fn env_parse<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment variable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.camera, "0");
        assert_eq!(config.reference_dir, PathBuf::from("images"));
        assert!((config.face_tolerance - 1.10).abs() < 1e-6);
        assert!((config.person_confidence - 0.2).abs() < 1e-6);
        assert_eq!(config.match_policy, MatchPolicy::Nearest);
        assert_eq!((config.frame_width, config.frame_height), (640, 480));
    }

    #[test]
    fn test_env_overrides_and_bad_values() {
        let vars = env(&[
            ("LOOKOUT_CAMERA", "http://pi.local:5000/video_feed"),
            ("LOOKOUT_MATCH_POLICY", "first"),
            ("LOOKOUT_FACE_TOLERANCE", "0.9"),
            ("LOOKOUT_FRAME_WIDTH", "wide"),
        ]);
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).cloned());

        assert_eq!(config.match_policy, MatchPolicy::First);
        assert!((config.face_tolerance - 0.9).abs() < 1e-6);
        assert_eq!(config.frame_width, 640);
        assert_eq!(
            config.camera_spec().unwrap(),
            CameraSpec::Url("http://pi.local:5000/video_feed".into())
        );
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lookout.toml");
        std::fs::write(
            &path,
            "camera = \"/dev/video2\"\nmodel_dir = \"/opt/models\"\nmatch_policy = \"first\"\nbind = \"0.0.0.0:8080\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.camera, "/dev/video2");
        assert_eq!(config.match_policy, MatchPolicy::First);
        assert_eq!(config.scrfd_model_path(), "/opt/models/det_10g.onnx");
        assert_eq!(config.reference_dir, PathBuf::from("images"));
    }

    #[test]
    fn test_from_file_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "face_tolerance = \"close\"\n").unwrap();
        assert!(Config::from_file(&path).is_err());
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_reference_photo_path() {
        let config = Config {
            reference_dir: PathBuf::from("/tmp/refs"),
            ..Config::default()
        };
        assert_eq!(config.reference_photo_path(), PathBuf::from("/tmp/refs/Person_Found.jpg"));
    }
}
