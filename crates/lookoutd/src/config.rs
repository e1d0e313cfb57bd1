use serde::Deserialize;
use std::path::Path;

/// Stream server configuration. Reads the same TOML file and `LOOKOUT_*`
/// variables as the CLI; keys it does not know are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device index, device path or MJPEG stream URL.
    pub camera: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Listen address.
    pub bind: String,
    /// Turn every frame upside down before encoding (camera mounted inverted).
    pub rotate_180: bool,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "0".to_string(),
            frame_width: 640,
            frame_height: 480,
            bind: "0.0.0.0:5000".to_string(),
            rotate_180: true,
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("invalid config {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
}

impl Config {
    /// Defaults, then the file named by `path` or `LOOKOUT_CONFIG`, then the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path
            .map(|p| p.to_string_lossy().into_owned())
            .or_else(|| std::env::var("LOOKOUT_CONFIG").ok());
        let mut config = match file {
            Some(file) => Self::from_file(Path::new(&file))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path: display, source })
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LOOKOUT_CAMERA") {
            self.camera = v;
        }
        if let Some(v) = lookup("LOOKOUT_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("LOOKOUT_ROTATE_180") {
            self.rotate_180 = !matches!(v.trim(), "0" | "false" | "no" | "off");
        }
        self.frame_width = env_or(&lookup, "LOOKOUT_FRAME_WIDTH", self.frame_width);
        self.frame_height = env_or(&lookup, "LOOKOUT_FRAME_HEIGHT", self.frame_height);
        self.jpeg_quality = env_or(&lookup, "LOOKOUT_JPEG_QUALITY", self.jpeg_quality).clamp(1, 100);
    }
}

fn env_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind, "0.0.0.0:5000");
        assert!(config.rotate_180);
        assert_eq!((config.frame_width, config.frame_height), (640, 480));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LOOKOUT_ROTATE_180", "0"),
            ("LOOKOUT_JPEG_QUALITY", "250"),
            ("LOOKOUT_FRAME_HEIGHT", "tall"),
            ("LOOKOUT_BIND", "127.0.0.1:8080"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert!(!config.rotate_180);
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.frame_height, 480);
        assert_eq!(config.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_from_file_shares_cli_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lookout.toml");
        std::fs::write(&path, "camera = \"/dev/video1\"\nreference_dir = \"faces\"\njpeg_quality = 60\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.camera, "/dev/video1");
        assert_eq!(config.jpeg_quality, 60);
        assert!(config.rotate_180);
    }
}
