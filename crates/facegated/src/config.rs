use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by
/// `FACEGATE_CONFIG`, then `FACEGATE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the three ONNX model files.
    pub model_dir: PathBuf,
    /// Base URL of the reference image backend. Takes precedence over `reference_dir`.
    pub reference_url: Option<String>,
    /// Directory of local reference images, labelled by file stem.
    pub reference_dir: Option<PathBuf>,
    /// Overlay detection period in milliseconds.
    pub overlay_interval_ms: u64,
    /// Size of the overlay surface detections are rescaled to.
    pub display_width: u32,
    pub display_height: u32,
    /// Reference images fetched concurrently.
    pub fetch_concurrency: usize,
    pub fetch_timeout_secs: u64,
    pub decode_timeout_secs: u64,
    pub inference_timeout_secs: u64,
    pub camera_timeout_secs: u64,
    pub model_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: facegate_core::default_model_dir(),
            reference_url: None,
            reference_dir: None,
            overlay_interval_ms: 300,
            display_width: 640,
            display_height: 480,
            fetch_concurrency: 4,
            fetch_timeout_secs: 10,
            decode_timeout_secs: 5,
            inference_timeout_secs: 5,
            camera_timeout_secs: 10,
            model_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("FACEGATE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Apply `FACEGATE_*` overrides from `lookup`. Unparseable values keep the current setting.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("FACEGATE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_REFERENCE_URL").filter(|v| !v.is_empty()) {
            self.reference_url = Some(v);
        }
        if let Some(v) = lookup("FACEGATE_REFERENCE_DIR").filter(|v| !v.is_empty()) {
            self.reference_dir = Some(PathBuf::from(v));
        }
        self.overlay_interval_ms = parse_or(&lookup, "FACEGATE_OVERLAY_INTERVAL_MS", self.overlay_interval_ms);
        self.display_width = parse_or(&lookup, "FACEGATE_DISPLAY_WIDTH", self.display_width);
        self.display_height = parse_or(&lookup, "FACEGATE_DISPLAY_HEIGHT", self.display_height);
        self.fetch_concurrency = parse_or(&lookup, "FACEGATE_FETCH_CONCURRENCY", self.fetch_concurrency);
        self.fetch_timeout_secs = parse_or(&lookup, "FACEGATE_FETCH_TIMEOUT_SECS", self.fetch_timeout_secs);
        self.decode_timeout_secs = parse_or(&lookup, "FACEGATE_DECODE_TIMEOUT_SECS", self.decode_timeout_secs);
        self.inference_timeout_secs = parse_or(&lookup, "FACEGATE_INFERENCE_TIMEOUT_SECS", self.inference_timeout_secs);
        self.camera_timeout_secs = parse_or(&lookup, "FACEGATE_CAMERA_TIMEOUT_SECS", self.camera_timeout_secs);
        self.model_timeout_secs = parse_or(&lookup, "FACEGATE_MODEL_TIMEOUT_SECS", self.model_timeout_secs);
        self
    }

    pub fn overlay_interval(&self) -> Duration {
        Duration::from_millis(self.overlay_interval_ms.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_secs(self.decode_timeout_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn camera_timeout(&self) -> Duration {
        Duration::from_secs(self.camera_timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    /// Local reference directory used when no URL or directory is configured.
    pub fn default_reference_dir() -> PathBuf {
        std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate/references")
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.overlay_interval(), Duration::from_millis(300));
        assert_eq!(config.fetch_concurrency, 4);
        assert_eq!((config.display_width, config.display_height), (640, 480));
        assert!(config.reference_url.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default().with_overrides(lookup(&[
            ("FACEGATE_CAMERA_DEVICE", "/dev/video4"),
            ("FACEGATE_REFERENCE_URL", "http://localhost:3000"),
            ("FACEGATE_OVERLAY_INTERVAL_MS", "500"),
            ("FACEGATE_FETCH_CONCURRENCY", "8"),
        ]));
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.reference_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(config.overlay_interval_ms, 500);
        assert_eq!(config.fetch_concurrency, 8);
    }

    #[test]
    fn test_bad_override_keeps_value() {
        let config = Config::default().with_overrides(lookup(&[("FACEGATE_FETCH_TIMEOUT_SECS", "soon")]));
        assert_eq!(config.fetch_timeout_secs, 10);
    }

    #[test]
    fn test_toml_layer_then_env() {
        let file: Config = toml::from_str(
            r#"
            camera_device = "/dev/video2"
            reference_dir = "/srv/faces"
            display_width = 1280
            "#,
        )
        .unwrap();
        assert_eq!(file.camera_device, "/dev/video2");
        assert_eq!(file.display_width, 1280);
        // unspecified keys fall back to defaults
        assert_eq!(file.display_height, 480);

        let config = file.with_overrides(lookup(&[("FACEGATE_DISPLAY_WIDTH", "800")]));
        assert_eq!(config.display_width, 800);
        assert_eq!(config.reference_dir, Some(PathBuf::from("/srv/faces")));
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file(Path::new("/nonexistent/facegate.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
