use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// "device" (local camera via OpenCV) or "mjpeg" (HTTP multipart stream).
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub device_index: i32,
    /// Stream URL for the "mjpeg" backend.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Four-character capture format hint.
    #[serde(default = "default_fourcc")]
    pub fourcc: String,
    /// Show a preview window; pressing `q` in it stops the loop.
    #[serde(default)]
    pub preview: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplerConfig {
    /// Submit every Nth frame.
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_instruction")]
    pub instruction: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            device_index: 0,
            url: String::new(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            fourcc: default_fourcc(),
            preview: false,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            instruction: default_instruction(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl InferenceConfig {
    /// Full URL of the chat completions endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    /// Load `path` if it exists, otherwise fall back to built-in defaults.
    /// Returns whether the file was found alongside the config.
    pub fn load_or_default(path: &Path) -> Result<(Self, bool), ConfigError> {
        if path.exists() {
            Ok((Self::load(path)?, true))
        } else {
            Ok((Self::default(), false))
        }
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampler.interval == 0 {
            return Err(ConfigError::Invalid("sampler.interval must be at least 1".into()));
        }
        if !(1..=100).contains(&self.inference.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "inference.jpeg_quality must be in 1..=100, got {}",
                self.inference.jpeg_quality
            )));
        }
        if self.inference.max_tokens == 0 {
            return Err(ConfigError::Invalid("inference.max_tokens must be at least 1".into()));
        }
        if self.inference.timeout_secs == 0 {
            return Err(ConfigError::Invalid("inference.timeout_secs must be at least 1".into()));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "capture dimensions must be positive, got {}x{}",
                self.capture.width, self.capture.height
            )));
        }
        if self.capture.fourcc.chars().count() != 4 {
            return Err(ConfigError::Invalid(format!(
                "capture.fourcc must be four characters, got {:?}",
                self.capture.fourcc
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_backend() -> String {
    "device".into()
}
fn default_width() -> u32 {
    160
}
fn default_height() -> u32 {
    120
}
fn default_fps() -> f64 {
    10.0
}
fn default_fourcc() -> String {
    "MJPG".into()
}
fn default_interval() -> u64 {
    10
}
fn default_tick_interval_ms() -> u64 {
    200
}
fn default_base_url() -> String {
    "http://localhost:8080".into()
}
fn default_model() -> String {
    "smolvlm".into()
}
fn default_instruction() -> String {
    "Describe what you see in this image in one sentence.".into()
}
fn default_max_tokens() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_output_path() -> String {
    "output.txt".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.capture.backend, "device");
        assert_eq!(config.capture.device_index, 0);
        assert_eq!((config.capture.width, config.capture.height), (160, 120));
        assert_eq!(config.capture.fps, 10.0);
        assert_eq!(config.capture.fourcc, "MJPG");
        assert_eq!(config.sampler.interval, 10);
        assert_eq!(config.sampler.tick_interval_ms, 200);
        assert_eq!(config.inference.max_tokens, 100);
        assert_eq!(config.inference.timeout_secs, 30);
        assert_eq!(config.inference.jpeg_quality, 80);
        assert_eq!(config.output.path, "output.txt");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [sampler]
            interval = 3

            [inference]
            base_url = "http://pi.local:8080/"
            instruction = "What is on the desk?"
            "#,
        )
        .unwrap();
        assert_eq!(config.sampler.interval, 3);
        assert_eq!(config.sampler.tick_interval_ms, 200);
        assert_eq!(config.inference.instruction, "What is on the desk?");
        assert_eq!(config.inference.max_tokens, 100);
        assert_eq!(
            config.inference.endpoint(),
            "http://pi.local:8080/v1/chat/completions"
        );
    }

    #[test]
    fn zero_interval_rejected() {
        let err = Config::parse("[sampler]\ninterval = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn quality_out_of_range_rejected() {
        let err = Config::parse("[inference]\njpeg_quality = 101\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = Config::parse("[inference]\njpeg_quality = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = Config::parse("[sampler\ninterval = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_default_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let (config, found) = Config::load_or_default(&dir.path().join("config.toml")).unwrap();
        assert!(!found);
        assert_eq!(config.sampler.interval, 10);
    }

    #[test]
    fn explicit_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile(_, _)));
    }
}
