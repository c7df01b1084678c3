use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{DetectionParams, DEFAULT_CONFIDENCE, DEFAULT_IOU};

const DEFAULT_RESULTS_DIR: &str = "results";
const DEFAULT_FRAME_INTERVAL_MS: u64 = 33;
const DEFAULT_BACKEND: &str = "cpu";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MIN_AREA: usize = 16;
const DEFAULT_FALLBACK_FPS: f64 = 30.0;
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_DISPLAY_WIDTH: u32 = 640;
const DEFAULT_DISPLAY_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_TEMPLATE: &str = "/dev/video{index}";
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_ACCOUNTS_PATH: &str = "accounts.json";

const INDEX_PLACEHOLDER: &str = "{index}";

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    results_dir: Option<PathBuf>,
    frame_interval_ms: Option<u64>,
    detection: Option<DetectionConfigFile>,
    detector: Option<DetectorConfigFile>,
    camera: Option<CameraConfigFile>,
    output: Option<OutputConfigFile>,
    display: Option<DisplayConfigFile>,
    accounts: Option<AccountsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence: Option<f32>,
    iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
    min_area: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device_template: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    record_video: Option<bool>,
    record_camera: Option<bool>,
    fallback_fps: Option<f64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AccountsConfigFile {
    path: Option<PathBuf>,
    require_login: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub results_dir: PathBuf,
    pub frame_interval: Duration,
    pub detection: DetectionParams,
    pub detector: DetectorSettings,
    pub sources: SourceSettings,
    pub output: OutputSettings,
    pub display: DisplaySettings,
    pub accounts: AccountSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub class_names: Vec<String>,
    pub min_area: usize,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub camera_device_template: String,
    pub camera_fps: u32,
    pub camera_width: u32,
    pub camera_height: u32,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub record_video: bool,
    pub record_camera: bool,
    pub fallback_fps: f64,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySettings {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct AccountSettings {
    pub path: PathBuf,
    pub require_login: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            class_names: Vec::new(),
            min_area: DEFAULT_MIN_AREA,
        }
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            camera_device_template: DEFAULT_CAMERA_TEMPLATE.to_string(),
            camera_fps: DEFAULT_CAMERA_FPS,
            camera_width: DEFAULT_CAMERA_WIDTH,
            camera_height: DEFAULT_CAMERA_HEIGHT,
        }
    }
}

impl SourceSettings {
    /// Device path for camera `index`.
    ///
    /// A `stub://` template without a placeholder gets the index appended so
    /// distinct indices stay distinct devices.
    pub fn camera_device(&self, index: u32) -> String {
        let template = &self.camera_device_template;
        if template.contains(INDEX_PLACEHOLDER) {
            template.replace(INDEX_PLACEHOLDER, &index.to_string())
        } else {
            format!("{}{}", template, index)
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            record_video: true,
            record_camera: false,
            fallback_fps: DEFAULT_FALLBACK_FPS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_DISPLAY_WIDTH,
            height: DEFAULT_DISPLAY_HEIGHT,
        }
    }
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_ACCOUNTS_PATH),
            require_login: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            frame_interval: Duration::from_millis(DEFAULT_FRAME_INTERVAL_MS),
            detection: DetectionParams::default(),
            detector: DetectorSettings::default(),
            sources: SourceSettings::default(),
            output: OutputSettings::default(),
            display: DisplaySettings::default(),
            accounts: AccountSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load from the file named by `INSPECT_CONFIG` (if any), then apply
    /// `INSPECT_*` environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("INSPECT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let defaults = Self::default();

        let detection = file.detection.unwrap_or_default();
        let detection = DetectionParams::new(
            detection.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            detection.iou.unwrap_or(DEFAULT_IOU),
        );

        let detector = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector.backend.unwrap_or(defaults.detector.backend),
            model_path: detector.model_path,
            input_size: detector.input_size.unwrap_or(defaults.detector.input_size),
            class_names: detector.class_names.unwrap_or_default(),
            min_area: detector.min_area.unwrap_or(defaults.detector.min_area),
        };

        let camera = file.camera.unwrap_or_default();
        let sources = SourceSettings {
            camera_device_template: camera
                .device_template
                .unwrap_or(defaults.sources.camera_device_template),
            camera_fps: camera.target_fps.unwrap_or(defaults.sources.camera_fps),
            camera_width: camera.width.unwrap_or(defaults.sources.camera_width),
            camera_height: camera.height.unwrap_or(defaults.sources.camera_height),
        };

        let output = file.output.unwrap_or_default();
        let output = OutputSettings {
            record_video: output.record_video.unwrap_or(defaults.output.record_video),
            record_camera: output.record_camera.unwrap_or(defaults.output.record_camera),
            fallback_fps: output.fallback_fps.unwrap_or(defaults.output.fallback_fps),
            jpeg_quality: output.jpeg_quality.unwrap_or(defaults.output.jpeg_quality),
        };

        let display = file.display.unwrap_or_default();
        let display = DisplaySettings {
            width: display.width.unwrap_or(defaults.display.width),
            height: display.height.unwrap_or(defaults.display.height),
        };

        let accounts = file.accounts.unwrap_or_default();
        let accounts = AccountSettings {
            path: accounts.path.unwrap_or(defaults.accounts.path),
            require_login: accounts
                .require_login
                .unwrap_or(defaults.accounts.require_login),
        };

        Self {
            results_dir: file.results_dir.unwrap_or(defaults.results_dir),
            frame_interval: file
                .frame_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.frame_interval),
            detection,
            detector,
            sources,
            output,
            display,
            accounts,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = non_empty_env("INSPECT_RESULTS_DIR") {
            self.results_dir = PathBuf::from(dir);
        }
        if let Some(backend) = non_empty_env("INSPECT_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(path) = non_empty_env("INSPECT_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(value) = non_empty_env("INSPECT_CONFIDENCE") {
            let confidence: f32 = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("INSPECT_CONFIDENCE must be a number, got '{}'", value))?;
            self.detection.set_confidence(confidence);
        }
        if let Some(value) = non_empty_env("INSPECT_IOU") {
            let iou: f32 = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("INSPECT_IOU must be a number, got '{}'", value))?;
            self.detection.set_iou(iou);
        }
        if let Some(value) = non_empty_env("INSPECT_FRAME_INTERVAL_MS") {
            let millis: u64 = value.trim().parse().map_err(|_| {
                anyhow!("INSPECT_FRAME_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.frame_interval = Duration::from_millis(millis);
        }
        if let Some(template) = non_empty_env("INSPECT_CAMERA_DEVICE") {
            self.sources.camera_device_template = template;
        }
        if let Some(value) = non_empty_env("INSPECT_RECORD_CAMERA") {
            self.output.record_camera = parse_bool("INSPECT_RECORD_CAMERA", &value)?;
        }
        if let Some(path) = non_empty_env("INSPECT_ACCOUNTS_PATH") {
            self.accounts.path = PathBuf::from(path);
        }
        if let Some(value) = non_empty_env("INSPECT_REQUIRE_LOGIN") {
            self.accounts.require_login = parse_bool("INSPECT_REQUIRE_LOGIN", &value)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        // Re-clamp anything that arrived from a file.
        self.detection = DetectionParams::new(self.detection.confidence(), self.detection.iou());

        if self.frame_interval.is_zero() {
            return Err(anyhow!("frame interval must be greater than zero"));
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(anyhow!(
                "jpeg_quality must be between 1 and 100, got {}",
                self.output.jpeg_quality
            ));
        }
        if !self.output.fallback_fps.is_finite() || self.output.fallback_fps <= 0.0 {
            return Err(anyhow!("fallback_fps must be a positive number"));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow!("display area must be non-zero"));
        }
        if self.detector.backend.trim().is_empty() {
            return Err(anyhow!("detector backend name must not be empty"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        let template = &self.sources.camera_device_template;
        if !template.starts_with(crate::ingest::STUB_SCHEME) && !template.contains(INDEX_PLACEHOLDER)
        {
            return Err(anyhow!(
                "camera device template '{}' must contain {}",
                template,
                INDEX_PLACEHOLDER
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("{} must be a boolean, got '{}'", key, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_device_substitutes_index() {
        let settings = SourceSettings::default();
        assert_eq!(settings.camera_device(2), "/dev/video2");

        let stub = SourceSettings {
            camera_device_template: "stub://bench".to_string(),
            ..SourceSettings::default()
        };
        assert_eq!(stub.camera_device(0), "stub://bench0");
    }

    #[test]
    fn file_values_fill_defaults() {
        let file: AppConfigFile = toml::from_str(
            r#"
            results_dir = "out"
            [detection]
            confidence = 1.7
            [output]
            record_camera = true
            "#,
        )
        .unwrap();
        let mut cfg = AppConfig::from_file(file);
        cfg.validate().unwrap();
        assert_eq!(cfg.results_dir, PathBuf::from("out"));
        assert_eq!(cfg.detection.confidence(), 1.0);
        assert_eq!(cfg.detection.iou(), DEFAULT_IOU);
        assert!(cfg.output.record_camera);
        assert!(cfg.output.record_video);
        assert_eq!(cfg.frame_interval, Duration::from_millis(33));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.frame_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.output.jpeg_quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.sources.camera_device_template = "/dev/video".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.display.width = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("K", "Yes").unwrap());
        assert!(!parse_bool("K", "0").unwrap());
        assert!(parse_bool("K", "maybe").is_err());
    }
}
