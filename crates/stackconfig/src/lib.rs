use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Module sections accepted under `[modules.<name>]`.
pub const KNOWN_MODULES: &[&str] = &["noise", "sdf", "circle", "color", "ascii", "curve", "texture"];

pub const DEFAULT_CURVE_ENDPOINT: &str =
    "https://api.allorigins.win/raw?url=https://sdfk-functionapp.azurewebsites.net/api/CC01_get_curve_png";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StackConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub frame: FrameSettings,
    #[serde(default)]
    pub surface: SurfaceSettings,
    #[serde(default)]
    pub curves: CurveSettings,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleOverride>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FrameSettings {
    /// Target frame rate. Zero disables throttling.
    #[serde(default = "default_fps")]
    pub fps: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SurfaceSettings {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CurveSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub batch_endpoint: Option<String>,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(
        default = "default_backoff",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub backoff: Duration,
    /// Byte budget of the durable curve store.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    #[serde(default = "default_memory_entries")]
    pub memory_entries: usize,
    #[serde(default = "default_prefetch_radius")]
    pub prefetch_radius: u32,
    #[serde(default)]
    pub offline: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModuleOverride {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub values: BTreeMap<String, ConfigValue>,
    /// Image file for the texture module.
    #[serde(default)]
    pub image: Option<PathBuf>,
}

/// A uniform override as written in TOML.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    List(Vec<f64>),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(value) => write!(f, "{value}"),
            ConfigValue::Int(value) => write!(f, "{value}"),
            ConfigValue::Float(value) => write!(f, "{value}"),
            ConfigValue::List(values) => {
                let joined = values
                    .iter()
                    .map(|value| value.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "[{joined}]")
            }
        }
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            frame: FrameSettings::default(),
            surface: SurfaceSettings::default(),
            curves: CurveSettings::default(),
            modules: BTreeMap::new(),
        }
    }
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self { fps: default_fps() }
    }
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for CurveSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            batch_endpoint: None,
            max_in_flight: default_max_in_flight(),
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            cache_capacity: default_cache_capacity(),
            memory_entries: default_memory_entries(),
            prefetch_radius: default_prefetch_radius(),
            offline: false,
        }
    }
}

fn default_version() -> u32 {
    1
}

fn default_fps() -> f32 {
    30.0
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_endpoint() -> String {
    DEFAULT_CURVE_ENDPOINT.to_string()
}

fn default_max_in_flight() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_cache_capacity() -> u64 {
    8 * 1024 * 1024
}

fn default_memory_entries() -> usize {
    256
}

fn default_prefetch_radius() -> u32 {
    5
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl StackConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: StackConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn module(&self, name: &str) -> Option<&ModuleOverride> {
        self.modules.get(name)
    }

    /// Frame interval implied by `frame.fps`, or `None` when uncapped.
    pub fn frame_interval(&self) -> Option<Duration> {
        if self.frame.fps > 0.0 {
            Some(Duration::from_secs_f32(1.0 / self.frame.fps))
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if !self.frame.fps.is_finite() || self.frame.fps < 0.0 {
            return Err(ConfigError::Invalid("frame.fps must be >= 0".into()));
        }

        if self.surface.width == 0 || self.surface.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "surface size must be non-zero, got {}x{}",
                self.surface.width, self.surface.height
            )));
        }

        let curves = &self.curves;
        if curves.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "curves.endpoint may not be empty".into(),
            ));
        }
        if let Some(batch) = &curves.batch_endpoint {
            if batch.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "curves.batch_endpoint may not be empty when set".into(),
                ));
            }
        }
        if curves.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "curves.max_in_flight must be greater than zero".into(),
            ));
        }
        if curves.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "curves.max_attempts must be greater than zero".into(),
            ));
        }
        if curves.memory_entries == 0 {
            return Err(ConfigError::Invalid(
                "curves.memory_entries must be greater than zero".into(),
            ));
        }

        for (name, section) in &self.modules {
            if !KNOWN_MODULES.contains(&name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "unknown module '{name}'; expected one of {}",
                    KNOWN_MODULES.join(", ")
                )));
            }

            if section.image.is_some() && name != "texture" {
                return Err(ConfigError::Invalid(format!(
                    "module '{name}' does not accept an image"
                )));
            }

            for uniform in section.values.keys() {
                if !uniform.starts_with('u') || uniform.len() < 2 {
                    return Err(ConfigError::Invalid(format!(
                        "module '{name}' value '{uniform}' is not a uniform name"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[frame]
fps = 24

[surface]
width = 800
height = 600

[curves]
endpoint = "http://localhost:9000/curve"
batch_endpoint = "http://localhost:9000/batch"
max_in_flight = 3
backoff = "250ms"
prefetch_radius = 2

[modules.noise]
enabled = true
values = { uFrequencyX = 3.5, uNoiseType = 1 }

[modules.texture]
image = "/tmp/overlay.png"
"#;

    #[test]
    fn parses_sample_config() {
        let config = StackConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.frame.fps, 24.0);
        assert_eq!(config.surface.width, 800);
        assert_eq!(config.curves.max_in_flight, 3);
        assert_eq!(config.curves.max_attempts, 3);
        assert_eq!(config.curves.backoff, Duration::from_millis(250));
        assert_eq!(config.curves.prefetch_radius, 2);

        let noise = config.module("noise").expect("noise section");
        assert_eq!(noise.enabled, Some(true));
        assert_eq!(
            noise.values.get("uFrequencyX"),
            Some(&ConfigValue::Float(3.5))
        );
        assert_eq!(noise.values.get("uNoiseType"), Some(&ConfigValue::Int(1)));

        let texture = config.module("texture").expect("texture section");
        assert_eq!(texture.image.as_deref(), Some(std::path::Path::new("/tmp/overlay.png")));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = StackConfig::from_toml_str("").expect("parse empty");
        assert_eq!(config.version, 1);
        assert_eq!(config.frame.fps, 30.0);
        assert_eq!(config.curves.max_in_flight, 5);
        assert_eq!(config.curves.backoff, Duration::from_secs(1));
        assert_eq!(config.curves.endpoint, DEFAULT_CURVE_ENDPOINT);
        assert!(config.modules.is_empty());
    }

    #[test]
    fn frame_interval_follows_fps() {
        let config = StackConfig::default();
        let interval = config.frame_interval().expect("capped");
        assert!((interval.as_secs_f64() - 1.0 / 30.0).abs() < 1e-6);

        let uncapped = StackConfig::from_toml_str("[frame]\nfps = 0\n").unwrap();
        assert!(uncapped.frame_interval().is_none());
    }

    #[test]
    fn rejects_unknown_module() {
        let err = StackConfig::from_toml_str("[modules.sdf]\nenabled = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = StackConfig::from_toml_str("[curves]\nmax_in_flight = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_negative_fps() {
        let err = StackConfig::from_toml_str("[frame]\nfps = -1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_image_outside_texture_module() {
        let err =
            StackConfig::from_toml_str("[modules.noise]\nimage = \"a.png\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn reports_parse_errors() {
        let err = StackConfig::from_toml_str("version = \"one\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn list_values_display() {
        let value = ConfigValue::List(vec![1.0, 0.5]);
        assert_eq!(value.to_string(), "[1, 0.5]");
    }
}
