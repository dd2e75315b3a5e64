//! Runtime configuration loaded from TOML.
//!
//! Every section has sensible defaults, so a partial file (or none at all)
//! is valid:
//!
//! ```toml
//! log_filter = "penumbra=debug"
//!
//! [window]
//! title = "shadows"
//!
//! [shading]
//! acne_bias = 0.1
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::geometry::GeometryError;

/// Errors raised while reading configuration or scene description files.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// A value parsed but makes no sense.
    #[error("Invalid value: {0}")]
    Invalid(String),

    /// Referenced geometry could not be loaded.
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),
}

/// Window creation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "penumbra".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Shadow pass settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Edge length of one cube face in texels.
    pub map_size: u32,
    /// Render back faces into the shadow map.
    pub front_face_culling: bool,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            map_size: 1024,
            front_face_culling: true,
        }
    }
}

/// Lit pass settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadingConfig {
    pub wireframe: bool,
    pub depth_debug: bool,
    pub acne_bias: f32,
    pub pcf_radius_scale_factor: f32,
}

impl Default for ShadingConfig {
    fn default() -> Self {
        Self {
            wireframe: false,
            depth_debug: false,
            acne_bias: 0.05,
            pcf_radius_scale_factor: 16.0,
        }
    }
}

/// Default projection given to lights that do not specify their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 90.0,
            near: 1.0,
            far: 125.0,
        }
    }
}

/// Viewer projection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 45.0,
            near: 1.0,
            far: 1000.0,
        }
    }
}

/// Top-level renderer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub window: WindowConfig,
    pub shadow: ShadowConfig,
    pub shading: ShadingConfig,
    pub light: LightConfig,
    pub camera: CameraConfig,
    /// `env_logger` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            shadow: ShadowConfig::default(),
            shading: ShadingConfig::default(),
            light: LightConfig::default(),
            camera: CameraConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

/// Smallest accepted shadow cube face edge.
pub const MIN_SHADOW_MAP_SIZE: u32 = 16;

impl RendererConfig {
    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Loads `path` if it exists, otherwise falls back to defaults.
    ///
    /// Parse errors are still reported; only a missing file is tolerated.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            log::info!("loading configuration from {}", path.display());
            Self::load(path)
        } else {
            log::info!("{} not found, using default configuration", path.display());
            Ok(Self::default())
        }
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serializes this configuration as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Returns a copy with every tunable clamped into its valid range.
    ///
    /// Each correction is logged as a warning.
    pub fn validated(mut self) -> Self {
        if self.shading.acne_bias < 0.0 {
            log::warn!("acne_bias {} below 0, clamping", self.shading.acne_bias);
            self.shading.acne_bias = 0.0;
        }
        if self.shading.pcf_radius_scale_factor < 1.0 {
            log::warn!(
                "pcf_radius_scale_factor {} below 1, clamping",
                self.shading.pcf_radius_scale_factor
            );
            self.shading.pcf_radius_scale_factor = 1.0;
        }
        if self.shadow.map_size < MIN_SHADOW_MAP_SIZE {
            log::warn!(
                "shadow map size {} below {}, clamping",
                self.shadow.map_size,
                MIN_SHADOW_MAP_SIZE
            );
            self.shadow.map_size = MIN_SHADOW_MAP_SIZE;
        }
        if self.light.near <= 0.0 || self.light.far <= self.light.near {
            log::warn!(
                "light planes near={} far={} invalid, using defaults",
                self.light.near,
                self.light.far
            );
            let defaults = LightConfig::default();
            self.light.near = defaults.near;
            self.light.far = defaults.far;
        }
        if (self.light.fov_degrees - 90.0).abs() > 1e-3 {
            log::warn!(
                "light fov {} degrees leaves cube faces mismatched, using 90",
                self.light.fov_degrees
            );
            self.light.fov_degrees = 90.0;
        }
        self
    }
}
