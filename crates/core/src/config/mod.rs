use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::render::{BlendMode, Extent};
use crate::{Result, VisualizerError, DEFAULT_TEMPLATE_PATH};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub render: RenderConfig,
}

impl AppConfig {
    /// Parses and validates a JSON document. Missing sections fall back to
    /// their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.render.validate()
    }
}

/// Configuration of the frequency analyser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Window length; a power of two between 32 and 32768.
    pub fft_size: usize,
    /// Weight of the previous frame in the smoothed magnitudes, in [0, 1].
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            fft_size: 2048,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(VisualizerError::InvalidInput("sample rate must be non-zero"));
        }
        if !self.fft_size.is_power_of_two() || !(32..=32_768).contains(&self.fft_size) {
            return Err(VisualizerError::InvalidInput(
                "fft size must be a power of two between 32 and 32768",
            ));
        }
        if !(0.0..=1.0).contains(&self.smoothing_time_constant) {
            return Err(VisualizerError::InvalidInput(
                "smoothing time constant must lie in [0, 1]",
            ));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(VisualizerError::InvalidInput(
                "min decibels must be below max decibels",
            ));
        }
        Ok(())
    }
}

/// Layers, sizes and composition template of the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub render_size: Extent,
    pub output_size: Extent,
    pub background: [f32; 4],
    /// Asset path of the composition shader template.
    pub composition_template: String,
    pub layers: Vec<LayerConfig>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            render_size: Extent::new(1280, 720),
            output_size: Extent::new(1280, 720),
            background: [0.0, 0.0, 0.0, 1.0],
            composition_template: DEFAULT_TEMPLATE_PATH.to_string(),
            layers: vec![
                LayerConfig {
                    name: "grid".to_string(),
                    kind: LayerKind::default(),
                    blend: BlendMode::Normal,
                },
                LayerConfig {
                    name: "waveform".to_string(),
                    kind: LayerKind::Waveform,
                    blend: BlendMode::Add,
                },
            ],
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(VisualizerError::NoLayers);
        }
        if self.render_size.is_empty() {
            return Err(VisualizerError::InvalidInput("render size must be non-zero"));
        }
        if self.output_size.is_empty() {
            return Err(VisualizerError::InvalidInput("output size must be non-zero"));
        }
        if self.composition_template.is_empty() {
            return Err(VisualizerError::InvalidInput(
                "composition template path must not be empty",
            ));
        }
        for layer in &self.layers {
            if let LayerKind::Grid { width, height, .. } = layer.kind {
                if width == 0 || height == 0 {
                    return Err(VisualizerError::InvalidInput(
                        "grid layers need at least one intersection",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn blend_modes(&self) -> Vec<BlendMode> {
        self.layers.iter().map(|layer| layer.blend).collect()
    }
}

/// One entry of the layer stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    pub kind: LayerKind,
    #[serde(default)]
    pub blend: BlendMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerKind {
    /// Audio-reactive light grid seen through a perspective camera.
    Grid {
        width: u32,
        height: u32,
        /// Distance between neighbouring intersections.
        unit: f32,
        thickness: f32,
        color: [f32; 4],
        /// Frequency driving the grid's height.
        #[serde(default = "default_grid_frequency")]
        frequency_hz: f32,
    },
    /// Fills the layer with a single color.
    Solid { color: [f32; 4] },
    /// Oscilloscope view of the latest audio block.
    Waveform,
}

impl Default for LayerKind {
    fn default() -> Self {
        LayerKind::Grid {
            width: 8,
            height: 8,
            unit: 1.0,
            thickness: 0.05,
            color: [0.2, 0.8, 1.0, 1.0],
            frequency_hz: default_grid_frequency(),
        }
    }
}

fn default_grid_frequency() -> f32 {
    120.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.audio.fft_size, 2048);
        assert_eq!(
            config.render.blend_modes(),
            vec![BlendMode::Normal, BlendMode::Add]
        );
    }

    #[test]
    fn parses_partial_documents() {
        let config = AppConfig::from_json_str(
            r#"{
                "audio": { "fft_size": 1024 },
                "render": {
                    "render_size": { "width": 640, "height": 360 },
                    "layers": [
                        { "name": "backdrop", "kind": { "type": "solid", "color": [0, 0, 0, 1] } },
                        { "name": "scope", "kind": { "type": "waveform" }, "blend": "ADD" }
                    ]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.audio.fft_size, 1024);
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.render.render_size, Extent::new(640, 360));
        assert_eq!(config.render.layers.len(), 2);
        assert_eq!(config.render.layers[0].blend, BlendMode::Normal);
        assert_eq!(config.render.layers[1].kind, LayerKind::Waveform);
        assert_eq!(config.render.composition_template, DEFAULT_TEMPLATE_PATH);
    }

    #[test]
    fn json_output_parses_back() {
        let config = AppConfig::default();
        let json = config.to_json_string().unwrap();
        assert!(json.contains("\"type\": \"waveform\""));
        assert_eq!(AppConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn rejects_empty_layer_stack() {
        let err = AppConfig::from_json_str(r#"{ "render": { "layers": [] } }"#).unwrap_err();
        assert!(matches!(err, VisualizerError::NoLayers));
    }

    #[test]
    fn rejects_invalid_audio_settings() {
        let mut audio = AudioConfig::default();
        audio.fft_size = 1000;
        assert!(audio.validate().is_err());

        let mut audio = AudioConfig::default();
        audio.min_decibels = -20.0;
        assert!(audio.validate().is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = AppConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, VisualizerError::Io(_)));
    }
}
