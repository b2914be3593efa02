//! Core library of the spectrograph visualiser.
//!
//! Audio is analysed into byte spectra, scene graphs and other layers render
//! into their own offscreen targets, and a generated composition shader blends
//! the layers onto the screen. Every graphics call goes through an explicit
//! [`gl::GraphicsContext`], so the whole pipeline also runs against the
//! recording [`gl::HeadlessContext`].

pub mod analysis;
pub mod assets;
pub mod audio;
pub mod camera;
pub mod config;
pub mod error;
pub mod gl;
pub mod pipeline;
pub mod render;
pub mod scene;
pub mod shader;
pub mod timeline;
pub mod transform;

/// Asset path under which the bundled composition template is published.
pub const DEFAULT_TEMPLATE_PATH: &str = "shaders/compose.frag.template";

pub use analysis::FrequencyAnalyser;
pub use assets::{AssetSource, AssetStore, FileAssetSource};
pub use audio::{AudioSession, SpectrumHandle};
pub use camera::{Camera, Projectable, Projection};
pub use config::{AppConfig, AudioConfig, LayerConfig, LayerKind, RenderConfig};
pub use error::{Result, TemplateError, VisualizerError};
pub use pipeline::Visualizer;
pub use render::{BlendMode, Extent, RenderLayer, Renderer, RendererSettings, RendererState};
pub use scene::{Scene, SceneObject};
pub use shader::{PostProcessor, ProgramRegistry};
pub use timeline::PlaybackClock;
pub use transform::Transform;
