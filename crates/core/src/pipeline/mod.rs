use glam::{Quat, Vec3, Vec4};
use tracing::{debug, info};

use crate::assets::AssetSource;
use crate::config::{AppConfig, LayerConfig, LayerKind};
use crate::gl::GraphicsContext;
use crate::render::{Extent, RenderLayer, Renderer, RendererSettings, SolidLayer, WaveformLayer};
use crate::scene::{GridSettings, LightGrid, Scene, SceneObject};
use crate::shader::ProgramRegistry;
use crate::{AudioSession, Camera, PlaybackClock, Result};

/// Vertical field of view of grid scenes.
const GRID_FOV_Y: f32 = std::f32::consts::FRAC_PI_3;
/// Downward tilt of grid cameras.
const GRID_TILT: f32 = -0.9;

/// Everything needed to turn audio blocks into frames: the analyser, the
/// program registry, the layered renderer and the application clock.
#[derive(Debug)]
pub struct Visualizer {
    config: AppConfig,
    audio: AudioSession,
    registry: ProgramRegistry,
    renderer: Renderer,
    clock: PlaybackClock,
}

impl Visualizer {
    /// Builds the layer stack described by `config`. The renderer waits for
    /// [`Visualizer::load`] before drawing anything.
    pub fn new(gl: &mut dyn GraphicsContext, config: AppConfig) -> Result<Self> {
        config.validate()?;
        let audio = AudioSession::new(&config.audio)?;
        let mut registry = ProgramRegistry::new();

        let render = &config.render;
        let layers = render
            .layers
            .iter()
            .map(|layer| build_layer(gl, &mut registry, &audio, render.render_size, layer))
            .collect::<Result<Vec<_>>>()?;
        let settings = RendererSettings {
            render_size: render.render_size,
            output_size: render.output_size,
            background: Vec4::from_array(render.background),
            ..RendererSettings::default()
        };
        let renderer = Renderer::new(gl, settings, layers, render.blend_modes())?;

        info!(
            layers = render.layers.len(),
            sample_rate = config.audio.sample_rate,
            "visualizer constructed"
        );
        Ok(Self {
            config,
            audio,
            registry,
            renderer,
            clock: PlaybackClock::new(),
        })
    }

    /// Fetches the composition template named in the configuration and
    /// finishes the renderer.
    pub async fn load(
        &mut self,
        gl: &mut dyn GraphicsContext,
        assets: &dyn AssetSource,
    ) -> Result<()> {
        self.renderer
            .load_composition(
                gl,
                &mut self.registry,
                assets,
                &self.config.render.composition_template,
            )
            .await
    }

    /// Feeds one audio block, advances the clock by `delta` seconds and
    /// renders a frame.
    pub fn frame(
        &mut self,
        gl: &mut dyn GraphicsContext,
        samples: &[f32],
        delta: f64,
    ) -> Result<()> {
        self.audio.push_samples(samples)?;
        self.audio.update()?;
        let time = self.clock.advance(delta);
        self.renderer.render(gl, time)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.renderer.resize(width, height);
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn audio(&self) -> &AudioSession {
        &self.audio
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn registry(&self) -> &ProgramRegistry {
        &self.registry
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    /// Deletes every GPU object the visualizer created: layer resources,
    /// layer targets, registered programs and shared shaders.
    pub fn release(self, gl: &mut dyn GraphicsContext) {
        let Self {
            renderer,
            mut registry,
            ..
        } = self;
        renderer.release(gl);
        registry.release(gl);
    }
}

fn build_layer(
    gl: &mut dyn GraphicsContext,
    registry: &mut ProgramRegistry,
    audio: &AudioSession,
    render_size: Extent,
    layer: &LayerConfig,
) -> Result<Box<dyn RenderLayer>> {
    debug!(name = %layer.name, blend = %layer.blend, "building layer");
    let built: Box<dyn RenderLayer> = match &layer.kind {
        LayerKind::Solid { color } => Box::new(SolidLayer::new(Vec4::from_array(*color))),
        LayerKind::Waveform => Box::new(WaveformLayer::new(gl, registry, audio.spectrum())?),
        LayerKind::Grid {
            width,
            height,
            unit,
            thickness,
            color,
            frequency_hz,
        } => {
            let settings = GridSettings {
                width: *width,
                height: *height,
                unit: *unit,
                thickness: *thickness,
                color: Vec4::from_array(*color),
                frequency_hz: *frequency_hz,
            };
            let grid = LightGrid::new(gl, registry, settings, Some(audio.spectrum()))?;
            let program = registry.program(crate::scene::GRID_PROGRAM_ID)?;

            let mut camera = Camera::perspective(GRID_FOV_Y, render_size.aspect(), 0.1, 1000.0);
            let extent = (*width).max(*height) as f32 * *unit;
            camera
                .world
                .translate_by(Vec3::new(0.0, 0.0, -1.2 * extent))
                .rotate_by(Quat::from_rotation_x(GRID_TILT));

            let mut scene = Scene::new(camera, program);
            scene.add(SceneObject::with_content(layer.name.clone(), grid));
            Box::new(scene)
        }
    };
    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetStore;
    use crate::config::RenderConfig;
    use crate::gl::HeadlessContext;
    use crate::render::{BlendMode, RendererState};
    use crate::VisualizerError;

    fn small_config() -> AppConfig {
        AppConfig {
            render: RenderConfig {
                render_size: Extent::new(64, 36),
                output_size: Extent::new(128, 72),
                ..RenderConfig::default()
            },
            ..AppConfig::default()
        }
    }

    #[test]
    fn builds_the_configured_stack() {
        let mut gl = HeadlessContext::new();
        let visualizer = Visualizer::new(&mut gl, small_config()).unwrap();

        assert_eq!(visualizer.renderer().layer_count(), 2);
        assert_eq!(
            visualizer.renderer().blend_modes(),
            &[BlendMode::Normal, BlendMode::Add]
        );
        assert!(visualizer.registry().contains(crate::scene::GRID_PROGRAM_ID));
        assert!(visualizer.registry().contains(crate::render::WAVEFORM_PROGRAM_ID));
        assert_eq!(visualizer.renderer().state(), RendererState::AwaitingTemplate);
    }

    #[test]
    fn frames_draw_every_layer_once_loaded() {
        let mut gl = HeadlessContext::new();
        let mut visualizer = Visualizer::new(&mut gl, small_config()).unwrap();
        let block = vec![0.0; 800];

        visualizer.frame(&mut gl, &block, 1.0 / 60.0).unwrap();
        gl.take_commands();
        visualizer.frame(&mut gl, &block, 1.0 / 60.0).unwrap();
        assert_eq!(gl.draw_call_count(), 0);

        pollster::block_on(visualizer.load(&mut gl, &AssetStore::with_builtin())).unwrap();
        gl.take_commands();
        visualizer.frame(&mut gl, &block, 1.0 / 60.0).unwrap();

        // grid, waveform, composition
        assert_eq!(gl.draw_call_count(), 3);
        assert_eq!(visualizer.clock().frames(), 3);
        assert_eq!(gl.viewports(), vec![(64, 36), (128, 72)]);
    }

    #[test]
    fn release_leaves_no_live_objects() {
        let mut gl = HeadlessContext::new();
        let mut visualizer = Visualizer::new(&mut gl, small_config()).unwrap();
        pollster::block_on(visualizer.load(&mut gl, &AssetStore::with_builtin())).unwrap();
        visualizer.frame(&mut gl, &[0.25; 256], 1.0 / 60.0).unwrap();

        visualizer.release(&mut gl);

        assert_eq!(gl.live_textures(), 0);
        assert_eq!(gl.live_buffers(), 0);
        assert_eq!(gl.live_framebuffers(), 0);
        assert_eq!(gl.live_programs(), 0);
        assert_eq!(gl.live_shaders(), 0);
    }

    #[test]
    fn missing_template_leaves_visualizer_idle() {
        let mut gl = HeadlessContext::new();
        let mut visualizer = Visualizer::new(&mut gl, small_config()).unwrap();
        let err = pollster::block_on(visualizer.load(&mut gl, &AssetStore::new())).unwrap_err();
        assert!(matches!(err, VisualizerError::AssetLoad { .. }));

        gl.take_commands();
        visualizer.frame(&mut gl, &[0.0; 64], 0.1).unwrap();
        assert_eq!(gl.draw_call_count(), 0);
    }
}
