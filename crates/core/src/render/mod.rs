//! Multi-layer offscreen renderer and compositor.
//!
//! Each [`RenderLayer`] draws into its own framebuffer-backed texture at the
//! fixed render resolution. A composition pass then blends every layer
//! texture onto the default framebuffer at the output resolution, using a
//! fragment shader generated from a template (see [`blend`]).
//!
//! The composition stage is loaded asynchronously. Until the template has
//! been fetched and the program linked, [`Renderer::render`] issues no
//! commands at all; a failed load leaves the renderer permanently failed.

mod blend;
mod layers;
mod waveform;

use glam::Vec4;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::assets::AssetSource;
use crate::gl::{
    AttribLocation, BufferHandle, BufferTarget, ClearMask, FramebufferHandle, GraphicsContext,
    Primitive, ProgramHandle, ShaderKind, TextureFilter, TextureFormat, TextureHandle,
    TextureWrap, UniformLocation,
};
use crate::shader::{compile_shader, ProgramRegistry};
use crate::{Result, VisualizerError};

pub use blend::{
    composite, sampler_name, BlendMode, CompositionTemplate, COMPOSITION_STATEMENTS_TOKEN,
    DEFAULT_COMPOSITION_TEMPLATE, TEXTURE_DECLARATIONS_TOKEN,
};
pub use layers::{FnLayer, SolidLayer};
pub use waveform::{WaveformLayer, WAVEFORM_FRAGMENT_SHADER, WAVEFORM_PROGRAM_ID};

/// Identifier the composition program is registered under by default.
pub const COMPOSE_PROGRAM_ID: &str = "compose";

/// Full-screen quad drawn as a triangle strip.
const TRANSFER_PLANE: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];

/// Anything that can draw itself into the currently bound target.
pub trait RenderLayer {
    /// Renders the layer. `time` is the application time in seconds. The
    /// target is not cleared beforehand.
    fn render(&mut self, gl: &mut dyn GraphicsContext, time: f64) -> Result<()>;

    /// Frees the GPU objects the layer owns.
    fn release(&mut self, _gl: &mut dyn GraphicsContext) {}
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }
}

/// Construction parameters of a [`Renderer`].
#[derive(Debug, Clone, PartialEq)]
pub struct RendererSettings {
    /// Size of every offscreen layer target. Fixed for the renderer's lifetime.
    pub render_size: Extent,
    /// Size of the composition draw; changed by [`Renderer::resize`].
    pub output_size: Extent,
    /// Color the output is cleared to before composition.
    pub background: Vec4,
    /// Registry identifier for the composition program.
    pub program_id: String,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            render_size: Extent::new(1920, 1080),
            output_size: Extent::new(1920, 1080),
            background: Vec4::new(0.0, 0.0, 0.0, 1.0),
            program_id: COMPOSE_PROGRAM_ID.to_string(),
        }
    }
}

/// Lifecycle of the composition stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    /// Layer targets exist; the composition template has not arrived yet.
    AwaitingTemplate,
    Ready,
    /// Loading or building the composition stage failed. Terminal.
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct LayerTarget {
    framebuffer: FramebufferHandle,
    texture: TextureHandle,
}

#[derive(Debug)]
struct CompositionResources {
    program: ProgramHandle,
    source: String,
    samplers: Vec<Option<UniformLocation>>,
    position: Option<AttribLocation>,
    quad: BufferHandle,
}

#[derive(Debug)]
enum Composition {
    Pending,
    Ready(CompositionResources),
    Failed,
}

/// Renders a fixed list of layers offscreen and composites them.
///
/// `layers`, their targets and `blend_modes` always have the same length and
/// ordering. Composition resources exist exactly when the state is
/// [`RendererState::Ready`].
pub struct Renderer {
    layers: Vec<Box<dyn RenderLayer>>,
    targets: Vec<LayerTarget>,
    blend_modes: Vec<BlendMode>,
    settings: RendererSettings,
    composition: Composition,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("layers", &self.layers.len())
            .field("targets", &self.targets)
            .field("blend_modes", &self.blend_modes)
            .field("settings", &self.settings)
            .field("state", &self.state())
            .finish()
    }
}

impl Renderer {
    /// Validates the layer configuration and allocates one framebuffer and
    /// texture per layer at the render size. The renderer starts out waiting
    /// for its composition template.
    pub fn new(
        gl: &mut dyn GraphicsContext,
        settings: RendererSettings,
        layers: Vec<Box<dyn RenderLayer>>,
        blend_modes: Vec<BlendMode>,
    ) -> Result<Self> {
        if layers.is_empty() {
            return Err(VisualizerError::NoLayers);
        }
        if layers.len() != blend_modes.len() {
            return Err(VisualizerError::LayerCountMismatch {
                layers: layers.len(),
                blend_modes: blend_modes.len(),
            });
        }
        if settings.render_size.is_empty() {
            return Err(VisualizerError::InvalidInput("render size must be non-zero"));
        }

        let mut targets = Vec::with_capacity(layers.len());
        for _ in 0..layers.len() {
            match allocate_target(gl, settings.render_size) {
                Ok(target) => targets.push(target),
                Err(err) => {
                    release_targets(gl, &targets);
                    return Err(err);
                }
            }
        }
        gl.bind_framebuffer(None);
        gl.bind_texture(None);

        debug!(
            layers = layers.len(),
            width = settings.render_size.width,
            height = settings.render_size.height,
            "allocated layer targets"
        );

        Ok(Self {
            layers,
            targets,
            blend_modes,
            settings,
            composition: Composition::Pending,
        })
    }

    /// Fetches the composition template from `assets` and builds the
    /// composition stage. On failure the renderer becomes permanently
    /// [`RendererState::Failed`] and the error is returned.
    pub async fn load_composition(
        &mut self,
        gl: &mut dyn GraphicsContext,
        registry: &mut ProgramRegistry,
        assets: &dyn AssetSource,
        path: &str,
    ) -> Result<()> {
        if !matches!(self.composition, Composition::Pending) {
            return Err(VisualizerError::InvalidInput(
                "composition stage was already loaded",
            ));
        }
        let template = assets.load_text(path).await;
        self.complete_composition(gl, registry, template)
    }

    /// Finishes initialisation with the outcome of a template fetch. Frame
    /// loops that poll the fetch themselves hand the result over here.
    pub fn complete_composition(
        &mut self,
        gl: &mut dyn GraphicsContext,
        registry: &mut ProgramRegistry,
        template: Result<String>,
    ) -> Result<()> {
        if !matches!(self.composition, Composition::Pending) {
            return Err(VisualizerError::InvalidInput(
                "composition stage was already loaded",
            ));
        }
        let built = template.and_then(|text| self.build_composition(gl, registry, &text));
        match built {
            Ok(resources) => {
                info!(
                    layers = self.layers.len(),
                    program = resources.program.id(),
                    "composition stage ready"
                );
                self.composition = Composition::Ready(resources);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "composition stage failed; renderer will stay idle");
                self.composition = Composition::Failed;
                Err(err)
            }
        }
    }

    fn build_composition(
        &self,
        gl: &mut dyn GraphicsContext,
        registry: &mut ProgramRegistry,
        template: &str,
    ) -> Result<CompositionResources> {
        let template = CompositionTemplate::parse(template)?;
        let source = template.generate(&self.blend_modes);

        let id = self.settings.program_id.as_str();
        if registry.contains(id) {
            return Err(VisualizerError::DuplicateProgram { id: id.to_string() });
        }

        // Uploaded first so a failed upload cannot strand a registered program.
        let quad = upload_transfer_plane(gl)?;
        let linked = registry.identity_vertex_shader(gl).and_then(|vertex| {
            let fragment = compile_shader(gl, ShaderKind::Fragment, &source)?;
            let linked = registry.link_new_program(gl, vertex, fragment, id);
            gl.delete_shader(fragment);
            linked
        });
        let program = match linked {
            Ok(program) => program,
            Err(err) => {
                gl.delete_buffer(quad);
                return Err(err);
            }
        };

        let samplers = (0..self.layers.len())
            .map(|index| registry.find_uniform(gl, id, &sampler_name(index)))
            .collect::<Result<Vec<_>>>()?;
        let position = gl.attrib_location(program, "position");

        Ok(CompositionResources {
            program,
            source,
            samplers,
            position,
            quad,
        })
    }

    /// Renders every layer into its own target, then composites them on
    /// screen. Does nothing until the composition stage is ready.
    pub fn render(&mut self, gl: &mut dyn GraphicsContext, time: f64) -> Result<()> {
        let Composition::Ready(resources) = &self.composition else {
            return Ok(());
        };

        let render_size = self.settings.render_size;
        gl.viewport(render_size.width, render_size.height);
        for (layer, target) in self.layers.iter_mut().zip(&self.targets) {
            gl.bind_framebuffer(Some(target.framebuffer));
            layer.render(gl, time)?;
        }

        let output_size = self.settings.output_size;
        gl.viewport(output_size.width, output_size.height);
        compose(gl, resources, &self.targets, self.settings.background);
        Ok(())
    }

    /// Runs only the composition pass over the current layer textures.
    pub fn compose(&self, gl: &mut dyn GraphicsContext) -> Result<()> {
        let Composition::Ready(resources) = &self.composition else {
            return Err(VisualizerError::NotReady);
        };
        compose(gl, resources, &self.targets, self.settings.background);
        Ok(())
    }

    /// Changes the output size. Layer targets keep their render size; scaling
    /// happens in the composition draw.
    pub fn resize(&mut self, width: u32, height: u32) {
        debug!(width, height, "resizing renderer output");
        self.settings.output_size = Extent::new(width, height);
    }

    /// Releases every layer, then deletes the layer targets and the quad
    /// buffer. The composition program stays with the registry.
    pub fn release(mut self, gl: &mut dyn GraphicsContext) {
        for layer in &mut self.layers {
            layer.release(gl);
        }
        release_targets(gl, &self.targets);
        if let Composition::Ready(resources) = &self.composition {
            gl.delete_buffer(resources.quad);
        }
    }

    pub fn state(&self) -> RendererState {
        match self.composition {
            Composition::Pending => RendererState::AwaitingTemplate,
            Composition::Ready(_) => RendererState::Ready,
            Composition::Failed => RendererState::Failed,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == RendererState::Ready
    }

    pub fn render_size(&self) -> Extent {
        self.settings.render_size
    }

    pub fn output_size(&self) -> Extent {
        self.settings.output_size
    }

    pub fn blend_modes(&self) -> &[BlendMode] {
        &self.blend_modes
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut (dyn RenderLayer + 'static)> {
        self.layers.get_mut(index).map(|layer| layer.as_mut())
    }

    /// Texture layer `index` renders into.
    pub fn layer_texture(&self, index: usize) -> Option<TextureHandle> {
        self.targets.get(index).map(|target| target.texture)
    }

    /// Generated composition shader source, once ready.
    pub fn composition_source(&self) -> Option<&str> {
        match &self.composition {
            Composition::Ready(resources) => Some(&resources.source),
            _ => None,
        }
    }
}

fn allocate_target(gl: &mut dyn GraphicsContext, size: Extent) -> Result<LayerTarget> {
    let texture = gl.create_texture()?;
    gl.bind_texture(Some(texture));
    let storage = gl
        .tex_image_2d(TextureFormat::Rgba, size.width, size.height, None)
        .and_then(|()| gl.create_framebuffer());
    let framebuffer = match storage {
        Ok(framebuffer) => framebuffer,
        Err(err) => {
            gl.delete_texture(texture);
            return Err(err);
        }
    };
    gl.tex_parameters(TextureFilter::Linear, TextureWrap::ClampToEdge);

    gl.bind_framebuffer(Some(framebuffer));
    gl.framebuffer_texture_2d(texture);
    let status = gl.check_framebuffer_status();
    if !status.is_complete() {
        gl.bind_framebuffer(None);
        gl.delete_framebuffer(framebuffer);
        gl.delete_texture(texture);
        return Err(VisualizerError::FramebufferIncomplete {
            status: status.describe(),
        });
    }

    Ok(LayerTarget {
        framebuffer,
        texture,
    })
}

/// Uploads [`TRANSFER_PLANE`] into a new array buffer.
fn upload_transfer_plane(gl: &mut dyn GraphicsContext) -> Result<BufferHandle> {
    let quad = gl.create_buffer()?;
    gl.bind_buffer(BufferTarget::Array, Some(quad));
    gl.buffer_data(BufferTarget::Array, bytemuck::cast_slice(&TRANSFER_PLANE));
    gl.bind_buffer(BufferTarget::Array, None);
    Ok(quad)
}

fn release_targets(gl: &mut dyn GraphicsContext, targets: &[LayerTarget]) {
    for target in targets {
        gl.delete_framebuffer(target.framebuffer);
        gl.delete_texture(target.texture);
    }
}

fn compose(
    gl: &mut dyn GraphicsContext,
    resources: &CompositionResources,
    targets: &[LayerTarget],
    background: Vec4,
) {
    gl.bind_framebuffer(None);
    gl.use_program(Some(resources.program));
    gl.clear_color(background);
    gl.clear(ClearMask::COLOR);

    for (unit, (target, sampler)) in targets.iter().zip(&resources.samplers).enumerate() {
        gl.active_texture(unit as u32);
        gl.bind_texture(Some(target.texture));
        if let Some(sampler) = sampler {
            gl.uniform_1i(*sampler, unit as i32);
        }
    }

    gl.bind_buffer(BufferTarget::Array, Some(resources.quad));
    if let Some(position) = resources.position {
        gl.vertex_attrib_pointer(position, 2);
        gl.enable_vertex_attrib_array(position);
    }
    gl.draw_arrays(Primitive::TriangleStrip, 0, 4);
}
