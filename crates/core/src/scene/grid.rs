use glam::{Vec3, Vec4};
use tracing::debug;

use super::{NodeRenderContext, Renderable, Updatable};
use crate::audio::SpectrumHandle;
use crate::gl::{
    AttribLocation, BufferHandle, BufferTarget, GraphicsContext, Primitive, ProgramHandle,
    UniformLocation,
};
use crate::shader::ProgramRegistry;
use crate::{Result, Transform, VisualizerError};

pub const GRID_PROGRAM_ID: &str = "grid";

pub const GRID_VERTEX_SHADER: &str = r#"
attribute vec3 vertex;
attribute vec2 grid_position;
uniform mat4 view_projection;
uniform mat4 transform;

varying vec2 cell;

void main() {
    gl_Position = view_projection * transform * vec4(vertex, 1.);
    cell = grid_position;
}
"#;

pub const GRID_FRAGMENT_SHADER: &str = r#"
precision mediump float;

varying vec2 cell;
uniform vec4 color;

void main() {
    float glow = 0.6 + 0.4 * (1. - distance(cell, vec2(0.5, 0.5)));
    gl_FragColor = vec4(color.rgb * glow, color.a);
}
"#;

/// Vertices of one intersection cube.
const CUBE_VERTICES: usize = 8;
/// Height added per unit of normalised bin strength.
const LEVEL_GAIN: f32 = 4.0;

/// Shape of a [`LightGrid`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSettings {
    /// Intersections along x.
    pub width: u32,
    /// Intersections along y.
    pub height: u32,
    /// Distance between neighbouring intersections.
    pub unit: f32,
    /// Side of the intersection cubes and of the bars joining them.
    pub thickness: f32,
    pub color: Vec4,
    /// Frequency whose strength drives the grid height.
    pub frequency_hz: f32,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            width: 8,
            height: 8,
            unit: 1.0,
            thickness: 0.05,
            color: Vec4::new(0.2, 0.8, 1.0, 1.0),
            frequency_hz: 120.0,
        }
    }
}

impl GridSettings {
    /// `4wh` triangles of cube faces plus 8 per horizontal and vertical bar.
    pub fn triangle_count(&self) -> usize {
        let (w, h) = (self.width as usize, self.height as usize);
        if w == 0 || h == 0 {
            return 0;
        }
        4 * w * h + 8 * (w - 1) * h + 8 * w * (h - 1)
    }

    fn vertex_count(&self) -> usize {
        self.width as usize * self.height as usize * CUBE_VERTICES
    }

    /// Cube corners around every intersection, centred on the origin.
    pub fn vertices(&self) -> Vec<f32> {
        let mid_x = self.width as f32 / 2.0;
        let mid_y = self.height as f32 / 2.0;
        let mut vertices = Vec::with_capacity(self.vertex_count() * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                let center = Vec3::new(
                    (x as f32 - mid_x) * self.unit,
                    (y as f32 - mid_y) * self.unit,
                    0.0,
                );
                vertices.extend(cube(center, self.thickness));
            }
        }
        vertices
    }

    /// Normalised grid coordinate of every vertex.
    pub fn grid_positions(&self) -> Vec<f32> {
        let mut positions = Vec::with_capacity(self.vertex_count() * 2);
        for y in 0..self.height {
            for x in 0..self.width {
                let cell = [
                    x as f32 / self.width as f32,
                    y as f32 / self.height as f32,
                ];
                for _ in 0..CUBE_VERTICES {
                    positions.extend_from_slice(&cell);
                }
            }
        }
        positions
    }

    /// Triangle list over [`GridSettings::vertices`].
    ///
    /// Corner `i` of a cube encodes its sign bits as `0bXYZ`, a set bit
    /// meaning the negative side of that axis. Fails when the grid has more
    /// vertices than 16-bit indices can address.
    pub fn indices(&self) -> Result<Vec<u16>> {
        if self.vertex_count() > usize::from(u16::MAX) + 1 {
            return Err(VisualizerError::InvalidInput(
                "grid is too large for 16-bit indices",
            ));
        }
        let (w, h) = (self.width, self.height);
        let idx = |x: u32, y: u32, corner: u32| ((y * w + x) * CUBE_VERTICES as u32 + corner) as u16;
        let mut elements = Vec::with_capacity(self.triangle_count() * 3);

        for y in 0..h {
            for x in 0..w {
                elements.extend([
                    idx(x, y, 0b110), idx(x, y, 0b000), idx(x, y, 0b100),
                    idx(x, y, 0b000), idx(x, y, 0b110), idx(x, y, 0b010),
                    idx(x, y, 0b111), idx(x, y, 0b101), idx(x, y, 0b001),
                    idx(x, y, 0b001), idx(x, y, 0b011), idx(x, y, 0b111),
                ]);
            }
        }

        for y in 0..h {
            for x in 0..w {
                if x + 1 < w {
                    elements.extend([
                        idx(x, y, 0b000), idx(x, y, 0b010), idx(x + 1, y, 0b100),
                        idx(x, y, 0b010), idx(x + 1, y, 0b110), idx(x + 1, y, 0b100),
                        idx(x, y, 0b001), idx(x + 1, y, 0b101), idx(x, y, 0b011),
                        idx(x, y, 0b011), idx(x + 1, y, 0b101), idx(x + 1, y, 0b111),
                        idx(x, y, 0b000), idx(x + 1, y, 0b100), idx(x, y, 0b001),
                        idx(x, y, 0b001), idx(x + 1, y, 0b100), idx(x + 1, y, 0b101),
                        idx(x, y, 0b010), idx(x, y, 0b011), idx(x + 1, y, 0b110),
                        idx(x, y, 0b011), idx(x + 1, y, 0b111), idx(x + 1, y, 0b110),
                    ]);
                }
                if y + 1 < h {
                    elements.extend([
                        idx(x, y, 0b100), idx(x, y, 0b000), idx(x, y + 1, 0b010),
                        idx(x, y, 0b100), idx(x, y + 1, 0b010), idx(x, y + 1, 0b110),
                        idx(x, y, 0b101), idx(x, y + 1, 0b011), idx(x, y, 0b001),
                        idx(x, y, 0b101), idx(x, y + 1, 0b111), idx(x, y + 1, 0b011),
                        idx(x, y, 0b000), idx(x, y, 0b001), idx(x, y + 1, 0b010),
                        idx(x, y, 0b001), idx(x, y + 1, 0b011), idx(x, y + 1, 0b010),
                        idx(x, y, 0b100), idx(x, y + 1, 0b110), idx(x, y, 0b101),
                        idx(x, y, 0b101), idx(x, y + 1, 0b110), idx(x, y + 1, 0b111),
                    ]);
                }
            }
        }
        Ok(elements)
    }
}

fn cube(center: Vec3, side: f32) -> [f32; CUBE_VERTICES * 3] {
    let half = side / 2.0;
    let mut corners = [0.0; CUBE_VERTICES * 3];
    for corner in 0..CUBE_VERTICES {
        let sign = |bit: usize| if corner & bit == 0 { half } else { -half };
        corners[corner * 3] = center.x + sign(0b100);
        corners[corner * 3 + 1] = center.y + sign(0b010);
        corners[corner * 3 + 2] = center.z + sign(0b001);
    }
    corners
}

#[derive(Debug, Clone, Copy)]
struct GridUniforms {
    view_projection: Option<UniformLocation>,
    transform: Option<UniformLocation>,
    color: Option<UniformLocation>,
}

/// Audio-reactive grid of cubes joined by bars.
///
/// The grid stretches along z with the strength of one frequency band each
/// update.
#[derive(Debug)]
pub struct LightGrid {
    settings: GridSettings,
    program: ProgramHandle,
    uniforms: GridUniforms,
    vertex: Option<AttribLocation>,
    grid_position: Option<AttribLocation>,
    vertices: BufferHandle,
    positions: BufferHandle,
    elements: BufferHandle,
    spectrum: Option<SpectrumHandle>,
    level: f32,
}

impl LightGrid {
    /// Uploads the grid geometry and resolves the `grid` program, building and
    /// registering it on first use.
    pub fn new(
        gl: &mut dyn GraphicsContext,
        registry: &mut ProgramRegistry,
        settings: GridSettings,
        spectrum: Option<SpectrumHandle>,
    ) -> Result<Self> {
        if settings.width == 0 || settings.height == 0 {
            return Err(VisualizerError::InvalidInput(
                "grid needs at least one intersection",
            ));
        }
        let indices = settings.indices()?;

        let program = if registry.contains(GRID_PROGRAM_ID) {
            registry.program(GRID_PROGRAM_ID)?
        } else {
            registry.build(gl, GRID_PROGRAM_ID, GRID_VERTEX_SHADER, GRID_FRAGMENT_SHADER)?
        };
        let uniforms = GridUniforms {
            view_projection: registry.find_uniform(gl, GRID_PROGRAM_ID, "view_projection")?,
            transform: registry.find_uniform(gl, GRID_PROGRAM_ID, "transform")?,
            color: registry.find_uniform(gl, GRID_PROGRAM_ID, "color")?,
        };
        let vertex = gl.attrib_location(program, "vertex");
        let grid_position = gl.attrib_location(program, "grid_position");

        let vertices = upload(gl, BufferTarget::Array, bytemuck::cast_slice(&settings.vertices()))?;
        let positions = upload(
            gl,
            BufferTarget::Array,
            bytemuck::cast_slice(&settings.grid_positions()),
        )?;
        let elements = upload(
            gl,
            BufferTarget::ElementArray,
            bytemuck::cast_slice(&indices),
        )?;

        debug!(
            width = settings.width,
            height = settings.height,
            triangles = settings.triangle_count(),
            "light grid buffers uploaded"
        );

        Ok(Self {
            settings,
            program,
            uniforms,
            vertex,
            grid_position,
            vertices,
            positions,
            elements,
            spectrum,
            level: 0.0,
        })
    }

    pub fn settings(&self) -> &GridSettings {
        &self.settings
    }

    pub fn triangle_count(&self) -> usize {
        self.settings.triangle_count()
    }

    /// Normalised strength of the driving band as of the last update.
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn set_color(&mut self, color: Vec4) {
        self.settings.color = color;
    }
}

fn upload(gl: &mut dyn GraphicsContext, target: BufferTarget, bytes: &[u8]) -> Result<BufferHandle> {
    let buffer = gl.create_buffer()?;
    gl.bind_buffer(target, Some(buffer));
    gl.buffer_data(target, bytes);
    gl.bind_buffer(target, None);
    Ok(buffer)
}

impl Updatable for LightGrid {
    fn update(&mut self, _time: f64, transform: &mut Transform) -> Result<()> {
        let Some(spectrum) = &self.spectrum else {
            return Ok(());
        };
        let strength = spectrum
            .frequency_strength(self.settings.frequency_hz)?
            .unwrap_or(0);
        self.level = f32::from(strength) / 255.0;
        let scale = transform.scale();
        transform.scale_absolute(Vec3::new(scale.x, scale.y, 1.0 + LEVEL_GAIN * self.level));
        Ok(())
    }
}

impl Renderable for LightGrid {
    fn render(&mut self, gl: &mut dyn GraphicsContext, ctx: &NodeRenderContext) -> Result<()> {
        gl.use_program(Some(self.program));

        gl.bind_buffer(BufferTarget::Array, Some(self.vertices));
        if let Some(vertex) = self.vertex {
            gl.vertex_attrib_pointer(vertex, 3);
            gl.enable_vertex_attrib_array(vertex);
        }
        gl.bind_buffer(BufferTarget::Array, Some(self.positions));
        if let Some(grid_position) = self.grid_position {
            gl.vertex_attrib_pointer(grid_position, 2);
            gl.enable_vertex_attrib_array(grid_position);
        }
        gl.bind_buffer(BufferTarget::ElementArray, Some(self.elements));

        if let Some(location) = self.uniforms.view_projection {
            gl.uniform_matrix4(location, &ctx.view_projection);
        }
        if let Some(location) = self.uniforms.transform {
            gl.uniform_matrix4(location, &ctx.cumulative);
        }
        if let Some(location) = self.uniforms.color {
            gl.uniform_4f(location, self.settings.color);
        }

        gl.draw_elements(Primitive::Triangles, (self.triangle_count() * 3) as u32);
        Ok(())
    }

    fn release(&mut self, gl: &mut dyn GraphicsContext) {
        gl.delete_buffer(self.vertices);
        gl.delete_buffer(self.positions);
        gl.delete_buffer(self.elements);
    }
}

#[cfg(test)]
mod tests {
    use glam::Mat4;

    use super::*;
    use crate::gl::{GlCommand, HeadlessContext};
    use crate::{AudioConfig, AudioSession};

    fn settings(width: u32, height: u32) -> GridSettings {
        GridSettings {
            width,
            height,
            ..GridSettings::default()
        }
    }

    #[test]
    fn triangle_count_matches_generated_indices() {
        for (w, h) in [(1, 1), (2, 1), (1, 3), (4, 3), (8, 8)] {
            let grid = settings(w, h);
            assert_eq!(grid.indices().unwrap().len(), grid.triangle_count() * 3, "{w}x{h}");
        }
        assert_eq!(settings(2, 2).triangle_count(), 16 + 16 + 16);
    }

    #[test]
    fn geometry_streams_have_one_entry_per_corner() {
        let grid = settings(3, 2);
        assert_eq!(grid.vertices().len(), 3 * 2 * 8 * 3);
        assert_eq!(grid.grid_positions().len(), 3 * 2 * 8 * 2);
        let max_index = *grid.indices().unwrap().iter().max().unwrap();
        assert_eq!(usize::from(max_index), 3 * 2 * 8 - 1);
    }

    #[test]
    fn indices_refuse_grids_beyond_sixteen_bits() {
        // 8192 intersections use exactly 65536 vertices.
        let largest = settings(128, 64);
        let indices = largest.indices().unwrap();
        assert_eq!(indices.iter().max().copied(), Some(u16::MAX));

        let err = settings(129, 64).indices().unwrap_err();
        assert!(matches!(err, VisualizerError::InvalidInput(_)));
    }

    #[test]
    fn cube_corners_follow_sign_bits() {
        let corners = cube(Vec3::new(1.0, 2.0, 3.0), 2.0);
        assert_eq!(&corners[0..3], &[2.0, 3.0, 4.0]);
        assert_eq!(&corners[3..6], &[2.0, 3.0, 2.0]);
        assert_eq!(&corners[21..24], &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn renders_with_uniforms_and_indexed_draw() {
        let mut gl = HeadlessContext::new();
        let mut registry = ProgramRegistry::new();
        let mut grid = LightGrid::new(&mut gl, &mut registry, settings(2, 2), None).unwrap();
        assert!(registry.contains(GRID_PROGRAM_ID));
        gl.take_commands();

        let ctx = NodeRenderContext {
            time: 0.0,
            cumulative: Mat4::from_translation(Vec3::X),
            view_projection: Mat4::IDENTITY,
            program: grid.program,
        };
        grid.render(&mut gl, &ctx).unwrap();

        let commands = gl.commands();
        let matrices = commands
            .iter()
            .filter(|command| matches!(command, GlCommand::UniformMatrix4(..)))
            .count();
        assert_eq!(matrices, 2);
        assert!(commands.contains(&GlCommand::DrawElements {
            mode: Primitive::Triangles,
            count: 48 * 3
        }));
        assert!(commands
            .iter()
            .any(|command| matches!(command, GlCommand::Uniform4f(_, color) if *color == grid.settings().color)));
    }

    #[test]
    fn second_grid_reuses_the_registered_program() {
        let mut gl = HeadlessContext::new();
        let mut registry = ProgramRegistry::new();
        let first = LightGrid::new(&mut gl, &mut registry, settings(2, 2), None).unwrap();
        let second = LightGrid::new(&mut gl, &mut registry, settings(3, 1), None).unwrap();
        assert_eq!(first.program, second.program);
        assert_eq!(registry.len(), 1);
        assert_eq!(gl.buffer_size(second.elements), Some(second.triangle_count() * 3 * 2));

        let mut first = first;
        first.release(&mut gl);
        assert_eq!(gl.live_buffers(), 3);
    }

    #[test]
    fn update_stretches_with_the_spectrum() {
        let mut gl = HeadlessContext::new();
        let mut registry = ProgramRegistry::new();
        let audio = AudioSession::new(&AudioConfig {
            sample_rate: 8_000,
            fft_size: 256,
            smoothing_time_constant: 0.0,
            ..AudioConfig::default()
        })
        .unwrap();
        let mut grid = LightGrid::new(
            &mut gl,
            &mut registry,
            GridSettings {
                frequency_hz: 1_000.0,
                ..settings(2, 2)
            },
            Some(audio.spectrum()),
        )
        .unwrap();

        let mut transform = Transform::new();
        grid.update(0.0, &mut transform).unwrap();
        assert_eq!(transform.scale(), Vec3::ONE);

        let tone: Vec<f32> = (0..256)
            .map(|n| (2.0 * std::f32::consts::PI * 1_000.0 * n as f32 / 8_000.0).sin())
            .collect();
        audio.push_samples(&tone).unwrap();
        audio.update().unwrap();
        grid.update(0.0, &mut transform).unwrap();

        assert!(grid.level() > 0.5);
        assert!(transform.scale().z > 1.0);
        assert_eq!(transform.scale().x, 1.0);
    }

    #[test]
    fn rejects_empty_grid() {
        let mut gl = HeadlessContext::new();
        let mut registry = ProgramRegistry::new();
        assert!(LightGrid::new(&mut gl, &mut registry, settings(0, 4), None).is_err());
    }
}
