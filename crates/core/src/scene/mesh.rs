use tracing::{debug, warn};

use super::{NodeRenderContext, Renderable, Updatable};
use crate::gl::{
    AttribLocation, BufferHandle, BufferTarget, GraphicsContext, Primitive, ProgramHandle,
    TextureFilter, TextureFormat, TextureHandle, TextureWrap, UniformLocation,
};
use crate::shader::ProgramRegistry;
use crate::{Result, Transform, VisualizerError};

pub const MESH_PROGRAM_ID: &str = "mesh";

const MESH_VERTEX_SHADER: &str = r#"
attribute vec3 vertex;
attribute vec3 normal;
attribute vec2 texcoord;
uniform mat4 view_projection;
uniform mat4 transform;

varying vec3 surface_normal;
varying vec2 uv;

void main() {
    gl_Position = view_projection * transform * vec4(vertex, 1.);
    surface_normal = (transform * vec4(normal, 0.)).xyz;
    uv = texcoord;
}
"#;

const MESH_FRAGMENT_SHADER: &str = r#"
precision mediump float;

varying vec3 surface_normal;
varying vec2 uv;
uniform sampler2D diffuse;

void main() {
    vec3 light = normalize(vec3(0.3, 0.8, 0.5));
    float shade = 0.35 + 0.65 * max(dot(normalize(surface_normal), light), 0.);
    vec4 base = texture2D(diffuse, uv);
    gl_FragColor = vec4(base.rgb * shade, base.a);
}
"#;

/// RGBA pixels of the 2x2 checker used when a mesh has no texture.
pub const FALLBACK_TEXTURE_PIXELS: [u8; 16] = [
    255, 0, 255, 255, //
    0, 0, 0, 255, //
    0, 0, 0, 255, //
    255, 0, 255, 255,
];

/// Pre-triangulated geometry: xyz positions and normals, optional uv pairs and
/// a triangle list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub texcoords: Option<Vec<f32>>,
    pub indices: Vec<u16>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn validate(&self) -> Result<()> {
        if self.positions.len() % 3 != 0 {
            return Err(VisualizerError::InvalidInput(
                "mesh positions must come in xyz triples",
            ));
        }
        if self.normals.len() != self.positions.len() {
            return Err(VisualizerError::InvalidInput(
                "mesh needs one normal per vertex",
            ));
        }
        if let Some(texcoords) = &self.texcoords {
            if texcoords.len() != self.vertex_count() * 2 {
                return Err(VisualizerError::InvalidInput(
                    "mesh needs one texture coordinate per vertex",
                ));
            }
        }
        if self.indices.len() % 3 != 0 {
            return Err(VisualizerError::InvalidInput(
                "mesh indices must describe whole triangles",
            ));
        }
        if self
            .indices
            .iter()
            .any(|&index| usize::from(index) >= self.vertex_count())
        {
            return Err(VisualizerError::InvalidInput(
                "mesh index points past the last vertex",
            ));
        }
        Ok(())
    }

    /// Unit quad in the xy plane facing +z.
    pub fn quad() -> Self {
        Self {
            positions: vec![
                -0.5, -0.5, 0.0, 0.5, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0,
            ],
            normals: [0.0, 0.0, 1.0].repeat(4),
            texcoords: Some(vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0]),
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MeshBuffers {
    positions: BufferHandle,
    normals: BufferHandle,
    texcoords: Option<BufferHandle>,
    indices: BufferHandle,
}

#[derive(Debug, Clone, Copy)]
struct MeshAttributes {
    vertex: Option<AttribLocation>,
    normal: Option<AttribLocation>,
    texcoord: Option<AttribLocation>,
}

/// Scene node drawing a [`MeshData`] with an optional texture.
#[derive(Debug)]
pub struct MeshNode {
    program: ProgramHandle,
    view_projection: Option<UniformLocation>,
    transform: Option<UniformLocation>,
    sampler: Option<UniformLocation>,
    attributes: MeshAttributes,
    buffers: MeshBuffers,
    index_count: u32,
    texture: Option<TextureHandle>,
    fallback: Option<TextureHandle>,
}

impl MeshNode {
    pub fn new(
        gl: &mut dyn GraphicsContext,
        registry: &mut ProgramRegistry,
        mesh: &MeshData,
    ) -> Result<Self> {
        mesh.validate()?;

        let program = if registry.contains(MESH_PROGRAM_ID) {
            registry.program(MESH_PROGRAM_ID)?
        } else {
            registry.build(gl, MESH_PROGRAM_ID, MESH_VERTEX_SHADER, MESH_FRAGMENT_SHADER)?
        };
        let view_projection = registry.find_uniform(gl, MESH_PROGRAM_ID, "view_projection")?;
        let transform = registry.find_uniform(gl, MESH_PROGRAM_ID, "transform")?;
        let sampler = registry.find_uniform(gl, MESH_PROGRAM_ID, "diffuse")?;

        let attributes = MeshAttributes {
            vertex: gl.attrib_location(program, "vertex"),
            normal: gl.attrib_location(program, "normal"),
            texcoord: mesh
                .texcoords
                .as_ref()
                .and_then(|_| gl.attrib_location(program, "texcoord")),
        };

        let buffers = MeshBuffers {
            positions: upload(gl, BufferTarget::Array, bytemuck::cast_slice(&mesh.positions))?,
            normals: upload(gl, BufferTarget::Array, bytemuck::cast_slice(&mesh.normals))?,
            texcoords: mesh
                .texcoords
                .as_ref()
                .map(|texcoords| upload(gl, BufferTarget::Array, bytemuck::cast_slice(texcoords)))
                .transpose()?,
            indices: upload(
                gl,
                BufferTarget::ElementArray,
                bytemuck::cast_slice(&mesh.indices),
            )?,
        };
        debug!(
            vertices = mesh.vertex_count(),
            triangles = mesh.indices.len() / 3,
            "mesh buffers uploaded"
        );

        Ok(Self {
            program,
            view_projection,
            transform,
            sampler,
            attributes,
            buffers,
            index_count: mesh.indices.len() as u32,
            texture: None,
            fallback: None,
        })
    }

    pub fn set_texture(&mut self, texture: Option<TextureHandle>) {
        self.texture = texture;
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    /// The placeholder texture, if it has been needed so far.
    pub fn fallback_texture(&self) -> Option<TextureHandle> {
        self.fallback
    }

    fn bound_texture(&mut self, gl: &mut dyn GraphicsContext) -> Result<TextureHandle> {
        if let Some(texture) = self.texture.or(self.fallback) {
            return Ok(texture);
        }
        warn!("mesh has no texture, using placeholder");
        let texture = gl.create_texture()?;
        gl.bind_texture(Some(texture));
        gl.tex_image_2d(TextureFormat::Rgba, 2, 2, Some(&FALLBACK_TEXTURE_PIXELS))?;
        gl.tex_parameters(TextureFilter::Nearest, TextureWrap::Repeat);
        self.fallback = Some(texture);
        Ok(texture)
    }
}

fn upload(gl: &mut dyn GraphicsContext, target: BufferTarget, bytes: &[u8]) -> Result<BufferHandle> {
    let buffer = gl.create_buffer()?;
    gl.bind_buffer(target, Some(buffer));
    gl.buffer_data(target, bytes);
    gl.bind_buffer(target, None);
    Ok(buffer)
}

impl Updatable for MeshNode {
    fn update(&mut self, _time: f64, _transform: &mut Transform) -> Result<()> {
        Ok(())
    }
}

impl Renderable for MeshNode {
    fn render(&mut self, gl: &mut dyn GraphicsContext, ctx: &NodeRenderContext) -> Result<()> {
        gl.use_program(Some(self.program));
        if let Some(location) = self.view_projection {
            gl.uniform_matrix4(location, &ctx.view_projection);
        }
        if let Some(location) = self.transform {
            gl.uniform_matrix4(location, &ctx.cumulative);
        }
        if let Some(location) = self.sampler {
            gl.uniform_1i(location, 0);
        }

        gl.active_texture(0);
        let texture = self.bound_texture(gl)?;
        gl.bind_texture(Some(texture));

        let streams = [
            (self.attributes.vertex, Some(self.buffers.positions), 3),
            (self.attributes.normal, Some(self.buffers.normals), 3),
            (self.attributes.texcoord, self.buffers.texcoords, 2),
        ];
        for (attribute, buffer, components) in streams {
            if let (Some(attribute), Some(buffer)) = (attribute, buffer) {
                gl.bind_buffer(BufferTarget::Array, Some(buffer));
                gl.vertex_attrib_pointer(attribute, components);
                gl.enable_vertex_attrib_array(attribute);
            }
        }

        gl.bind_buffer(BufferTarget::ElementArray, Some(self.buffers.indices));
        gl.draw_elements(Primitive::Triangles, self.index_count);
        Ok(())
    }

    fn release(&mut self, gl: &mut dyn GraphicsContext) {
        gl.delete_buffer(self.buffers.positions);
        gl.delete_buffer(self.buffers.normals);
        if let Some(texcoords) = self.buffers.texcoords {
            gl.delete_buffer(texcoords);
        }
        gl.delete_buffer(self.buffers.indices);
        if let Some(fallback) = self.fallback.take() {
            gl.delete_texture(fallback);
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Mat4;

    use super::*;
    use crate::gl::{GlCommand, HeadlessContext};

    fn ctx(program: ProgramHandle) -> NodeRenderContext {
        NodeRenderContext {
            time: 0.0,
            cumulative: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            program,
        }
    }

    #[test]
    fn untextured_mesh_uses_one_lazy_placeholder() {
        let mut gl = HeadlessContext::new();
        let mut registry = ProgramRegistry::new();
        let mut mesh = MeshNode::new(&mut gl, &mut registry, &MeshData::quad()).unwrap();
        assert!(mesh.fallback_texture().is_none());
        let textures = gl.live_textures();

        mesh.render(&mut gl, &ctx(mesh.program)).unwrap();
        mesh.render(&mut gl, &ctx(mesh.program)).unwrap();

        let fallback = mesh.fallback_texture().unwrap();
        assert_eq!(gl.live_textures(), textures + 1);
        assert_eq!(gl.texture_size(fallback), Some((2, 2)));
        assert!(gl.commands().contains(&GlCommand::TexParameters(
            TextureFilter::Nearest,
            TextureWrap::Repeat
        )));
        assert!(gl.commands().contains(&GlCommand::DrawElements {
            mode: Primitive::Triangles,
            count: 6
        }));
    }

    #[test]
    fn assigned_texture_wins_over_placeholder() {
        let mut gl = HeadlessContext::new();
        let mut registry = ProgramRegistry::new();
        let mut mesh = MeshNode::new(&mut gl, &mut registry, &MeshData::quad()).unwrap();
        let texture = gl.create_texture().unwrap();
        mesh.set_texture(Some(texture));

        mesh.render(&mut gl, &ctx(mesh.program)).unwrap();

        assert!(mesh.fallback_texture().is_none());
        assert!(gl.commands().contains(&GlCommand::BindTexture(Some(texture))));
    }

    #[test]
    fn validates_geometry() {
        let mut broken = MeshData::quad();
        broken.indices.push(9);
        broken.indices.extend([0, 1]);
        assert!(broken.validate().is_err());

        let mut broken = MeshData::quad();
        broken.normals.pop();
        assert!(broken.validate().is_err());

        let untextured = MeshData {
            texcoords: None,
            ..MeshData::quad()
        };
        let mut gl = HeadlessContext::new();
        let mut registry = ProgramRegistry::new();
        let mut node = MeshNode::new(&mut gl, &mut registry, &untextured).unwrap();
        assert!(node.buffers.texcoords.is_none());
        assert_eq!(gl.live_buffers(), 3);

        node.release(&mut gl);
        assert_eq!(gl.live_buffers(), 0);
    }
}
