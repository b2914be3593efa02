//! Graphics context abstraction.
//!
//! Every component that issues graphics commands receives a
//! [`GraphicsContext`] explicitly. The command set is deliberately the small
//! WebGL 1 subset the compositor and the scene graph need; it is not a general
//! GPU abstraction. Two implementations ship with the crate: the recording
//! [`HeadlessContext`] and, behind the `webgl` feature, a browser backend.

use std::fmt;

use glam::{Mat4, Vec4};

use crate::Result;

mod headless;
#[cfg(feature = "webgl")]
mod web;

pub use headless::{GlCommand, HeadlessContext};
#[cfg(feature = "webgl")]
pub use web::WebGlContext;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Backend specific identifier of the object.
            pub fn id(self) -> u32 {
                self.0
            }
        }
    };
}

handle!(
    /// Texture object owned by a context.
    TextureHandle
);
handle!(
    /// Offscreen framebuffer object.
    FramebufferHandle
);
handle!(
    /// Vertex or index buffer object.
    BufferHandle
);
handle!(ShaderHandle);
handle!(ProgramHandle);
handle!(
    /// Location of a uniform inside a linked program.
    UniformLocation
);
handle!(AttribLocation);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderKind::Vertex => f.write_str("vertex"),
            ShaderKind::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba,
    Luminance,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Rgba => 4,
            TextureFormat::Luminance => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFilter {
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureWrap {
    ClampToEdge,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Array,
    ElementArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Triangles,
    TriangleStrip,
    Lines,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    DepthTest,
    CullFace,
}

/// Buffers affected by a `clear` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearMask {
    pub color: bool,
    pub depth: bool,
}

impl ClearMask {
    pub const COLOR: Self = Self {
        color: true,
        depth: false,
    };
    pub const COLOR_AND_DEPTH: Self = Self {
        color: true,
        depth: true,
    };
}

/// Result of a framebuffer completeness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment,
    IncompleteDimensions,
    MissingAttachment,
    Unsupported,
    Unknown(u32),
}

impl FramebufferStatus {
    pub fn is_complete(self) -> bool {
        self == FramebufferStatus::Complete
    }

    /// Human readable explanation, used in [`crate::VisualizerError::FramebufferIncomplete`].
    pub fn describe(self) -> &'static str {
        match self {
            FramebufferStatus::Complete => "The framebuffer is complete.",
            FramebufferStatus::IncompleteAttachment => "The framebuffer has an incomplete attachment.",
            FramebufferStatus::IncompleteDimensions => {
                "Not all dimensions have the same width and height."
            }
            FramebufferStatus::MissingAttachment => "The framebuffer has no image attached.",
            FramebufferStatus::Unsupported => {
                "Some parameters passed to the framebuffer are unsupported for this platform."
            }
            FramebufferStatus::Unknown(_) => "Unknown error.",
        }
    }
}

/// The command surface used by the renderer, the scene graph and the shader
/// registry.
///
/// Handles are only meaningful for the context that created them. Object
/// creation returns an error when the backend cannot allocate; everything else
/// mirrors the fire-and-forget nature of the underlying API, with explicit
/// status queries for compile, link and framebuffer completeness.
pub trait GraphicsContext {
    fn create_texture(&mut self) -> Result<TextureHandle>;
    fn delete_texture(&mut self, texture: TextureHandle);
    fn active_texture(&mut self, unit: u32);
    fn bind_texture(&mut self, texture: Option<TextureHandle>);
    /// Allocates storage for the bound texture, optionally uploading pixels.
    fn tex_image_2d(
        &mut self,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) -> Result<()>;
    fn tex_parameters(&mut self, filter: TextureFilter, wrap: TextureWrap);

    fn create_framebuffer(&mut self) -> Result<FramebufferHandle>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);
    /// Binds an offscreen target, or the default (screen) framebuffer for `None`.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);
    /// Attaches `texture` as color attachment 0 of the bound framebuffer.
    fn framebuffer_texture_2d(&mut self, texture: TextureHandle);
    fn check_framebuffer_status(&mut self) -> FramebufferStatus;

    fn create_buffer(&mut self) -> Result<BufferHandle>;
    fn delete_buffer(&mut self, buffer: BufferHandle);
    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferHandle>);
    /// Uploads static data to the buffer bound at `target`.
    fn buffer_data(&mut self, target: BufferTarget, data: &[u8]);

    fn create_shader(&mut self, kind: ShaderKind) -> Result<ShaderHandle>;
    fn shader_source(&mut self, shader: ShaderHandle, source: &str);
    fn compile_shader(&mut self, shader: ShaderHandle);
    /// Frees a shader. A program it was linked into keeps working.
    fn delete_shader(&mut self, shader: ShaderHandle);
    fn shader_compile_status(&self, shader: ShaderHandle) -> bool;
    fn shader_info_log(&self, shader: ShaderHandle) -> String;

    fn create_program(&mut self) -> Result<ProgramHandle>;
    fn delete_program(&mut self, program: ProgramHandle);
    fn attach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle);
    fn link_program(&mut self, program: ProgramHandle);
    fn program_link_status(&self, program: ProgramHandle) -> bool;
    fn program_info_log(&self, program: ProgramHandle) -> String;
    fn use_program(&mut self, program: Option<ProgramHandle>);

    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;
    fn attrib_location(&mut self, program: ProgramHandle, name: &str) -> Option<AttribLocation>;
    fn uniform_1i(&mut self, location: UniformLocation, value: i32);
    fn uniform_4f(&mut self, location: UniformLocation, value: Vec4);
    fn uniform_matrix4(&mut self, location: UniformLocation, value: &Mat4);

    /// Points `attrib` at tightly packed `f32` components of the bound array buffer.
    fn vertex_attrib_pointer(&mut self, attrib: AttribLocation, components: u32);
    fn enable_vertex_attrib_array(&mut self, attrib: AttribLocation);

    fn viewport(&mut self, width: u32, height: u32);
    fn clear_color(&mut self, color: Vec4);
    fn clear(&mut self, mask: ClearMask);
    fn enable(&mut self, capability: Capability);

    fn draw_arrays(&mut self, mode: Primitive, first: u32, count: u32);
    /// Draws `count` `u16` indices from the bound element buffer.
    fn draw_elements(&mut self, mode: Primitive, count: u32);
}
