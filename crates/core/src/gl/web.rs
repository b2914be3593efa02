use glam::{Mat4, Vec4};
use tracing::info;
use wasm_bindgen::JsCast;
use web_sys::{
    HtmlCanvasElement, WebGlBuffer, WebGlFramebuffer, WebGlProgram, WebGlRenderingContext as GL,
    WebGlShader, WebGlTexture, WebGlUniformLocation,
};

use super::{
    AttribLocation, BufferHandle, BufferTarget, Capability, ClearMask, FramebufferHandle,
    FramebufferStatus, GraphicsContext, Primitive, ProgramHandle, ShaderHandle, ShaderKind,
    TextureFilter, TextureFormat, TextureHandle, TextureWrap, UniformLocation,
};
use crate::{Result, VisualizerError};

/// Slot table mapping `u32` handles onto browser objects.
#[derive(Debug)]
struct Slots<T> {
    items: Vec<Option<T>>,
}

impl<T> Slots<T> {
    fn new() -> Self {
        Self { items: Vec::new() }
    }

    fn insert(&mut self, item: T) -> u32 {
        self.items.push(Some(item));
        (self.items.len() - 1) as u32
    }

    fn get(&self, id: u32) -> Option<&T> {
        self.items.get(id as usize).and_then(Option::as_ref)
    }

    fn remove(&mut self, id: u32) -> Option<T> {
        self.items.get_mut(id as usize).and_then(Option::take)
    }
}

/// [`GraphicsContext`] backed by a browser `WebGLRenderingContext`.
pub struct WebGlContext {
    gl: GL,
    textures: Slots<WebGlTexture>,
    framebuffers: Slots<WebGlFramebuffer>,
    buffers: Slots<WebGlBuffer>,
    shaders: Slots<WebGlShader>,
    programs: Slots<WebGlProgram>,
    uniforms: Slots<WebGlUniformLocation>,
}

impl std::fmt::Debug for WebGlContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebGlContext").finish_non_exhaustive()
    }
}

impl WebGlContext {
    /// Acquires a WebGL context from `canvas`, failing fast when the browser
    /// refuses one. Depth testing and back-face culling are enabled up front.
    pub fn from_canvas(canvas: &HtmlCanvasElement) -> Result<Self> {
        let gl: GL = canvas
            .get_context("webgl")
            .map_err(|err| VisualizerError::ContextUnavailable(format!("{err:?}")))?
            .ok_or_else(|| VisualizerError::ContextUnavailable("WebGL not supported".into()))?
            .dyn_into()
            .map_err(|_| {
                VisualizerError::ContextUnavailable("canvas returned a foreign context".into())
            })?;

        let mut context = Self::from_raw(gl);
        context.enable(Capability::DepthTest);
        context.enable(Capability::CullFace);
        info!(
            width = canvas.width(),
            height = canvas.height(),
            "acquired WebGL context"
        );
        Ok(context)
    }

    pub fn from_raw(gl: GL) -> Self {
        Self {
            gl,
            textures: Slots::new(),
            framebuffers: Slots::new(),
            buffers: Slots::new(),
            shaders: Slots::new(),
            programs: Slots::new(),
            uniforms: Slots::new(),
        }
    }

    pub fn raw(&self) -> &GL {
        &self.gl
    }
}

fn buffer_target(target: BufferTarget) -> u32 {
    match target {
        BufferTarget::Array => GL::ARRAY_BUFFER,
        BufferTarget::ElementArray => GL::ELEMENT_ARRAY_BUFFER,
    }
}

fn primitive(mode: Primitive) -> u32 {
    match mode {
        Primitive::Triangles => GL::TRIANGLES,
        Primitive::TriangleStrip => GL::TRIANGLE_STRIP,
        Primitive::Lines => GL::LINES,
    }
}

fn texture_format(format: TextureFormat) -> u32 {
    match format {
        TextureFormat::Rgba => GL::RGBA,
        TextureFormat::Luminance => GL::LUMINANCE,
    }
}

impl GraphicsContext for WebGlContext {
    fn create_texture(&mut self) -> Result<TextureHandle> {
        let texture = self
            .gl
            .create_texture()
            .ok_or(VisualizerError::ResourceCreation { kind: "texture" })?;
        Ok(TextureHandle(self.textures.insert(texture)))
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if let Some(texture) = self.textures.remove(texture.0) {
            self.gl.delete_texture(Some(&texture));
        }
    }

    fn active_texture(&mut self, unit: u32) {
        self.gl.active_texture(GL::TEXTURE0 + unit);
    }

    fn bind_texture(&mut self, texture: Option<TextureHandle>) {
        let texture = texture.and_then(|handle| self.textures.get(handle.0));
        self.gl.bind_texture(GL::TEXTURE_2D, texture);
    }

    fn tex_image_2d(
        &mut self,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) -> Result<()> {
        let format = texture_format(format);
        self.gl
            .tex_image_2d_with_i32_and_i32_and_i32_and_format_and_type_and_opt_u8_array(
                GL::TEXTURE_2D,
                0,
                format as i32,
                width as i32,
                height as i32,
                0,
                format,
                GL::UNSIGNED_BYTE,
                pixels,
            )
            .map_err(|err| VisualizerError::msg(format!("texImage2D failed: {err:?}")))
    }

    fn tex_parameters(&mut self, filter: TextureFilter, wrap: TextureWrap) {
        let filter = match filter {
            TextureFilter::Linear => GL::LINEAR,
            TextureFilter::Nearest => GL::NEAREST,
        } as i32;
        let wrap = match wrap {
            TextureWrap::ClampToEdge => GL::CLAMP_TO_EDGE,
            TextureWrap::Repeat => GL::REPEAT,
        } as i32;
        self.gl
            .tex_parameteri(GL::TEXTURE_2D, GL::TEXTURE_MIN_FILTER, filter);
        self.gl
            .tex_parameteri(GL::TEXTURE_2D, GL::TEXTURE_MAG_FILTER, filter);
        self.gl.tex_parameteri(GL::TEXTURE_2D, GL::TEXTURE_WRAP_S, wrap);
        self.gl.tex_parameteri(GL::TEXTURE_2D, GL::TEXTURE_WRAP_T, wrap);
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferHandle> {
        let framebuffer = self
            .gl
            .create_framebuffer()
            .ok_or(VisualizerError::ResourceCreation { kind: "framebuffer" })?;
        Ok(FramebufferHandle(self.framebuffers.insert(framebuffer)))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(framebuffer) = self.framebuffers.remove(framebuffer.0) {
            self.gl.delete_framebuffer(Some(&framebuffer));
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        let framebuffer = framebuffer.and_then(|handle| self.framebuffers.get(handle.0));
        self.gl.bind_framebuffer(GL::FRAMEBUFFER, framebuffer);
    }

    fn framebuffer_texture_2d(&mut self, texture: TextureHandle) {
        self.gl.framebuffer_texture_2d(
            GL::FRAMEBUFFER,
            GL::COLOR_ATTACHMENT0,
            GL::TEXTURE_2D,
            self.textures.get(texture.0),
            0,
        );
    }

    fn check_framebuffer_status(&mut self) -> FramebufferStatus {
        match self.gl.check_framebuffer_status(GL::FRAMEBUFFER) {
            GL::FRAMEBUFFER_COMPLETE => FramebufferStatus::Complete,
            GL::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => FramebufferStatus::IncompleteAttachment,
            GL::FRAMEBUFFER_INCOMPLETE_DIMENSIONS => FramebufferStatus::IncompleteDimensions,
            GL::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => FramebufferStatus::MissingAttachment,
            GL::FRAMEBUFFER_UNSUPPORTED => FramebufferStatus::Unsupported,
            other => FramebufferStatus::Unknown(other),
        }
    }

    fn create_buffer(&mut self) -> Result<BufferHandle> {
        let buffer = self
            .gl
            .create_buffer()
            .ok_or(VisualizerError::ResourceCreation { kind: "buffer" })?;
        Ok(BufferHandle(self.buffers.insert(buffer)))
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buffer) = self.buffers.remove(buffer.0) {
            self.gl.delete_buffer(Some(&buffer));
        }
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferHandle>) {
        let buffer = buffer.and_then(|handle| self.buffers.get(handle.0));
        self.gl.bind_buffer(buffer_target(target), buffer);
    }

    fn buffer_data(&mut self, target: BufferTarget, data: &[u8]) {
        self.gl
            .buffer_data_with_u8_array(buffer_target(target), data, GL::STATIC_DRAW);
    }

    fn create_shader(&mut self, kind: ShaderKind) -> Result<ShaderHandle> {
        let kind = match kind {
            ShaderKind::Vertex => GL::VERTEX_SHADER,
            ShaderKind::Fragment => GL::FRAGMENT_SHADER,
        };
        let shader = self
            .gl
            .create_shader(kind)
            .ok_or(VisualizerError::ResourceCreation { kind: "shader" })?;
        Ok(ShaderHandle(self.shaders.insert(shader)))
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        if let Some(shader) = self.shaders.remove(shader.0) {
            self.gl.delete_shader(Some(&shader));
        }
    }

    fn shader_source(&mut self, shader: ShaderHandle, source: &str) {
        if let Some(shader) = self.shaders.get(shader.0) {
            self.gl.shader_source(shader, source);
        }
    }

    fn compile_shader(&mut self, shader: ShaderHandle) {
        if let Some(shader) = self.shaders.get(shader.0) {
            self.gl.compile_shader(shader);
        }
    }

    fn shader_compile_status(&self, shader: ShaderHandle) -> bool {
        self.shaders.get(shader.0).is_some_and(|shader| {
            self.gl
                .get_shader_parameter(shader, GL::COMPILE_STATUS)
                .as_bool()
                .unwrap_or(false)
        })
    }

    fn shader_info_log(&self, shader: ShaderHandle) -> String {
        self.shaders
            .get(shader.0)
            .and_then(|shader| self.gl.get_shader_info_log(shader))
            .unwrap_or_default()
    }

    fn create_program(&mut self) -> Result<ProgramHandle> {
        let program = self
            .gl
            .create_program()
            .ok_or(VisualizerError::ResourceCreation { kind: "program" })?;
        Ok(ProgramHandle(self.programs.insert(program)))
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if let Some(program) = self.programs.remove(program.0) {
            self.gl.delete_program(Some(&program));
        }
    }

    fn attach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle) {
        if let (Some(program), Some(shader)) =
            (self.programs.get(program.0), self.shaders.get(shader.0))
        {
            self.gl.attach_shader(program, shader);
        }
    }

    fn link_program(&mut self, program: ProgramHandle) {
        if let Some(program) = self.programs.get(program.0) {
            self.gl.link_program(program);
        }
    }

    fn program_link_status(&self, program: ProgramHandle) -> bool {
        self.programs.get(program.0).is_some_and(|program| {
            self.gl
                .get_program_parameter(program, GL::LINK_STATUS)
                .as_bool()
                .unwrap_or(false)
        })
    }

    fn program_info_log(&self, program: ProgramHandle) -> String {
        self.programs
            .get(program.0)
            .and_then(|program| self.gl.get_program_info_log(program))
            .unwrap_or_default()
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        let program = program.and_then(|handle| self.programs.get(handle.0));
        self.gl.use_program(program);
    }

    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let program = self.programs.get(program.0)?;
        let location = self.gl.get_uniform_location(program, name)?;
        Some(UniformLocation(self.uniforms.insert(location)))
    }

    fn attrib_location(&mut self, program: ProgramHandle, name: &str) -> Option<AttribLocation> {
        let program = self.programs.get(program.0)?;
        let location = self.gl.get_attrib_location(program, name);
        u32::try_from(location).ok().map(AttribLocation)
    }

    fn uniform_1i(&mut self, location: UniformLocation, value: i32) {
        self.gl.uniform1i(self.uniforms.get(location.0), value);
    }

    fn uniform_4f(&mut self, location: UniformLocation, value: Vec4) {
        self.gl.uniform4f(
            self.uniforms.get(location.0),
            value.x,
            value.y,
            value.z,
            value.w,
        );
    }

    fn uniform_matrix4(&mut self, location: UniformLocation, value: &Mat4) {
        self.gl.uniform_matrix4fv_with_f32_array(
            self.uniforms.get(location.0),
            false,
            &value.to_cols_array(),
        );
    }

    fn vertex_attrib_pointer(&mut self, attrib: AttribLocation, components: u32) {
        self.gl.vertex_attrib_pointer_with_i32(
            attrib.0,
            components as i32,
            GL::FLOAT,
            false,
            0,
            0,
        );
    }

    fn enable_vertex_attrib_array(&mut self, attrib: AttribLocation) {
        self.gl.enable_vertex_attrib_array(attrib.0);
    }

    fn viewport(&mut self, width: u32, height: u32) {
        self.gl.viewport(0, 0, width as i32, height as i32);
    }

    fn clear_color(&mut self, color: Vec4) {
        self.gl.clear_color(color.x, color.y, color.z, color.w);
    }

    fn clear(&mut self, mask: ClearMask) {
        let mut bits = 0;
        if mask.color {
            bits |= GL::COLOR_BUFFER_BIT;
        }
        if mask.depth {
            bits |= GL::DEPTH_BUFFER_BIT;
        }
        self.gl.clear(bits);
    }

    fn enable(&mut self, capability: Capability) {
        self.gl.enable(match capability {
            Capability::DepthTest => GL::DEPTH_TEST,
            Capability::CullFace => GL::CULL_FACE,
        });
    }

    fn draw_arrays(&mut self, mode: Primitive, first: u32, count: u32) {
        self.gl
            .draw_arrays(primitive(mode), first as i32, count as i32);
    }

    fn draw_elements(&mut self, mode: Primitive, count: u32) {
        self.gl
            .draw_elements_with_i32(primitive(mode), count as i32, GL::UNSIGNED_SHORT, 0);
    }
}
