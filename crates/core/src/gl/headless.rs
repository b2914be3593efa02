use std::collections::HashMap;

use glam::{Mat4, Vec4};
use tracing::debug;

use super::{
    AttribLocation, BufferHandle, BufferTarget, Capability, ClearMask, FramebufferHandle,
    FramebufferStatus, GraphicsContext, Primitive, ProgramHandle, ShaderHandle, ShaderKind,
    TextureFilter, TextureFormat, TextureHandle, TextureWrap, UniformLocation,
};
use crate::{Result, VisualizerError};

/// One command issued against a [`HeadlessContext`].
#[derive(Debug, Clone, PartialEq)]
pub enum GlCommand {
    CreateTexture(TextureHandle),
    DeleteTexture(TextureHandle),
    ActiveTexture(u32),
    BindTexture(Option<TextureHandle>),
    TexImage2d {
        format: TextureFormat,
        width: u32,
        height: u32,
    },
    TexParameters(TextureFilter, TextureWrap),
    CreateFramebuffer(FramebufferHandle),
    DeleteFramebuffer(FramebufferHandle),
    BindFramebuffer(Option<FramebufferHandle>),
    FramebufferTexture2d(TextureHandle),
    CreateBuffer(BufferHandle),
    DeleteBuffer(BufferHandle),
    BindBuffer(BufferTarget, Option<BufferHandle>),
    BufferData(BufferTarget, usize),
    CreateShader(ShaderHandle, ShaderKind),
    CompileShader(ShaderHandle),
    DeleteShader(ShaderHandle),
    CreateProgram(ProgramHandle),
    DeleteProgram(ProgramHandle),
    AttachShader(ProgramHandle, ShaderHandle),
    LinkProgram(ProgramHandle),
    UseProgram(Option<ProgramHandle>),
    Uniform1i(UniformLocation, i32),
    Uniform4f(UniformLocation, Vec4),
    UniformMatrix4(UniformLocation, Mat4),
    VertexAttribPointer(AttribLocation, u32),
    EnableVertexAttribArray(AttribLocation),
    Viewport(u32, u32),
    ClearColor(Vec4),
    Clear(ClearMask),
    Enable(Capability),
    DrawArrays {
        mode: Primitive,
        first: u32,
        count: u32,
    },
    DrawElements {
        mode: Primitive,
        count: u32,
    },
}

#[derive(Debug, Default)]
struct TextureState {
    storage: Option<(TextureFormat, u32, u32)>,
    fill: Option<Vec4>,
}

#[derive(Debug)]
struct ShaderState {
    kind: ShaderKind,
    source: String,
    compiled: bool,
    log: String,
}

#[derive(Debug, Default)]
struct ProgramState {
    shaders: Vec<ShaderHandle>,
    /// Stage sources captured at link time; deleting a shader afterwards
    /// does not affect the linked program.
    linked_sources: Vec<String>,
    linked: bool,
    log: String,
}

/// In-memory context that records every command it receives.
///
/// Shader compilation and linking are simulated closely enough to exercise the
/// error paths: a stage fails to compile when its source is empty, still holds
/// an unsubstituted `$` template token, or has unbalanced braces, and a program
/// only links with exactly one compiled vertex and one compiled fragment stage.
/// Uniforms and attributes resolve when a stage linked into the program
/// declares them.
///
/// Clearing while an offscreen framebuffer is bound records the clear color as
/// the solid fill of the attached texture, which lets tests reason about
/// composition results without rasterizing anything.
#[derive(Debug)]
pub struct HeadlessContext {
    commands: Vec<GlCommand>,
    next_id: u32,
    lost: bool,
    reject_links: bool,
    textures: HashMap<TextureHandle, TextureState>,
    framebuffers: HashMap<FramebufferHandle, Option<TextureHandle>>,
    buffers: HashMap<BufferHandle, usize>,
    shaders: HashMap<ShaderHandle, ShaderState>,
    programs: HashMap<ProgramHandle, ProgramState>,
    uniforms: HashMap<(ProgramHandle, String), UniformLocation>,
    attribs: HashMap<(ProgramHandle, String), AttribLocation>,
    bound_texture: Option<TextureHandle>,
    bound_framebuffer: Option<FramebufferHandle>,
    bound_buffers: HashMap<BufferTarget, BufferHandle>,
    clear_color: Vec4,
    screen_fill: Option<Vec4>,
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            next_id: 1,
            lost: false,
            reject_links: false,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            uniforms: HashMap::new(),
            attribs: HashMap::new(),
            bound_texture: None,
            bound_framebuffer: None,
            bound_buffers: HashMap::new(),
            clear_color: Vec4::ZERO,
            screen_fill: None,
        }
    }

    /// Makes every subsequent object creation fail, like a lost context.
    pub fn lose_context(&mut self) {
        self.lost = true;
    }

    /// Makes every subsequent link fail even with valid stages, like a driver
    /// that rejects the program.
    pub fn reject_links(&mut self) {
        self.reject_links = true;
    }

    pub fn commands(&self) -> &[GlCommand] {
        &self.commands
    }

    /// Drains the command log.
    pub fn take_commands(&mut self) -> Vec<GlCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn draw_call_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| {
                matches!(
                    command,
                    GlCommand::DrawArrays { .. } | GlCommand::DrawElements { .. }
                )
            })
            .count()
    }

    pub fn framebuffer_bind_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, GlCommand::BindFramebuffer(_)))
            .count()
    }

    /// Every viewport set since the log was last drained, in order.
    pub fn viewports(&self) -> Vec<(u32, u32)> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                GlCommand::Viewport(width, height) => Some((*width, *height)),
                _ => None,
            })
            .collect()
    }

    /// Allocated dimensions of a texture, if storage was ever allocated.
    pub fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures
            .get(&texture)
            .and_then(|state| state.storage)
            .map(|(_, width, height)| (width, height))
    }

    /// Solid color a texture was last cleared to through its framebuffer.
    pub fn texture_fill(&self, texture: TextureHandle) -> Option<Vec4> {
        self.textures.get(&texture).and_then(|state| state.fill)
    }

    /// Color the default framebuffer was last cleared to.
    pub fn screen_fill(&self) -> Option<Vec4> {
        self.screen_fill
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    /// Byte length last uploaded into `buffer`.
    pub fn buffer_size(&self, buffer: BufferHandle) -> Option<usize> {
        self.buffers.get(&buffer).copied()
    }

    pub fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.bound_framebuffer
    }

    fn allocate(&mut self, kind: &'static str) -> Result<u32> {
        if self.lost {
            return Err(VisualizerError::ResourceCreation { kind });
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    fn record(&mut self, command: GlCommand) {
        self.commands.push(command);
    }

    fn declares(&self, program: ProgramHandle, qualifier: &str, name: &str) -> bool {
        let Some(state) = self.programs.get(&program) else {
            return false;
        };
        state
            .linked_sources
            .iter()
            .any(|source| declares(source, qualifier, name))
    }
}

fn declares(source: &str, qualifier: &str, name: &str) -> bool {
    source.lines().any(|line| {
        let line = line.trim();
        line.starts_with(qualifier)
            && line
                .trim_end_matches(';')
                .split_whitespace()
                .last()
                .is_some_and(|declared| declared == name)
    })
}

fn validate_source(source: &str) -> std::result::Result<(), String> {
    if source.trim().is_empty() {
        return Err("ERROR: 0:0: empty shader source".to_string());
    }
    if let Some((line, _)) = source
        .lines()
        .enumerate()
        .find(|(_, text)| text.contains('$'))
    {
        return Err(format!("ERROR: 0:{}: '$' : unexpected token", line + 1));
    }
    let mut depth = 0i32;
    for ch in source.chars() {
        match ch {
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return Err("ERROR: 0:0: '}' : syntax error".to_string());
        }
    }
    if depth != 0 {
        return Err("ERROR: 0:0: unexpected end of file".to_string());
    }
    Ok(())
}

impl GraphicsContext for HeadlessContext {
    fn create_texture(&mut self) -> Result<TextureHandle> {
        let texture = TextureHandle(self.allocate("texture")?);
        self.textures.insert(texture, TextureState::default());
        self.record(GlCommand::CreateTexture(texture));
        Ok(texture)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
        if self.bound_texture == Some(texture) {
            self.bound_texture = None;
        }
        self.record(GlCommand::DeleteTexture(texture));
    }

    fn active_texture(&mut self, unit: u32) {
        self.record(GlCommand::ActiveTexture(unit));
    }

    fn bind_texture(&mut self, texture: Option<TextureHandle>) {
        self.bound_texture = texture;
        self.record(GlCommand::BindTexture(texture));
    }

    fn tex_image_2d(
        &mut self,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) -> Result<()> {
        let texture = self
            .bound_texture
            .ok_or(VisualizerError::InvalidInput("no texture bound"))?;
        if let Some(pixels) = pixels {
            let expected = width as usize * height as usize * format.bytes_per_pixel();
            if pixels.len() != expected {
                return Err(VisualizerError::InvalidInput(
                    "pixel data does not match texture dimensions",
                ));
            }
        }
        if let Some(state) = self.textures.get_mut(&texture) {
            state.storage = Some((format, width, height));
        }
        self.record(GlCommand::TexImage2d {
            format,
            width,
            height,
        });
        Ok(())
    }

    fn tex_parameters(&mut self, filter: TextureFilter, wrap: TextureWrap) {
        self.record(GlCommand::TexParameters(filter, wrap));
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferHandle> {
        let framebuffer = FramebufferHandle(self.allocate("framebuffer")?);
        self.framebuffers.insert(framebuffer, None);
        self.record(GlCommand::CreateFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer);
        if self.bound_framebuffer == Some(framebuffer) {
            self.bound_framebuffer = None;
        }
        self.record(GlCommand::DeleteFramebuffer(framebuffer));
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.bound_framebuffer = framebuffer;
        self.record(GlCommand::BindFramebuffer(framebuffer));
    }

    fn framebuffer_texture_2d(&mut self, texture: TextureHandle) {
        if let Some(framebuffer) = self.bound_framebuffer {
            self.framebuffers.insert(framebuffer, Some(texture));
        }
        self.record(GlCommand::FramebufferTexture2d(texture));
    }

    fn check_framebuffer_status(&mut self) -> FramebufferStatus {
        let Some(framebuffer) = self.bound_framebuffer else {
            return FramebufferStatus::Complete;
        };
        match self.framebuffers.get(&framebuffer).copied().flatten() {
            None => FramebufferStatus::MissingAttachment,
            Some(texture) => match self.textures.get(&texture) {
                Some(TextureState {
                    storage: Some(_), ..
                }) => FramebufferStatus::Complete,
                _ => FramebufferStatus::IncompleteAttachment,
            },
        }
    }

    fn create_buffer(&mut self) -> Result<BufferHandle> {
        let buffer = BufferHandle(self.allocate("buffer")?);
        self.buffers.insert(buffer, 0);
        self.record(GlCommand::CreateBuffer(buffer));
        Ok(buffer)
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
        self.bound_buffers.retain(|_, bound| *bound != buffer);
        self.record(GlCommand::DeleteBuffer(buffer));
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferHandle>) {
        match buffer {
            Some(buffer) => {
                self.bound_buffers.insert(target, buffer);
            }
            None => {
                self.bound_buffers.remove(&target);
            }
        }
        self.record(GlCommand::BindBuffer(target, buffer));
    }

    fn buffer_data(&mut self, target: BufferTarget, data: &[u8]) {
        if let Some(buffer) = self.bound_buffers.get(&target) {
            self.buffers.insert(*buffer, data.len());
        }
        self.record(GlCommand::BufferData(target, data.len()));
    }

    fn create_shader(&mut self, kind: ShaderKind) -> Result<ShaderHandle> {
        let shader = ShaderHandle(self.allocate("shader")?);
        self.shaders.insert(
            shader,
            ShaderState {
                kind,
                source: String::new(),
                compiled: false,
                log: String::new(),
            },
        );
        self.record(GlCommand::CreateShader(shader, kind));
        Ok(shader)
    }

    fn shader_source(&mut self, shader: ShaderHandle, source: &str) {
        if let Some(state) = self.shaders.get_mut(&shader) {
            state.source = source.to_string();
        }
    }

    fn compile_shader(&mut self, shader: ShaderHandle) {
        if let Some(state) = self.shaders.get_mut(&shader) {
            match validate_source(&state.source) {
                Ok(()) => {
                    state.compiled = true;
                    state.log.clear();
                }
                Err(log) => {
                    debug!(shader = shader.id(), %log, "headless shader compile failed");
                    state.compiled = false;
                    state.log = log;
                }
            }
        }
        self.record(GlCommand::CompileShader(shader));
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader);
        self.record(GlCommand::DeleteShader(shader));
    }

    fn shader_compile_status(&self, shader: ShaderHandle) -> bool {
        self.shaders.get(&shader).is_some_and(|state| state.compiled)
    }

    fn shader_info_log(&self, shader: ShaderHandle) -> String {
        self.shaders
            .get(&shader)
            .map(|state| state.log.clone())
            .unwrap_or_default()
    }

    fn create_program(&mut self) -> Result<ProgramHandle> {
        let program = ProgramHandle(self.allocate("program")?);
        self.programs.insert(program, ProgramState::default());
        self.record(GlCommand::CreateProgram(program));
        Ok(program)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        self.uniforms.retain(|(owner, _), _| *owner != program);
        self.attribs.retain(|(owner, _), _| *owner != program);
        self.record(GlCommand::DeleteProgram(program));
    }

    fn attach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle) {
        if let Some(state) = self.programs.get_mut(&program) {
            state.shaders.push(shader);
        }
        self.record(GlCommand::AttachShader(program, shader));
    }

    fn link_program(&mut self, program: ProgramHandle) {
        let stages: Vec<&ShaderState> = self
            .programs
            .get(&program)
            .map(|state| {
                state
                    .shaders
                    .iter()
                    .filter_map(|shader| self.shaders.get(shader))
                    .collect()
            })
            .unwrap_or_default();
        let sources: Vec<String> = stages.iter().map(|stage| stage.source.clone()).collect();

        let count = |kind| stages.iter().filter(|stage| stage.kind == kind).count();
        let outcome = if self.reject_links {
            Err("program rejected by the driver")
        } else if stages.iter().any(|stage| !stage.compiled) {
            Err("attached shader is not compiled")
        } else if count(ShaderKind::Vertex) != 1 {
            Err("program needs exactly one vertex shader")
        } else if count(ShaderKind::Fragment) != 1 {
            Err("program needs exactly one fragment shader")
        } else {
            Ok(())
        };

        if let Some(state) = self.programs.get_mut(&program) {
            match outcome {
                Ok(()) => {
                    state.linked = true;
                    state.linked_sources = sources;
                    state.log.clear();
                }
                Err(log) => {
                    state.linked = false;
                    state.linked_sources.clear();
                    state.log = log.to_string();
                }
            }
        }
        self.record(GlCommand::LinkProgram(program));
    }

    fn program_link_status(&self, program: ProgramHandle) -> bool {
        self.programs.get(&program).is_some_and(|state| state.linked)
    }

    fn program_info_log(&self, program: ProgramHandle) -> String {
        self.programs
            .get(&program)
            .map(|state| state.log.clone())
            .unwrap_or_default()
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.record(GlCommand::UseProgram(program));
    }

    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        if !self.program_link_status(program) || !self.declares(program, "uniform", name) {
            return None;
        }
        let key = (program, name.to_string());
        if let Some(location) = self.uniforms.get(&key) {
            return Some(*location);
        }
        let location = UniformLocation(self.next_id);
        self.next_id += 1;
        self.uniforms.insert(key, location);
        Some(location)
    }

    fn attrib_location(&mut self, program: ProgramHandle, name: &str) -> Option<AttribLocation> {
        if !self.program_link_status(program) || !self.declares(program, "attribute", name) {
            return None;
        }
        let next = self
            .attribs
            .keys()
            .filter(|(owner, _)| *owner == program)
            .count() as u32;
        Some(
            *self
                .attribs
                .entry((program, name.to_string()))
                .or_insert(AttribLocation(next)),
        )
    }

    fn uniform_1i(&mut self, location: UniformLocation, value: i32) {
        self.record(GlCommand::Uniform1i(location, value));
    }

    fn uniform_4f(&mut self, location: UniformLocation, value: Vec4) {
        self.record(GlCommand::Uniform4f(location, value));
    }

    fn uniform_matrix4(&mut self, location: UniformLocation, value: &Mat4) {
        self.record(GlCommand::UniformMatrix4(location, *value));
    }

    fn vertex_attrib_pointer(&mut self, attrib: AttribLocation, components: u32) {
        self.record(GlCommand::VertexAttribPointer(attrib, components));
    }

    fn enable_vertex_attrib_array(&mut self, attrib: AttribLocation) {
        self.record(GlCommand::EnableVertexAttribArray(attrib));
    }

    fn viewport(&mut self, width: u32, height: u32) {
        self.record(GlCommand::Viewport(width, height));
    }

    fn clear_color(&mut self, color: Vec4) {
        self.clear_color = color;
        self.record(GlCommand::ClearColor(color));
    }

    fn clear(&mut self, mask: ClearMask) {
        if mask.color {
            let attached = self
                .bound_framebuffer
                .and_then(|framebuffer| self.framebuffers.get(&framebuffer).copied().flatten());
            match (self.bound_framebuffer, attached) {
                (None, _) => self.screen_fill = Some(self.clear_color),
                (Some(_), Some(texture)) => {
                    if let Some(state) = self.textures.get_mut(&texture) {
                        state.fill = Some(self.clear_color);
                    }
                }
                (Some(_), None) => {}
            }
        }
        self.record(GlCommand::Clear(mask));
    }

    fn enable(&mut self, capability: Capability) {
        self.record(GlCommand::Enable(capability));
    }

    fn draw_arrays(&mut self, mode: Primitive, first: u32, count: u32) {
        self.record(GlCommand::DrawArrays { mode, first, count });
    }

    fn draw_elements(&mut self, mode: Primitive, count: u32) {
        self.record(GlCommand::DrawElements { mode, count });
    }
}
