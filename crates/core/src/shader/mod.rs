use std::collections::HashMap;

use tracing::{debug, error};

use crate::gl::{GraphicsContext, ProgramHandle, ShaderHandle, ShaderKind, UniformLocation};
use crate::{Result, VisualizerError};

/// Places 2D points on screen and hands the fragment stage `position_norm`,
/// the position remapped from [-1, 1] to [0, 1].
pub const IDENTITY_VERTEX_SHADER: &str = r#"
attribute vec2 position;

varying vec2 position_norm;

void main() {
    gl_Position = vec4(position, 0., 1.);
    position_norm = (position + vec2(1., 1.)) / 2.;
}
"#;

/// Maps a single texture onto the screen.
pub const IDENTITY_FRAGMENT_SHADER: &str = r#"
precision mediump float;

varying vec2 position_norm;

uniform sampler2D source;

void main() {
    gl_FragColor = texture2D(source, position_norm);
}
"#;

/// Compiles a single shader stage. A stage that fails to compile is deleted
/// before the error is returned.
pub fn compile_shader(
    gl: &mut dyn GraphicsContext,
    kind: ShaderKind,
    source: &str,
) -> Result<ShaderHandle> {
    let shader = gl.create_shader(kind)?;
    gl.shader_source(shader, source);
    gl.compile_shader(shader);
    if !gl.shader_compile_status(shader) {
        let log = gl.shader_info_log(shader);
        error!(%kind, %log, "shader compilation failed");
        gl.delete_shader(shader);
        return Err(VisualizerError::ShaderCompile { kind, log });
    }
    Ok(shader)
}

#[derive(Debug)]
struct ProgramEntry {
    handle: ProgramHandle,
    uniforms: HashMap<String, Option<UniformLocation>>,
}

/// Linked programs keyed by a string identifier, with a per-program cache of
/// uniform locations.
///
/// Registration is write-once: an identifier can never be rebound. The
/// registry also owns the lazily compiled identity shaders shared by the
/// compositor and post-processing passes.
#[derive(Debug, Default)]
pub struct ProgramRegistry {
    programs: HashMap<String, ProgramEntry>,
    identity_vertex: Option<ShaderHandle>,
    identity_fragment: Option<ShaderHandle>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Links `vertex` and `fragment` into `program` and stores it under `id`.
    ///
    /// The identifier is checked before anything is attached, so a duplicate
    /// leaves both the existing entry and the new program untouched.
    pub fn compile_and_register(
        &mut self,
        gl: &mut dyn GraphicsContext,
        program: ProgramHandle,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
        id: &str,
    ) -> Result<()> {
        if self.programs.contains_key(id) {
            return Err(VisualizerError::DuplicateProgram { id: id.to_string() });
        }

        gl.attach_shader(program, vertex);
        gl.attach_shader(program, fragment);
        gl.link_program(program);
        if !gl.program_link_status(program) {
            let log = gl.program_info_log(program);
            error!(id, %log, "program link failed");
            return Err(VisualizerError::ProgramLink {
                id: id.to_string(),
                log,
            });
        }

        debug!(id, program = program.id(), "registered program");
        self.programs.insert(
            id.to_string(),
            ProgramEntry {
                handle: program,
                uniforms: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Creates a program from two compiled stages and registers it under
    /// `id`. If linking or registration fails the program is deleted again;
    /// the stages always stay with the caller.
    pub fn link_new_program(
        &mut self,
        gl: &mut dyn GraphicsContext,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
        id: &str,
    ) -> Result<ProgramHandle> {
        let program = gl.create_program()?;
        if let Err(err) = self.compile_and_register(gl, program, vertex, fragment, id) {
            gl.delete_program(program);
            return Err(err);
        }
        Ok(program)
    }

    /// Compiles both stages from source, links them and registers the result.
    /// The stages are deleted once linking is over, whatever the outcome.
    pub fn build(
        &mut self,
        gl: &mut dyn GraphicsContext,
        id: &str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<ProgramHandle> {
        if self.contains(id) {
            return Err(VisualizerError::DuplicateProgram { id: id.to_string() });
        }
        let vertex = compile_shader(gl, ShaderKind::Vertex, vertex_source)?;
        let fragment = match compile_shader(gl, ShaderKind::Fragment, fragment_source) {
            Ok(fragment) => fragment,
            Err(err) => {
                gl.delete_shader(vertex);
                return Err(err);
            }
        };
        let linked = self.link_new_program(gl, vertex, fragment, id);
        gl.delete_shader(vertex);
        gl.delete_shader(fragment);
        linked
    }

    /// Looks up `name` in program `id`, querying the context only on the first
    /// request. Misses are cached too.
    pub fn find_uniform(
        &mut self,
        gl: &mut dyn GraphicsContext,
        id: &str,
        name: &str,
    ) -> Result<Option<UniformLocation>> {
        let entry = self
            .programs
            .get_mut(id)
            .ok_or_else(|| VisualizerError::UnknownProgram { id: id.to_string() })?;
        if let Some(location) = entry.uniforms.get(name) {
            return Ok(*location);
        }
        let location = gl.uniform_location(entry.handle, name);
        if location.is_none() {
            debug!(id, name, "uniform not found, caching miss");
        }
        entry.uniforms.insert(name.to_string(), location);
        Ok(location)
    }

    pub fn program(&self, id: &str) -> Result<ProgramHandle> {
        self.programs
            .get(id)
            .map(|entry| entry.handle)
            .ok_or_else(|| VisualizerError::UnknownProgram { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.programs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// The shared identity vertex shader, compiled on first use.
    pub fn identity_vertex_shader(&mut self, gl: &mut dyn GraphicsContext) -> Result<ShaderHandle> {
        if let Some(shader) = self.identity_vertex {
            return Ok(shader);
        }
        let shader = compile_shader(gl, ShaderKind::Vertex, IDENTITY_VERTEX_SHADER)?;
        self.identity_vertex = Some(shader);
        Ok(shader)
    }

    /// Deletes every registered program and the identity shaders, leaving the
    /// registry empty.
    pub fn release(&mut self, gl: &mut dyn GraphicsContext) {
        for (id, entry) in self.programs.drain() {
            debug!(id = %id, program = entry.handle.id(), "deleting program");
            gl.delete_program(entry.handle);
        }
        for shader in [self.identity_vertex.take(), self.identity_fragment.take()]
            .into_iter()
            .flatten()
        {
            gl.delete_shader(shader);
        }
    }

    /// The shared identity fragment shader, compiled on first use.
    pub fn identity_fragment_shader(
        &mut self,
        gl: &mut dyn GraphicsContext,
    ) -> Result<ShaderHandle> {
        if let Some(shader) = self.identity_fragment {
            return Ok(shader);
        }
        let shader = compile_shader(gl, ShaderKind::Fragment, IDENTITY_FRAGMENT_SHADER)?;
        self.identity_fragment = Some(shader);
        Ok(shader)
    }
}

/// A full-screen effect pass registered under its own name.
#[derive(Debug, Clone)]
pub struct PostProcessor {
    name: String,
    program: ProgramHandle,
}

impl PostProcessor {
    /// Builds the pass from `effect`, or from the identity fragment shader when
    /// no effect source is given.
    pub fn new(
        gl: &mut dyn GraphicsContext,
        registry: &mut ProgramRegistry,
        name: &str,
        effect: Option<&str>,
    ) -> Result<Self> {
        if registry.contains(name) {
            return Err(VisualizerError::DuplicateProgram {
                id: name.to_string(),
            });
        }
        let vertex = registry.identity_vertex_shader(gl)?;
        let program = match effect {
            Some(source) => {
                let fragment = compile_shader(gl, ShaderKind::Fragment, source)?;
                let linked = registry.link_new_program(gl, vertex, fragment, name);
                gl.delete_shader(fragment);
                linked?
            }
            None => {
                let fragment = registry.identity_fragment_shader(gl)?;
                registry.link_new_program(gl, vertex, fragment, name)?
            }
        };
        Ok(Self {
            name: name.to_string(),
            program,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    pub fn activate(&self, gl: &mut dyn GraphicsContext) {
        gl.use_program(Some(self.program));
    }
}
