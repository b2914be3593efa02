use glam::Vec4;

use super::{upload_transfer_plane, RenderLayer};
use crate::analysis::SILENCE;
use crate::audio::SpectrumHandle;
use crate::gl::{
    AttribLocation, BufferHandle, BufferTarget, ClearMask, GraphicsContext, Primitive,
    ProgramHandle, TextureFilter, TextureFormat, TextureHandle, TextureWrap, UniformLocation,
};
use crate::shader::{PostProcessor, ProgramRegistry};
use crate::Result;

pub const WAVEFORM_PROGRAM_ID: &str = "waveform";

/// Draws a bright trace where the fragment's height matches the sample under it.
pub const WAVEFORM_FRAGMENT_SHADER: &str = r#"
precision mediump float;

varying vec2 position_norm;

uniform sampler2D tex;

void main() {
    float level = texture2D(tex, vec2(position_norm.x, 0.5)).r;
    float distance_to_trace = abs(position_norm.y - level);
    float trace = 1. - smoothstep(0.0, 0.01, distance_to_trace);
    gl_FragColor = vec4(vec3(trace), 1.);
}
"#;

/// Width of the sample texture.
const SAMPLE_COUNT: usize = 256;
/// Unit the sample texture is bound to while drawing.
const SAMPLE_UNIT: u32 = 1;

/// Oscilloscope layer fed by the analyser's time-domain buffer.
#[derive(Debug)]
pub struct WaveformLayer {
    program: ProgramHandle,
    sampler: Option<UniformLocation>,
    position: Option<AttribLocation>,
    texture: TextureHandle,
    quad: BufferHandle,
    spectrum: SpectrumHandle,
    samples: Vec<u8>,
    upload: Vec<u8>,
    background: Vec4,
}

impl WaveformLayer {
    pub fn new(
        gl: &mut dyn GraphicsContext,
        registry: &mut ProgramRegistry,
        spectrum: SpectrumHandle,
    ) -> Result<Self> {
        let program = if registry.contains(WAVEFORM_PROGRAM_ID) {
            registry.program(WAVEFORM_PROGRAM_ID)?
        } else {
            PostProcessor::new(gl, registry, WAVEFORM_PROGRAM_ID, Some(WAVEFORM_FRAGMENT_SHADER))?
                .program()
        };
        let sampler = registry.find_uniform(gl, WAVEFORM_PROGRAM_ID, "tex")?;
        let position = gl.attrib_location(program, "position");

        let upload = vec![SILENCE; SAMPLE_COUNT];
        let texture = gl.create_texture()?;
        gl.bind_texture(Some(texture));
        gl.tex_image_2d(TextureFormat::Luminance, SAMPLE_COUNT as u32, 1, Some(&upload))?;
        gl.tex_parameters(TextureFilter::Linear, TextureWrap::ClampToEdge);
        gl.bind_texture(None);

        let quad = match upload_transfer_plane(gl) {
            Ok(quad) => quad,
            Err(err) => {
                gl.delete_texture(texture);
                return Err(err);
            }
        };

        Ok(Self {
            program,
            sampler,
            position,
            texture,
            quad,
            spectrum,
            samples: Vec::new(),
            upload,
            background: Vec4::new(0.0, 0.0, 0.0, 1.0),
        })
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn set_background(&mut self, background: Vec4) {
        self.background = background;
    }

    /// Resamples the latest time-domain window onto the texture width.
    fn refresh_samples(&mut self) -> Result<()> {
        self.spectrum.copy_time_domain_buffer(&mut self.samples)?;
        let len = self.samples.len();
        if len == 0 {
            return Ok(());
        }
        for (index, byte) in self.upload.iter_mut().enumerate() {
            *byte = self.samples[index * len / SAMPLE_COUNT];
        }
        Ok(())
    }
}

impl RenderLayer for WaveformLayer {
    fn render(&mut self, gl: &mut dyn GraphicsContext, _time: f64) -> Result<()> {
        gl.clear_color(self.background);
        gl.clear(ClearMask::COLOR);

        gl.use_program(Some(self.program));
        self.refresh_samples()?;
        gl.active_texture(SAMPLE_UNIT);
        gl.bind_texture(Some(self.texture));
        gl.tex_image_2d(
            TextureFormat::Luminance,
            SAMPLE_COUNT as u32,
            1,
            Some(&self.upload),
        )?;
        gl.tex_parameters(TextureFilter::Linear, TextureWrap::ClampToEdge);
        if let Some(sampler) = self.sampler {
            gl.uniform_1i(sampler, SAMPLE_UNIT as i32);
        }

        gl.bind_buffer(BufferTarget::Array, Some(self.quad));
        if let Some(position) = self.position {
            gl.vertex_attrib_pointer(position, 2);
            gl.enable_vertex_attrib_array(position);
        }
        gl.draw_arrays(Primitive::TriangleStrip, 0, 4);
        Ok(())
    }

    fn release(&mut self, gl: &mut dyn GraphicsContext) {
        gl.delete_texture(self.texture);
        gl.delete_buffer(self.quad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::{GlCommand, HeadlessContext};
    use crate::{AudioConfig, AudioSession};

    fn audio() -> AudioSession {
        AudioSession::new(&AudioConfig {
            fft_size: 512,
            ..AudioConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn uploads_a_luminance_strip_each_frame() {
        let mut gl = HeadlessContext::new();
        let mut registry = ProgramRegistry::new();
        let audio = audio();
        let mut layer = WaveformLayer::new(&mut gl, &mut registry, audio.spectrum()).unwrap();
        assert!(registry.contains(WAVEFORM_PROGRAM_ID));
        gl.take_commands();

        layer.render(&mut gl, 0.0).unwrap();

        let commands = gl.commands();
        assert!(commands.contains(&GlCommand::TexImage2d {
            format: TextureFormat::Luminance,
            width: 256,
            height: 1
        }));
        assert!(commands.contains(&GlCommand::ActiveTexture(1)));
        assert!(commands
            .iter()
            .any(|command| matches!(command, GlCommand::Uniform1i(_, 1))));
        assert_eq!(gl.draw_call_count(), 1);
        assert_eq!(gl.texture_size(layer.texture()), Some((256, 1)));
    }

    #[test]
    fn resamples_the_time_domain_window() {
        let mut gl = HeadlessContext::new();
        let mut registry = ProgramRegistry::new();
        let audio = audio();
        let mut layer = WaveformLayer::new(&mut gl, &mut registry, audio.spectrum()).unwrap();

        let mut ramp = vec![-1.0; 256];
        ramp.extend(std::iter::repeat(0.5).take(256));
        audio.push_samples(&ramp).unwrap();
        audio.update().unwrap();
        layer.refresh_samples().unwrap();

        assert_eq!(layer.upload[0], 0);
        assert_eq!(layer.upload[127], 0);
        assert_eq!(layer.upload[128], 192);
        assert_eq!(layer.upload[255], 192);
    }

    #[test]
    fn release_frees_texture_and_quad() {
        let mut gl = HeadlessContext::new();
        let mut registry = ProgramRegistry::new();
        let audio = audio();
        let mut layer = WaveformLayer::new(&mut gl, &mut registry, audio.spectrum()).unwrap();
        assert_eq!(gl.live_textures(), 1);
        assert_eq!(gl.live_buffers(), 1);

        layer.release(&mut gl);

        assert_eq!(gl.live_textures(), 0);
        assert_eq!(gl.live_buffers(), 0);
    }
}
