use crate::gl::ShaderKind;

/// Result alias that carries the custom [`VisualizerError`] type.
pub type Result<T> = std::result::Result<T, VisualizerError>;

/// Common error type for the core crate.
///
/// Every variant is terminal for the component that raised it: nothing in the
/// crate retries, and no degraded shader or placeholder composition is swapped
/// in when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum VisualizerError {
    /// No graphics context could be obtained for the target surface.
    #[error("no active graphics context: {0}")]
    ContextUnavailable(String),
    /// A program was registered twice under the same identifier.
    #[error("program `{id}` is already registered")]
    DuplicateProgram { id: String },
    /// A program identifier was looked up before being registered.
    #[error("program `{id}` has not been registered")]
    UnknownProgram { id: String },
    #[error("failed to compile {kind} shader: {log}")]
    ShaderCompile { kind: ShaderKind, log: String },
    #[error("failed to link program `{id}`: {log}")]
    ProgramLink { id: String, log: String },
    /// The backend refused to hand out a new object.
    #[error("failed to create {kind}")]
    ResourceCreation { kind: &'static str },
    #[error("framebuffer is incomplete: {status}")]
    FramebufferIncomplete { status: &'static str },
    #[error("renderer needs one blend mode per layer (got {layers} layers, {blend_modes} blend modes)")]
    LayerCountMismatch { layers: usize, blend_modes: usize },
    #[error("renderer needs at least one layer")]
    NoLayers,
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("failed to load `{path}`: {reason}")]
    AssetLoad { path: String, reason: String },
    /// The composition stage is not available (never loaded, or failed to load).
    #[error("renderer composition stage is not ready")]
    NotReady,
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

/// Malformed composition template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("composition template is missing the `{0}` token")]
    MissingToken(&'static str),
    #[error("composition template contains the `{token}` token {count} times")]
    DuplicateToken { token: &'static str, count: usize },
}

impl VisualizerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for VisualizerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VisualizerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
