use logship_core::ResourceKind;
use logship_vrl::RenderError;

/// Compile failures, classified by how the reconciler reacts to them.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// A malformed resource; it is skipped and compilation continues.
    #[error("invalid {kind} {name:?}: {reason}")]
    InputValidation { kind: ResourceKind, name: String, reason: String },
    /// A rule could not be rendered; the whole compile is aborted.
    #[error("rendering rules for {kind} {name:?}: {source}")]
    TemplateRender { kind: ResourceKind, name: String, source: RenderError },
    #[error("encoding config: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CompileError {
    pub fn is_input_validation(&self) -> bool {
        matches!(self, CompileError::InputValidation { .. })
    }
}

/// Builder-level failure, before it is attributed to a resource.
#[derive(Debug)]
pub(crate) enum Fault {
    Invalid(String),
    Render(RenderError),
    Encode(serde_json::Error),
}

impl Fault {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Fault::Invalid(reason.into())
    }

    pub(crate) fn at(self, kind: ResourceKind, name: &str) -> CompileError {
        let name = name.to_string();
        match self {
            Fault::Invalid(reason) => CompileError::InputValidation { kind, name, reason },
            Fault::Render(source) => CompileError::TemplateRender { kind, name, source },
            Fault::Encode(e) => CompileError::Encode(e),
        }
    }
}

impl From<RenderError> for Fault {
    fn from(e: RenderError) -> Self { Fault::Render(e) }
}

impl From<serde_json::Error> for Fault {
    fn from(e: serde_json::Error) -> Self { Fault::Encode(e) }
}
