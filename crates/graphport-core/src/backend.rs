use crate::{ArtifactSignature, CompiledArtifact, Result, RtTensor};

/// Entry point status for a successful call.
pub const STATUS_OK: i32 = 0;

#[derive(Clone, Copy, Debug)]
pub struct BackendCapabilities {
    pub supports_dynamic_shapes: bool,
    pub supports_strided_inputs: bool,
    /// Whether one loaded entry point may be invoked from several threads
    /// at once.
    pub reentrant_entry: bool,
}

/// Something that can turn a compiled artifact into a callable entry point.
pub trait Backend: Send + Sync + 'static {
    type Entry: EntryPoint;

    fn name(&self) -> &'static str;
    fn load(&self, artifact: &CompiledArtifact, symbol: &str) -> Result<Self::Entry>;
    fn capabilities(&self) -> BackendCapabilities;
}

/// The fixed calling convention of a loaded artifact.
pub trait EntryPoint: Send + 'static {
    fn signature(&self) -> &ArtifactSignature;

    /// Inputs have already been checked against [`EntryPoint::signature`].
    /// `outputs` holds one empty slot per declared output. Returns
    /// [`STATUS_OK`] or a non-zero code with details in
    /// [`EntryPoint::last_error`].
    fn invoke(&mut self, inputs: &[RtTensor<'_>], outputs: &mut [Option<RtTensor<'static>>])
        -> i32;

    fn last_error(&self) -> Option<String>;
}
