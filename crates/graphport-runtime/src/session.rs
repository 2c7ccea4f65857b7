//! Execution sessions over a compiled artifact.
//!
//! A session owns one loaded entry point. Every call checks its inputs
//! against the artifact signature before the entry point sees them, and
//! checks the produced outputs against the declared ones afterwards.

use std::path::{Path, PathBuf};

use graphport_core::{
    ArtifactMetadata, ArtifactSignature, Backend, CompiledArtifact, EntryPoint, RtTensor,
    STATUS_OK,
};
use tracing::{debug, info};

use crate::backend::{KernelBackend, KernelEntry};
use crate::error::{LoadError, RunError};

pub struct Session<E: EntryPoint = KernelEntry> {
    path: Option<PathBuf>,
    metadata: ArtifactMetadata,
    entry: E,
    runs: u64,
}

impl Session<KernelEntry> {
    /// Load `entry_symbol` from the artifact at `path` with the kernel backend.
    pub fn open(path: impl AsRef<Path>, entry_symbol: &str) -> Result<Self, LoadError> {
        Self::open_with(&KernelBackend, path, entry_symbol)
    }
}

impl<E: EntryPoint> Session<E> {
    pub fn open_with<B: Backend<Entry = E>>(
        backend: &B,
        path: impl AsRef<Path>,
        entry_symbol: &str,
    ) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let artifact = CompiledArtifact::read(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut session = Self::load(backend, &artifact, entry_symbol)?;
        session.path = Some(path.to_path_buf());
        info!(
            path = %path.display(),
            symbol = entry_symbol,
            backend = backend.name(),
            inputs = session.num_inputs(),
            outputs = session.num_outputs(),
            "session opened"
        );
        Ok(session)
    }

    /// Load from an artifact already in memory.
    pub fn load<B: Backend<Entry = E>>(
        backend: &B,
        artifact: &CompiledArtifact,
        entry_symbol: &str,
    ) -> Result<Self, LoadError> {
        if artifact.program.resolve(entry_symbol).is_none() {
            return Err(LoadError::UnknownSymbol {
                symbol: entry_symbol.to_string(),
                available: artifact.metadata.entry_symbol.clone(),
            });
        }
        let entry = backend
            .load(artifact, entry_symbol)
            .map_err(|source| LoadError::Backend {
                backend: backend.name(),
                symbol: entry_symbol.to_string(),
                source,
            })?;
        if entry.signature() != &artifact.metadata.signature {
            return Err(LoadError::SignatureDisagreement(entry_symbol.to_string()));
        }
        Ok(Self {
            path: None,
            metadata: artifact.metadata.clone(),
            entry,
            runs: 0,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    pub fn signature(&self) -> &ArtifactSignature {
        &self.metadata.signature
    }

    /// Declared inputs as a JSON array of `{name, dtype, dims}`.
    pub fn input_signature(&self) -> String {
        self.metadata.signature.input_json()
    }

    pub fn output_signature(&self) -> String {
        self.metadata.signature.output_json()
    }

    pub fn num_inputs(&self) -> usize {
        self.metadata.num_inputs()
    }

    pub fn num_outputs(&self) -> usize {
        self.metadata.num_outputs()
    }

    /// Completed calls, successful or not, that reached the entry point.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn run(&mut self, inputs: &[RtTensor<'_>]) -> Result<Vec<RtTensor<'static>>, RunError> {
        let signature = &self.metadata.signature;
        if inputs.len() != signature.inputs.len() {
            return Err(RunError::ArityMismatch {
                expected: signature.inputs.len(),
                got: inputs.len(),
            });
        }
        for (index, (spec, t)) in signature.inputs.iter().zip(inputs).enumerate() {
            spec.ty
                .check(t.dtype(), t.dims())
                .map_err(|m| RunError::SignatureMismatch {
                    index,
                    name: spec.name.to_string(),
                    reason: m.to_string(),
                })?;
        }

        let mut outputs: Vec<Option<RtTensor<'static>>> =
            (0..signature.outputs.len()).map(|_| None).collect();
        self.runs += 1;
        let status = self.entry.invoke(inputs, &mut outputs);
        if status != STATUS_OK {
            let detail = self
                .entry
                .last_error()
                .unwrap_or_else(|| format!("entry point returned status {status}"));
            debug!(symbol = %self.metadata.entry_symbol, status, %detail, "execution fault");
            return Err(RunError::ExecutionFault { status, detail });
        }

        let fault = |detail: String| RunError::ExecutionFault {
            status: STATUS_OK,
            detail,
        };
        signature
            .outputs
            .iter()
            .zip(outputs)
            .enumerate()
            .map(|(i, (spec, out))| {
                let t = out.ok_or_else(|| fault(format!("output {i} (`{}`) was not produced", spec.name)))?;
                spec.ty
                    .check(t.dtype(), t.dims())
                    .map_err(|m| fault(format!("output {i} (`{}`): {m}", spec.name)))?;
                Ok(t)
            })
            .collect()
    }

    /// Release the entry point. Outputs already returned stay valid.
    pub fn close(self) {
        debug!(
            symbol = %self.metadata.entry_symbol,
            runs = self.runs,
            "session closed"
        );
    }
}
