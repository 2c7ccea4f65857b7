//! Compilation pipeline over one graph.
//
//   Unverified ──infer_shapes──► ShapeInferred ──lower──► Lowered
//       ──generate──► CodeGenerated ──emit──► Emitted
//
// Any failing step, or a step called out of order, parks the pipeline in
// `Failed(kind)`; nothing can be resumed from there.

use std::path::{Path, PathBuf};

use graphport_core::{ArtifactMetadata, CompiledArtifact, FORMAT_VERSION};
use graphport_ir::{infer_graph, lower_graph, Graph, InferredTypes, LoweredGraph};
use tracing::{debug, info};

use crate::codegen::{disassemble, CodeGenerator, CompileStats, TapeCodegen};
use crate::emit::{write_artifact, EmitError};
use crate::error::{CompileError, FailureKind, Phase};
use crate::options::CompileOptions;
use crate::PRODUCER;

/// Exported symbol of the entry point for `function`.
pub fn entry_symbol(function: &str) -> String {
    format!("run_{function}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Unverified,
    ShapeInferred,
    Lowered,
    CodeGenerated,
    Emitted,
    Failed(FailureKind),
}

macro_rules! phase_log {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+);
        } else {
            debug!($($arg)+);
        }
    };
}

pub struct Pipeline<'g, G: CodeGenerator = TapeCodegen> {
    graph: &'g Graph,
    options: CompileOptions,
    codegen: G,
    state: PipelineState,
    types: Option<InferredTypes>,
    lowered: Option<LoweredGraph>,
    artifact: Option<CompiledArtifact>,
    stats: Option<CompileStats>,
}

impl<'g> Pipeline<'g, TapeCodegen> {
    pub fn new(graph: &'g Graph, options: CompileOptions) -> Self {
        Self::with_codegen(graph, options, TapeCodegen)
    }
}

impl<'g, G: CodeGenerator> Pipeline<'g, G> {
    pub fn with_codegen(graph: &'g Graph, options: CompileOptions, codegen: G) -> Self {
        Self {
            graph,
            options,
            codegen,
            state: PipelineState::Unverified,
            types: None,
            lowered: None,
            artifact: None,
            stats: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn stats(&self) -> Option<&CompileStats> {
        self.stats.as_ref()
    }

    pub fn artifact(&self) -> Option<&CompiledArtifact> {
        self.artifact.as_ref()
    }

    fn enter(&mut self, phase: Phase, expected: PipelineState) -> Result<(), CompileError> {
        if self.state == expected {
            return Ok(());
        }
        let err = CompileError::new(
            phase,
            FailureKind::OutOfOrder,
            format!("pipeline is {:?}, {phase} needs {expected:?}", self.state),
        );
        self.state = PipelineState::Failed(FailureKind::OutOfOrder);
        Err(err)
    }

    fn fail(&mut self, err: CompileError) -> CompileError {
        debug!(graph = %self.graph.name, error = %err, "compilation failed");
        self.state = PipelineState::Failed(err.kind);
        err
    }

    /// Validate the graph and type every value.
    pub fn infer_shapes(&mut self) -> Result<&InferredTypes, CompileError> {
        self.enter(Phase::ShapeInference, PipelineState::Unverified)?;
        let types = infer_graph(self.graph, self.options.max_inference_passes)
            .map_err(|e| self.fail(CompileError::from_ir(Phase::ShapeInference, e)))?;
        phase_log!(
            self.options.verbose,
            graph = %self.graph.name,
            values = types.len(),
            "shape inference complete"
        );
        self.state = PipelineState::ShapeInferred;
        Ok(self.types.insert(types))
    }

    pub fn lower(&mut self) -> Result<&LoweredGraph, CompileError> {
        self.enter(Phase::Lowering, PipelineState::ShapeInferred)?;
        let types = self.types.as_ref().ok_or_else(|| missing(Phase::Lowering, "types"))?;
        let lowered = lower_graph(self.graph, types, &self.options.sentinels)
            .map_err(|e| self.fail(CompileError::from_ir(Phase::Lowering, e)))?;
        phase_log!(
            self.options.verbose,
            graph = %self.graph.name,
            primitives = lowered.ops.len(),
            constants = lowered.constants.len(),
            "lowering complete"
        );
        self.state = PipelineState::Lowered;
        Ok(self.lowered.insert(lowered))
    }

    pub fn generate(&mut self) -> Result<&CompiledArtifact, CompileError> {
        self.enter(Phase::Codegen, PipelineState::Lowered)?;
        let lowered = self
            .lowered
            .as_ref()
            .ok_or_else(|| missing(Phase::Codegen, "lowered graph"))?;
        let generated = match self.codegen.generate(lowered, &self.options) {
            Ok(generated) => generated,
            Err(e) => {
                let err = CompileError::new(Phase::Codegen, FailureKind::Codegen, e.0);
                return Err(self.fail(err));
            }
        };

        let metadata = ArtifactMetadata {
            format_version: FORMAT_VERSION,
            producer: PRODUCER.to_string(),
            function: lowered.name.clone(),
            entry_symbol: entry_symbol(&lowered.name),
            signature: lowered.signature.clone(),
            opt_level: self.options.opt_level.into(),
        };
        phase_log!(
            self.options.verbose,
            graph = %self.graph.name,
            codegen = self.codegen.name(),
            opt_level = %self.options.opt_level,
            stats = %generated.stats,
            "code generation complete"
        );
        if self.options.verbose {
            debug!("generated program:\n{}", disassemble(&generated.program));
        }

        self.stats = Some(generated.stats);
        self.state = PipelineState::CodeGenerated;
        Ok(self.artifact.insert(CompiledArtifact {
            metadata,
            program: generated.program,
        }))
    }

    /// Write the artifact to exactly `path`.
    pub fn emit(&mut self, path: &Path) -> Result<(), CompileError> {
        self.enter(Phase::Emit, PipelineState::CodeGenerated)?;
        let artifact = self
            .artifact
            .as_ref()
            .ok_or_else(|| missing(Phase::Emit, "artifact"))?;
        write_artifact(path, artifact, self.options.overwrite).map_err(|e| {
            let kind = match &e {
                EmitError::Collision(_) => FailureKind::ArtifactCollision,
                EmitError::Encode(_) => FailureKind::Codegen,
                EmitError::Io { .. } => FailureKind::Io,
            };
            self.fail(CompileError::new(Phase::Emit, kind, e.to_string()))
        })?;
        phase_log!(
            self.options.verbose,
            graph = %self.graph.name,
            path = %path.display(),
            "artifact emitted"
        );
        self.state = PipelineState::Emitted;
        Ok(())
    }

    /// Run every remaining step through emission.
    pub fn run_to(&mut self, path: &Path) -> Result<(), CompileError> {
        if self.state == PipelineState::Unverified {
            self.infer_shapes()?;
        }
        if self.state == PipelineState::ShapeInferred {
            self.lower()?;
        }
        if self.state == PipelineState::Lowered {
            self.generate()?;
        }
        self.emit(path)
    }
}

fn missing(phase: Phase, what: &str) -> CompileError {
    CompileError::new(phase, FailureKind::OutOfOrder, format!("no {what} available"))
}

/// Result of a successful one-shot compilation.
#[derive(Clone, Debug)]
pub struct CompileOutput {
    pub path: PathBuf,
    pub metadata: ArtifactMetadata,
    pub stats: CompileStats,
}

/// Compile `graph` and write the artifact to `path`.
pub fn compile(
    graph: &Graph,
    path: impl AsRef<Path>,
    options: CompileOptions,
) -> Result<CompileOutput, CompileError> {
    let path = path.as_ref();
    let mut pipeline = Pipeline::new(graph, options);
    pipeline.run_to(path)?;
    let metadata = pipeline
        .artifact()
        .map(|a| a.metadata.clone())
        .ok_or_else(|| missing(Phase::Emit, "artifact"))?;
    Ok(CompileOutput {
        path: path.to_path_buf(),
        metadata,
        stats: pipeline.stats().cloned().unwrap_or_default(),
    })
}
