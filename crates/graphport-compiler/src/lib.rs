pub mod codegen;
pub mod emit;
pub mod error;
pub mod options;
pub mod pipeline;

pub use codegen::{disassemble, CodeGenerator, CodegenError, CompileStats, Generated, TapeCodegen};
pub use emit::{write_artifact, EmitError};
pub use error::{CompileError, FailureKind, Phase};
pub use options::{CompileOptions, OptLevel};
pub use pipeline::{compile, entry_symbol, CompileOutput, Pipeline, PipelineState};

/// Recorded as the producer of every artifact.
pub const PRODUCER: &str = concat!("graphport ", env!("CARGO_PKG_VERSION"));
