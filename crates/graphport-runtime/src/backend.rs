use graphport_core::{
    ArtifactSignature, Backend, BackendCapabilities, CompiledArtifact, EntryPoint, Error, Function,
    Instruction, PrimOp, Result, RtTensor, STATUS_OK,
};
use tracing::trace;

use crate::category::Lookup;
use crate::kernels;
use crate::value::Value;

/// Status returned when a kernel faults.
pub const STATUS_KERNEL_FAULT: i32 = 1;
/// Status returned when inputs could not be read or outputs produced.
pub const STATUS_MARSHAL_FAULT: i32 = 2;

/// Executes generated programs with the reference kernels.
pub struct KernelBackend;

impl KernelBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KernelBackend {
    fn default() -> Self {
        Self::new()
    }
}

pub struct KernelEntry {
    symbol: String,
    signature: ArtifactSignature,
    function: Function,
    tables: Vec<Lookup>,
    last_error: Option<String>,
}

impl Backend for KernelBackend {
    type Entry = KernelEntry;

    fn name(&self) -> &'static str {
        "kernels"
    }

    fn load(&self, artifact: &CompiledArtifact, symbol: &str) -> Result<Self::Entry> {
        let function = artifact
            .program
            .resolve(symbol)
            .ok_or_else(|| Error::InvalidArtifact(format!("symbol `{symbol}` is not exported")))?
            .clone();
        let signature = artifact.metadata.signature.clone();
        check_function(&function, &signature)?;

        let tables = artifact
            .program
            .constants
            .iter()
            .map(Lookup::from_constant)
            .collect::<Result<Vec<_>>>()?;
        for instr in &function.body {
            if let Instruction::Exec {
                op: PrimOp::CallRuntime { func, table },
                ..
            } = instr
            {
                let lookup = tables.get(*table).ok_or_else(|| {
                    Error::InvalidArtifact(format!("{} refers to missing table {table}", func.symbol()))
                })?;
                if lookup.layout() != func.table_layout() {
                    return Err(Error::InvalidArtifact(format!(
                        "{} needs a {:?} table, table {table} is {:?}",
                        func.symbol(),
                        func.table_layout(),
                        lookup.layout()
                    )));
                }
            }
        }

        Ok(KernelEntry {
            symbol: symbol.to_string(),
            signature,
            function,
            tables,
            last_error: None,
        })
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_dynamic_shapes: true,
            supports_strided_inputs: true,
            reentrant_entry: false,
        }
    }
}

fn check_function(function: &Function, signature: &ArtifactSignature) -> Result<()> {
    if function.inputs.len() != signature.inputs.len()
        || function.outputs.len() != signature.outputs.len()
    {
        return Err(Error::InvalidArtifact(format!(
            "function `{}` takes {} inputs and returns {} outputs, metadata declares {} and {}",
            function.name,
            function.inputs.len(),
            function.outputs.len(),
            signature.inputs.len(),
            signature.outputs.len()
        )));
    }
    let in_range = |slot: &usize| *slot < function.num_slots;
    let body_slots_ok = function.body.iter().all(|instr| match instr {
        Instruction::Exec { srcs, dst, .. } => srcs.iter().all(in_range) && in_range(dst),
        Instruction::Free { slot } => in_range(slot),
    });
    if !body_slots_ok || !function.inputs.iter().all(in_range) || !function.outputs.iter().all(in_range)
    {
        return Err(Error::InvalidArtifact(format!(
            "function `{}` addresses slots past {}",
            function.name, function.num_slots
        )));
    }
    Ok(())
}

/// A failed call: status code plus message.
struct Fault(i32, String);

impl KernelEntry {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn execute(&self, inputs: &[RtTensor<'_>]) -> std::result::Result<Vec<Value>, Fault> {
        let marshal = |msg: String| Fault(STATUS_MARSHAL_FAULT, msg);
        let f = &self.function;
        if inputs.len() != f.inputs.len() {
            return Err(marshal(format!(
                "{} inputs passed to a {}-input function",
                inputs.len(),
                f.inputs.len()
            )));
        }

        let mut slots: Vec<Option<Value>> = vec![None; f.num_slots];
        for (i, (&slot, t)) in f.inputs.iter().zip(inputs).enumerate() {
            let value =
                Value::from_tensor(t).map_err(|e| marshal(format!("reading input {i}: {e}")))?;
            slots[slot] = Some(value);
        }

        for (pc, instr) in f.body.iter().enumerate() {
            match instr {
                Instruction::Exec { op, srcs, dst } => {
                    let result = {
                        let args = srcs
                            .iter()
                            .map(|&s| {
                                slots[s].as_ref().ok_or_else(|| {
                                    Fault(
                                        STATUS_KERNEL_FAULT,
                                        format!("instruction {pc} reads empty slot %{s}"),
                                    )
                                })
                            })
                            .collect::<std::result::Result<Vec<&Value>, Fault>>()?;
                        kernels::execute(op, &args, &self.tables).map_err(|msg| {
                            Fault(
                                STATUS_KERNEL_FAULT,
                                format!("instruction {pc} ({}): {msg}", op.mnemonic()),
                            )
                        })?
                    };
                    trace!(pc, op = op.mnemonic(), dst, shape = ?result.shape, "executed");
                    slots[*dst] = Some(result);
                }
                Instruction::Free { slot } => slots[*slot] = None,
            }
        }

        f.outputs
            .iter()
            .enumerate()
            .map(|(i, &slot)| {
                slots[slot]
                    .clone()
                    .ok_or_else(|| marshal(format!("output {i} (slot %{slot}) was never written")))
            })
            .collect()
    }
}

impl EntryPoint for KernelEntry {
    fn signature(&self) -> &ArtifactSignature {
        &self.signature
    }

    fn invoke(
        &mut self,
        inputs: &[RtTensor<'_>],
        outputs: &mut [Option<RtTensor<'static>>],
    ) -> i32 {
        let produced = self.execute(inputs).and_then(|values| {
            if values.len() != outputs.len() {
                return Err(Fault(
                    STATUS_MARSHAL_FAULT,
                    format!("{} output slots for {} outputs", outputs.len(), values.len()),
                ));
            }
            values
                .into_iter()
                .map(|v| {
                    v.into_tensor()
                        .map_err(|e| Fault(STATUS_MARSHAL_FAULT, format!("writing output: {e}")))
                })
                .collect::<std::result::Result<Vec<_>, Fault>>()
        });
        match produced {
            Ok(tensors) => {
                for (slot, t) in outputs.iter_mut().zip(tensors) {
                    *slot = Some(t);
                }
                self.last_error = None;
                STATUS_OK
            }
            Err(Fault(status, msg)) => {
                self.last_error = Some(msg);
                status
            }
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }
}
