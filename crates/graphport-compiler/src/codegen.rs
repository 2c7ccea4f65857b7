//! Code generation: lowered graph → executable [`Program`].
//
// The tape generator gives every value its own slot (value id == slot),
// emits one `Exec` per primitive in lowered order and, from O1 on, a `Free`
// right after the last read of each intermediate value.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::time::Instant;

use graphport_core::program::{Constant, Export, Function, Instruction, PrimOp, Program};
use graphport_ir::LoweredGraph;

use crate::options::CompileOptions;
use crate::pipeline::entry_symbol;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CodegenError(pub String);

/// Output of one code generation run.
#[derive(Clone, Debug)]
pub struct Generated {
    pub program: Program,
    pub stats: CompileStats,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompileStats {
    pub num_instructions: usize,
    pub num_source_nodes: usize,
    pub num_slots: usize,
    pub num_frees: usize,
    pub num_constants: usize,
    /// Constant tables merged into an identical earlier one.
    pub num_shared_constants: usize,
    pub compile_time_us: u64,
}

impl fmt::Display for CompileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} instructions ({} source nodes), {} slots, {} frees, {} constants ({} shared), generated in {}us",
            self.num_instructions,
            self.num_source_nodes,
            self.num_slots,
            self.num_frees,
            self.num_constants,
            self.num_shared_constants,
            self.compile_time_us,
        )
    }
}

/// Turns a lowered graph into a program the runtime can load.
pub trait CodeGenerator {
    fn name(&self) -> &'static str;
    fn generate(
        &self,
        graph: &LoweredGraph,
        options: &CompileOptions,
    ) -> Result<Generated, CodegenError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TapeCodegen;

impl CodeGenerator for TapeCodegen {
    fn name(&self) -> &'static str {
        "tape"
    }

    fn generate(
        &self,
        graph: &LoweredGraph,
        options: &CompileOptions,
    ) -> Result<Generated, CodegenError> {
        let start = Instant::now();
        let num_slots = graph.values.len();
        let (constants, remap) = plan_constants(&graph.constants, options);

        let mut written = vec![false; num_slots];
        for &input in &graph.inputs {
            check_slot(input, num_slots, "input")?;
            written[input] = true;
        }

        let mut body = Vec::with_capacity(graph.ops.len());
        for lowered in &graph.ops {
            for &src in &lowered.srcs {
                check_slot(src, num_slots, "source")?;
                if !written[src] {
                    return Err(CodegenError(format!(
                        "node `{}` reads slot {src} before it is written",
                        lowered.node
                    )));
                }
            }
            check_slot(lowered.dst, num_slots, "destination")?;
            if std::mem::replace(&mut written[lowered.dst], true) {
                return Err(CodegenError(format!(
                    "node `{}` writes slot {} twice",
                    lowered.node, lowered.dst
                )));
            }

            let op = match &lowered.op {
                PrimOp::CallRuntime { func, table } => {
                    let constant = graph.constants.get(*table).ok_or_else(|| {
                        CodegenError(format!(
                            "node `{}` calls {} with missing table {table}",
                            lowered.node,
                            func.symbol()
                        ))
                    })?;
                    if constant.layout != func.table_layout() {
                        return Err(CodegenError(format!(
                            "node `{}`: {} expects a {:?} table but the constant is {:?}",
                            lowered.node,
                            func.symbol(),
                            func.table_layout(),
                            constant.layout
                        )));
                    }
                    PrimOp::CallRuntime {
                        func: *func,
                        table: remap[*table],
                    }
                }
                other => other.clone(),
            };
            body.push(Instruction::Exec {
                op,
                srcs: lowered.srcs.clone(),
                dst: lowered.dst,
            });
        }
        for &output in &graph.outputs {
            check_slot(output, num_slots, "output")?;
            if !written[output] {
                return Err(CodegenError(format!(
                    "output slot {output} is never written"
                )));
            }
        }

        let num_frees = if options.opt_level.frees_dead_values() {
            insert_frees(&mut body, graph)
        } else {
            0
        };

        let mut nodes: Vec<&str> = graph.ops.iter().map(|op| op.node.as_str()).collect();
        nodes.dedup();
        let stats = CompileStats {
            num_instructions: body.len(),
            num_source_nodes: nodes.len(),
            num_slots,
            num_frees,
            num_constants: constants.len(),
            num_shared_constants: graph.constants.len() - constants.len(),
            compile_time_us: start.elapsed().as_micros() as u64,
        };

        let program = Program {
            functions: vec![Function {
                name: graph.name.clone(),
                num_slots,
                inputs: graph.inputs.clone(),
                outputs: graph.outputs.clone(),
                body,
            }],
            exports: vec![Export {
                symbol: entry_symbol(&graph.name),
                function: graph.name.clone(),
            }],
            constants,
        };
        Ok(Generated { program, stats })
    }
}

fn check_slot(slot: usize, num_slots: usize, what: &str) -> Result<(), CodegenError> {
    if slot >= num_slots {
        return Err(CodegenError(format!(
            "{what} slot {slot} out of range ({num_slots} slots)"
        )));
    }
    Ok(())
}

/// Final constant pool and, for each lowered constant, its index in it.
fn plan_constants(constants: &[Constant], options: &CompileOptions) -> (Vec<Constant>, Vec<usize>) {
    if !options.opt_level.dedups_constants() {
        return (constants.to_vec(), (0..constants.len()).collect());
    }
    let mut pool: Vec<Constant> = Vec::new();
    let mut seen: HashMap<&Constant, usize> = HashMap::new();
    let remap = constants
        .iter()
        .map(|c| {
            *seen.entry(c).or_insert_with(|| {
                pool.push(c.clone());
                pool.len() - 1
            })
        })
        .collect();
    (pool, remap)
}

/// Insert a `Free` after the last read of every intermediate value. Graph
/// inputs belong to the caller and outputs are returned, so neither is freed.
fn insert_frees(body: &mut Vec<Instruction>, graph: &LoweredGraph) -> usize {
    let keep = |slot: usize| graph.inputs.contains(&slot) || graph.outputs.contains(&slot);

    let mut last_use: HashMap<usize, usize> = HashMap::new();
    for (idx, instr) in body.iter().enumerate() {
        if let Instruction::Exec { srcs, dst, .. } = instr {
            last_use.entry(*dst).or_insert(idx);
            for &src in srcs {
                last_use.insert(src, idx);
            }
        }
    }

    let mut frees: Vec<(usize, usize)> = last_use
        .into_iter()
        .filter(|&(slot, _)| !keep(slot))
        .map(|(slot, idx)| (idx, slot))
        .collect();
    // Latest position first so earlier insert points stay valid; slots
    // descending within one position keeps the final order ascending.
    frees.sort_unstable_by(|a, b| b.cmp(a));
    for &(idx, slot) in &frees {
        body.insert(idx + 1, Instruction::Free { slot });
    }
    frees.len()
}

/// Human-readable listing of a program.
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();
    for export in &program.exports {
        let _ = writeln!(out, "export {} -> {}", export.symbol, export.function);
    }
    for (i, c) in program.constants.iter().enumerate() {
        let _ = writeln!(out, "const #{i}: {:?}, {} bytes", c.layout, c.bytes.len());
    }
    for f in &program.functions {
        let _ = writeln!(
            out,
            "fn {}({:?}) -> {:?}, {} slots",
            f.name, f.inputs, f.outputs, f.num_slots
        );
        for instr in &f.body {
            let _ = match instr {
                Instruction::Exec { op, srcs, dst } => {
                    writeln!(out, "  %{dst} = {}{} {srcs:?}", op.mnemonic(), detail(op))
                }
                Instruction::Free { slot } => writeln!(out, "  free %{slot}"),
            };
        }
    }
    out
}

fn detail(op: &PrimOp) -> String {
    match op {
        PrimOp::Copy | PrimOp::MatMul => String::new(),
        PrimOp::Unary(f) => format!(".{f:?}"),
        PrimOp::Binary(f) => format!(".{f:?}"),
        PrimOp::Convert { to } => format!(" to {to}"),
        PrimOp::Reshape { target } => format!(" {target:?}"),
        PrimOp::Permute { perm } => format!(" {perm:?}"),
        PrimOp::ReduceSum { axes, keepdims } => format!(" axes={axes:?} keepdims={keepdims}"),
        PrimOp::Concat { axis } => format!(" axis={axis}"),
        PrimOp::SplitPart {
            axis, index, parts, ..
        } => format!(" axis={axis} part={index}/{parts}"),
        PrimOp::CallRuntime { func, table } => format!(" @{} #{table}", func.symbol()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OptLevel;
    use graphport_core::{DType, TensorType};
    use graphport_ir::{infer_graph, lower_graph, Graph, Node, OpKind};

    fn chain() -> LoweredGraph {
        let f = TensorType::fixed(DType::F32, &[4]);
        let g = Graph::new("main_graph")
            .input("x", f.clone())
            .node(Node::new("a", OpKind::Neg).input("x").output("a"))
            .node(Node::new("b", OpKind::Abs).input("a").output("b"))
            .node(Node::new("c", OpKind::Relu).input("b").output("y"))
            .output("y", f);
        let types = infer_graph(&g, None).unwrap();
        lower_graph(&g, &types, &Default::default()).unwrap()
    }

    fn mapped_twice() -> LoweredGraph {
        let map = |name: &str, input: &str, output: &str| {
            Node::new(name, OpKind::CategoryMapper)
                .input(input)
                .output(output)
                .attr("cats_int64s", vec![1i64, 2])
                .attr("cats_strings", vec!["a", "b"])
        };
        let g = Graph::new("main_graph")
            .input("x", TensorType::fixed(DType::I64, &[2]))
            .input("z", TensorType::fixed(DType::I64, &[2]))
            .node(map("m1", "x", "s1"))
            .node(map("m2", "z", "s2"))
            .output("s1", TensorType::fixed(DType::String, &[2]))
            .output("s2", TensorType::fixed(DType::String, &[2]));
        let types = infer_graph(&g, None).unwrap();
        lower_graph(&g, &types, &Default::default()).unwrap()
    }

    fn frees(program: &Program) -> Vec<usize> {
        program.functions[0]
            .body
            .iter()
            .filter_map(|i| match i {
                Instruction::Free { slot } => Some(*slot),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn o0_keeps_every_value() {
        let out = TapeCodegen.generate(&chain(), &CompileOptions::default()).unwrap();
        assert!(frees(&out.program).is_empty());
        assert_eq!(out.stats.num_instructions, 3);
        assert_eq!(out.program.exports[0].symbol, "run_main_graph");
    }

    #[test]
    fn o1_frees_intermediates_after_last_use() {
        let opts = CompileOptions::default().with_opt_level(OptLevel::O1);
        let out = TapeCodegen.generate(&chain(), &opts).unwrap();
        let body = &out.program.functions[0].body;
        // a (slot 1) dies at b, b (slot 2) dies at c; x and y are kept.
        assert_eq!(frees(&out.program), vec![1, 2]);
        assert!(matches!(body[2], Instruction::Free { slot: 1 }));
        assert!(matches!(body[4], Instruction::Free { slot: 2 }));
        assert_eq!(out.stats.num_frees, 2);
    }

    #[test]
    fn o2_shares_identical_tables() {
        let lowered = mapped_twice();
        let o1 = TapeCodegen
            .generate(&lowered, &CompileOptions::default().with_opt_level(OptLevel::O1))
            .unwrap();
        assert_eq!(o1.program.constants.len(), 2);

        let o2 = TapeCodegen
            .generate(&lowered, &CompileOptions::default().with_opt_level(OptLevel::O2))
            .unwrap();
        assert_eq!(o2.program.constants.len(), 1);
        assert_eq!(o2.stats.num_shared_constants, 1);
        for instr in &o2.program.functions[0].body {
            if let Instruction::Exec {
                op: PrimOp::CallRuntime { table, .. },
                ..
            } = instr
            {
                assert_eq!(*table, 0);
            }
        }
    }

    #[test]
    fn table_layout_disagreement_is_rejected() {
        use graphport_core::program::TableLayout;
        let mut lowered = mapped_twice();
        lowered.constants[0].layout = TableLayout::StringToInt64;
        let err = TapeCodegen
            .generate(&lowered, &CompileOptions::default())
            .unwrap_err();
        assert!(err.0.contains("expects"), "{err}");
    }

    #[test]
    fn disassembly_lists_every_instruction() {
        let out = TapeCodegen
            .generate(&chain(), &CompileOptions::default().with_opt_level(OptLevel::O1))
            .unwrap();
        let text = disassemble(&out.program);
        assert!(text.contains("export run_main_graph -> main_graph"));
        assert!(text.contains("%1 = unary.Neg [0]"));
        assert!(text.contains("free %1"));
    }
}
