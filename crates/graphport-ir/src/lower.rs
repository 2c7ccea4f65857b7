//! Lowering of typed operator nodes into primitive operations.

use std::collections::HashMap;

use graphport_core::program::{Constant, PrimOp, RuntimeFn};
use graphport_core::{ArtifactSignature, DType, Dim, TensorSpec, TensorType};
use tracing::debug;

use crate::error::{IrError, Result};
use crate::ops::{broadcast_dims, fmt_dims, merge_dim};
use crate::{CategorySentinels, Graph, InferredTypes, Node, OpKind};

pub type ValueId = usize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoweredValue {
    pub name: String,
    pub ty: TensorType,
}

/// One primitive, tagged with the node it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoweredOp {
    pub node: String,
    pub kind: OpKind,
    pub op: PrimOp,
    pub srcs: Vec<ValueId>,
    pub dst: ValueId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoweredGraph {
    pub name: String,
    pub values: Vec<LoweredValue>,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
    pub ops: Vec<LoweredOp>,
    pub constants: Vec<Constant>,
    pub signature: ArtifactSignature,
}

impl LoweredGraph {
    pub fn value(&self, id: ValueId) -> &LoweredValue {
        &self.values[id]
    }
}

/// What a rule sees while lowering one node.
pub struct LowerCtx<'a> {
    inputs: &'a [TensorType],
    outputs: &'a [TensorType],
    sentinels: &'a CategorySentinels,
    prims: Vec<(PrimOp, usize)>,
    constants: Vec<Constant>,
}

impl<'a> LowerCtx<'a> {
    pub fn input_type(&self, index: usize) -> &'a TensorType {
        &self.inputs[index]
    }

    pub fn output_type(&self, index: usize) -> &'a TensorType {
        &self.outputs[index]
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn sentinels(&self) -> &'a CategorySentinels {
        self.sentinels
    }

    /// Emit `op` over all node inputs, producing output `output`.
    pub fn emit(&mut self, op: PrimOp, output: usize) -> std::result::Result<(), String> {
        if output >= self.outputs.len() {
            return Err(format!(
                "primitive targets output {output} of {}",
                self.outputs.len()
            ));
        }
        self.prims.push((op, output));
        Ok(())
    }

    /// Register a compiled-in constant; returns its node-local index.
    pub fn add_constant(&mut self, constant: Constant) -> usize {
        self.constants.push(constant);
        self.constants.len() - 1
    }
}

/// Primitives of one node, paired with the output index each produces.
/// `CallRuntime` tables index into `constants`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeLowering {
    pub prims: Vec<(PrimOp, usize)>,
    pub constants: Vec<Constant>,
}

/// Lower one typed node and check the result: one primitive per output,
/// each producing the element type and a shape compatible with what
/// inference assigned to that output, and every runtime call naming a table
/// of the layout it expects.
pub fn lower_node(
    node: &Node,
    inputs: &[TensorType],
    outputs: &[TensorType],
    sentinels: &CategorySentinels,
) -> Result<NodeLowering> {
    let fail = |msg: String| IrError::Lowering {
        node: node.name.clone(),
        kind: node.kind,
        msg,
    };

    let mut ctx = LowerCtx {
        inputs,
        outputs,
        sentinels,
        prims: Vec::new(),
        constants: Vec::new(),
    };
    node.kind.rule().lower(node, &mut ctx).map_err(fail)?;
    let LowerCtx {
        prims, constants, ..
    } = ctx;

    let mut covered = vec![false; outputs.len()];
    for (op, output) in &prims {
        if std::mem::replace(&mut covered[*output], true) {
            return Err(fail(format!("output {output} produced twice")));
        }
        let produced = result_dtype(op, inputs);
        if let Some(dtype) = produced {
            if dtype != outputs[*output].dtype {
                return Err(fail(format!(
                    "{} produces {dtype} but output {output} is {}",
                    op.mnemonic(),
                    outputs[*output].dtype
                )));
            }
        }
        if let (Some(dims), Some(expected)) = (result_dims(op, inputs), &outputs[*output].dims) {
            let agree = dims.len() == expected.len()
                && dims.iter().zip(expected).all(|(&a, &b)| merge_dim(a, b).is_some());
            if !agree {
                return Err(fail(format!(
                    "{} produces {} but output {output} is {}",
                    op.mnemonic(),
                    fmt_dims(&dims),
                    fmt_dims(expected)
                )));
            }
        }
        if let PrimOp::CallRuntime { func, table } = op {
            let constant = constants.get(*table).ok_or_else(|| {
                fail(format!(
                    "call to {} names missing table {table}",
                    func.symbol()
                ))
            })?;
            if constant.layout != func.table_layout() {
                return Err(fail(format!(
                    "{} expects a {:?} table, got {:?}",
                    func.symbol(),
                    func.table_layout(),
                    constant.layout
                )));
            }
        }
    }
    if let Some(missing) = covered.iter().position(|c| !c) {
        return Err(fail(format!(
            "{} primitives for {} outputs; output {missing} is never produced",
            prims.len(),
            outputs.len()
        )));
    }
    Ok(NodeLowering { prims, constants })
}

/// Element type a primitive produces from its inputs, when it is determined
/// by the op alone.
fn result_dtype(op: &PrimOp, inputs: &[TensorType]) -> Option<DType> {
    match op {
        PrimOp::Convert { to } => Some(*to),
        PrimOp::CallRuntime { func, .. } => Some(match func {
            RuntimeFn::CategoryMapI64ToStr => DType::String,
            RuntimeFn::CategoryMapStrToI64 => DType::I64,
        }),
        _ => inputs.first().map(|t| t.dtype),
    }
}

/// Shape a primitive produces from its input types. `None` when an operand
/// is unranked.
fn result_dims(op: &PrimOp, inputs: &[TensorType]) -> Option<Vec<Dim>> {
    let first = inputs.first()?.dims.as_deref()?;
    match op {
        PrimOp::Copy | PrimOp::Unary(_) | PrimOp::Convert { .. } | PrimOp::CallRuntime { .. } => {
            Some(first.to_vec())
        }
        PrimOp::Binary(_) => broadcast_dims(first, inputs.get(1)?.dims.as_deref()?).ok(),
        PrimOp::Reshape { target } => Some(
            target
                .iter()
                .enumerate()
                .map(|(i, &t)| match t {
                    0 => first.get(i).copied().unwrap_or(Dim::Unknown),
                    t if t > 0 => Dim::Known(t as usize),
                    _ => Dim::Unknown,
                })
                .collect(),
        ),
        PrimOp::Permute { perm } => perm.iter().map(|&p| first.get(p).copied()).collect(),
        PrimOp::MatMul => {
            let b = inputs.get(1)?.dims.as_deref()?;
            let (ra, rb) = (first.len(), b.len());
            if ra < 2 || rb < 2 {
                return None;
            }
            let mut out = broadcast_dims(&first[..ra - 2], &b[..rb - 2]).ok()?;
            out.push(first[ra - 2]);
            out.push(b[rb - 1]);
            Some(out)
        }
        PrimOp::ReduceSum { axes, keepdims } => Some(
            first
                .iter()
                .enumerate()
                .filter_map(|(i, &d)| match (axes.contains(&i), *keepdims) {
                    (false, _) => Some(d),
                    (true, true) => Some(Dim::Known(1)),
                    (true, false) => None,
                })
                .collect(),
        ),
        PrimOp::Concat { axis } => {
            let mut total = Some(0usize);
            for ty in inputs {
                let dims = ty.dims.as_deref()?;
                total = total.zip(dims.get(*axis)?.known()).map(|(a, b)| a + b);
            }
            let mut out = first.to_vec();
            *out.get_mut(*axis)? = total.map_or(Dim::Unknown, Dim::Known);
            Some(out)
        }
        PrimOp::SplitPart {
            axis,
            index,
            parts,
            sizes,
        } => {
            let part = match (sizes, first.get(*axis)?) {
                (Some(sizes), _) => Dim::Known(*sizes.get(*index)?),
                (None, Dim::Known(n)) if *parts > 0 => Dim::Known(n / parts),
                (None, _) => Dim::Unknown,
            };
            let mut out = first.to_vec();
            out[*axis] = part;
            Some(out)
        }
    }
}

fn define(values: &mut Vec<LoweredValue>, name: &str, ty: TensorType) -> ValueId {
    values.push(LoweredValue {
        name: name.to_string(),
        ty,
    });
    values.len() - 1
}

/// Lower every node of an inferred graph in order.
pub fn lower_graph(
    graph: &Graph,
    types: &InferredTypes,
    sentinels: &CategorySentinels,
) -> Result<LoweredGraph> {
    let mut values = Vec::new();
    let mut ids: HashMap<&str, ValueId> = HashMap::new();
    let untyped = |name: &str| IrError::InvalidGraph {
        graph: graph.name.clone(),
        msg: format!("value `{name}` was never typed"),
    };

    let mut inputs = Vec::with_capacity(graph.inputs.len());
    for spec in &graph.inputs {
        let id = define(&mut values, &spec.name.0, spec.ty.clone());
        ids.insert(spec.name.0.as_str(), id);
        inputs.push(id);
    }

    let mut ops = Vec::new();
    let mut constants = Vec::new();
    for node in &graph.nodes {
        let mut srcs = Vec::with_capacity(node.inputs.len());
        let mut in_types = Vec::with_capacity(node.inputs.len());
        for name in &node.inputs {
            let id = *ids.get(name.as_str()).ok_or_else(|| untyped(name))?;
            srcs.push(id);
            in_types.push(types.get(name).cloned().ok_or_else(|| untyped(name))?);
        }
        let out_types = node
            .outputs
            .iter()
            .map(|o| types.get(&o.name).cloned().ok_or_else(|| untyped(&o.name)))
            .collect::<Result<Vec<_>>>()?;

        let lowered = lower_node(node, &in_types, &out_types, sentinels)?;

        let dsts: Vec<ValueId> = node
            .outputs
            .iter()
            .zip(&out_types)
            .map(|(o, ty)| {
                let id = define(&mut values, &o.name, ty.clone());
                ids.insert(o.name.as_str(), id);
                id
            })
            .collect();

        let base = constants.len();
        constants.extend(lowered.constants);
        for (op, output) in lowered.prims {
            let op = match op {
                PrimOp::CallRuntime { func, table } => PrimOp::CallRuntime {
                    func,
                    table: table + base,
                },
                other => other,
            };
            debug!(node = %node.name, op = op.mnemonic(), output, "lowered");
            ops.push(LoweredOp {
                node: node.name.clone(),
                kind: node.kind,
                op,
                srcs: srcs.clone(),
                dst: dsts[output],
            });
        }
    }

    let mut outputs = Vec::with_capacity(graph.outputs.len());
    let mut out_specs = Vec::with_capacity(graph.outputs.len());
    for spec in &graph.outputs {
        let name = spec.name.0.as_str();
        let id = *ids.get(name).ok_or_else(|| untyped(name))?;
        let ty = types.get(name).cloned().ok_or_else(|| untyped(name))?;
        outputs.push(id);
        out_specs.push(TensorSpec::new(name, ty));
    }

    Ok(LoweredGraph {
        name: graph.name.clone(),
        values,
        inputs,
        outputs,
        ops,
        constants,
        signature: ArtifactSignature {
            inputs: graph.inputs.clone(),
            outputs: out_specs,
        },
    })
}
