//! Shape/type inference.
//
// `infer` types one node from its input types. `infer_graph` walks the graph
// in node order and re-runs deferred nodes until everything is typed, or a
// full pass makes no progress, or the pass budget runs out.

use std::collections::BTreeMap;

use graphport_core::TensorType;
use tracing::debug;

use crate::error::{IrError, Pending, Result};
use crate::{Graph, Node};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inference {
    /// One type per node output.
    Resolved(Vec<TensorType>),
    /// Not enough information yet; retry once more types are known.
    Deferred { reason: String },
}

/// Type one node. `inputs[i]` is `None` while the i-th input is untyped.
///
/// Declared output hints are merged into the result: a hint may fill in
/// unknown dims, but contradicting the inferred type is an error.
pub fn infer(node: &Node, inputs: &[Option<&TensorType>]) -> Result<Inference> {
    let fail = |msg: String| IrError::Inference {
        node: node.name.clone(),
        kind: node.kind,
        msg,
    };

    let rule = node.kind.rule();
    if !rule.inputs().accepts(inputs.len()) {
        return Err(fail(format!(
            "expects {} inputs, got {}",
            rule.inputs(),
            inputs.len()
        )));
    }
    let mut typed = Vec::with_capacity(inputs.len());
    for (i, ty) in inputs.iter().enumerate() {
        match ty {
            Some(ty) => typed.push((*ty).clone()),
            None => {
                let name = node.inputs.get(i).map_or("?", String::as_str);
                return Ok(Inference::Deferred {
                    reason: format!("input `{name}` is not typed yet"),
                });
            }
        }
    }

    let outs = match rule.infer(node, &typed).map_err(fail)? {
        Inference::Resolved(outs) => outs,
        deferred => return Ok(deferred),
    };
    if outs.len() != node.outputs.len() {
        return Err(fail(format!(
            "rule produced {} types for {} outputs",
            outs.len(),
            node.outputs.len()
        )));
    }

    outs.into_iter()
        .zip(&node.outputs)
        .map(|(ty, spec)| match &spec.ty {
            None => Ok(ty),
            Some(hint) => ty.unify(hint).ok_or_else(|| {
                fail(format!(
                    "output `{}` is declared {hint} but inferred {ty}",
                    spec.name
                ))
            }),
        })
        .collect::<Result<Vec<_>>>()
        .map(Inference::Resolved)
}

/// Types of every value in a graph, keyed by value name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InferredTypes {
    types: BTreeMap<String, TensorType>,
}

impl InferredTypes {
    pub fn get(&self, value: &str) -> Option<&TensorType> {
        self.types.get(value)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TensorType)> {
        self.types.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn insert(&mut self, value: &str, ty: TensorType) {
        self.types.insert(value.to_string(), ty);
    }
}

/// Validate `graph` and type all of its values.
///
/// `max_passes` defaults to one more than the node count. Graph outputs are
/// unified with their declared types; the unified type is what is recorded.
pub fn infer_graph(graph: &Graph, max_passes: Option<usize>) -> Result<InferredTypes> {
    graph.validate()?;

    let mut types = InferredTypes::default();
    for spec in &graph.inputs {
        types.insert(&spec.name.0, spec.ty.clone());
    }

    let max_passes = max_passes.unwrap_or(graph.nodes.len() + 1).max(1);
    let mut pending: Vec<usize> = (0..graph.nodes.len()).collect();
    let mut reasons: BTreeMap<usize, String> = BTreeMap::new();
    let mut passes = 0;

    while !pending.is_empty() {
        if passes == max_passes {
            return Err(stalled(graph, passes, &pending, &reasons));
        }
        passes += 1;

        let before = pending.len();
        let mut still = Vec::new();
        for idx in pending {
            let node = &graph.nodes[idx];
            let inputs: Vec<Option<&TensorType>> =
                node.inputs.iter().map(|name| types.get(name)).collect();
            match infer(node, &inputs)? {
                Inference::Resolved(outs) => {
                    for (spec, ty) in node.outputs.iter().zip(outs) {
                        debug!(node = %node.name, value = %spec.name, ty = %ty, "inferred");
                        types.insert(&spec.name, ty);
                    }
                    reasons.remove(&idx);
                }
                Inference::Deferred { reason } => {
                    debug!(node = %node.name, %reason, "deferred");
                    reasons.insert(idx, reason);
                    still.push(idx);
                }
            }
        }
        pending = still;

        if !pending.is_empty() && pending.len() == before {
            return Err(stalled(graph, passes, &pending, &reasons));
        }
    }

    for spec in &graph.outputs {
        let name = spec.name.0.as_str();
        let inferred = types
            .get(name)
            .cloned()
            .ok_or_else(|| IrError::InvalidGraph {
                graph: graph.name.clone(),
                msg: format!("output `{name}` has no type"),
            })?;
        let unified = inferred
            .unify(&spec.ty)
            .ok_or_else(|| IrError::OutputMismatch {
                output: name.to_string(),
                declared: spec.ty.clone(),
                inferred: inferred.clone(),
            })?;
        types.insert(name, unified);
    }
    Ok(types)
}

fn stalled(
    graph: &Graph,
    passes: usize,
    pending: &[usize],
    reasons: &BTreeMap<usize, String>,
) -> IrError {
    IrError::Stalled {
        passes,
        pending: pending
            .iter()
            .map(|&idx| Pending {
                node: graph.nodes[idx].name.clone(),
                reason: reasons
                    .get(&idx)
                    .cloned()
                    .unwrap_or_else(|| "not attempted".to_string()),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OpKind;
    use graphport_core::{DType, Dim};

    fn category_graph(input: TensorType, output: TensorType) -> Graph {
        Graph::new("main_graph")
            .input("x", input)
            .node(
                Node::new("map", OpKind::CategoryMapper)
                    .input("x")
                    .output("y")
                    .attr("cats_int64s", vec![1i64, 2, 3])
                    .attr("cats_strings", vec!["cat", "dog", "human"])
                    .attr("default_string", "unknown"),
            )
            .output("y", output)
    }

    #[test]
    fn category_graph_types_both_directions() {
        let g = category_graph(
            TensorType::fixed(DType::I64, &[3]),
            TensorType::fixed(DType::String, &[3]),
        );
        let types = infer_graph(&g, None).unwrap();
        assert_eq!(types.get("y"), Some(&TensorType::fixed(DType::String, &[3])));

        let g = category_graph(
            TensorType::fixed(DType::String, &[2]),
            TensorType::fixed(DType::I64, &[2]),
        );
        let types = infer_graph(&g, None).unwrap();
        assert_eq!(types.get("y"), Some(&TensorType::fixed(DType::I64, &[2])));
    }

    #[test]
    fn declared_output_refines_dynamic_dims() {
        let g = category_graph(
            TensorType::ranked(DType::I64, [Dim::Unknown]),
            TensorType::fixed(DType::String, &[3]),
        );
        let types = infer_graph(&g, None).unwrap();
        assert_eq!(types.get("y"), Some(&TensorType::fixed(DType::String, &[3])));
    }

    #[test]
    fn declared_output_contradiction_is_reported() {
        let g = category_graph(
            TensorType::fixed(DType::I64, &[3]),
            TensorType::fixed(DType::I64, &[3]),
        );
        assert!(matches!(
            infer_graph(&g, None),
            Err(IrError::OutputMismatch { .. })
        ));
    }

    #[test]
    fn node_hint_conflict_is_an_inference_error() {
        let node = Node::new("n", OpKind::Neg)
            .input("x")
            .typed_output("y", TensorType::fixed(DType::F32, &[4]));
        let x = TensorType::fixed(DType::F32, &[3]);
        assert!(matches!(
            infer(&node, &[Some(&x)]),
            Err(IrError::Inference { .. })
        ));
    }

    #[test]
    fn untyped_input_defers() {
        let node = Node::new("n", OpKind::Neg).input("x").output("y");
        assert!(matches!(
            infer(&node, &[None]).unwrap(),
            Inference::Deferred { .. }
        ));
    }

    #[test]
    fn unranked_chain_stalls_with_diagnosis() {
        let g = Graph::new("g")
            .input("x", TensorType::unranked(DType::F32))
            .node(Node::new("t", OpKind::Transpose).input("x").output("t_out"))
            .node(Node::new("n", OpKind::Neg).input("t_out").output("y"))
            .output("y", TensorType::unranked(DType::F32));
        match infer_graph(&g, None) {
            Err(IrError::Stalled { pending, passes }) => {
                assert_eq!(passes, 1);
                let names: Vec<_> = pending.iter().map(|p| p.node.as_str()).collect();
                assert_eq!(names, ["t", "n"]);
                assert!(pending[0].reason.contains("unranked"));
                assert!(pending[1].reason.contains("t_out"));
            }
            other => panic!("expected a stall, got {other:?}"),
        }
    }

    #[test]
    fn pass_budget_is_enforced() {
        let g = Graph::new("g")
            .input("x", TensorType::unranked(DType::F32))
            .node(Node::new("t", OpKind::Transpose).input("x").output("y"))
            .output("y", TensorType::unranked(DType::F32));
        match infer_graph(&g, Some(1)) {
            Err(IrError::Stalled { passes, .. }) => assert_eq!(passes, 1),
            other => panic!("expected a stall, got {other:?}"),
        }
    }

    #[test]
    fn concrete_inputs_never_defer() {
        let f = |d: &[usize]| TensorType::fixed(DType::F32, d);
        let g = Graph::new("g")
            .input("a", f(&[2, 3]))
            .input("b", f(&[3, 4]))
            .node(Node::new("mm", OpKind::MatMul).input("a").input("b").output("ab"))
            .node(Node::new("t", OpKind::Transpose).input("ab").output("abt"))
            .node(
                Node::new("r", OpKind::Reshape)
                    .input("abt")
                    .output("flat")
                    .attr("shape", vec![-1i64]),
            )
            .node(
                Node::new("s", OpKind::Split)
                    .input("flat")
                    .output("lo")
                    .output("hi"),
            )
            .node(
                Node::new("c", OpKind::Concat)
                    .input("hi")
                    .input("lo")
                    .output("cat")
                    .attr("axis", 0i64),
            )
            .node(
                Node::new("sum", OpKind::ReduceSum)
                    .input("cat")
                    .output("total")
                    .attr("keepdims", 0i64),
            )
            .output("total", f(&[]));
        let types = infer_graph(&g, None).unwrap();
        assert_eq!(types.get("abt"), Some(&f(&[4, 2])));
        assert_eq!(types.get("lo"), Some(&f(&[4])));
        assert_eq!(types.get("cat"), Some(&f(&[8])));
        assert!(types.iter().all(|(_, ty)| ty.is_static()));
    }
}
