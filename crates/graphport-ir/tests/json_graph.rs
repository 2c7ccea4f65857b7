use anyhow::{ensure, Context, Result};
use graphport_core::{DType, Dim, TensorType};
use graphport_ir::{infer_graph, lower_graph, CategorySentinels, Graph, IrError, OpKind};

const MLP: &str = r#"{
    "name": "mlp",
    "inputs": [
        {"name": "x", "dtype": "f32", "dims": [null, 4]},
        {"name": "w", "dtype": "f32", "dims": [4, 2]},
        {"name": "b", "dtype": "f32", "dims": [2]}
    ],
    "outputs": [{"name": "y", "dtype": "f32", "dims": [null, 2]}],
    "nodes": [
        {"name": "mm", "kind": "MatMul", "inputs": ["x", "w"], "outputs": [{"name": "xw"}]},
        {"name": "bias", "kind": "Add", "inputs": ["xw", "b"], "outputs": [{"name": "z"}]},
        {"name": "act", "kind": "Relu", "inputs": ["z"], "outputs": [{"name": "y"}]}
    ]
}"#;

#[test]
fn dynamic_batch_flows_through_mlp() -> Result<()> {
    let graph = Graph::from_json(MLP)?;
    let types = infer_graph(&graph, None)?;

    let y = types.get("y").context("missing y")?;
    ensure!(
        *y == TensorType::ranked(DType::F32, [Dim::Unknown, Dim::Known(2)]),
        "unexpected output type {y}"
    );

    let lowered = lower_graph(&graph, &types, &CategorySentinels::default())?;
    ensure!(lowered.ops.len() == 3, "expected one primitive per node");
    let kinds: Vec<OpKind> = lowered.ops.iter().map(|op| op.kind).collect();
    ensure!(kinds == [OpKind::MatMul, OpKind::Add, OpKind::Relu]);
    ensure!(lowered.signature.inputs.len() == 3);
    Ok(())
}

#[test]
fn mismatched_inner_dims_name_the_node() -> Result<()> {
    let text = MLP.replace(r#""dims": [4, 2]"#, r#""dims": [5, 2]"#);
    let graph = Graph::from_json(&text)?;
    match infer_graph(&graph, None) {
        Err(IrError::Inference { node, kind, msg }) => {
            ensure!(node == "mm" && kind == OpKind::MatMul, "wrong node {node}");
            ensure!(msg.contains("inner"), "unexpected message {msg}");
        }
        other => anyhow::bail!("expected an inference error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn empty_category_lists_load_from_json() -> Result<()> {
    let graph = Graph::from_json(
        r#"{
            "name": "main_graph",
            "inputs": [{"name": "x", "dtype": "i64", "dims": [3]}],
            "outputs": [{"name": "y", "dtype": "string", "dims": [3]}],
            "nodes": [{
                "name": "map",
                "kind": "CategoryMapper",
                "inputs": ["x"],
                "outputs": [{"name": "y"}],
                "attrs": {"cats_int64s": [], "cats_strings": [], "default_string": "unknown"}
            }]
        }"#,
    )?;
    let types = infer_graph(&graph, None)?;
    ensure!(*types.get("y").context("missing y")? == TensorType::fixed(DType::String, &[3]));

    let lowered = lower_graph(&graph, &types, &CategorySentinels::default())?;
    ensure!(lowered.constants.len() == 1, "the empty table is still emitted");
    Ok(())
}
