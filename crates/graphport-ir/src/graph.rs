use std::collections::{BTreeMap, HashSet};

use graphport_core::{TensorSpec, TensorType};
use serde::{Deserialize, Serialize};

use crate::error::{IrError, Result};
use crate::OpKind;

/// Static attribute value. Integers are tried before floats, so `3` is an
/// `Int` and `3.0` a `Float`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Strs(Vec<String>),
}

impl AttrValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "float",
            AttrValue::Str(_) => "string",
            AttrValue::Ints(_) => "ints",
            AttrValue::Floats(_) => "floats",
            AttrValue::Strs(_) => "strings",
        }
    }

    fn is_empty_list(&self) -> bool {
        match self {
            AttrValue::Ints(v) => v.is_empty(),
            AttrValue::Floats(v) => v.is_empty(),
            AttrValue::Strs(v) => v.is_empty(),
            _ => false,
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(v: Vec<i64>) -> Self {
        AttrValue::Ints(v)
    }
}

impl From<Vec<f64>> for AttrValue {
    fn from(v: Vec<f64>) -> Self {
        AttrValue::Floats(v)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(v: Vec<String>) -> Self {
        AttrValue::Strs(v)
    }
}

impl From<Vec<&str>> for AttrValue {
    fn from(v: Vec<&str>) -> Self {
        AttrValue::Strs(v.into_iter().map(str::to_string).collect())
    }
}

/// Typed read access to a node's attributes. Getters return `Ok(None)` when
/// the attribute is absent and `Err` when it is present with another type.
#[derive(Clone, Copy)]
pub struct Attrs<'a>(&'a BTreeMap<String, AttrValue>);

macro_rules! attr_getter {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self, key: &str) -> std::result::Result<Option<$ty>, String> {
            match self.0.get(key) {
                None => Ok(None),
                Some(AttrValue::$variant(v)) => Ok(Some(v)),
                Some(other) => Err(format!(
                    "attribute `{key}` must be {}, got {}",
                    stringify!($name),
                    other.type_name()
                )),
            }
        }
    };
}

/// Like `attr_getter!`, but any empty list is accepted: JSON `[]` carries no
/// element type and always parses as `Ints`.
macro_rules! list_getter {
    ($name:ident, $variant:ident, $elem:ty) => {
        pub fn $name(&self, key: &str) -> std::result::Result<Option<&'a [$elem]>, String> {
            match self.0.get(key) {
                None => Ok(None),
                Some(AttrValue::$variant(v)) => Ok(Some(v.as_slice())),
                Some(other) if other.is_empty_list() => Ok(Some(&[] as &[$elem])),
                Some(other) => Err(format!(
                    "attribute `{key}` must be {}, got {}",
                    stringify!($name),
                    other.type_name()
                )),
            }
        }
    };
}

impl<'a> Attrs<'a> {
    pub fn int(&self, key: &str) -> std::result::Result<Option<i64>, String> {
        match self.0.get(key) {
            None => Ok(None),
            Some(AttrValue::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(format!(
                "attribute `{key}` must be int, got {}",
                other.type_name()
            )),
        }
    }

    attr_getter!(str, Str, &'a String);
    list_getter!(ints, Ints, i64);
    list_getter!(strs, Strs, String);

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

/// A produced value: its name and an optional declared type hint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TensorType>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub kind: OpKind,
    #[serde(default)]
    pub inputs: Vec<String>,
    pub outputs: Vec<OutputSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttrValue>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: OpKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn input(mut self, value: impl Into<String>) -> Self {
        self.inputs.push(value.into());
        self
    }

    pub fn output(mut self, value: impl Into<String>) -> Self {
        self.outputs.push(OutputSpec {
            name: value.into(),
            ty: None,
        });
        self
    }

    pub fn typed_output(mut self, value: impl Into<String>, ty: TensorType) -> Self {
        self.outputs.push(OutputSpec {
            name: value.into(),
            ty: Some(ty),
        });
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn attrs(&self) -> Attrs<'_> {
        Attrs(&self.attrs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    pub nodes: Vec<Node>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn input(mut self, name: impl Into<String>, ty: TensorType) -> Self {
        self.inputs.push(TensorSpec::new(name, ty));
        self
    }

    pub fn output(mut self, name: impl Into<String>, ty: TensorType) -> Self {
        self.outputs.push(TensorSpec::new(name, ty));
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Structural checks: unique names, inputs defined before use, operator
    /// arity, and graph outputs that name a defined value.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| IrError::InvalidGraph {
            graph: self.name.clone(),
            msg,
        };
        if self.name.is_empty() {
            return Err(invalid("graph has no name".to_string()));
        }

        let mut defined: HashSet<&str> = HashSet::new();
        for spec in &self.inputs {
            if !defined.insert(spec.name.0.as_str()) {
                return Err(invalid(format!("value `{}` defined twice", spec.name)));
            }
        }

        let mut node_names: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            if !node_names.insert(node.name.as_str()) {
                return Err(invalid(format!("node name `{}` used twice", node.name)));
            }
            let rule = node.kind.rule();
            if !rule.inputs().accepts(node.inputs.len()) {
                return Err(invalid(format!(
                    "node `{}` ({}) takes {} inputs, has {}",
                    node.name,
                    node.kind,
                    rule.inputs(),
                    node.inputs.len()
                )));
            }
            if !rule.outputs().accepts(node.outputs.len()) {
                return Err(invalid(format!(
                    "node `{}` ({}) produces {} outputs, declares {}",
                    node.name,
                    node.kind,
                    rule.outputs(),
                    node.outputs.len()
                )));
            }
            for input in &node.inputs {
                if !defined.contains(input.as_str()) {
                    return Err(invalid(format!(
                        "node `{}` reads `{input}` before it is defined",
                        node.name
                    )));
                }
            }
            for out in &node.outputs {
                if !defined.insert(out.name.as_str()) {
                    return Err(invalid(format!("value `{}` defined twice", out.name)));
                }
            }
        }

        if self.outputs.is_empty() {
            return Err(invalid("graph declares no outputs".to_string()));
        }
        let mut seen = HashSet::new();
        for spec in &self.outputs {
            if !defined.contains(spec.name.0.as_str()) {
                return Err(invalid(format!("output `{}` is never produced", spec.name)));
            }
            if !seen.insert(spec.name.0.as_str()) {
                return Err(invalid(format!("output `{}` listed twice", spec.name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphport_core::DType;

    fn vec_i64(n: usize) -> TensorType {
        TensorType::fixed(DType::I64, &[n])
    }

    #[test]
    fn attr_values_parse_untagged() {
        let attrs: BTreeMap<String, AttrValue> = serde_json::from_str(
            r#"{"a": 3, "b": 2.5, "c": "x", "d": [1, 2], "e": [0.5], "f": ["p", "q"]}"#,
        )
        .unwrap();
        assert_eq!(attrs["a"], AttrValue::Int(3));
        assert_eq!(attrs["b"], AttrValue::Float(2.5));
        assert_eq!(attrs["c"], AttrValue::Str("x".into()));
        assert_eq!(attrs["d"], AttrValue::Ints(vec![1, 2]));
        assert_eq!(attrs["e"], AttrValue::Floats(vec![0.5]));
        assert_eq!(attrs["f"], AttrValue::Strs(vec!["p".into(), "q".into()]));
    }

    #[test]
    fn empty_lists_survive_json() {
        let node = Node::new("map", OpKind::CategoryMapper)
            .attr("cats_int64s", Vec::<i64>::new())
            .attr("cats_strings", Vec::<String>::new());
        let text = serde_json::to_string(&node).unwrap();
        let back: Node = serde_json::from_str(&text).unwrap();

        assert_eq!(back.attrs().strs("cats_strings").unwrap(), Some(&[] as &[String]));
        assert_eq!(back.attrs().ints("cats_int64s").unwrap(), Some(&[] as &[i64]));
        assert_eq!(node.attrs().ints("cats_strings").unwrap(), Some(&[] as &[i64]));
        assert!(back.attrs().strs("missing").unwrap().is_none());
    }

    #[test]
    fn typed_getters_report_wrong_type() {
        let node = Node::new("n", OpKind::Concat).attr("axis", "zero");
        assert!(node.attrs().int("axis").is_err());
        assert_eq!(node.attrs().int("missing").unwrap(), None);
        assert_eq!(node.attrs().str("axis").unwrap().map(String::as_str), Some("zero"));
    }

    #[test]
    fn forward_reference_is_rejected() {
        let g = Graph::new("g")
            .input("x", vec_i64(3))
            .node(Node::new("b", OpKind::Neg).input("a").output("b_out"))
            .node(Node::new("a", OpKind::Neg).input("x").output("a"))
            .output("b_out", vec_i64(3));
        let err = g.validate().unwrap_err();
        assert!(err.to_string().contains("before it is defined"), "{err}");
    }

    #[test]
    fn arity_and_duplicates_are_rejected() {
        let g = Graph::new("g")
            .input("x", vec_i64(3))
            .node(Node::new("add", OpKind::Add).input("x").output("y"))
            .output("y", vec_i64(3));
        assert!(matches!(g.validate(), Err(IrError::InvalidGraph { .. })));

        let g = Graph::new("g")
            .input("x", vec_i64(3))
            .node(Node::new("n", OpKind::Neg).input("x").output("x"))
            .output("x", vec_i64(3));
        assert!(g.validate().unwrap_err().to_string().contains("defined twice"));
    }

    #[test]
    fn graph_json_round_trips() {
        let text = r#"{
            "name": "main_graph",
            "inputs": [{"name": "x", "dtype": "i64", "dims": [3]}],
            "outputs": [{"name": "y", "dtype": "string", "dims": [3]}],
            "nodes": [{
                "name": "map",
                "kind": "CategoryMapper",
                "inputs": ["x"],
                "outputs": [{"name": "y"}],
                "attrs": {"cats_int64s": [1, 2, 3], "cats_strings": ["cat", "dog", "human"]}
            }]
        }"#;
        let g = Graph::from_json(text).unwrap();
        g.validate().unwrap();
        assert_eq!(g.nodes[0].kind, OpKind::CategoryMapper);
        let again: Graph = serde_json::from_str(&serde_json::to_string(&g).unwrap()).unwrap();
        assert_eq!(again, g);
    }
}
