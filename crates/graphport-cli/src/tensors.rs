//! JSON form of runtime tensors: `{"dtype": "f32", "shape": [2], "data": [1.0, 2.0]}`.

use anyhow::{bail, Context, Result};
use graphport_core::{DType, RtTensor};
use half::f16;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Serialize, Deserialize)]
pub struct TensorJson {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub data: Json,
}

fn elements<T: serde::de::DeserializeOwned>(data: &Json) -> Result<Vec<T>> {
    serde_json::from_value(data.clone()).context("tensor data does not match its dtype")
}

impl TensorJson {
    pub fn to_tensor(&self) -> Result<RtTensor<'static>> {
        let shape = self.shape.clone();
        let t = match self.dtype {
            DType::Bool => RtTensor::from_slice(shape, &elements::<bool>(&self.data)?),
            DType::U8 => RtTensor::from_slice(shape, &elements::<u8>(&self.data)?),
            DType::I32 => RtTensor::from_slice(shape, &elements::<i32>(&self.data)?),
            DType::I64 => RtTensor::from_slice(shape, &elements::<i64>(&self.data)?),
            DType::F16 => {
                let v: Vec<f16> = elements::<f32>(&self.data)?
                    .into_iter()
                    .map(f16::from_f32)
                    .collect();
                RtTensor::from_slice(shape, &v)
            }
            DType::F32 => RtTensor::from_slice(shape, &elements::<f32>(&self.data)?),
            DType::F64 => RtTensor::from_slice(shape, &elements::<f64>(&self.data)?),
            DType::String => RtTensor::from_strings(shape, elements::<String>(&self.data)?),
        };
        Ok(t?)
    }

    pub fn from_tensor(t: &RtTensor<'_>) -> Result<Self> {
        let data = match t.dtype() {
            DType::Bool => serde_json::to_value(t.to_vec::<bool>()?)?,
            DType::U8 => serde_json::to_value(t.to_vec::<u8>()?)?,
            DType::I32 => serde_json::to_value(t.to_vec::<i32>()?)?,
            DType::I64 => serde_json::to_value(t.to_vec::<i64>()?)?,
            DType::F16 => {
                let v: Vec<f32> = t.to_vec::<f16>()?.into_iter().map(f16::to_f32).collect();
                serde_json::to_value(v)?
            }
            DType::F32 => serde_json::to_value(t.to_vec::<f32>()?)?,
            DType::F64 => serde_json::to_value(t.to_vec::<f64>()?)?,
            DType::String => serde_json::to_value(t.to_strings()?)?,
        };
        Ok(Self {
            dtype: t.dtype(),
            shape: t.dims().to_vec(),
            data,
        })
    }
}

pub fn parse_inputs(text: &str) -> Result<Vec<RtTensor<'static>>> {
    let specs: Vec<TensorJson> = serde_json::from_str(text).context("inputs must be a JSON array")?;
    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| spec.to_tensor().with_context(|| format!("input {i}")))
        .collect()
}

pub fn render_outputs(names: &[String], outputs: &[RtTensor<'_>]) -> Result<Json> {
    if names.len() != outputs.len() {
        bail!("{} outputs for {} declared names", outputs.len(), names.len());
    }
    let mut map = serde_json::Map::new();
    for (name, t) in names.iter().zip(outputs) {
        map.insert(name.clone(), serde_json::to_value(TensorJson::from_tensor(t)?)?);
    }
    Ok(Json::Object(map))
}
