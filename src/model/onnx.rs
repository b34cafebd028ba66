// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use ndarray::Array4;
use ort::{
  execution_providers::XNNPACKExecutionProvider,
  session::{Session, builder::GraphOptimizationLevel},
  tensor::TensorElementType,
  value::{DynValue, TensorRef, ValueType},
};
use tracing::{debug, error, info};

use crate::model::{
  Backend, BackendLoader, BackendOptions, InferError, InputSpec, InputTensor, LoadError,
  RawOutput, TensorData, TensorElement,
};

const NUM_OUTPUTS: usize = 3;

impl From<ort::Error> for InferError {
  fn from(err: ort::Error) -> Self {
    InferError::Backend(err.to_string())
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxLoader;

impl BackendLoader for OnnxLoader {
  type Backend = OnnxBackend;

  fn load(&self, options: &BackendOptions) -> Result<OnnxBackend, LoadError> {
    OnnxBackend::new(options.clone())
  }
}

pub struct OnnxBackend {
  session: Session,
  options: BackendOptions,
  spec: InputSpec,
  // [boxes, classes, scores]
  output_names: [String; NUM_OUTPUTS],
}

fn build_session(options: &BackendOptions) -> Result<Session, ort::Error> {
  let mut builder = Session::builder()?
    .with_optimization_level(GraphOptimizationLevel::Level3)?
    .with_intra_threads(options.threads)?;
  if options.use_acceleration {
    builder = builder.with_execution_providers([XNNPACKExecutionProvider::default().build()])?;
  }
  builder.commit_from_file(&options.model_path)
}

/// 读取 NHWC 输入形状，动态维度按 0 处理
fn input_spec(session: &Session) -> Result<InputSpec, LoadError> {
  let input = session
    .inputs
    .first()
    .ok_or_else(|| LoadError::Malformed("模型没有输入".to_string()))?;

  match &input.input_type {
    ValueType::Tensor { ty, shape, .. } if shape.len() == 4 => {
      let element = match ty {
        TensorElementType::Uint8 => TensorElement::UInt8,
        TensorElementType::Float32 => TensorElement::Float32,
        other => {
          return Err(LoadError::Malformed(format!("不支持的输入类型: {:?}", other)));
        }
      };
      Ok(InputSpec {
        height: shape[1].max(0) as u32,
        width: shape[2].max(0) as u32,
        channels: shape[3].max(0) as u32,
        element,
      })
    }
    other => Err(LoadError::Malformed(format!(
      "预期模型输入为 NHWC 张量, 实际为 {:?}",
      other
    ))),
  }
}

/// 按名称匹配三路输出，匹配不到时按下标 0/1/2 处理
fn match_outputs(names: &[String]) -> Result<[String; NUM_OUTPUTS], LoadError> {
  if names.len() < NUM_OUTPUTS {
    error!("预期模型输出数量至少为 {}, 实际为 {}", NUM_OUTPUTS, names.len());
    return Err(LoadError::Malformed(format!(
      "预期模型输出数量至少为 {}, 实际为 {}",
      NUM_OUTPUTS,
      names.len()
    )));
  }

  let find = |key: &str| {
    names
      .iter()
      .find(|name| name.to_ascii_lowercase().contains(key))
      .cloned()
  };

  match (find("box"), find("class"), find("score")) {
    (Some(boxes), Some(classes), Some(scores)) => {
      debug!("按名称匹配输出: {}, {}, {}", boxes, classes, scores);
      Ok([boxes, classes, scores])
    }
    _ => {
      debug!("输出名称无法识别，按顺序使用前三个输出");
      Ok([names[0].clone(), names[1].clone(), names[2].clone()])
    }
  }
}

fn tensor_to_vec(value: &DynValue) -> Result<Vec<f32>, InferError> {
  if let Ok((_, data)) = value.try_extract_tensor::<f32>() {
    return Ok(data.to_vec());
  }
  let (_, data) = value.try_extract_tensor::<i64>()?;
  Ok(data.iter().map(|&v| v as f32).collect())
}

impl OnnxBackend {
  pub fn new(options: BackendOptions) -> Result<Self, LoadError> {
    if !options.model_path.exists() {
      return Err(LoadError::ModelNotFound(options.model_path.clone()));
    }

    info!("创建 ONNX Runtime 推理会话");
    let session = build_session(&options).map_err(|e| LoadError::Graph(e.to_string()))?;
    let spec = input_spec(&session)?;
    let names = session
      .outputs
      .iter()
      .map(|output| output.name.clone())
      .collect::<Vec<_>>();
    let output_names = match_outputs(&names)?;

    Ok(Self {
      session,
      options,
      spec,
      output_names,
    })
  }
}

impl Backend for OnnxBackend {
  fn input_spec(&self) -> InputSpec {
    self.spec
  }

  // ONNX Runtime 不能原地修改线程数，需要重建会话
  fn set_threads(&mut self, threads: usize) -> Result<(), InferError> {
    let mut options = self.options.clone();
    options.threads = threads;
    self.session = build_session(&options)?;
    self.options = options;
    Ok(())
  }

  fn invoke(&mut self, input: &InputTensor) -> Result<RawOutput, InferError> {
    let [n, h, w, c] = input.shape;
    let shape_error = |e: ndarray::ShapeError| InferError::InvalidInput(e.to_string());

    let outputs = match &input.data {
      TensorData::UInt8(data) => {
        let array = Array4::from_shape_vec((n, h, w, c), data.clone()).map_err(shape_error)?;
        self
          .session
          .run(ort::inputs![TensorRef::from_array_view(array.view())?])?
      }
      TensorData::Float32(data) => {
        let array = Array4::from_shape_vec((n, h, w, c), data.clone()).map_err(shape_error)?;
        self
          .session
          .run(ort::inputs![TensorRef::from_array_view(array.view())?])?
      }
    };

    let [boxes, classes, scores] = &self.output_names;
    Ok(RawOutput {
      boxes: tensor_to_vec(&outputs[boxes.as_str()])?,
      classes: tensor_to_vec(&outputs[classes.as_str()])?,
      scores: tensor_to_vec(&outputs[scores.as_str()])?,
    })
  }
}
