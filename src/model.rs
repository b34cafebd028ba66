// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/model.rs - 检测模型
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

use std::{path::PathBuf, str::FromStr};

use serde::Serialize;
use thiserror::Error;

use crate::frame::Frame;

mod detector;
pub use self::detector::{Detector, DetectorConfig, Inference, ModelSlot, ModelState};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxBackend, OnnxLoader};

pub const DETECT_THRESHOLD: f32 = 0.5;
pub const FIELDS_PER_DETECTION: usize = 6;

#[derive(Error, Debug)]
pub enum LoadError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("模型无效: {0}")]
  Malformed(String),
  #[error("推理图构建失败: {0}")]
  Graph(String),
}

#[derive(Error, Debug)]
pub enum InferError {
  #[error("无效输入: {0}")]
  InvalidInput(String),
  #[error("模型尚未加载")]
  NotLoaded,
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("模型输出了无效的类别编号: {0}")]
  InvalidClass(f32),
}

#[derive(Error, Debug, PartialEq)]
pub enum WireError {
  #[error("检测结果长度 {0} 不是 6 的倍数")]
  LengthNotMultiple(usize),
  #[error("无效的类别编号: {0}")]
  InvalidClass(f32),
  #[error("置信度超出 [0, 1]: {0}")]
  InvalidScore(f32),
}

/// 类别编号必须是有限的非负整数，其余取值不做截断转换
pub fn class_index(value: f32) -> Option<u32> {
  if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value < u32::MAX as f32 {
    Some(value as u32)
  } else {
    None
  }
}

/// 单个检测结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [top, left, bottom, right]，归一化坐标
}

/// 反归一化后的像素矩形
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl PixelRect {
  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }
}

impl DetectItem {
  pub fn top(&self) -> f32 {
    self.bbox[0]
  }

  pub fn left(&self) -> f32 {
    self.bbox[1]
  }

  pub fn bottom(&self) -> f32 {
    self.bbox[2]
  }

  pub fn right(&self) -> f32 {
    self.bbox[3]
  }

  /// 按画布尺寸反归一化
  pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
    let (w, h) = (width as f32, height as f32);
    PixelRect {
      left: self.left() * w,
      top: self.top() * h,
      right: self.right() * w,
      bottom: self.bottom() * h,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem> {
    self.items.iter()
  }

  /// 展平为 `[class, score, top, left, bottom, right]` 六元组序列
  pub fn to_flat(&self) -> Vec<f32> {
    let mut flat = Vec::with_capacity(self.items.len() * FIELDS_PER_DETECTION);
    for item in self.items.iter() {
      flat.push(item.class_id as f32);
      flat.push(item.score);
      flat.extend_from_slice(&item.bbox);
    }
    flat
  }

  pub fn from_flat(flat: &[f32]) -> Result<Self, WireError> {
    if flat.len() % FIELDS_PER_DETECTION != 0 {
      return Err(WireError::LengthNotMultiple(flat.len()));
    }

    let items = flat
      .chunks_exact(FIELDS_PER_DETECTION)
      .map(|chunk| {
        let class_id = class_index(chunk[0]).ok_or(WireError::InvalidClass(chunk[0]))?;
        let score = chunk[1];
        if !(0.0..=1.0).contains(&score) {
          return Err(WireError::InvalidScore(score));
        }
        Ok(DetectItem {
          class_id,
          score,
          bbox: [chunk[2], chunk[3], chunk[4], chunk[5]],
        })
      })
      .collect::<Result<Vec<_>, WireError>>()?;
    Ok(items.into())
  }
}

/// 置信度上界的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpperBound {
  /// `score <= 1.0`
  #[default]
  Inclusive,
  /// `score < 1.0`
  Exclusive,
}

impl FromStr for UpperBound {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "inclusive" => Ok(UpperBound::Inclusive),
      "exclusive" => Ok(UpperBound::Exclusive),
      other => Err(format!("未知的上界类型: {}", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceFilter {
  pub threshold: f32,
  pub upper: UpperBound,
}

impl Default for ConfidenceFilter {
  fn default() -> Self {
    Self {
      threshold: DETECT_THRESHOLD,
      upper: UpperBound::Inclusive,
    }
  }
}

impl ConfidenceFilter {
  pub fn with_upper(mut self, upper: UpperBound) -> Self {
    self.upper = upper;
    self
  }

  pub fn accepts(&self, score: f32) -> bool {
    let below_upper = match self.upper {
      UpperBound::Inclusive => score <= 1.0,
      UpperBound::Exclusive => score < 1.0,
    };
    score > self.threshold && below_upper
  }
}

/// 模型的三路原始输出
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
  pub boxes: Vec<f32>, // 每个检测 4 个值 [top, left, bottom, right]
  pub classes: Vec<f32>,
  pub scores: Vec<f32>,
}

/// 按模型给出的顺序读取，遇到第一个不满足条件的分数即停止
///
/// 模型输出的分数须为非递增顺序，这里不重新排序。
/// 被接受的检测若类别编号无效，返回 [`InferError::InvalidClass`]。
pub fn extract_detections(
  raw: &RawOutput,
  filter: &ConfidenceFilter,
) -> Result<DetectResult, InferError> {
  let count = raw
    .scores
    .len()
    .min(raw.classes.len())
    .min(raw.boxes.len() / 4);

  let mut items = Vec::new();
  for i in 0..count {
    let score = raw.scores[i];
    if !filter.accepts(score) {
      break;
    }
    let class_id = class_index(raw.classes[i]).ok_or(InferError::InvalidClass(raw.classes[i]))?;
    let b = &raw.boxes[i * 4..i * 4 + 4];
    items.push(DetectItem {
      class_id,
      score,
      bbox: [
        b[0].clamp(0.0, 1.0),
        b[1].clamp(0.0, 1.0),
        b[2].clamp(0.0, 1.0),
        b[3].clamp(0.0, 1.0),
      ],
    });
  }

  Ok(items.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorElement {
  UInt8,
  Float32,
}

/// 模型输入形状（NHWC）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
  pub width: u32,
  pub height: u32,
  pub channels: u32,
  pub element: TensorElement,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  UInt8(Vec<u8>),
  Float32(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  pub shape: [usize; 4],
  pub data: TensorData,
}

/// 拉伸缩放到模型输入尺寸并打包为 NHWC
pub fn preprocess(frame: &Frame, spec: &InputSpec) -> Result<InputTensor, InferError> {
  if frame.is_empty() {
    return Err(InferError::InvalidInput("空帧".to_string()));
  }
  if spec.channels != 3 {
    return Err(InferError::InvalidInput(format!(
      "模型输入通道数 {} 不受支持",
      spec.channels
    )));
  }

  let image = frame.stretch_to(spec.width, spec.height);
  let bytes = image.into_raw();
  let shape = [1, spec.height as usize, spec.width as usize, 3];

  let data = match spec.element {
    TensorElement::UInt8 => TensorData::UInt8(bytes),
    TensorElement::Float32 => {
      TensorData::Float32(bytes.iter().map(|&v| (v as f32 - 127.5) / 127.5).collect())
    }
  };

  Ok(InputTensor { shape, data })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
  pub model_path: PathBuf,
  pub use_acceleration: bool,
  pub threads: usize,
}

pub trait Backend: Send {
  fn input_spec(&self) -> InputSpec;
  fn set_threads(&mut self, threads: usize) -> Result<(), InferError>;
  fn invoke(&mut self, input: &InputTensor) -> Result<RawOutput, InferError>;
}

pub trait BackendLoader: Send + 'static {
  type Backend: Backend + 'static;
  fn load(&self, options: &BackendOptions) -> Result<Self::Backend, LoadError>;
}
