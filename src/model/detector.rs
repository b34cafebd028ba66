// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/model/detector.rs - 检测器（推理适配层）
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

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::{
  frame::Frame,
  model::{
    Backend, BackendLoader, BackendOptions, ConfidenceFilter, DetectResult, InferError, InputSpec,
    LoadError, extract_detections, preprocess,
  },
};

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  pub backend: BackendOptions,
  pub filter: ConfidenceFilter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
  pub detections: DetectResult,
  pub elapsed_ms: u64,
}

/// 已加载的检测模型及其执行上下文
///
/// 加速选项无法原地修改，只能通过 [`Detector::reload`] 销毁后重建。
pub struct Detector<B> {
  backend: B,
  spec: InputSpec,
  config: DetectorConfig,
  pending_threads: Option<usize>,
}

impl<B: Backend> Detector<B> {
  pub fn load<L: BackendLoader<Backend = B>>(
    loader: &L,
    config: DetectorConfig,
  ) -> Result<Self, LoadError> {
    info!(
      "加载模型文件: {} (加速: {}, 线程: {})",
      config.backend.model_path.display(),
      config.backend.use_acceleration,
      config.backend.threads
    );
    let backend = loader.load(&config.backend)?;
    let spec = backend.input_spec();

    if spec.width == 0 || spec.height == 0 {
      return Err(LoadError::Malformed(format!(
        "模型输入尺寸无效: {}x{}",
        spec.width, spec.height
      )));
    }
    if spec.channels != 3 {
      return Err(LoadError::Malformed(format!(
        "预期模型输入通道数为 3, 实际为 {}",
        spec.channels
      )));
    }

    debug!("模型输入: {}x{}x{} {:?}", spec.width, spec.height, spec.channels, spec.element);
    info!("模型加载完成");

    Ok(Self {
      backend,
      spec,
      config,
      pending_threads: None,
    })
  }

  pub fn input_spec(&self) -> InputSpec {
    self.spec
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn use_acceleration(&self) -> bool {
    self.config.backend.use_acceleration
  }

  /// 当前生效的线程数
  pub fn threads(&self) -> usize {
    self.config.backend.threads
  }

  /// 记录新的线程数，下一次 [`Detector::infer`] 时生效
  pub fn set_threads(&mut self, threads: usize) {
    if threads == 0 {
      warn!("忽略无效的推理线程数 0");
      return;
    }
    self.pending_threads = Some(threads);
  }

  pub fn infer(&mut self, frame: &Frame) -> Result<Inference, InferError> {
    if let Some(threads) = self.pending_threads.take()
      && threads != self.config.backend.threads
    {
      debug!("推理线程数: {} -> {}", self.config.backend.threads, threads);
      self.backend.set_threads(threads)?;
      self.config.backend.threads = threads;
    }

    let now = Instant::now();
    let input = preprocess(frame, &self.spec)?;
    let output = self.backend.invoke(&input)?;
    let detections = extract_detections(&output, &self.config.filter)?;
    let elapsed_ms = now.elapsed().as_millis() as u64;

    debug!("第 {} 帧检测到 {} 个物体", frame.index(), detections.len());

    Ok(Inference {
      detections,
      elapsed_ms,
    })
  }

  /// 销毁当前上下文，按新的加速选项重新加载
  pub fn reload<L: BackendLoader<Backend = B>>(
    self,
    loader: &L,
    use_acceleration: bool,
  ) -> Result<Self, LoadError> {
    let mut config = self.config.clone();
    if let Some(threads) = self.pending_threads {
      config.backend.threads = threads;
    }
    drop(self);

    config.backend.use_acceleration = use_acceleration;
    Self::load(loader, config)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
  Unloaded,
  Loading,
  Ready,
}

enum Slot<B> {
  Unloaded,
  Loading,
  Ready(Detector<B>),
}

/// 推理线程持有的模型槽位: `Unloaded -> Loading -> Ready`
pub struct ModelSlot<L: BackendLoader> {
  loader: L,
  config: DetectorConfig,
  slot: Slot<L::Backend>,
}

impl<L: BackendLoader> ModelSlot<L> {
  pub fn new(loader: L, config: DetectorConfig) -> Self {
    Self {
      loader,
      config,
      slot: Slot::Unloaded,
    }
  }

  pub fn state(&self) -> ModelState {
    match self.slot {
      Slot::Unloaded => ModelState::Unloaded,
      Slot::Loading => ModelState::Loading,
      Slot::Ready(_) => ModelState::Ready,
    }
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn load(&mut self) -> Result<(), LoadError> {
    self.slot = Slot::Loading;
    match Detector::load(&self.loader, self.config.clone()) {
      Ok(detector) => {
        self.slot = Slot::Ready(detector);
        Ok(())
      }
      Err(e) => {
        self.slot = Slot::Unloaded;
        Err(e)
      }
    }
  }

  pub fn reload(&mut self, use_acceleration: bool) -> Result<(), LoadError> {
    info!("切换加速选项为 {}，重新加载模型", use_acceleration);
    self.config.backend.use_acceleration = use_acceleration;
    match std::mem::replace(&mut self.slot, Slot::Loading) {
      Slot::Ready(detector) => match detector.reload(&self.loader, use_acceleration) {
        Ok(detector) => {
          self.config = detector.config().clone();
          self.slot = Slot::Ready(detector);
          Ok(())
        }
        Err(e) => {
          self.slot = Slot::Unloaded;
          Err(e)
        }
      },
      Slot::Unloaded | Slot::Loading => self.load(),
    }
  }

  pub fn set_threads(&mut self, threads: usize) {
    if threads == 0 {
      warn!("忽略无效的推理线程数 0");
      return;
    }
    match &mut self.slot {
      Slot::Ready(detector) => detector.set_threads(threads),
      Slot::Unloaded | Slot::Loading => self.config.backend.threads = threads,
    }
  }

  pub fn infer(&mut self, frame: &Frame) -> Result<Inference, InferError> {
    match &mut self.slot {
      Slot::Ready(detector) => {
        let result = detector.infer(frame);
        self.config.backend.threads = detector.threads();
        result
      }
      Slot::Unloaded | Slot::Loading => Err(InferError::NotLoaded),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
  };

  use super::*;
  use crate::model::{RawOutput, TensorElement, TensorData, InputTensor};

  #[derive(Default)]
  struct Log {
    loads: Vec<bool>,
    threads: Vec<usize>,
    inputs: Vec<[usize; 4]>,
  }

  struct FakeBackend {
    log: Arc<Mutex<Log>>,
    output: RawOutput,
  }

  impl Backend for FakeBackend {
    fn input_spec(&self) -> InputSpec {
      InputSpec {
        width: 4,
        height: 2,
        channels: 3,
        element: TensorElement::UInt8,
      }
    }

    fn set_threads(&mut self, threads: usize) -> Result<(), InferError> {
      self.log.lock().unwrap().threads.push(threads);
      Ok(())
    }

    fn invoke(&mut self, input: &InputTensor) -> Result<RawOutput, InferError> {
      assert!(matches!(input.data, TensorData::UInt8(ref d) if d.len() == 24));
      self.log.lock().unwrap().inputs.push(input.shape);
      Ok(self.output.clone())
    }
  }

  struct FakeLoader {
    log: Arc<Mutex<Log>>,
    fail: bool,
  }

  impl BackendLoader for FakeLoader {
    type Backend = FakeBackend;

    fn load(&self, options: &BackendOptions) -> Result<FakeBackend, LoadError> {
      if self.fail {
        return Err(LoadError::ModelNotFound(options.model_path.clone()));
      }
      self.log.lock().unwrap().loads.push(options.use_acceleration);
      Ok(FakeBackend {
        log: self.log.clone(),
        output: RawOutput {
          boxes: vec![0.1, 0.1, 0.5, 0.5, 0.2, 0.2, 0.4, 0.4],
          classes: vec![0.0, 1.0],
          scores: vec![0.9, 0.4],
        },
      })
    }
  }

  fn config() -> DetectorConfig {
    DetectorConfig {
      backend: BackendOptions {
        model_path: PathBuf::from("basket.onnx"),
        use_acceleration: true,
        threads: 2,
      },
      filter: ConfidenceFilter::default(),
    }
  }

  fn frame() -> Frame {
    Frame::from_raw(8, 4, 3, vec![128; 96]).unwrap()
  }

  #[test]
  fn infer_resizes_and_filters() {
    let log = Arc::new(Mutex::new(Log::default()));
    let loader = FakeLoader {
      log: log.clone(),
      fail: false,
    };
    let mut detector = Detector::load(&loader, config()).unwrap();
    let inference = detector.infer(&frame()).unwrap();

    assert_eq!(inference.detections.len(), 1);
    assert_eq!(inference.detections.items[0].class_id, 0);
    assert_eq!(log.lock().unwrap().inputs, vec![[1, 2, 4, 3]]);
  }

  #[test]
  fn thread_count_applies_on_next_infer() {
    let log = Arc::new(Mutex::new(Log::default()));
    let loader = FakeLoader {
      log: log.clone(),
      fail: false,
    };
    let mut detector = Detector::load(&loader, config()).unwrap();

    detector.set_threads(4);
    assert!(log.lock().unwrap().threads.is_empty());
    assert_eq!(detector.threads(), 2);

    detector.infer(&frame()).unwrap();
    assert_eq!(log.lock().unwrap().threads, vec![4]);
    assert_eq!(detector.threads(), 4);

    detector.infer(&frame()).unwrap();
    assert_eq!(log.lock().unwrap().threads, vec![4]);
  }

  #[test]
  fn reload_rebuilds_backend() {
    let log = Arc::new(Mutex::new(Log::default()));
    let loader = FakeLoader {
      log: log.clone(),
      fail: false,
    };
    let detector = Detector::load(&loader, config()).unwrap();
    let detector = detector.reload(&loader, false).unwrap();

    assert!(!detector.use_acceleration());
    assert_eq!(log.lock().unwrap().loads, vec![true, false]);
  }

  #[test]
  fn slot_moves_through_states() {
    let log = Arc::new(Mutex::new(Log::default()));
    let mut slot = ModelSlot::new(
      FakeLoader {
        log: log.clone(),
        fail: false,
      },
      config(),
    );

    assert_eq!(slot.state(), ModelState::Unloaded);
    assert!(matches!(slot.infer(&frame()), Err(InferError::NotLoaded)));

    slot.load().unwrap();
    assert_eq!(slot.state(), ModelState::Ready);

    slot.reload(false).unwrap();
    assert_eq!(slot.state(), ModelState::Ready);
    assert!(!slot.config().backend.use_acceleration);
  }

  #[test]
  fn failed_load_leaves_slot_unloaded() {
    let log = Arc::new(Mutex::new(Log::default()));
    let mut slot = ModelSlot::new(
      FakeLoader {
        log,
        fail: true,
      },
      config(),
    );

    assert!(matches!(slot.load(), Err(LoadError::ModelNotFound(_))));
    assert_eq!(slot.state(), ModelState::Unloaded);
  }
}
