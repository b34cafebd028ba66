// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// tests/pipeline.rs - 采集、推理与结账的端到端测试
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

use std::{
  collections::VecDeque,
  path::PathBuf,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::{Duration, Instant},
};

use crossbeam_channel::{Sender, unbounded};

use shopping_basket::{
  catalog::{Catalog, Price},
  checkout::Report,
  controller::{Command, Controller, ControllerConfig, ControllerError, EXIT_CAMERA_LOST, EXIT_MODEL, Phase},
  frame::Frame,
  input::{Camera, CameraConfig, CaptureError, OpenError, Transport, TransportKind},
  model::{
    Backend, BackendLoader, BackendOptions, ConfidenceFilter, DetectorConfig, InferError, InputSpec,
    InputTensor, LoadError, ModelSlot, RawOutput, TensorElement,
  },
  output::{OutputError, Render},
  task::{ContinuousTask, InteractiveTask, OneShotTask, Task},
};

// ---- 脚本化的摄像头 ----

#[derive(Clone, Default)]
struct CameraScript {
  reads: Arc<Mutex<VecDeque<bool>>>,
  opens: Arc<Mutex<VecDeque<bool>>>,
  read_count: Arc<AtomicUsize>,
  fail_forever: Arc<Mutex<bool>>,
}

impl CameraScript {
  fn reads(self, reads: &[bool]) -> Self {
    self.reads.lock().unwrap().extend(reads);
    self
  }

  fn opens(self, opens: &[bool]) -> Self {
    self.opens.lock().unwrap().extend(opens);
    self
  }

  /// 脚本用完后一直返回空帧
  fn then_empty(self) -> Self {
    *self.fail_forever.lock().unwrap() = true;
    self
  }

  fn read_count(&self) -> usize {
    self.read_count.load(Ordering::SeqCst)
  }
}

struct ScriptedTransport {
  script: CameraScript,
  kind: TransportKind,
}

impl Transport for ScriptedTransport {
  fn open(&mut self) -> Result<(), OpenError> {
    if self.script.opens.lock().unwrap().pop_front().unwrap_or(true) {
      Ok(())
    } else {
      Err(OpenError::DeviceMissing("scripted".to_string()))
    }
  }

  fn read(&mut self) -> Option<Frame> {
    self.script.read_count.fetch_add(1, Ordering::SeqCst);
    let fallback = !*self.script.fail_forever.lock().unwrap();
    if self.script.reads.lock().unwrap().pop_front().unwrap_or(fallback) {
      Some(Frame::from_raw(8, 4, 3, vec![128; 8 * 4 * 3]).unwrap())
    } else {
      None
    }
  }

  fn release(&mut self) {}

  fn kind(&self) -> TransportKind {
    self.kind
  }

  fn describe(&self) -> String {
    format!("scripted {:?}", self.kind)
  }
}

fn camera(script: &CameraScript, kind: TransportKind) -> Camera<ScriptedTransport> {
  let mut camera = Camera::new(
    ScriptedTransport {
      script: script.clone(),
      kind,
    },
    CameraConfig {
      reconnect_backoff: Duration::ZERO,
      ..CameraConfig::default()
    },
  );
  camera.open().unwrap();
  camera
}

// ---- 脚本化的模型 ----

#[derive(Clone, Default)]
struct ModelScript {
  output: Arc<Mutex<RawOutput>>,
  loads: Arc<Mutex<Vec<BackendOptions>>>,
  threads: Arc<Mutex<Vec<usize>>>,
  fail_after_loads: Option<usize>,
}

impl ModelScript {
  fn detecting(classes: &[u32], score: f32) -> Self {
    let script = Self::default();
    *script.output.lock().unwrap() = RawOutput {
      boxes: classes.iter().flat_map(|_| [0.25, 0.25, 0.75, 0.75]).collect(),
      classes: classes.iter().map(|&c| c as f32).collect(),
      scores: classes.iter().map(|_| score).collect(),
    };
    script
  }
}

struct ScriptedBackend {
  script: ModelScript,
}

impl Backend for ScriptedBackend {
  fn input_spec(&self) -> InputSpec {
    InputSpec {
      width: 4,
      height: 4,
      channels: 3,
      element: TensorElement::UInt8,
    }
  }

  fn set_threads(&mut self, threads: usize) -> Result<(), InferError> {
    self.script.threads.lock().unwrap().push(threads);
    Ok(())
  }

  fn invoke(&mut self, input: &InputTensor) -> Result<RawOutput, InferError> {
    assert_eq!(input.shape, [1, 4, 4, 3]);
    Ok(self.script.output.lock().unwrap().clone())
  }
}

struct ScriptedLoader {
  script: ModelScript,
}

impl BackendLoader for ScriptedLoader {
  type Backend = ScriptedBackend;

  fn load(&self, options: &BackendOptions) -> Result<ScriptedBackend, LoadError> {
    let mut loads = self.script.loads.lock().unwrap();
    if self.script.fail_after_loads.is_some_and(|n| loads.len() >= n) {
      return Err(LoadError::ModelNotFound(options.model_path.clone()));
    }
    loads.push(options.clone());
    Ok(ScriptedBackend {
      script: self.script.clone(),
    })
  }
}

fn model(script: &ModelScript) -> ModelSlot<ScriptedLoader> {
  let mut slot = ModelSlot::new(
    ScriptedLoader {
      script: script.clone(),
    },
    DetectorConfig {
      backend: BackendOptions {
        model_path: PathBuf::from("basket.onnx"),
        use_acceleration: true,
        threads: 2,
      },
      filter: ConfidenceFilter::default(),
    },
  );
  slot.load().unwrap();
  slot
}

// ---- 记录渲染结果的输出 ----

#[derive(Clone, Default)]
struct Recorder {
  reports: Arc<Mutex<Vec<Report>>>,
  clears: Arc<AtomicUsize>,
  quit_after: Option<(usize, Sender<Command>)>,
}

impl Recorder {
  fn count(&self) -> usize {
    self.reports.lock().unwrap().len()
  }
}

impl Render for Recorder {
  type Error = OutputError;

  fn render_result(&self, _frame: &Frame, report: &Report) -> Result<(), Self::Error> {
    let mut reports = self.reports.lock().unwrap();
    reports.push(report.clone());
    if let Some((n, sender)) = &self.quit_after
      && reports.len() == *n
    {
      sender.send(Command::Quit).unwrap();
    }
    Ok(())
  }

  fn clear(&self) -> Result<(), Self::Error> {
    self.clears.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

fn controller(
  script: &CameraScript,
  kind: TransportKind,
  model_script: &ModelScript,
  output: &Recorder,
) -> Controller<Recorder> {
  Controller::new(
    camera(script, kind),
    model(model_script),
    Catalog::default(),
    output.clone(),
    ControllerConfig::default(),
  )
  .unwrap()
}

#[test]
fn single_shot_holds_until_next_basket() {
  let output = Recorder::default();
  let mut controller = controller(
    &CameraScript::default(),
    TransportKind::File,
    &ModelScript::detecting(&[0], 0.9),
    &output,
  );

  let report = controller.process_basket().unwrap();
  assert_eq!(report.checkout.total(), Price::from_minor(85));
  assert_eq!(report.checkout.rows()[0].name, "Baked Beans");
  assert_eq!(controller.phase(), Phase::Holding);

  assert!(matches!(controller.process_basket(), Err(ControllerError::AwaitingNext)));
  assert_eq!(output.count(), 1);

  controller.next_basket().unwrap();
  assert_eq!(controller.phase(), Phase::Idle);
  assert_eq!(output.clears.load(Ordering::SeqCst), 1);
  assert!(controller.process_basket().is_ok());
  assert_eq!(output.count(), 2);
}

#[test]
fn single_shot_settles_by_transport() {
  let script = CameraScript::default();
  let output = Recorder::default();
  let mut controller = controller(&script, TransportKind::Mipi, &ModelScript::default(), &output);
  assert_eq!(controller.settle_iterations(), 6);

  controller.process_basket().unwrap();
  assert_eq!(script.read_count(), 6);

  // 连续模式每个周期只读一帧
  controller.run_cycle().unwrap();
  assert_eq!(script.read_count(), 7);
}

#[test]
fn settle_can_be_overridden() {
  let script = CameraScript::default();
  let mut controller = Controller::new(
    camera(&script, TransportKind::Mipi),
    model(&ModelScript::default()),
    Catalog::default(),
    Recorder::default(),
    ControllerConfig {
      settle_iterations: Some(2),
      ..ControllerConfig::default()
    },
  )
  .unwrap();

  controller.process_basket().unwrap();
  assert_eq!(script.read_count(), 2);
}

#[test]
fn next_basket_resumes_continuous_mode() {
  let output = Recorder::default();
  let mut controller = controller(&CameraScript::default(), TransportKind::Usb, &ModelScript::default(), &output);

  controller.start_continuous().unwrap();
  assert_eq!(controller.phase(), Phase::Continuous);

  controller.process_basket().unwrap();
  assert_eq!(controller.phase(), Phase::Holding);

  controller.next_basket().unwrap();
  assert_eq!(controller.phase(), Phase::Continuous);

  controller.stop_continuous();
  assert_eq!(controller.phase(), Phase::Idle);
}

#[test]
fn command_loop_refuses_second_shot() {
  let output = Recorder::default();
  let mut controller = controller(
    &CameraScript::default(),
    TransportKind::File,
    &ModelScript::detecting(&[8, 1], 0.8),
    &output,
  );

  let (tx, rx) = unbounded();
  for command in [
    Command::ProcessBasket,
    Command::ProcessBasket,
    Command::NextBasket,
    Command::ProcessBasket,
    Command::Quit,
  ] {
    tx.send(command).unwrap();
  }

  controller.run(&rx).unwrap();
  assert_eq!(output.count(), 2);
  assert_eq!(output.clears.load(Ordering::SeqCst), 1);
  let reports = output.reports.lock().unwrap();
  assert_eq!(reports[0].checkout.total(), Price::from_minor(120 + 82));
}

#[test]
fn continuous_loop_renders_until_quit() {
  let (tx, rx) = unbounded();
  let output = Recorder {
    quit_after: Some((3, tx.clone())),
    ..Recorder::default()
  };
  let mut controller = controller(&CameraScript::default(), TransportKind::Usb, &ModelScript::default(), &output);

  tx.send(Command::StartContinuous).unwrap();
  controller.run(&rx).unwrap();

  // 第 4 帧的结果因为模式改变而被丢弃
  assert_eq!(output.count(), 3);
  let reports = output.reports.lock().unwrap();
  assert!(reports.windows(2).all(|pair| pair[0].frame_index < pair[1].frame_index));
}

#[test]
fn thread_count_is_applied_on_next_inference() {
  let model_script = ModelScript::default();
  let mut controller = controller(&CameraScript::default(), TransportKind::File, &model_script, &Recorder::default());

  controller.set_threads(4).unwrap();
  assert!(model_script.threads.lock().unwrap().is_empty());

  controller.run_cycle().unwrap();
  assert_eq!(*model_script.threads.lock().unwrap(), vec![4]);
}

#[test]
fn toggling_acceleration_reloads_the_model() {
  let model_script = ModelScript::default();
  let mut controller = controller(&CameraScript::default(), TransportKind::File, &model_script, &Recorder::default());
  assert!(controller.use_acceleration());

  controller.toggle_acceleration().unwrap();
  assert!(!controller.use_acceleration());

  let loads = model_script.loads.lock().unwrap();
  assert_eq!(loads.len(), 2);
  assert!(loads[0].use_acceleration);
  assert!(!loads[1].use_acceleration);
}

#[test]
fn reload_failure_is_fatal() {
  let model_script = ModelScript {
    fail_after_loads: Some(1),
    ..ModelScript::default()
  };
  let mut controller = controller(&CameraScript::default(), TransportKind::File, &model_script, &Recorder::default());

  let err = controller.toggle_acceleration().unwrap_err();
  assert!(err.is_fatal());
  assert_eq!(err.exit_code(), Some(EXIT_MODEL));
  assert!(controller.use_acceleration());

  assert!(matches!(
    controller.run_cycle(),
    Err(ControllerError::Infer(InferError::NotLoaded))
  ));
}

#[test]
fn lost_webcam_disables_capture() {
  // 重连成功后再次连续空读
  let script = CameraScript::default().then_empty();
  let output = Recorder::default();
  let mut controller = Controller::new(
    camera(&script, TransportKind::Usb),
    model(&ModelScript::default()),
    Catalog::default(),
    output.clone(),
    ControllerConfig {
      settle_iterations: Some(3),
      ..ControllerConfig::default()
    },
  )
  .unwrap();

  let err = controller.process_basket().unwrap_err();
  assert!(matches!(err, ControllerError::Capture(CaptureError::LostConnection)));
  assert!(!err.is_fatal());
  assert!(!controller.capture_enabled());
  assert_eq!(controller.phase(), Phase::Idle);

  assert!(matches!(controller.process_basket(), Err(ControllerError::CaptureDisabled)));
  assert!(matches!(controller.start_continuous(), Err(ControllerError::CaptureDisabled)));
  assert_eq!(output.count(), 0);
}

#[test]
fn failed_camera_is_fatal() {
  let script = CameraScript::default()
    .reads(&[false, false, false])
    .opens(&[true, false, false, false]);
  let mut controller = Controller::new(
    camera(&script, TransportKind::Usb),
    model(&ModelScript::default()),
    Catalog::default(),
    Recorder::default(),
    ControllerConfig {
      settle_iterations: Some(3),
      ..ControllerConfig::default()
    },
  )
  .unwrap();

  let err = controller.process_basket().unwrap_err();
  assert!(matches!(err, ControllerError::CameraLost));
  assert_eq!(err.exit_code(), Some(EXIT_CAMERA_LOST));

  let (tx, rx) = unbounded();
  tx.send(Command::ProcessBasket).unwrap();
  assert!(matches!(controller.run(&rx), Err(ControllerError::CameraLost)));
}

#[test]
fn empty_frame_is_not_fatal() {
  let script = CameraScript::default().reads(&[false]);
  let mut controller = controller(&script, TransportKind::File, &ModelScript::default(), &Recorder::default());

  assert!(matches!(
    controller.process_basket(),
    Err(ControllerError::Capture(CaptureError::EmptyFrame))
  ));
  assert_eq!(controller.phase(), Phase::Idle);
  assert!(controller.process_basket().is_ok());
}

#[test]
fn unknown_class_is_reported() {
  let mut controller = controller(
    &CameraScript::default(),
    TransportKind::File,
    &ModelScript::detecting(&[42], 0.9),
    &Recorder::default(),
  );
  let err = controller.process_basket().unwrap_err();
  assert!(matches!(err, ControllerError::Catalog(_)));
  assert!(!err.is_fatal());
}

#[test]
fn malformed_class_ids_skip_the_frame() {
  let model_script = ModelScript::default();
  *model_script.output.lock().unwrap() = RawOutput {
    boxes: vec![0.25; 8],
    classes: vec![-1.0, f32::NAN],
    scores: vec![0.9, 0.8],
  };
  let output = Recorder::default();
  let mut controller = controller(&CameraScript::default(), TransportKind::File, &model_script, &output);

  let err = controller.process_basket().unwrap_err();
  assert!(matches!(err, ControllerError::Infer(InferError::InvalidClass(_))));
  assert!(!err.is_fatal());
  assert_eq!(output.count(), 0);
  assert_eq!(controller.phase(), Phase::Idle);
}

#[test]
fn low_confidence_items_are_not_charged() {
  let output = Recorder::default();
  let mut controller = controller(
    &CameraScript::default(),
    TransportKind::File,
    &ModelScript::detecting(&[4, 4], 0.5),
    &output,
  );
  let report = controller.process_basket().unwrap();
  assert!(report.detections.is_empty());
  assert_eq!(report.checkout.total(), Price::ZERO);
}

#[test]
fn one_shot_task_renders_once() {
  let output = Recorder::default();
  let controller = controller(
    &CameraScript::default(),
    TransportKind::File,
    &ModelScript::detecting(&[9], 0.7),
    &output,
  );
  OneShotTask.run_task(controller).unwrap();
  assert_eq!(output.count(), 1);
}

#[test]
fn continuous_task_waits_between_frames() {
  let output = Recorder::default();
  let controller = Controller::new(
    camera(&CameraScript::default(), TransportKind::Mipi),
    model(&ModelScript::detecting(&[7], 0.9)),
    Catalog::default(),
    output.clone(),
    ControllerConfig {
      frame_delay: Duration::from_millis(60),
      ..ControllerConfig::default()
    },
  )
  .unwrap();
  assert_eq!(controller.frame_delay(), Duration::from_millis(60));

  let started = Instant::now();
  ContinuousTask::default()
    .with_frame_number(Some(4))
    .run_task(controller)
    .unwrap();

  // 4 帧之间有 3 次间隔
  assert!(started.elapsed() >= Duration::from_millis(180));
  assert_eq!(output.count(), 4);
}

#[test]
fn interactive_task_follows_commands() {
  let output = Recorder::default();
  let controller = controller(
    &CameraScript::default(),
    TransportKind::File,
    &ModelScript::detecting(&[5], 0.7),
    &output,
  );
  let (tx, rx) = unbounded();
  tx.send(Command::ProcessBasket).unwrap();
  tx.send(Command::SetThreads(3)).unwrap();
  tx.send(Command::Quit).unwrap();

  InteractiveTask::default()
    .with_commands(tx, rx)
    .run_task(controller)
    .unwrap();
  assert_eq!(output.count(), 1);
}

#[test]
fn still_images_stand_in_for_the_camera() {
  use image::{Rgb, RgbImage};
  use shopping_basket::input::open_camera;

  let dir = tempfile::tempdir().unwrap();
  RgbImage::from_pixel(16, 8, Rgb([200, 10, 10]))
    .save(dir.path().join("basket.png"))
    .unwrap();

  let camera = open_camera(&dir.path().display().to_string(), None, CameraConfig::default()).unwrap();
  assert_eq!(camera.kind(), TransportKind::File);

  let output = Recorder::default();
  let mut controller = Controller::new(
    camera,
    model(&ModelScript::detecting(&[2, 3], 0.95)),
    Catalog::default(),
    output.clone(),
    ControllerConfig::default(),
  )
  .unwrap();

  let report = controller.process_basket().unwrap();
  let names = report
    .checkout
    .table_rows()
    .into_iter()
    .map(|(name, _)| name)
    .collect::<Vec<_>>();
  assert_eq!(names, vec!["Diet Coke", "Fusilli Pasta", "Total Cost:"]);
  assert_eq!(report.checkout.total().to_string(), "1.68");
}
