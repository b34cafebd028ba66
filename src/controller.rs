// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/controller.rs - 采集与推理的调度
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

use std::{ops::ControlFlow, str::FromStr, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  catalog::{Catalog, CatalogError},
  checkout::Report,
  frame::Frame,
  input::{Camera, CameraState, CaptureError, Transport},
  model::{BackendLoader, InferError, Inference, LoadError, ModelSlot},
  output::{OutputError, Render},
  worker::{Worker, WorkerError},
};

pub const EXIT_CAMERA_INIT: i32 = 2;
pub const EXIT_MODEL: i32 = 3;
pub const EXIT_CAMERA_LOST: i32 = 4;

const CONTINUOUS_SETTLE: u32 = 1;

#[derive(Error, Debug)]
pub enum ControllerError {
  #[error("请先切换到下一个购物篮")]
  AwaitingNext,
  #[error("摄像头不可用，拍摄相关命令已禁用")]
  CaptureDisabled,
  #[error("摄像头连接丢失且无法恢复")]
  CameraLost,
  #[error("采集错误: {0}")]
  Capture(#[from] CaptureError),
  #[error("推理错误: {0}")]
  Infer(#[from] InferError),
  #[error("模型加载错误: {0}")]
  Load(#[from] LoadError),
  #[error("价目表错误: {0}")]
  Catalog(#[from] CatalogError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
  #[error("工作线程错误: {0}")]
  Worker(#[from] WorkerError),
}

impl ControllerError {
  /// 致命错误会结束命令循环
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      ControllerError::CameraLost
        | ControllerError::Load(_)
        | ControllerError::Output(_)
        | ControllerError::Worker(_)
    )
  }

  pub fn exit_code(&self) -> Option<i32> {
    match self {
      ControllerError::CameraLost => Some(EXIT_CAMERA_LOST),
      ControllerError::Load(_) => Some(EXIT_MODEL),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  StartContinuous,
  StopContinuous,
  ProcessBasket,
  NextBasket,
  SetThreads(usize),
  ToggleAcceleration,
  Quit,
}

impl Command {
  /// 会改变运行模式的命令，执行前正在进行的连续帧结果将被丢弃
  pub fn changes_mode(&self) -> bool {
    !matches!(self, Command::SetThreads(_) | Command::ToggleAcceleration)
  }
}

impl FromStr for Command {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut parts = s.split_whitespace();
    let head = parts.next().unwrap_or_default().to_ascii_lowercase();
    let command = match head.as_str() {
      "c" | "continuous" | "start" => Command::StartContinuous,
      "s" | "stop" => Command::StopContinuous,
      "p" | "process" => Command::ProcessBasket,
      "n" | "next" => Command::NextBasket,
      "a" | "accel" | "acceleration" => Command::ToggleAcceleration,
      "q" | "quit" | "exit" => Command::Quit,
      "t" | "threads" => {
        let threads = parts
          .next()
          .ok_or_else(|| "缺少线程数".to_string())?
          .parse::<usize>()
          .map_err(|e| format!("无效的线程数: {}", e))?;
        Command::SetThreads(threads)
      }
      "" => return Err("空命令".to_string()),
      other => return Err(format!("未知命令: {}", other)),
    };
    if let Some(extra) = parts.next() {
      return Err(format!("多余的参数: {}", extra));
    }
    Ok(command)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Idle,
  Continuous,
  /// 单次拍摄的结果正在展示，等待下一个购物篮
  Holding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
  pub settle: u32,
}

#[derive(Debug)]
pub struct CaptureReply {
  pub result: Result<Frame, CaptureError>,
  pub state: CameraState,
}

#[derive(Debug)]
pub enum InferRequest {
  Detect(Frame),
  SetThreads(usize),
  Reload { use_acceleration: bool },
}

#[derive(Debug)]
pub enum InferReply {
  /// 帧随结果一起交还，供渲染使用
  Detected {
    frame: Frame,
    result: Result<Inference, InferError>,
  },
  ThreadsSet,
  Reloaded(Result<(), LoadError>),
}

pub fn spawn_capture<T: Transport + 'static>(
  camera: Camera<T>,
) -> Result<Worker<CaptureRequest, CaptureReply>, WorkerError> {
  Worker::spawn(
    "capture",
    camera,
    |camera: &mut Camera<T>, request: CaptureRequest| {
      let result = camera.get_frame(request.settle);
      CaptureReply {
        result,
        state: camera.state(),
      }
    },
  )
}

pub fn spawn_inference<L: BackendLoader>(
  slot: ModelSlot<L>,
) -> Result<Worker<InferRequest, InferReply>, WorkerError> {
  Worker::spawn(
    "inference",
    slot,
    |slot: &mut ModelSlot<L>, request: InferRequest| match request {
      InferRequest::Detect(frame) => {
        let result = slot.infer(&frame);
        InferReply::Detected { frame, result }
      }
      InferRequest::SetThreads(threads) => {
        slot.set_threads(threads);
        InferReply::ThreadsSet
      }
      InferRequest::Reload { use_acceleration } => InferReply::Reloaded(slot.reload(use_acceleration)),
    },
  )
}

#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
  /// 单次拍摄丢弃的帧数，`None` 时由接入方式决定
  pub settle_iterations: Option<u32>,
  /// 连续模式下两帧之间的间隔
  pub frame_delay: Duration,
}

/// 展示控制器
///
/// 持有采集与推理两个工作线程，所有命令在调用线程上串行处理。
pub struct Controller<O> {
  capture: Worker<CaptureRequest, CaptureReply>,
  inference: Worker<InferRequest, InferReply>,
  catalog: Catalog,
  output: O,
  phase: Phase,
  resume_continuous: bool,
  capture_enabled: bool,
  settle_iterations: u32,
  frame_delay: Duration,
  use_acceleration: bool,
}

impl<O: Render<Error = OutputError>> Controller<O> {
  pub fn new<T, L>(
    camera: Camera<T>,
    slot: ModelSlot<L>,
    catalog: Catalog,
    output: O,
    config: ControllerConfig,
  ) -> Result<Self, ControllerError>
  where
    T: Transport + 'static,
    L: BackendLoader,
  {
    let settle_iterations = config
      .settle_iterations
      .unwrap_or_else(|| camera.kind().settle_iterations())
      .max(1);
    let use_acceleration = slot.config().backend.use_acceleration;
    info!(
      "接入方式 {:?}，单次拍摄丢弃 {} 帧",
      camera.kind(),
      settle_iterations - 1
    );

    Ok(Self {
      capture: spawn_capture(camera)?,
      inference: spawn_inference(slot)?,
      catalog,
      output,
      phase: Phase::Idle,
      resume_continuous: false,
      capture_enabled: true,
      settle_iterations,
      frame_delay: config.frame_delay,
      use_acceleration,
    })
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  pub fn capture_enabled(&self) -> bool {
    self.capture_enabled
  }

  pub fn use_acceleration(&self) -> bool {
    self.use_acceleration
  }

  pub fn settle_iterations(&self) -> u32 {
    self.settle_iterations
  }

  pub fn frame_delay(&self) -> Duration {
    self.frame_delay
  }

  pub fn catalog(&self) -> &Catalog {
    &self.catalog
  }

  pub fn output(&self) -> &O {
    &self.output
  }

  pub fn start_continuous(&mut self) -> Result<(), ControllerError> {
    if !self.capture_enabled {
      return Err(ControllerError::CaptureDisabled);
    }
    match self.phase {
      Phase::Holding => {
        info!("连续模式将在下一个购物篮时恢复");
        self.resume_continuous = true;
      }
      Phase::Idle => {
        info!("开始连续模式");
        self.phase = Phase::Continuous;
      }
      Phase::Continuous => {}
    }
    Ok(())
  }

  pub fn stop_continuous(&mut self) {
    self.resume_continuous = false;
    if self.phase == Phase::Continuous {
      info!("停止连续模式");
      self.phase = Phase::Idle;
    }
  }

  /// 拍摄一张稳定后的图像并推理，结果保持展示直到 [`Controller::next_basket`]
  pub fn process_basket(&mut self) -> Result<Report, ControllerError> {
    if self.phase == Phase::Holding {
      return Err(ControllerError::AwaitingNext);
    }
    if !self.capture_enabled {
      return Err(ControllerError::CaptureDisabled);
    }

    let previous = self.phase;
    self.phase = Phase::Idle;
    info!("处理购物篮");

    let result = self
      .shoot(self.settle_iterations, None, &mut Vec::new())
      .and_then(|(frame, report)| {
        self.output.render_result(&frame, &report)?;
        Ok(report)
      });

    match result {
      Ok(report) => {
        self.resume_continuous = previous == Phase::Continuous;
        self.phase = Phase::Holding;
        info!(
          "共 {} 件商品，总价 {}{}",
          report.checkout.rows().len(),
          report.checkout.currency(),
          report.checkout.total()
        );
        Ok(report)
      }
      Err(e) => {
        if self.capture_enabled {
          self.phase = previous;
        }
        Err(e)
      }
    }
  }

  pub fn next_basket(&mut self) -> Result<(), ControllerError> {
    if self.phase != Phase::Holding {
      debug!("没有正在展示的购物篮");
      return Ok(());
    }

    self.output.clear()?;
    self.phase = if self.resume_continuous && self.capture_enabled {
      info!("恢复连续模式");
      Phase::Continuous
    } else {
      Phase::Idle
    };
    self.resume_continuous = false;
    Ok(())
  }

  /// 连续模式的一个周期: 取一帧，推理并渲染
  pub fn run_cycle(&mut self) -> Result<Report, ControllerError> {
    let (frame, report) = self.shoot(CONTINUOUS_SETTLE, None, &mut Vec::new())?;
    self.output.render_result(&frame, &report)?;
    Ok(report)
  }

  pub fn set_threads(&mut self, threads: usize) -> Result<(), ControllerError> {
    info!("设置推理线程数: {}", threads);
    let reply = self.inference.submit(InferRequest::SetThreads(threads))?.wait()?;
    match reply {
      InferReply::ThreadsSet => Ok(()),
      _ => Err(WorkerError::UnexpectedReply(self.inference.name().to_string()).into()),
    }
  }

  /// 切换加速选项，模型会被销毁后重新加载
  pub fn toggle_acceleration(&mut self) -> Result<(), ControllerError> {
    let use_acceleration = !self.use_acceleration;
    let request = InferRequest::Reload { use_acceleration };
    let reply = self.inference.submit(request)?.wait()?;
    match reply {
      InferReply::Reloaded(Ok(())) => {
        self.use_acceleration = use_acceleration;
        info!("加速已{}", if use_acceleration { "开启" } else { "关闭" });
        Ok(())
      }
      InferReply::Reloaded(Err(e)) => {
        error!("重新加载模型失败: {}", e);
        Err(e.into())
      }
      _ => Err(WorkerError::UnexpectedReply(self.inference.name().to_string()).into()),
    }
  }

  /// 执行一条命令，非致命错误仅记录日志
  pub fn dispatch(&mut self, command: Command) -> Result<ControlFlow<()>, ControllerError> {
    debug!("命令: {:?}", command);
    let result = match command {
      Command::StartContinuous => self.start_continuous(),
      Command::StopContinuous => {
        self.stop_continuous();
        Ok(())
      }
      Command::ProcessBasket => self.process_basket().map(|_| ()),
      Command::NextBasket => self.next_basket(),
      Command::SetThreads(threads) => self.set_threads(threads),
      Command::ToggleAcceleration => self.toggle_acceleration(),
      Command::Quit => {
        info!("退出命令循环");
        return Ok(ControlFlow::Break(()));
      }
    };

    match result {
      Ok(()) => Ok(ControlFlow::Continue(())),
      Err(e) if e.is_fatal() => Err(e),
      Err(e) => {
        warn!("{:?} 未完成: {}", command, e);
        Ok(ControlFlow::Continue(()))
      }
    }
  }

  /// 命令循环，直到收到 [`Command::Quit`]、命令通道关闭或发生致命错误
  pub fn run(&mut self, commands: &Receiver<Command>) -> Result<(), ControllerError> {
    info!("进入命令循环");
    loop {
      if self.phase != Phase::Continuous {
        let Ok(command) = commands.recv() else {
          info!("命令通道已关闭");
          return Ok(());
        };
        if self.dispatch(command)?.is_break() {
          return Ok(());
        }
        continue;
      }

      // 处理过程中到达的命令在结果返回后执行
      let mut pending = Vec::new();
      let result = self.shoot(CONTINUOUS_SETTLE, Some(commands), &mut pending);
      pending.extend(commands.try_iter());
      let mode_changed = pending.iter().any(Command::changes_mode);
      match result {
        Ok(_) if mode_changed => debug!("运行模式已改变，丢弃本帧结果"),
        Ok((frame, report)) => self.output.render_result(&frame, &report)?,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => warn!("本帧处理失败: {}", e),
      }

      for command in pending {
        if self.dispatch(command)?.is_break() {
          return Ok(());
        }
      }

      if self.phase == Phase::Continuous && !self.frame_delay.is_zero() {
        match commands.recv_timeout(self.frame_delay) {
          Ok(command) => {
            if self.dispatch(command)?.is_break() {
              return Ok(());
            }
          }
          Err(RecvTimeoutError::Timeout) => {}
          Err(RecvTimeoutError::Disconnected) => {
            info!("命令通道已关闭");
            return Ok(());
          }
        }
      }
    }
  }

  fn shoot(
    &mut self,
    settle: u32,
    commands: Option<&Receiver<Command>>,
    pending: &mut Vec<Command>,
  ) -> Result<(Frame, Report), ControllerError> {
    let frame = self.capture(settle, commands, pending)?;
    let (frame, inference) = self.detect(frame, commands, pending)?;
    let report = Report::new(&self.catalog, frame.index(), &inference)?;
    debug!(
      "第 {} 帧: {} 个物体，推理耗时 {} ms",
      report.frame_index,
      report.detections.len(),
      report.elapsed_ms
    );
    Ok((frame, report))
  }

  fn capture(
    &mut self,
    settle: u32,
    commands: Option<&Receiver<Command>>,
    pending: &mut Vec<Command>,
  ) -> Result<Frame, ControllerError> {
    if !self.capture_enabled {
      return Err(ControllerError::CaptureDisabled);
    }

    let ticket = self.capture.submit(CaptureRequest { settle })?;
    let reply = match commands {
      Some(commands) => ticket.wait_with(commands, |command| pending.push(command))?,
      None => ticket.wait()?,
    };

    match reply.result {
      Ok(frame) => Ok(frame),
      Err(CaptureError::LostConnection) if reply.state == CameraState::Failed => {
        error!("摄像头连接丢失，重连失败");
        Err(ControllerError::CameraLost)
      }
      Err(CaptureError::LostConnection) => {
        warn!("摄像头连接丢失，禁用拍摄相关命令");
        self.capture_enabled = false;
        self.phase = Phase::Idle;
        self.resume_continuous = false;
        Err(CaptureError::LostConnection.into())
      }
      Err(e) => Err(e.into()),
    }
  }

  fn detect(
    &mut self,
    frame: Frame,
    commands: Option<&Receiver<Command>>,
    pending: &mut Vec<Command>,
  ) -> Result<(Frame, Inference), ControllerError> {
    let ticket = self.inference.submit(InferRequest::Detect(frame))?;
    let reply = match commands {
      Some(commands) => ticket.wait_with(commands, |command| pending.push(command))?,
      None => ticket.wait()?,
    };

    match reply {
      InferReply::Detected { frame, result } => Ok((frame, result?)),
      _ => Err(WorkerError::UnexpectedReply(self.inference.name().to_string()).into()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn commands_are_parsed_from_lines() {
    assert_eq!("p".parse::<Command>(), Ok(Command::ProcessBasket));
    assert_eq!(" Next ".parse::<Command>(), Ok(Command::NextBasket));
    assert_eq!("t 4".parse::<Command>(), Ok(Command::SetThreads(4)));
    assert_eq!("threads 1".parse::<Command>(), Ok(Command::SetThreads(1)));
    assert_eq!("q".parse::<Command>(), Ok(Command::Quit));
    assert!("t".parse::<Command>().is_err());
    assert!("t four".parse::<Command>().is_err());
    assert!("p now".parse::<Command>().is_err());
    assert!("".parse::<Command>().is_err());
    assert!("dance".parse::<Command>().is_err());
  }

  #[test]
  fn tuning_commands_keep_the_mode() {
    assert!(!Command::SetThreads(2).changes_mode());
    assert!(!Command::ToggleAcceleration.changes_mode());
    assert!(Command::StopContinuous.changes_mode());
    assert!(Command::ProcessBasket.changes_mode());
  }

  #[test]
  fn fatal_errors_map_to_exit_codes() {
    assert!(ControllerError::CameraLost.is_fatal());
    assert_eq!(ControllerError::CameraLost.exit_code(), Some(EXIT_CAMERA_LOST));
    let load = ControllerError::Load(LoadError::Malformed("bad".to_string()));
    assert_eq!(load.exit_code(), Some(EXIT_MODEL));
    assert!(!ControllerError::AwaitingNext.is_fatal());
    assert!(!ControllerError::Capture(CaptureError::EmptyFrame).is_fatal());
  }
}
