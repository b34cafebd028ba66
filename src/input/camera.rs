// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/input/camera.rs - 摄像头采集适配层
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
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::Frame,
  input::{OpenError, Transport, TransportKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
  Closed,
  Opening,
  Ready,
  Disconnected,
  Reconnecting,
  Failed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
  #[error("读取到空帧")]
  EmptyFrame,
  #[error("摄像头连接丢失")]
  LostConnection,
  #[error("摄像头未就绪: {0:?}")]
  NotReady(CameraState),
}

#[derive(Debug, Clone, Copy)]
pub struct CameraConfig {
  /// 连续空读多少次视为断开
  pub max_empty_reads: u32,
  pub max_reconnect_attempts: u32,
  pub reconnect_backoff: Duration,
}

impl Default for CameraConfig {
  fn default() -> Self {
    Self {
      max_empty_reads: 3,
      max_reconnect_attempts: 3,
      reconnect_backoff: Duration::from_millis(500),
    }
  }
}

/// 独占底层设备的采集端
///
/// 状态机: `Closed -> Opening -> Ready -> (Disconnected -> Reconnecting -> Ready | Failed)`
pub struct Camera<T> {
  transport: T,
  config: CameraConfig,
  state: CameraState,
  consecutive_empty: u32,
  frame_index: u64,
  start_time: Instant,
}

impl<T: Transport> Camera<T> {
  pub fn new(transport: T, config: CameraConfig) -> Self {
    Self {
      transport,
      config,
      state: CameraState::Closed,
      consecutive_empty: 0,
      frame_index: 0,
      start_time: Instant::now(),
    }
  }

  pub fn state(&self) -> CameraState {
    self.state
  }

  pub fn kind(&self) -> TransportKind {
    self.transport.kind()
  }

  pub fn transport(&self) -> &T {
    &self.transport
  }

  pub fn open(&mut self) -> Result<(), OpenError> {
    self.state = CameraState::Opening;
    info!("正在打开输入源: {}", self.transport.describe());
    match self.transport.open() {
      Ok(()) => {
        self.state = CameraState::Ready;
        self.consecutive_empty = 0;
        info!("输入源已打开: {}", self.transport.describe());
        Ok(())
      }
      Err(e) => {
        self.state = CameraState::Closed;
        error!("无法打开输入源 {}: {}", self.transport.describe(), e);
        Err(e)
      }
    }
  }

  pub fn close(&mut self) {
    self.transport.release();
    self.state = CameraState::Closed;
  }

  /// 连续读取 `settle_iterations` 帧，丢弃前 N-1 帧，返回第 N 帧
  pub fn get_frame(&mut self, settle_iterations: u32) -> Result<Frame, CaptureError> {
    let settle = settle_iterations.max(1);
    let mut recovered = false;

    match self.state {
      CameraState::Ready => {}
      CameraState::Disconnected => {
        self.recover()?;
        recovered = true;
      }
      CameraState::Failed => return Err(CaptureError::LostConnection),
      state => return Err(CaptureError::NotReady(state)),
    }

    let max_empty = self.config.max_empty_reads.max(1);
    let mut remaining = settle;
    loop {
      let read = self.transport.read();
      remaining -= 1;

      match read {
        Some(frame) => {
          self.consecutive_empty = 0;
          if remaining == 0 {
            let frame = frame.with_index(self.frame_index, self.start_time.elapsed().as_millis() as u64);
            self.frame_index += 1;
            return Ok(frame);
          }
        }
        None => {
          self.consecutive_empty += 1;
          debug!("空读 ({}/{})", self.consecutive_empty, max_empty);

          if self.consecutive_empty >= max_empty {
            warn!("连续 {} 次读取空帧，摄像头连接丢失", self.consecutive_empty);
            self.state = CameraState::Disconnected;
            if recovered {
              return Err(CaptureError::LostConnection);
            }
            self.recover()?;
            recovered = true;
            remaining = settle;
          } else if remaining == 0 {
            return Err(CaptureError::EmptyFrame);
          }
        }
      }
    }
  }

  fn recover(&mut self) -> Result<(), CaptureError> {
    self.state = CameraState::Reconnecting;
    let attempts = self.config.max_reconnect_attempts;

    for attempt in 1..=attempts {
      if attempt > 1 && !self.config.reconnect_backoff.is_zero() {
        thread::sleep(self.config.reconnect_backoff);
      }
      self.transport.release();
      info!("尝试重新连接摄像头 ({}/{})", attempt, attempts);
      match self.transport.open() {
        Ok(()) => {
          self.state = CameraState::Ready;
          self.consecutive_empty = 0;
          info!("摄像头重新连接成功");
          return Ok(());
        }
        Err(e) => warn!("重新连接失败: {}", e),
      }
    }

    self.state = CameraState::Failed;
    error!("{} 次重新连接均失败，放弃", attempts);
    Err(CaptureError::LostConnection)
  }
}
