// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
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

use tracing::{debug, error};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{OpenError, Transport, TransportKind},
  url_path,
};

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const CAPTURE_BUFFERS: u32 = 4;

/// V4L2 摄像头输入
///
/// Stream 持有设备句柄的引用计数，不借用 Device；
/// 释放时仍先停止 stream 再关闭 device。
pub struct V4lInput {
  device_path: String,
  kind: TransportKind,
  device: Option<Device>,
  stream: Option<Stream<'static>>,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = OpenError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(OpenError::Unsupported(url.to_string()));
    }

    // v4l:///dev/video0
    let device_path = url_path(url);
    let device_path = if device_path.is_empty() {
      "/dev/video0".to_string()
    } else {
      device_path
    };
    let kind = TransportKind::guess(&device_path);
    Ok(V4lInput::new(device_path, kind))
  }
}

impl V4lInput {
  pub fn new(device_path: String, kind: TransportKind) -> Self {
    Self {
      device_path,
      kind,
      device: None,
      stream: None,
      width: CAPTURE_WIDTH,
      height: CAPTURE_HEIGHT,
    }
  }

  pub fn with_kind(mut self, kind: TransportKind) -> Self {
    self.kind = kind;
    self
  }

  /// 将 YUYV 格式转换为 RGB
  fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);

    for chunk in yuyv.chunks_exact(4) {
      let y0 = chunk[0] as f32;
      let u = chunk[1] as f32 - 128.0;
      let y1 = chunk[2] as f32;
      let v = chunk[3] as f32 - 128.0;

      for y in [y0, y1] {
        let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        rgb.extend_from_slice(&[r, g, b]);
      }
    }

    rgb
  }
}

impl Transport for V4lInput {
  fn open(&mut self) -> Result<(), OpenError> {
    self.release();

    let device = Device::with_path(&self.device_path)
      .map_err(|e| OpenError::DeviceMissing(format!("{}: {}", self.device_path, e)))?;

    let mut format = device
      .format()
      .map_err(|e| OpenError::Device(e.to_string()))?;
    format.width = CAPTURE_WIDTH;
    format.height = CAPTURE_HEIGHT;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device
      .set_format(&format)
      .map_err(|e| OpenError::Device(e.to_string()))?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(OpenError::Unsupported(format!(
        "{} 不支持 YUYV 格式",
        self.device_path
      )));
    }

    self.width = format.width;
    self.height = format.height;
    debug!("V4L2 格式: {}x{} {}", self.width, self.height, format.fourcc);

    let stream = Stream::with_buffers(&device, Type::VideoCapture, CAPTURE_BUFFERS)
      .map_err(|e| OpenError::Device(format!("无法创建捕获流: {}", e)))?;

    self.device = Some(device);
    self.stream = Some(stream);
    Ok(())
  }

  fn read(&mut self) -> Option<Frame> {
    let stream = self.stream.as_mut()?;

    match stream.next() {
      Ok((buffer, meta)) => {
        let used = (meta.bytesused as usize).min(buffer.len());
        let expected = (self.width * self.height * 2) as usize;
        if used < expected {
          debug!("缓冲区长度不足: {} < {}", used, expected);
          return None;
        }
        let rgb = Self::yuyv_to_rgb(&buffer[..expected], self.width, self.height);
        Frame::from_raw(self.width, self.height, 3, rgb).ok()
      }
      Err(e) => {
        debug!("无法捕获帧: {}", e);
        None
      }
    }
  }

  fn release(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
    self.device.take();
  }

  fn kind(&self) -> TransportKind {
    self.kind
  }

  fn describe(&self) -> String {
    format!("v4l://{}", self.device_path)
  }
}

impl Drop for V4lInput {
  fn drop(&mut self) {
    self.release();
  }
}
