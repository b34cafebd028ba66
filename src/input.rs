// 该文件是 Shopping Basket （购物篮） 项目的一部分。
// src/input.rs - 摄像头/图像输入
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
  path::{Path, PathBuf},
  str::FromStr,
};

use thiserror::Error;
use tracing::info;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod camera;
pub use self::camera::{Camera, CameraConfig, CameraState, CaptureError};

mod read_image_file;
pub use self::read_image_file::ImageFileInput;

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::V4lInput;

const V4L_BY_ID_DIR: &str = "/dev/v4l/by-id";
const DEFAULT_DEVICE: &str = "/dev/video0";

#[derive(Error, Debug)]
pub enum OpenError {
  #[error("设备不存在: {0}")]
  DeviceMissing(String),
  #[error("不支持的输入来源: {0}")]
  Unsupported(String),
  #[error("设备错误: {0}")]
  Device(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 摄像头的接入方式，决定单次拍摄时丢弃的帧数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
  Mipi,
  Usb,
  File,
}

impl TransportKind {
  pub fn settle_iterations(self) -> u32 {
    match self {
      TransportKind::Mipi => 6,
      TransportKind::Usb => 2,
      TransportKind::File => 1,
    }
  }

  /// 根据设备路径猜测接入方式
  pub fn guess(device_path: &str) -> Self {
    let lower = device_path.to_ascii_lowercase();
    if lower.contains("by-id") || lower.contains("usb") {
      TransportKind::Usb
    } else {
      TransportKind::Mipi
    }
  }
}

impl FromStr for TransportKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "mipi" => Ok(TransportKind::Mipi),
      "usb" => Ok(TransportKind::Usb),
      "file" => Ok(TransportKind::File),
      other => Err(format!("未知的接入方式: {}", other)),
    }
  }
}

/// 底层帧来源，由 [`Camera`] 独占
pub trait Transport: Send {
  fn open(&mut self) -> Result<(), OpenError>;
  /// 读取一帧，`None` 表示空读
  fn read(&mut self) -> Option<Frame>;
  fn release(&mut self);
  fn kind(&self) -> TransportKind;
  fn describe(&self) -> String;
}

/// 空字符串表示自动选择: 优先 `/dev/v4l/by-id` 下的第一个设备，否则 `/dev/video0`
pub fn resolve_source(source: &str) -> String {
  if !source.trim().is_empty() {
    return source.trim().to_string();
  }

  if let Ok(entries) = std::fs::read_dir(V4L_BY_ID_DIR) {
    let mut paths = entries
      .filter_map(|entry| entry.ok())
      .map(|entry| entry.path())
      .collect::<Vec<PathBuf>>();
    paths.sort();
    if let Some(first) = paths.first() {
      info!("自动选择摄像头: {}", first.display());
      return first.display().to_string();
    }
  }

  info!("自动选择默认摄像头: {}", DEFAULT_DEVICE);
  DEFAULT_DEVICE.to_string()
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4l(V4lInput),
}

impl FromUrl for InputWrapper {
  type Error = OpenError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() == ImageFileInput::SCHEME {
      return Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?));
    }
    #[cfg(feature = "v4l_input")]
    {
      if url.scheme() == V4lInput::SCHEME {
        return Ok(InputWrapper::V4l(V4lInput::from_url(url)?));
      }
    }
    Err(OpenError::Unsupported(url.to_string()))
  }
}

impl InputWrapper {
  /// 由设备路径、图片路径或 URL 构造输入
  pub fn from_source(source: &str) -> Result<Self, OpenError> {
    let source = resolve_source(source);

    if let Ok(url) = url::Url::parse(&source)
      && url.scheme().len() > 1
    {
      return Self::from_url(&url);
    }

    let path = Path::new(&source);
    if source.starts_with("/dev/") {
      return Self::from_device(path);
    }
    Self::from_image_path(path)
  }

  #[cfg(feature = "v4l_input")]
  fn from_device(path: &Path) -> Result<Self, OpenError> {
    Ok(InputWrapper::V4l(V4lInput::new(
      path.display().to_string(),
      TransportKind::guess(&path.display().to_string()),
    )))
  }

  #[cfg(not(feature = "v4l_input"))]
  fn from_device(path: &Path) -> Result<Self, OpenError> {
    Err(OpenError::Unsupported(format!(
      "{} (未启用 v4l_input 特性)",
      path.display()
    )))
  }

  fn from_image_path(path: &Path) -> Result<Self, OpenError> {
    Ok(InputWrapper::ReadImageFile(ImageFileInput::new(path)))
  }

  /// 覆盖自动猜测的接入方式
  pub fn with_kind(self, kind: TransportKind) -> Self {
    match self {
      InputWrapper::ReadImageFile(input) => InputWrapper::ReadImageFile(input.with_kind(kind)),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => InputWrapper::V4l(input.with_kind(kind)),
    }
  }
}

impl Transport for InputWrapper {
  fn open(&mut self) -> Result<(), OpenError> {
    match self {
      InputWrapper::ReadImageFile(input) => input.open(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.open(),
    }
  }

  fn read(&mut self) -> Option<Frame> {
    match self {
      InputWrapper::ReadImageFile(input) => input.read(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.read(),
    }
  }

  fn release(&mut self) {
    match self {
      InputWrapper::ReadImageFile(input) => input.release(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.release(),
    }
  }

  fn kind(&self) -> TransportKind {
    match self {
      InputWrapper::ReadImageFile(input) => input.kind(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.kind(),
    }
  }

  fn describe(&self) -> String {
    match self {
      InputWrapper::ReadImageFile(input) => input.describe(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.describe(),
    }
  }
}

/// 打开摄像头: 解析来源并完成 `Closed -> Opening -> Ready`
pub fn open_camera(
  source: &str,
  kind: Option<TransportKind>,
  config: CameraConfig,
) -> Result<Camera<InputWrapper>, OpenError> {
  let mut input = InputWrapper::from_source(source)?;
  if let Some(kind) = kind {
    input = input.with_kind(kind);
  }
  let mut camera = Camera::new(input, config);
  camera.open()?;
  Ok(camera)
}
